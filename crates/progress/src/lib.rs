//! Read-progress engine: monotone progress, bulk-mark semantics,
//! at-most-once XP, and the anti-abuse / trust layer.

pub mod engine;
pub mod limits;
pub mod trust;
pub mod xp;

pub use engine::{ProgressEngine, ProgressError, ProgressOutcome, ProgressRequest};
pub use limits::RateWindows;
pub use trust::{TrustGuard, ViolationKind};
