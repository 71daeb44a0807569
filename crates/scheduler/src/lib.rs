//! Crawl scheduling: the master scheduler, crawl gatekeeper, source-poll
//! worker, tier maintenance, and search storm control.

pub mod gatekeeper;
pub mod intervals;
pub mod maintenance;
pub mod master;
pub mod poll;
pub mod storm;
pub mod tiers;

pub use gatekeeper::{GateDecision, Gatekeeper};
pub use intervals::poll_interval;
pub use master::{run_master_scheduler, SchedulerContext};
pub use poll::SourcePollWorker;
pub use storm::{normalized_key, SearchStormController, UserClass};
