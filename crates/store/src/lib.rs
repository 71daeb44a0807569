//! Durable state on PostgreSQL.
//!
//! Stateless store structs with async methods taking a `&PgPool`, one per
//! aggregate. Standard reads always filter `deleted_at IS NULL`; the
//! explicit `*_include_deleted`, hard-delete, and prune APIs are the only
//! paths that see or remove soft-deleted rows.

pub mod activity;
pub mod chapters;
pub mod cleanup;
pub mod db;
pub mod error;
pub mod failures;
pub mod feed;
pub mod imports;
pub mod library;
pub mod notifications;
pub mod query_stats;
pub mod reads;
pub mod series;
pub mod series_sources;
pub mod users;

pub use db::init_pg_pool;
pub use error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;
