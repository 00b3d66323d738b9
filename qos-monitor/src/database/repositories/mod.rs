//! Repository layer for database access.

pub mod measurement;
pub mod process;
pub mod schedule;
pub mod service;

pub use measurement::*;
pub use process::*;
pub use schedule::*;
pub use service::*;

/// Whether an error is a primary key or unique constraint conflict.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
