//! # duet-store
//!
//! Durable storage for Duet: the message store and the user directory,
//! backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every operation the
//! message service needs. Callers that share it across tasks wrap it in a
//! mutex; every multi-statement operation runs inside its own transaction.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;
mod row;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
