//! Durable relation store backends for the daemon.
//!
//! The in-memory store lives in `tollgate-authz`; this module adds Postgres.
pub mod postgres;

pub use postgres::{PostgresRelationStore, connect_pool};
