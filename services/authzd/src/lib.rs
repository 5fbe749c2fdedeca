//! Authorization daemon library crate.
//!
//! # Purpose
//! Exposes configuration, wiring, observability, and the Postgres-backed
//! store and notifier so the binary and integration tests share one setup path.
pub mod app;
pub mod config;
pub mod notify;
pub mod observability;
pub mod store;
