//! Relation store contract.
//!
//! # Purpose
//! The durable source of truth for grant and assignment tuples. The enforcer
//! treats it as an opaque tuple set with pattern queries.
//!
//! # Key invariants
//! - `insert` of an existing tuple and `delete` of a missing tuple succeed.
//! - A successful `insert`/`delete` is durable before it returns.
//! - Implementations must be safe under concurrent use from every replica.
use crate::tuple::{Tuple, TuplePattern};
use async_trait::async_trait;
use thiserror::Error;

mod memory;

pub use memory::InMemoryRelationStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RelationStore: Send + Sync {
    async fn insert(&self, tuple: &Tuple) -> StoreResult<()>;
    async fn delete(&self, tuple: &Tuple) -> StoreResult<()>;
    async fn query(&self, pattern: &TuplePattern) -> StoreResult<Vec<Tuple>>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
