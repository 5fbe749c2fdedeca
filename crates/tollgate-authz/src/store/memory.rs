//! In-memory implementation of the relation store.
//!
//! # Purpose
//! Holds grant and assignment tuples in `HashSet`s guarded by
//! `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - single-process deployments where durability is not required
//!
//! # Durability and consistency
//! - **Not durable**: all tuples are lost on process restart.
//! - **Single-process consistency**: clones share the same sets, so several
//!   enforcers in one process can act as replicas over one store.
//! - Set semantics give idempotent insert/delete for free.
use super::{RelationStore, StoreResult};
use crate::tuple::{AssignmentTuple, GrantTuple, Tuple, TuplePattern};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct InMemoryRelationStore {
    grants: Arc<RwLock<HashSet<GrantTuple>>>,
    assignments: Arc<RwLock<HashSet<AssignmentTuple>>>,
}

impl InMemoryRelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tuples across both relations.
    pub async fn len(&self) -> usize {
        self.grants.read().await.len() + self.assignments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RelationStore for InMemoryRelationStore {
    async fn insert(&self, tuple: &Tuple) -> StoreResult<()> {
        match tuple {
            Tuple::Grant(grant) => {
                self.grants.write().await.insert(grant.clone());
            }
            Tuple::Assignment(assignment) => {
                self.assignments.write().await.insert(assignment.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, tuple: &Tuple) -> StoreResult<()> {
        match tuple {
            Tuple::Grant(grant) => {
                self.grants.write().await.remove(grant);
            }
            Tuple::Assignment(assignment) => {
                self.assignments.write().await.remove(assignment);
            }
        }
        Ok(())
    }

    async fn query(&self, pattern: &TuplePattern) -> StoreResult<Vec<Tuple>> {
        // Sorted output keeps reload order deterministic.
        let mut items: Vec<Tuple> = match pattern {
            TuplePattern::Grant(_) => {
                let mut grants: Vec<GrantTuple> =
                    self.grants.read().await.iter().cloned().collect();
                grants.sort();
                grants.into_iter().map(Tuple::Grant).collect()
            }
            TuplePattern::Assignment(_) => {
                let mut assignments: Vec<AssignmentTuple> =
                    self.assignments.read().await.iter().cloned().collect();
                assignments.sort();
                assignments.into_iter().map(Tuple::Assignment).collect()
            }
        };
        items.retain(|tuple| pattern.matches(tuple));
        Ok(items)
    }

    async fn health_check(&self) -> StoreResult<()> {
        // Always healthy while the process is running.
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
