//! Casbin-backed enforcer over the relation store.
//!
//! # Purpose and responsibility
//! Keeps an in-memory Casbin index of every grant and assignment tuple,
//! answers role-membership and grant lookups from it, and wraps each tuple
//! mutation so the durable write, the local index refresh, and the fleet-wide
//! notification happen in that order.
//!
//! # Key invariants and assumptions
//! - The index is rebuilt wholesale from the store and swapped in with one
//!   atomic pointer store; readers see the fully-old or fully-new index.
//! - Reloads are serialized, so an older snapshot never replaces a newer one.
//! - A write is durable before the local reload, and the local reload finishes
//!   before the notification goes out.
//!
//! # Concurrency
//! Queries are lock-free (`ArcSwap::load`). Mutations and reloads may block on
//! store I/O; no internal timeouts are applied.
use crate::casbin_model::casbin_model;
use crate::errors::{AuthzError, AuthzResult};
use crate::notifier::{ChangeNotifier, PolicyChange};
use crate::store::RelationStore;
use crate::tuple::{AssignmentTuple, GrantTuple, Tuple, TuplePattern};
use arc_swap::ArcSwap;
use casbin::{CoreApi, Enforcer, MemoryAdapter, MgmtApi};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Domain restriction for grant lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainFilter<'a> {
    Exact(&'a str),
    /// Any domain; used for role-as-subject grant lookups.
    Any,
}

impl DomainFilter<'_> {
    fn admits(&self, domain: &str) -> bool {
        match self {
            DomainFilter::Exact(expected) => *expected == domain,
            DomainFilter::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Write {
    Insert,
    Delete,
}

pub struct PolicyEnforcer {
    instance_id: String,
    store: Arc<dyn RelationStore>,
    notifier: Arc<dyn ChangeNotifier>,
    index: ArcSwap<Enforcer>,
    reload_lock: Mutex<()>,
}

impl PolicyEnforcer {
    /// Build the enforcer and load its first index from the store.
    pub async fn new(
        store: Arc<dyn RelationStore>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> AuthzResult<Arc<Self>> {
        let instance_id = uuid::Uuid::new_v4().to_string();
        let index = build_index(store.as_ref()).await?;
        tracing::info!(
            instance_id = %instance_id,
            store = store.backend_name(),
            notifier = notifier.backend_name(),
            "policy enforcer loaded"
        );
        Ok(Arc::new(Self {
            instance_id,
            store,
            notifier,
            index: ArcSwap::from_pointee(index),
            reload_lock: Mutex::new(()),
        }))
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Probe the relation store.
    ///
    /// # Errors
    /// - `AuthzError::Store` when the backend cannot answer.
    pub async fn health_check(&self) -> AuthzResult<()> {
        Ok(self.store.health_check().await?)
    }

    pub fn store_is_durable(&self) -> bool {
        self.store.is_durable()
    }

    /// Roles directly assigned to `subject` in `domain`, sorted.
    ///
    /// # What it does
    /// Reads the grouping rules whose first field is `subject` from the current
    /// index snapshot and keeps those in `domain`.
    ///
    /// # Invariants
    /// - Lock-free; answers from whichever index was last swapped in.
    /// - Role hierarchies are not expanded; only direct assignments count.
    pub fn role_membership(&self, subject: &str, domain: &str) -> Vec<String> {
        let index = self.index.load();
        let roles: BTreeSet<String> = index
            .get_filtered_grouping_policy(0, vec![subject.to_string()])
            .iter()
            .filter_map(|rule| AssignmentTuple::from_rule(rule))
            .filter(|assignment| assignment.domain == domain)
            .map(|assignment| assignment.role)
            .collect();
        roles.into_iter().collect()
    }

    /// Grant tuples whose subject is `subject`, restricted by `domain`.
    ///
    /// # Why it exists
    /// Role permission lookups use `DomainFilter::Any`, so a role's grants are
    /// shared by every domain in which the role is assigned. `Exact` is there
    /// for callers that want the stored domain honoured.
    ///
    /// # Example
    /// ```rust
    /// use std::sync::Arc;
    /// use tollgate_authz::{
    ///     BroadcastNotifier, DomainFilter, GrantTuple, InMemoryRelationStore, PolicyEnforcer,
    /// };
    ///
    /// # async fn demo() -> tollgate_authz::AuthzResult<()> {
    /// let enforcer = PolicyEnforcer::new(
    ///     Arc::new(InMemoryRelationStore::new()),
    ///     Arc::new(BroadcastNotifier::new(16)),
    /// )
    /// .await?;
    /// enforcer.add_grant(&GrantTuple::new("admin", "ns1", "token", "write")).await?;
    /// assert_eq!(enforcer.grants_for("admin", DomainFilter::Any).len(), 1);
    /// assert!(enforcer.grants_for("admin", DomainFilter::Exact("ns2")).is_empty());
    /// # Ok(())
    /// # }
    /// ```
    pub fn grants_for(&self, subject: &str, domain: DomainFilter<'_>) -> Vec<GrantTuple> {
        let index = self.index.load();
        index
            .get_filtered_policy(0, vec![subject.to_string()])
            .iter()
            .filter_map(|rule| GrantTuple::from_rule(rule))
            .filter(|grant| domain.admits(&grant.domain))
            .collect()
    }

    /// Users holding `role` in `domain`, sorted.
    pub fn users_for_role(&self, role: &str, domain: &str) -> Vec<String> {
        let index = self.index.load();
        let users: BTreeSet<String> = index
            .get_filtered_grouping_policy(1, vec![role.to_string()])
            .iter()
            .filter_map(|rule| AssignmentTuple::from_rule(rule))
            .filter(|assignment| assignment.domain == domain)
            .map(|assignment| assignment.user)
            .collect();
        users.into_iter().collect()
    }

    /// Every domain in which `subject` holds at least one role, sorted.
    pub fn domains_for_subject(&self, subject: &str) -> Vec<String> {
        let index = self.index.load();
        let domains: BTreeSet<String> = index
            .get_filtered_grouping_policy(0, vec![subject.to_string()])
            .iter()
            .filter_map(|rule| AssignmentTuple::from_rule(rule))
            .map(|assignment| assignment.domain)
            .collect();
        domains.into_iter().collect()
    }

    /// Evaluate the request against the Casbin model matcher.
    ///
    /// Agrees with the permission-key check in `AuthorizationService`: the
    /// matcher ignores the grant's domain and requires an assignment in
    /// `domain`.
    ///
    /// # Errors
    /// - `AuthzError::Enforcer` if Casbin fails to evaluate the matcher.
    pub fn enforce(
        &self,
        subject: &str,
        domain: &str,
        object: &str,
        action: &str,
    ) -> AuthzResult<bool> {
        let index = self.index.load();
        Ok(index.enforce((subject, domain, object, action))?)
    }

    /// Persist a grant, refresh the local index, then notify peers.
    ///
    /// # Invariants
    /// - Idempotent: an existing grant is left as is.
    /// - On `Ok`, the grant is durable and visible to queries on this instance.
    ///
    /// # Errors
    /// - `AuthzError::Store` if the store rejected the write; nothing changed.
    /// - `AuthzError::IndexReload` if the write is durable but the local
    ///   reload failed. Peers are still notified.
    pub async fn add_grant(&self, grant: &GrantTuple) -> AuthzResult<()> {
        self.write(Write::Insert, Tuple::Grant(grant.clone())).await
    }

    /// Delete a grant. Deleting a missing grant succeeds. Errors as for
    /// [`PolicyEnforcer::add_grant`].
    pub async fn remove_grant(&self, grant: &GrantTuple) -> AuthzResult<()> {
        self.write(Write::Delete, Tuple::Grant(grant.clone())).await
    }

    /// Persist a role assignment, refresh the local index, then notify peers.
    ///
    /// # Errors
    /// - `AuthzError::Store` if the store rejected the write; nothing changed.
    /// - `AuthzError::IndexReload` if the assignment is durable but the local
    ///   reload failed. Callers undoing a batch must treat it as applied.
    pub async fn add_assignment(&self, assignment: &AssignmentTuple) -> AuthzResult<()> {
        self.write(Write::Insert, Tuple::Assignment(assignment.clone()))
            .await
    }

    /// Delete a role assignment. Deleting a missing one succeeds. Errors as
    /// for [`PolicyEnforcer::add_assignment`].
    pub async fn remove_assignment(&self, assignment: &AssignmentTuple) -> AuthzResult<()> {
        self.write(Write::Delete, Tuple::Assignment(assignment.clone()))
            .await
    }

    /// Replace the whole index with a fresh build from the store.
    ///
    /// # Invariants
    /// - Serialized: concurrent reloads queue on `reload_lock`, so an older
    ///   snapshot never replaces a newer one.
    /// - On failure the previous index stays in place.
    ///
    /// # Errors
    /// - `AuthzError::Store` / `AuthzError::Enforcer` from the rebuild.
    pub async fn reload(&self) -> AuthzResult<()> {
        let _guard = self.reload_lock.lock().await;
        let started = Instant::now();
        match build_index(self.store.as_ref()).await {
            Ok(index) => {
                self.index.store(Arc::new(index));
                metrics::counter!("tollgate_policy_reloads_total").increment(1);
                metrics::histogram!("tollgate_policy_reload_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::debug!(instance_id = %self.instance_id, "policy index reloaded");
                Ok(())
            }
            Err(err) => {
                metrics::counter!("tollgate_policy_reload_failures_total").increment(1);
                tracing::warn!(
                    instance_id = %self.instance_id,
                    error = %err,
                    "policy index reload failed; keeping previous index"
                );
                Err(err)
            }
        }
    }

    /// Subscribe to change notifications and reload on each one.
    ///
    /// The task holds only a weak reference and ends when the enforcer is
    /// dropped or the subscription closes. Signals published by this instance
    /// are skipped.
    ///
    /// One reload runs right after subscribing, so changes published between
    /// construction and this call are picked up.
    ///
    /// # Errors
    /// - `AuthzError::Notify` if the subscription cannot be opened.
    /// - Reload errors from the catch-up reload.
    pub async fn watch(self: &Arc<Self>) -> AuthzResult<JoinHandle<()>> {
        let mut subscription = self.notifier.subscribe().await?;
        self.reload().await?;
        let weak: Weak<Self> = Arc::downgrade(self);
        Ok(tokio::spawn(async move {
            while let Some(change) = subscription.recv().await {
                let Some(enforcer) = weak.upgrade() else {
                    break;
                };
                if change.origin == enforcer.instance_id {
                    continue;
                }
                // Failure is already logged; the next signal retries.
                let _ = enforcer.reload().await;
            }
            tracing::debug!("policy change watcher stopped");
        }))
    }

    async fn write(&self, write: Write, tuple: Tuple) -> AuthzResult<()> {
        match write {
            Write::Insert => self.store.insert(&tuple).await?,
            Write::Delete => self.store.delete(&tuple).await?,
        }
        let reloaded = self.reload().await;
        // The write is durable either way; peers must hear about it.
        self.announce().await;
        reloaded.map_err(|err| AuthzError::IndexReload {
            source: Box::new(err),
        })
    }

    async fn announce(&self) {
        let change = PolicyChange::new(self.instance_id.clone());
        if let Err(err) = self.notifier.publish(change).await {
            // Durable and locally visible already; peers converge on the next signal.
            metrics::counter!("tollgate_notify_failures_total").increment(1);
            tracing::warn!(
                instance_id = %self.instance_id,
                error = %err,
                "failed to publish policy change"
            );
        }
    }
}

async fn build_index(store: &dyn RelationStore) -> AuthzResult<Enforcer> {
    let grants = store.query(&TuplePattern::all_grants()).await?;
    let assignments = store.query(&TuplePattern::all_assignments()).await?;

    let model = casbin_model().await?;
    let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;
    for tuple in grants {
        if let Tuple::Grant(grant) = tuple {
            enforcer.add_policy(grant.to_rule()).await?;
        }
    }
    for tuple in assignments {
        if let Tuple::Assignment(assignment) = tuple {
            enforcer.add_grouping_policy(assignment.to_rule()).await?;
        }
    }
    enforcer.build_role_links()?;
    Ok(enforcer)
}
