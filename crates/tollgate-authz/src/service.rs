//! Authorization service facade.
//!
//! # Purpose and responsibility
//! Exposes role assignment, permission grants, domain enumeration, and the
//! permission check. Multi-tuple operations are orchestrated here, including
//! compensation when a batch role assignment fails part way.
//!
//! # Key invariants and assumptions
//! - Required fields are validated before any store access.
//! - Negative answers are `Ok(false)` / empty lists, never errors.
//! - Role grants are read domain-agnostically; assignments are domain-scoped.
//! - `assign_role_to_users` leaves either every eligible user assigned or none,
//!   unless a compensating unassignment itself fails (logged, not returned).
use crate::enforcer::{DomainFilter, PolicyEnforcer};
use crate::errors::{AuthzError, AuthzResult, require};
use crate::tuple::{AssignmentTuple, GrantTuple, permission_key};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Role, permission, and domain operations over one [`PolicyEnforcer`].
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct AuthorizationService {
    enforcer: Arc<PolicyEnforcer>,
    default_domain: String,
}

impl AuthorizationService {
    /// `default_domain` is always reported by [`Self::domains_for_user`].
    pub fn new(enforcer: Arc<PolicyEnforcer>, default_domain: impl Into<String>) -> Self {
        Self {
            enforcer,
            default_domain: default_domain.into(),
        }
    }

    pub fn enforcer(&self) -> &Arc<PolicyEnforcer> {
        &self.enforcer
    }

    pub fn default_domain(&self) -> &str {
        &self.default_domain
    }

    /// Roles `user` holds in `domain`, sorted. Empty when there are none.
    ///
    /// # Errors
    /// - `AuthzError::Validation` if `user` or `domain` is blank.
    pub async fn roles_for_user(&self, user: &str, domain: &str) -> AuthzResult<Vec<String>> {
        require("user", user)?;
        require("domain", domain)?;
        Ok(self.enforcer.role_membership(user, domain))
    }

    /// `object#action` keys reachable through the user's roles in `domain`.
    ///
    /// # What it does
    /// Expands each role the user holds in `domain` into that role's grants and
    /// renders them as permission keys. A key can repeat when two roles grant
    /// the same permission.
    ///
    /// # Invariants
    /// - Grants are looked up by role only, so a role's permissions are the
    ///   same in every domain where it is assigned.
    ///
    /// # Errors
    /// - `AuthzError::Validation` if `user` or `domain` is blank.
    pub async fn permissions_for_user(&self, user: &str, domain: &str) -> AuthzResult<Vec<String>> {
        let roles = self.roles_for_user(user, domain).await?;
        let mut permissions = Vec::new();
        for role in roles {
            for grant in self.enforcer.grants_for(&role, DomainFilter::Any) {
                permissions.push(grant.permission_key());
            }
        }
        Ok(permissions)
    }

    /// Domains where the user holds any role, sorted, with the default domain last.
    ///
    /// The default domain is listed exactly once, even for a user with no
    /// assignments at all.
    pub async fn domains_for_user(&self, user: &str) -> AuthzResult<Vec<String>> {
        require("user", user)?;
        let mut domains: Vec<String> = self
            .enforcer
            .domains_for_subject(user)
            .into_iter()
            .filter(|domain| *domain != self.default_domain)
            .collect();
        domains.sort();
        domains.push(self.default_domain.clone());
        Ok(domains)
    }

    /// Users holding `role` in `domain`, sorted.
    pub async fn users_for_role(&self, role: &str, domain: &str) -> AuthzResult<Vec<String>> {
        require("role", role)?;
        require("domain", domain)?;
        Ok(self.enforcer.users_for_role(role, domain))
    }

    /// Grant `role` the `action` on `object`.
    ///
    /// # Invariants
    /// - Idempotent: granting twice leaves one grant.
    /// - On `Ok` the grant is durable and visible on this instance.
    ///
    /// # Errors
    /// - `AuthzError::Validation` for a blank field, before any store access.
    /// - Store and reload errors from the enforcer.
    ///
    /// # Example
    /// ```rust
    /// use std::sync::Arc;
    /// use tollgate_authz::{
    ///     AuthorizationService, BroadcastNotifier, InMemoryRelationStore, PolicyEnforcer,
    /// };
    ///
    /// # async fn demo() -> tollgate_authz::AuthzResult<()> {
    /// let enforcer = PolicyEnforcer::new(
    ///     Arc::new(InMemoryRelationStore::new()),
    ///     Arc::new(BroadcastNotifier::new(16)),
    /// )
    /// .await?;
    /// let authz = AuthorizationService::new(enforcer, "default");
    /// authz.grant_permission("viewer", "ns1", "doc", "read").await?;
    /// authz.assign_role("bob", "viewer", "ns1").await?;
    /// assert_eq!(authz.permissions_for_user("bob", "ns1").await?, vec!["doc#read"]);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn grant_permission(
        &self,
        role: &str,
        domain: &str,
        object: &str,
        action: &str,
    ) -> AuthzResult<()> {
        self.grant_permissions(role, domain, object, &[action])
            .await
    }

    /// Insert one grant per action. The first failure stops the batch; grants
    /// already inserted stay in place.
    ///
    /// # Errors
    /// - `AuthzError::Validation` for an empty action list or any blank field.
    /// - The first store or reload error.
    pub async fn grant_permissions<S: AsRef<str>>(
        &self,
        role: &str,
        domain: &str,
        object: &str,
        actions: &[S],
    ) -> AuthzResult<()> {
        let grants = grant_batch(role, domain, object, actions)?;
        for grant in &grants {
            self.enforcer.add_grant(grant).await?;
        }
        tracing::info!(role, domain, object, count = grants.len(), "permissions granted");
        Ok(())
    }

    /// Remove one grant. Revoking a grant that does not exist succeeds.
    pub async fn revoke_permission(
        &self,
        role: &str,
        domain: &str,
        object: &str,
        action: &str,
    ) -> AuthzResult<()> {
        self.revoke_permissions(role, domain, object, &[action])
            .await
    }

    /// Remove one grant per action, stopping at the first failure.
    ///
    /// # Errors
    /// - As for [`Self::grant_permissions`].
    pub async fn revoke_permissions<S: AsRef<str>>(
        &self,
        role: &str,
        domain: &str,
        object: &str,
        actions: &[S],
    ) -> AuthzResult<()> {
        let grants = grant_batch(role, domain, object, actions)?;
        for grant in &grants {
            self.enforcer.remove_grant(grant).await?;
        }
        tracing::info!(role, domain, object, count = grants.len(), "permissions revoked");
        Ok(())
    }

    /// Give `user` the `role` within `domain`.
    ///
    /// # Invariants
    /// - Idempotent; on `Ok` the assignment is visible on this instance.
    ///
    /// # Errors
    /// - `AuthzError::Validation` for a blank field.
    /// - `AuthzError::Store` if nothing was written.
    /// - `AuthzError::IndexReload` if the assignment was stored but the local
    ///   index could not be refreshed.
    pub async fn assign_role(&self, user: &str, role: &str, domain: &str) -> AuthzResult<()> {
        let assignment = assignment(user, role, domain)?;
        self.enforcer.add_assignment(&assignment).await?;
        tracing::info!(user, role, domain, "role assigned");
        Ok(())
    }

    /// Take `role` in `domain` away from `user`. Missing assignments are fine.
    pub async fn unassign_role(&self, user: &str, role: &str, domain: &str) -> AuthzResult<()> {
        let assignment = assignment(user, role, domain)?;
        self.enforcer.remove_assignment(&assignment).await?;
        tracing::info!(user, role, domain, "role unassigned");
        Ok(())
    }

    /// Assign `role` in `domain` to every listed user, all or nothing.
    ///
    /// Users are processed in input order. Users already holding the role are
    /// skipped and never rolled back. On the first failed assignment every
    /// assignment made by this call is undone in reverse order and the original
    /// error is returned.
    ///
    /// # Invariants
    /// - A user whose assignment was stored but whose local reload failed is
    ///   rolled back like any other success.
    /// - A compensating unassignment that fails is logged and skipped; that
    ///   assignment stays.
    ///
    /// # Errors
    /// - `AuthzError::Validation` for an empty list or any blank user, before
    ///   any write.
    /// - The first assignment error, after rollback.
    pub async fn assign_role_to_users<S: AsRef<str>>(
        &self,
        users: &[S],
        role: &str,
        domain: &str,
    ) -> AuthzResult<()> {
        require("role", role)?;
        require("domain", domain)?;
        if users.is_empty() {
            return Err(AuthzError::required("users"));
        }
        for user in users {
            require("user", user.as_ref())?;
        }

        let mut compensation = Compensation::default();
        for user in users {
            let user = user.as_ref();
            let already_assigned = self
                .enforcer
                .role_membership(user, domain)
                .iter()
                .any(|held| held == role);
            if already_assigned {
                continue;
            }
            let assignment = AssignmentTuple::new(user, role, domain);
            match self.enforcer.add_assignment(&assignment).await {
                Ok(()) => compensation.record(assignment),
                Err(err) => {
                    if err.write_persisted() {
                        // Stored despite the error; undo it with the rest.
                        compensation.record(assignment);
                    }
                    tracing::warn!(
                        user,
                        role,
                        domain,
                        error = %err,
                        rollback = compensation.len(),
                        "batch role assignment failed; rolling back"
                    );
                    compensation.unwind(&self.enforcer).await;
                    return Err(err);
                }
            }
        }
        tracing::info!(role, domain, assigned = compensation.len(), "batch role assignment done");
        Ok(())
    }

    /// `true` iff `object#action` is among the user's permissions in `domain`.
    ///
    /// A denial is `Ok(false)`; errors mean the check could not be evaluated.
    pub async fn has_permission(
        &self,
        user: &str,
        domain: &str,
        object: &str,
        action: &str,
    ) -> AuthzResult<bool> {
        require("object", object)?;
        require("action", action)?;
        let wanted = permission_key(object, action);
        let permissions = self.permissions_for_user(user, domain).await?;
        Ok(permissions.iter().any(|permission| *permission == wanted))
    }
}

/// Undo records for a batch assignment, walked newest-first on failure.
#[derive(Debug, Default)]
struct Compensation {
    undo: Vec<AssignmentTuple>,
}

impl Compensation {
    fn record(&mut self, assignment: AssignmentTuple) {
        self.undo.push(assignment);
    }

    fn len(&self) -> usize {
        self.undo.len()
    }

    /// Compensation failures are logged and swallowed; the caller returns the
    /// error that triggered the rollback.
    async fn unwind(self, enforcer: &PolicyEnforcer) {
        for assignment in self.undo.into_iter().rev() {
            if let Err(err) = enforcer.remove_assignment(&assignment).await {
                tracing::error!(
                    user = %assignment.user,
                    role = %assignment.role,
                    domain = %assignment.domain,
                    error = %err,
                    "compensating unassignment failed; assignment left in place"
                );
            }
        }
    }
}

fn assignment(user: &str, role: &str, domain: &str) -> AuthzResult<AssignmentTuple> {
    require("user", user)?;
    require("role", role)?;
    require("domain", domain)?;
    Ok(AssignmentTuple::new(user, role, domain))
}

fn grant_batch<S: AsRef<str>>(
    role: &str,
    domain: &str,
    object: &str,
    actions: &[S],
) -> AuthzResult<Vec<GrantTuple>> {
    require("role", role)?;
    require("domain", domain)?;
    require("object", object)?;
    if actions.is_empty() {
        return Err(AuthzError::required("action"));
    }
    // Duplicate actions in one request collapse to one tuple.
    let mut seen = BTreeSet::new();
    let mut grants = Vec::with_capacity(actions.len());
    for action in actions {
        let action = action.as_ref();
        require("action", action)?;
        if seen.insert(action) {
            grants.push(GrantTuple::new(role, domain, object, action));
        }
    }
    Ok(grants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::BroadcastNotifier;
    use crate::store::{InMemoryRelationStore, RelationStore, StoreError, StoreResult};
    use crate::tuple::{Tuple, TuplePattern};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Relation store that fails inserts/deletes for chosen users and logs the
    /// user of every assignment write it sees.
    #[derive(Default)]
    struct FaultyStore {
        inner: InMemoryRelationStore,
        fail_insert_for: Mutex<HashSet<String>>,
        fail_delete_for: Mutex<HashSet<String>>,
        fail_query_after_insert_of: Mutex<Option<String>>,
        query_fault_armed: AtomicBool,
        inserts: Mutex<Vec<String>>,
        deletes: Mutex<Vec<String>>,
    }

    impl FaultyStore {
        fn fail_insert(&self, user: &str) {
            self.fail_insert_for.lock().unwrap().insert(user.to_string());
        }

        fn fail_delete(&self, user: &str) {
            self.fail_delete_for.lock().unwrap().insert(user.to_string());
        }

        /// The first query after `user` is stored fails once.
        fn fail_next_query_after_insert(&self, user: &str) {
            *self.fail_query_after_insert_of.lock().unwrap() = Some(user.to_string());
        }

        fn inserts(&self) -> Vec<String> {
            self.inserts.lock().unwrap().clone()
        }

        fn deletes(&self) -> Vec<String> {
            self.deletes.lock().unwrap().clone()
        }
    }

    fn tuple_user(tuple: &Tuple) -> Option<&str> {
        match tuple {
            Tuple::Assignment(assignment) => Some(assignment.user.as_str()),
            Tuple::Grant(_) => None,
        }
    }

    #[async_trait]
    impl RelationStore for FaultyStore {
        async fn insert(&self, tuple: &Tuple) -> StoreResult<()> {
            let Some(user) = tuple_user(tuple) else {
                return self.inner.insert(tuple).await;
            };
            self.inserts.lock().unwrap().push(user.to_string());
            if self.fail_insert_for.lock().unwrap().contains(user) {
                return Err(StoreError::Unavailable(format!("insert for {user}")));
            }
            self.inner.insert(tuple).await?;
            if self.fail_query_after_insert_of.lock().unwrap().as_deref() == Some(user) {
                self.query_fault_armed.store(true, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn delete(&self, tuple: &Tuple) -> StoreResult<()> {
            let Some(user) = tuple_user(tuple) else {
                return self.inner.delete(tuple).await;
            };
            if self.fail_delete_for.lock().unwrap().contains(user) {
                return Err(StoreError::Unavailable(format!("delete for {user}")));
            }
            self.inner.delete(tuple).await?;
            self.deletes.lock().unwrap().push(user.to_string());
            Ok(())
        }

        async fn query(&self, pattern: &TuplePattern) -> StoreResult<Vec<Tuple>> {
            if self.query_fault_armed.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("blip".to_string()));
            }
            self.inner.query(pattern).await
        }

        async fn health_check(&self) -> StoreResult<()> {
            Ok(())
        }

        fn is_durable(&self) -> bool {
            false
        }

        fn backend_name(&self) -> &'static str {
            "faulty"
        }
    }

    async fn service_with(store: Arc<dyn RelationStore>) -> AuthorizationService {
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let enforcer = PolicyEnforcer::new(store, notifier)
            .await
            .expect("enforcer");
        AuthorizationService::new(enforcer, "default")
    }

    async fn service() -> AuthorizationService {
        service_with(Arc::new(InMemoryRelationStore::new())).await
    }

    #[tokio::test]
    async fn admin_grant_scenario() {
        let authz = service().await;
        authz
            .grant_permission("admin", "ns1", "token", "write")
            .await
            .expect("grant");
        authz.assign_role("alice", "admin", "ns1").await.expect("assign");

        assert!(authz
            .has_permission("alice", "ns1", "token", "write")
            .await
            .expect("check"));
        assert!(!authz
            .has_permission("bob", "ns1", "token", "write")
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn granting_twice_keeps_one_tuple_and_revoking_missing_is_ok() {
        let store = Arc::new(InMemoryRelationStore::new());
        let authz = service_with(store.clone()).await;
        for _ in 0..2 {
            authz
                .grant_permission("admin", "ns1", "token", "write")
                .await
                .expect("grant");
        }
        let grants = store
            .query(&TuplePattern::all_grants())
            .await
            .expect("query");
        assert_eq!(grants.len(), 1);

        authz
            .revoke_permission("admin", "ns1", "token", "delete")
            .await
            .expect("revoke missing");
        authz
            .revoke_permission("admin", "ns1", "token", "write")
            .await
            .expect("revoke");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn grant_many_actions_and_revoke_many() {
        let authz = service().await;
        authz
            .grant_permissions("editor", "ns1", "doc", &["read", "write", "read"])
            .await
            .expect("grant");
        authz.assign_role("alice", "editor", "ns1").await.expect("assign");

        let mut permissions = authz
            .permissions_for_user("alice", "ns1")
            .await
            .expect("permissions");
        permissions.sort();
        assert_eq!(permissions, vec!["doc#read".to_string(), "doc#write".to_string()]);

        authz
            .revoke_permissions("editor", "ns1", "doc", &["read", "write"])
            .await
            .expect("revoke");
        assert!(authz
            .permissions_for_user("alice", "ns1")
            .await
            .expect("permissions")
            .is_empty());
    }

    #[tokio::test]
    async fn role_grants_apply_across_domains() {
        let authz = service().await;
        authz
            .grant_permission("admin", "ns1", "token", "write")
            .await
            .expect("grant");
        authz.assign_role("alice", "admin", "ns2").await.expect("assign");

        assert!(authz
            .has_permission("alice", "ns2", "token", "write")
            .await
            .expect("check"));
        // No assignment in ns1, so nothing there.
        assert!(!authz
            .has_permission("alice", "ns1", "token", "write")
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn domains_for_user_always_lists_default_last() {
        let authz = service().await;
        assert_eq!(
            authz.domains_for_user("nobody").await.expect("domains"),
            vec!["default".to_string()]
        );

        for domain in ["ns2", "default", "ns1"] {
            authz.assign_role("alice", "viewer", domain).await.expect("assign");
        }
        assert_eq!(
            authz.domains_for_user("alice").await.expect("domains"),
            vec!["ns1".to_string(), "ns2".to_string(), "default".to_string()]
        );
    }

    #[tokio::test]
    async fn batch_assignment_assigns_everyone() {
        let authz = service().await;
        authz
            .assign_role_to_users(&["alice", "bob"], "editor", "ns1")
            .await
            .expect("batch");
        for user in ["alice", "bob"] {
            let roles = authz.roles_for_user(user, "ns1").await.expect("roles");
            assert!(roles.contains(&"editor".to_string()));
        }
        assert_eq!(
            authz.users_for_role("editor", "ns1").await.expect("users"),
            vec!["alice".to_string(), "bob".to_string()]
        );
    }

    #[tokio::test]
    async fn batch_failure_rolls_back_earlier_assignments() {
        let store = Arc::new(FaultyStore::default());
        store.fail_insert("u3");
        let authz = service_with(store.clone()).await;

        let err = authz
            .assign_role_to_users(&["u1", "u2", "u3"], "editor", "ns1")
            .await
            .expect_err("u3 fails");
        assert!(matches!(err, AuthzError::Store(StoreError::Unavailable(_))));

        for user in ["u1", "u2", "u3"] {
            assert!(authz.roles_for_user(user, "ns1").await.expect("roles").is_empty());
        }
    }

    #[tokio::test]
    async fn batch_attempts_in_order_and_rolls_back_in_reverse() {
        let store = Arc::new(FaultyStore::default());
        store.fail_insert("u3");
        let authz = service_with(store.clone()).await;

        authz
            .assign_role_to_users(&["u1", "u2", "u3"], "editor", "ns1")
            .await
            .expect_err("u3 fails");

        assert_eq!(store.inserts(), vec!["u1", "u2", "u3"]);
        assert_eq!(store.deletes(), vec!["u2", "u1"]);
    }

    #[tokio::test]
    async fn batch_rolls_back_assignment_whose_reload_failed() {
        let store = Arc::new(FaultyStore::default());
        store.fail_next_query_after_insert("u2");
        let authz = service_with(store.clone()).await;

        let err = authz
            .assign_role_to_users(&["u1", "u2", "u3"], "editor", "ns1")
            .await
            .expect_err("reload after u2 fails");
        assert!(matches!(err, AuthzError::IndexReload { .. }));
        assert!(err.write_persisted());
        assert!(err.to_string().contains("blip"));

        // u3 is never attempted; u2 is undone before u1.
        assert_eq!(store.inserts(), vec!["u1", "u2"]);
        assert_eq!(store.deletes(), vec!["u2", "u1"]);
        let left = store
            .inner
            .query(&TuplePattern::all_assignments())
            .await
            .expect("query");
        assert!(left.is_empty(), "left behind: {left:?}");

        authz.enforcer().reload().await.expect("reload");
        for user in ["u1", "u2", "u3"] {
            assert!(authz.roles_for_user(user, "ns1").await.expect("roles").is_empty());
        }
    }

    #[tokio::test]
    async fn batch_failure_keeps_users_that_were_already_assigned() {
        let store = Arc::new(FaultyStore::default());
        let authz = service_with(store.clone()).await;
        authz.assign_role("u1", "editor", "ns1").await.expect("assign");
        store.fail_insert("u3");

        authz
            .assign_role_to_users(&["u1", "u2", "u3"], "editor", "ns1")
            .await
            .expect_err("u3 fails");

        assert_eq!(
            authz.roles_for_user("u1", "ns1").await.expect("roles"),
            vec!["editor".to_string()]
        );
        assert!(authz.roles_for_user("u2", "ns1").await.expect("roles").is_empty());
    }

    #[tokio::test]
    async fn failed_compensation_returns_original_error() {
        let store = Arc::new(FaultyStore::default());
        store.fail_insert("u3");
        store.fail_delete("u1");
        let authz = service_with(store.clone()).await;

        let err = authz
            .assign_role_to_users(&["u1", "u2", "u3"], "editor", "ns1")
            .await
            .expect_err("u3 fails");
        assert!(err.to_string().contains("insert for u3"));

        // Documented double-failure gap: u1 stays, u2 was compensated.
        assert_eq!(
            authz.roles_for_user("u1", "ns1").await.expect("roles"),
            vec!["editor".to_string()]
        );
        assert!(authz.roles_for_user("u2", "ns1").await.expect("roles").is_empty());
    }

    #[tokio::test]
    async fn validation_rejects_before_touching_the_store() {
        let store = Arc::new(InMemoryRelationStore::new());
        let authz = service_with(store.clone()).await;

        assert!(matches!(
            authz.assign_role("", "admin", "ns1").await,
            Err(AuthzError::Validation(_))
        ));
        assert!(matches!(
            authz.grant_permissions::<&str>("admin", "ns1", "token", &[]).await,
            Err(AuthzError::Validation(_))
        ));
        assert!(matches!(
            authz.grant_permissions("admin", "ns1", "token", &["read", ""]).await,
            Err(AuthzError::Validation(_))
        ));
        assert!(matches!(
            authz.assign_role_to_users(&["alice", " "], "admin", "ns1").await,
            Err(AuthzError::Validation(_))
        ));
        assert!(matches!(
            authz.assign_role_to_users::<&str>(&[], "admin", "ns1").await,
            Err(AuthzError::Validation(_))
        ));
        assert!(matches!(
            authz.has_permission("alice", "ns1", "", "read").await,
            Err(AuthzError::Validation(_))
        ));
        assert!(store.is_empty().await);
    }
}
