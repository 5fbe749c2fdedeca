//! Domain-scoped RBAC core shared by tollgate services.
//!
//! # Purpose
//! Answers "does user U hold permission P on object O within domain D" and owns
//! the role/permission/domain relations behind that answer.
//!
//! # How it fits
//! Callers talk to [`AuthorizationService`]. The service drives a
//! [`PolicyEnforcer`], which persists tuples through a [`RelationStore`] and
//! fans reload signals out to other replicas through a [`ChangeNotifier`].
//!
//! # Key invariants
//! - Tuples are sets: inserting an existing tuple or deleting a missing one is a no-op.
//! - Assignments are domain-scoped; grants are looked up by role only.
//! - The enforcer index is replaced wholesale; readers never observe a partial index.
//!
//! # Examples
//! ```rust
//! use std::sync::Arc;
//! use tollgate_authz::{
//!     AuthorizationService, BroadcastNotifier, InMemoryRelationStore, PolicyEnforcer,
//! };
//!
//! # async fn demo() -> tollgate_authz::AuthzResult<()> {
//! let store = Arc::new(InMemoryRelationStore::new());
//! let notifier = Arc::new(BroadcastNotifier::new(16));
//! let enforcer = PolicyEnforcer::new(store, notifier).await?;
//! let authz = AuthorizationService::new(enforcer, "default");
//! authz.grant_permission("admin", "ns1", "token", "write").await?;
//! authz.assign_role("alice", "admin", "ns1").await?;
//! assert!(authz.has_permission("alice", "ns1", "token", "write").await?);
//! # Ok(())
//! # }
//! ```
//!
//! # Common pitfalls
//! - `false` / empty results mean "denied"; only infrastructure failures are errors.
//! - A role name shares one permission set across every domain that uses it.

mod bootstrap;
mod casbin_model;
mod enforcer;
mod errors;
mod notifier;
mod service;
mod store;
mod tuple;

pub use bootstrap::{
    InMemoryNamespaceRegistry, Namespace, NamespaceBootstrap, NamespacePermissions,
    NamespaceRegistry, Page, PageRequest,
};
pub use casbin_model::{casbin_model, casbin_model_string};
pub use enforcer::{DomainFilter, PolicyEnforcer};
pub use errors::{AuthzError, AuthzResult};
pub use notifier::{
    BroadcastNotifier, ChangeNotifier, ChangeSubscription, NotifyError, NotifyResult, PolicyChange,
};
pub use service::AuthorizationService;
pub use store::{InMemoryRelationStore, RelationStore, StoreError, StoreResult};
pub use tuple::{
    AssignmentPattern, AssignmentTuple, GrantPattern, GrantTuple, Tuple, TuplePattern,
    permission_key, split_permission_key,
};
