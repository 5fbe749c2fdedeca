//! Namespace bootstrap.
//!
//! Namespace records live in an external registry; this module only wires the
//! authorization side of their lifecycle. Creating a namespace makes its
//! creator the namespace administrator with a single role assignment, and the
//! permission listing aggregates per-namespace permissions for one page of
//! namespaces.
//!
//! If the admin assignment fails the namespace stays created without an
//! administrator. That gap is reported as [`AuthzError::OrphanedNamespace`] and
//! is not retried here.
use crate::errors::{AuthzError, AuthzResult, require};
use crate::service::AuthorizationService;
use crate::store::{StoreError, StoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub namespace: String,
    pub display_name: String,
    #[serde(default)]
    pub created_by: String,
}

impl Namespace {
    pub fn new(namespace: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            display_name: display_name.into(),
            created_by: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of items across all pages.
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespacePermissions {
    pub namespace: String,
    pub permissions: Vec<String>,
}

/// Namespace CRUD collaborator.
#[async_trait]
pub trait NamespaceRegistry: Send + Sync {
    /// Durably create the record. Duplicates fail with `StoreError::Conflict`.
    async fn create_namespace(&self, namespace: Namespace) -> StoreResult<Namespace>;
    async fn list_namespaces(&self, page: PageRequest) -> StoreResult<Page<Namespace>>;
}

/// Registry kept in a sorted map; listing order is by namespace name.
#[derive(Clone, Default)]
pub struct InMemoryNamespaceRegistry {
    namespaces: Arc<RwLock<BTreeMap<String, Namespace>>>,
}

impl InMemoryNamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NamespaceRegistry for InMemoryNamespaceRegistry {
    async fn create_namespace(&self, namespace: Namespace) -> StoreResult<Namespace> {
        let mut namespaces = self.namespaces.write().await;
        if namespaces.contains_key(&namespace.namespace) {
            return Err(StoreError::Conflict("namespace exists".into()));
        }
        namespaces.insert(namespace.namespace.clone(), namespace.clone());
        Ok(namespace)
    }

    async fn list_namespaces(&self, page: PageRequest) -> StoreResult<Page<Namespace>> {
        let namespaces = self.namespaces.read().await;
        let items = namespaces
            .values()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        Ok(Page {
            items,
            total: namespaces.len(),
        })
    }
}

pub struct NamespaceBootstrap {
    registry: Arc<dyn NamespaceRegistry>,
    authz: Arc<AuthorizationService>,
    admin_role: String,
}

impl NamespaceBootstrap {
    pub fn new(
        registry: Arc<dyn NamespaceRegistry>,
        authz: Arc<AuthorizationService>,
        admin_role: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            authz,
            admin_role: admin_role.into(),
        }
    }

    pub fn admin_role(&self) -> &str {
        &self.admin_role
    }

    /// Create the namespace record, then assign the creator the admin role in it.
    pub async fn create_namespace(
        &self,
        creator: &str,
        mut namespace: Namespace,
    ) -> AuthzResult<Namespace> {
        require("creator", creator)?;
        require("namespace", &namespace.namespace)?;
        namespace.created_by = creator.to_string();

        let created = self.registry.create_namespace(namespace).await?;
        if let Err(err) = self
            .authz
            .assign_role(creator, &self.admin_role, &created.namespace)
            .await
        {
            tracing::warn!(
                namespace = %created.namespace,
                creator,
                role = %self.admin_role,
                error = %err,
                "namespace created without an administrator"
            );
            return Err(AuthzError::OrphanedNamespace {
                namespace: created.namespace,
                source: Box::new(err),
            });
        }
        tracing::info!(namespace = %created.namespace, creator, "namespace created");
        Ok(created)
    }

    /// One page of namespaces, each with the user's permissions in it.
    pub async fn namespace_permissions(
        &self,
        user: &str,
        page: PageRequest,
    ) -> AuthzResult<Page<NamespacePermissions>> {
        require("user", user)?;
        let namespaces = self.registry.list_namespaces(page).await?;
        let mut items = Vec::with_capacity(namespaces.items.len());
        for namespace in namespaces.items {
            let permissions = self
                .authz
                .permissions_for_user(user, &namespace.namespace)
                .await?;
            items.push(NamespacePermissions {
                namespace: namespace.namespace,
                permissions,
            });
        }
        Ok(Page {
            items,
            total: namespaces.total,
        })
    }
}
