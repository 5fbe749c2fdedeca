use crate::notifier::NotifyError;
use crate::store::StoreError;
use thiserror::Error;

/// Failures surfaced by the authorization core.
///
/// "Denied" is never an error: negative answers are `false` or empty lists.
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("relation store error: {0}")]
    Store(#[from] StoreError),
    #[error("enforcer error: {0}")]
    Enforcer(#[from] casbin::Error),
    #[error("change notifier error: {0}")]
    Notify(#[from] NotifyError),
    /// The tuple write is durable but the local index still predates it.
    #[error("write persisted but policy index reload failed: {source}")]
    IndexReload {
        #[source]
        source: Box<AuthzError>,
    },
    #[error("namespace {namespace} created without an administrator: {source}")]
    OrphanedNamespace {
        namespace: String,
        #[source]
        source: Box<AuthzError>,
    },
}

pub type AuthzResult<T> = Result<T, AuthzError>;

impl AuthzError {
    /// `true` when the failed call already changed the relation store.
    pub fn write_persisted(&self) -> bool {
        matches!(self, AuthzError::IndexReload { .. })
    }

    pub(crate) fn required(field: &str) -> Self {
        AuthzError::Validation(format!("{field} is required"))
    }
}

/// Reject empty or whitespace-only required fields.
pub(crate) fn require(field: &str, value: &str) -> AuthzResult<()> {
    if value.trim().is_empty() {
        return Err(AuthzError::required(field));
    }
    Ok(())
}
