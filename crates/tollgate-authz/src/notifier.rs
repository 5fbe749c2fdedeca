//! Change notifier contract and in-process fan-out.
//!
//! # Purpose and responsibility
//! Broadcasts "policy changed, reload now" signals to every enforcer replica.
//! The signal carries no policy data; receivers always reload the full state
//! from the relation store.
//!
//! # Key invariants and assumptions
//! - Delivery is at-least-once within a live subscription; there is no replay log.
//! - A subscriber that falls behind sees one coalesced signal, which is enough
//!   because every signal triggers the same full reload.
//! - The writer does not depend on its own notification; its index is already
//!   current when it publishes.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier channel closed")]
    Closed,
    #[error("encode change: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

pub type NotifyResult<T> = Result<T, NotifyError>;

/// Reload trigger. `origin` names the publishing enforcer instance so it can
/// skip its own echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyChange {
    pub origin: String,
}

impl PolicyChange {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    pub fn encode(&self) -> NotifyResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a wire payload; an unreadable payload still counts as a signal
    /// with an unknown origin.
    pub fn decode(payload: &str) -> Self {
        serde_json::from_str(payload).unwrap_or_else(|_| Self::new(String::new()))
    }
}

#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn publish(&self, change: PolicyChange) -> NotifyResult<()>;
    async fn subscribe(&self) -> NotifyResult<ChangeSubscription>;
    fn backend_name(&self) -> &'static str;
}

/// Receiving end of a notifier subscription.
#[derive(Debug)]
pub struct ChangeSubscription {
    rx: broadcast::Receiver<PolicyChange>,
}

impl ChangeSubscription {
    pub fn new(rx: broadcast::Receiver<PolicyChange>) -> Self {
        Self { rx }
    }

    /// Wait for the next signal. Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<PolicyChange> {
        match self.rx.recv().await {
            Ok(change) => Some(change),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "policy change subscriber lagged; coalescing");
                Some(PolicyChange::new(String::new()))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// In-process notifier backed by `tokio::sync::broadcast`.
///
/// Every enforcer sharing one `BroadcastNotifier` behaves like a replica on
/// the same pub/sub channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<PolicyChange>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl ChangeNotifier for BroadcastNotifier {
    async fn publish(&self, change: PolicyChange) -> NotifyResult<()> {
        // No receivers is not a failure: there is simply nobody to converge.
        let _ = self.tx.send(change);
        Ok(())
    }

    async fn subscribe(&self) -> NotifyResult<ChangeSubscription> {
        Ok(ChangeSubscription::new(self.tx.subscribe()))
    }

    fn backend_name(&self) -> &'static str {
        "broadcast"
    }
}
