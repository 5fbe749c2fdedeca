//! Postgres `LISTEN/NOTIFY` change notifier.
//!
//! `publish` issues `pg_notify(channel, payload)` through the shared pool. A
//! background task holds one `PgListener` on the channel and forwards every
//! notification into a local broadcast channel, which is what subscribers read.
//!
//! # Delivery
//! - At-least-once while the listener connection is up.
//! - When the listener loses its connection, notifications sent in the gap are
//!   lost. The task emits one origin-less signal after reconnecting so every
//!   subscriber reloads and catches up.
//! - Listener errors are logged and retried after [`RETRY_BACKOFF`].
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tollgate_authz::{ChangeNotifier, ChangeSubscription, NotifyError, NotifyResult, PolicyChange};

pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const LOCAL_CAPACITY: usize = 64;

pub struct PgNotifier {
    pool: PgPool,
    channel: String,
    tx: broadcast::Sender<PolicyChange>,
    listener_task: JoinHandle<()>,
}

impl PgNotifier {
    /// Subscribe to `channel` and start forwarding notifications.
    ///
    /// Returns once `LISTEN` has been issued, so a publish after this call is
    /// never missed by this instance.
    pub async fn start(pool: PgPool, channel: impl Into<String>) -> NotifyResult<Self> {
        let channel = channel.into();
        let mut listener = PgListener::connect_with(&pool)
            .await
            .map_err(transport_error)?;
        listener.listen(&channel).await.map_err(transport_error)?;

        let (tx, _) = broadcast::channel(LOCAL_CAPACITY);
        let listener_task = tokio::spawn(forward(listener, tx.clone(), channel.clone()));
        tracing::info!(channel = %channel, "postgres change notifier listening");
        Ok(Self {
            pool,
            channel,
            tx,
            listener_task,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for PgNotifier {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}

async fn forward(
    mut listener: PgListener,
    tx: broadcast::Sender<PolicyChange>,
    channel: String,
) {
    loop {
        match listener.try_recv().await {
            Ok(Some(notification)) => {
                let _ = tx.send(PolicyChange::decode(notification.payload()));
            }
            Ok(None) => {
                // Connection dropped; the next try_recv reconnects and re-listens.
                tracing::warn!(channel = %channel, "policy change listener reconnecting");
                let _ = tx.send(PolicyChange::new(String::new()));
            }
            Err(err) => {
                metrics::counter!("tollgate_notify_listener_errors_total").increment(1);
                tracing::warn!(channel = %channel, error = %err, "policy change listener error");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
}

#[async_trait]
impl ChangeNotifier for PgNotifier {
    async fn publish(&self, change: PolicyChange) -> NotifyResult<()> {
        let payload = change.encode()?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn subscribe(&self) -> NotifyResult<ChangeSubscription> {
        Ok(ChangeSubscription::new(self.tx.subscribe()))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn transport_error(err: sqlx::Error) -> NotifyError {
    NotifyError::Transport(err.into())
}
