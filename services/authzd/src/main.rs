//! tollgate authorization daemon entry point.
//!
//! # Purpose
//! Loads configuration, builds one enforcer replica, subscribes it to policy
//! change notifications, and serves `/metrics` until shutdown.
//!
//! # Notes
//! `run_with_shutdown` takes the shutdown future so tests can drive the whole
//! lifecycle without signals.
use anyhow::Context;
use authzd::app::build_state;
use authzd::config::AuthzConfig;
use authzd::observability;
use std::future::Future;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AuthzConfig::from_env_or_yaml().context("authz config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: AuthzConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("tollgate-authzd")?;
    let state = build_state(&config).await?;
    state
        .enforcer
        .health_check()
        .await
        .context("relation store health check")?;

    let watcher = state
        .enforcer
        .watch()
        .await
        .context("subscribe to policy changes")?;
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    tracing::info!(
        instance_id = %state.enforcer.instance_id(),
        metrics_bind = %config.metrics_bind,
        durable = state.durable_storage(),
        "authorization daemon ready"
    );

    shutdown.await;
    tracing::info!("authorization daemon shutting down");

    watcher.abort();
    metrics_task.abort();
    let _ = watcher.await;
    let _ = metrics_task.await;
    Ok(())
}
