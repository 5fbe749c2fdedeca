//! Observability wiring for the authorization daemon.
//!
//! # Purpose
//! Installs the tracing subscriber and the Prometheus recorder, and serves the
//! `/metrics` endpoint.
//!
//! # Notes
//! Initialization is guarded by `OnceLock` to keep startup idempotent in tests.
use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static OBS_INIT: OnceLock<()> = OnceLock::new();

pub fn init_observability(service_name: &str) -> anyhow::Result<PrometheusHandle> {
    OBS_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer();
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init();
    });

    let handle = install_metrics_recorder()?;
    describe_metrics();
    tracing::debug!(service = service_name, "observability initialized");
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!(
        "tollgate_policy_reloads_total",
        "Policy index rebuilds swapped in"
    );
    metrics::describe_counter!(
        "tollgate_policy_reload_failures_total",
        "Policy index rebuilds that failed and kept the previous index"
    );
    metrics::describe_histogram!(
        "tollgate_policy_reload_duration_seconds",
        metrics::Unit::Seconds,
        "Time to rebuild the policy index from the relation store"
    );
    metrics::describe_counter!(
        "tollgate_notify_failures_total",
        "Policy change notifications that could not be published"
    );
    metrics::describe_counter!(
        "tollgate_notify_listener_errors_total",
        "Errors while receiving policy change notifications"
    );
}

pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    serve_metrics_with_shutdown(handle, addr, std::future::pending()).await
}

pub async fn serve_metrics_with_shutdown<F>(
    handle: PrometheusHandle,
    addr: SocketAddr,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_metrics_with_listener(handle, listener, shutdown).await
}

async fn serve_metrics_with_listener<F>(
    handle: PrometheusHandle,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("install metrics recorder")?;
    let _ = METRICS_HANDLE.set(handle.clone());
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::{Duration, Instant};
    use tokio::sync::oneshot;

    fn build_test_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .no_proxy()
            .build()
            .expect("build test client")
    }

    async fn wait_for_listen(addr: SocketAddr) -> Result<(), String> {
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            if tokio::net::TcpStream::connect(addr).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(format!("server never became ready at {addr}"));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    #[serial]
    fn install_metrics_recorder_is_cached() {
        let handle1 = install_metrics_recorder().expect("recorder");
        let handle2 = install_metrics_recorder().expect("recorder");
        let _ = (handle1.render(), handle2.render());
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn init_observability_is_idempotent() {
        let handle1 = init_observability("authzd-test").expect("init");
        let handle2 = init_observability("authzd-test").expect("init again");
        let _ = (handle1.render(), handle2.render());
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn serve_metrics_exposes_reload_counter() {
        let handle = init_observability("authzd-metrics-test").expect("init");
        metrics::counter!("tollgate_policy_reloads_total").increment(1);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            serve_metrics_with_listener(handle, listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
        });
        wait_for_listen(addr).await.expect("server ready");

        let body = build_test_client()
            .get(format!("http://{addr}/metrics"))
            .send()
            .await
            .expect("GET /metrics")
            .error_for_status()
            .expect("metrics status")
            .text()
            .await
            .expect("metrics body");
        assert!(body.contains("tollgate_policy_reloads_total"));

        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .expect("server shutdown");
    }
}
