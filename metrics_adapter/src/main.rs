use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{routing::get, Extension, Router};
use clap::Parser;

use crate::provider::MetricsProvider;

mod handler;
mod provider;
mod response;

/// External metrics API server; translates autoscaler requests into RPC
/// calls against the operator.
#[derive(Debug, Parser)]
#[clap(name = "metrics-adapter")]
struct Args {
    /// Port the external metrics API listens on.
    #[clap(long, default_value_t = 8080)]
    port: u16,

    /// gRPC address of the operator's metrics service.
    #[clap(long, default_value = "https://rkeda-operator:9666")]
    metrics_service_address: String,

    /// Directory holding ca.crt, tls.crt and tls.key for the RPC channel.
    #[clap(long, default_value = "/certs")]
    cert_dir: PathBuf,

    /// Sustained queries per second against the orchestrator API.
    #[clap(long, default_value_t = 20.0)]
    kube_api_qps: f32,

    /// Burst allowance on top of the sustained rate.
    #[clap(long, default_value_t = 30)]
    kube_api_burst: u32,

    /// Disable response compression on orchestrator API requests.
    #[clap(long)]
    disable_compression: bool,
}

pub struct AppState {
    pub provider: MetricsProvider,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    tracing::info!(
        "Metrics adapter starting on port {}, operator at {} (api qps {}, burst {}, compression {})",
        args.port,
        args.metrics_service_address,
        args.kube_api_qps,
        args.kube_api_burst,
        if args.disable_compression { "off" } else { "on" },
    );

    let state = Arc::new(AppState {
        provider: MetricsProvider::new(args.metrics_service_address, args.cert_dir),
    });

    let app = Router::new()
        .route("/healthz", get(handler::healthz))
        .route("/readyz", get(handler::healthz))
        .route(
            "/apis/external.metrics.k8s.io/v1beta1/namespaces/:namespace/:metric",
            get(handler::get_external_metric),
        )
        .layer(Extension(state));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C signal handler");
            tracing::info!("Received shutdown signal");
        })
        .await
        .with_context(|| "metrics adapter server failed")?;

    Ok(())
}
