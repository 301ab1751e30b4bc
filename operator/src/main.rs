#[macro_use]
extern crate lazy_static;

use std::{
    env,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use resources::config::{ClusterConfig, Settings};
use tokio_util::sync::CancellationToken;

use crate::{
    leader::LeaderElector, metrics_service::OperatorMetricsService, scale_loop::ScaleLoopManager,
};

mod cache;
mod error;
mod fallback;
mod leader;
mod metrics_service;
mod resolver;
mod scale_loop;
mod scaler;
mod target;
mod utils;

lazy_static! {
    pub static ref CONFIG: ClusterConfig = Config::builder()
        .add_source(File::with_name("/etc/rkeda/operator.yaml").required(false))
        .add_source(Environment::default())
        .build()
        .unwrap_or_default()
        .try_deserialize::<ClusterConfig>()
        .with_context(|| "Failed to parse config".to_string())
        .unwrap_or_default();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let settings = Arc::new(Settings::from_env()?);
    tracing::info!(
        "Operator starting, own namespace {}, watching {}",
        settings.cluster_object_namespace,
        settings.watch_namespace.as_deref().unwrap_or("all namespaces"),
    );
    tracing::info!(
        "Registered trigger types: {}",
        scaler::registry::known_types().join(", ")
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received shutdown signal");
                shutdown.cancel();
            }
        });
    }

    let elector = LeaderElector::new(
        settings.cluster_object_namespace.to_owned(),
        settings.leader_election.clone(),
    );
    if elector.acquire(&shutdown).await.is_err() {
        // Interrupted before becoming leader; a clean exit.
        return Ok(());
    }

    let mut manager = ScaleLoopManager::new(settings.clone(), shutdown.clone());

    if settings.use_metrics_service_grpc {
        let service = OperatorMetricsService::new(
            manager.scaled_object_store(),
            manager.cache(),
            manager.last_samples(),
            settings.clone(),
        );
        let addr: SocketAddr = env::var("KEDA_METRICS_SERVICE_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:9666".to_string())
            .parse()
            .with_context(|| "invalid KEDA_METRICS_SERVICE_ADDR")?;
        let cert_dir = PathBuf::from(
            env::var("KEDA_METRICS_SERVICE_CERT_DIR").unwrap_or_else(|_| "/certs".to_string()),
        );
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_service::serve(service, addr, cert_dir, shutdown.clone()).await
            {
                tracing::error!("Metrics service terminated: {:#}", e);
                shutdown.cancel();
            }
        });
    } else {
        tracing::info!("Metrics service gRPC split disabled");
    }

    let lease_lost = Arc::new(AtomicBool::new(false));
    let renew_handle = {
        let shutdown = shutdown.clone();
        let lease_lost = lease_lost.clone();
        tokio::spawn(async move {
            if let Err(e) = elector.keep_renewing(&shutdown).await {
                tracing::error!("{:#}", e);
                lease_lost.store(true, Ordering::SeqCst);
                shutdown.cancel();
            }
        })
    };

    manager.run().await?;
    renew_handle.abort();

    if lease_lost.load(Ordering::SeqCst) {
        return Err(anyhow!("exiting after losing leadership"));
    }
    Ok(())
}
