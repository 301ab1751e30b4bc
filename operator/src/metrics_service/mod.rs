use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use resources::{
    config::Settings,
    informer::Store,
    objects::{scaled_object::ScaledObject, uri_of},
    proto::metricsservice::{
        metrics_service_server::{MetricsService, MetricsServiceServer},
        GetMetricsResponse, MetricSample, TargetRef,
    },
};
use tonic::{
    transport::{Certificate, Identity, Server, ServerTlsConfig},
    Request, Response, Status,
};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::ScalersCache,
    scale_loop::{sample_key, LastSamples},
};

pub mod certs;

use certs::CertificateStore;

/// Operator-side RPC endpoint the metrics adapter consults for
/// on-demand samples.
#[derive(Clone)]
pub struct OperatorMetricsService {
    scaled_objects: Store<ScaledObject>,
    cache: Arc<ScalersCache>,
    last_samples: LastSamples,
    settings: Arc<Settings>,
}

impl OperatorMetricsService {
    pub fn new(
        scaled_objects: Store<ScaledObject>,
        cache: Arc<ScalersCache>,
        last_samples: LastSamples,
        settings: Arc<Settings>,
    ) -> Self {
        OperatorMetricsService {
            scaled_objects,
            cache,
            last_samples,
            settings,
        }
    }

    async fn collect(&self, target: &TargetRef) -> (Vec<MetricSample>, String) {
        let key = uri_of::<ScaledObject>(&target.namespace, &target.name);
        let known = self
            .scaled_objects
            .read()
            .await
            .contains_key(&key);
        if !known {
            return (Vec::new(), "not-found".to_string());
        }

        let entry = match self.cache.get(&key) {
            Some(entry) => entry,
            None => return (Vec::new(), "not-found".to_string()),
        };
        let scaler = match entry.find_by_metric(&target.metric_name) {
            Some(scaler) => scaler,
            None => return (Vec::new(), "not-found".to_string()),
        };

        let deadline = self.settings.http_default_timeout;
        let sampled =
            tokio::time::timeout(deadline, scaler.sample(&target.metric_name)).await;
        match sampled {
            Ok(Ok(result)) => (
                result.values.iter().map(to_sample).collect(),
                String::new(),
            ),
            other => {
                let error = match other {
                    Ok(Err(e)) => e.to_string(),
                    _ => format!("sampling timed out after {:?}", deadline),
                };
                // Serve the last published snapshot while the live call
                // is unavailable.
                match self
                    .last_samples
                    .get(&sample_key(&key, &target.metric_name))
                {
                    Some(values) => (values.iter().map(to_sample).collect(), String::new()),
                    None => (Vec::new(), error),
                }
            },
        }
    }
}

fn to_sample(value: &resources::objects::metrics::ExternalMetricValue) -> MetricSample {
    MetricSample {
        metric_name: value.metric_name.to_owned(),
        timestamp_ms: value.timestamp.timestamp_millis(),
        value_milli: value.value.milli(),
    }
}

#[tonic::async_trait]
impl MetricsService for OperatorMetricsService {
    async fn get_metrics(
        &self,
        request: Request<TargetRef>,
    ) -> Result<Response<GetMetricsResponse>, Status> {
        let target = request.into_inner();
        tracing::debug!(
            "Metric request for {}/{} {}",
            target.namespace,
            target.name,
            target.metric_name
        );
        let (samples, error) = self.collect(&target).await;

        // The observability snapshot is populated on success and error
        // alike.
        let prom_payload = serde_json::json!({
            "namespace": target.namespace,
            "target": target.name,
            "metric": target.metric_name,
            "samples": samples.len(),
            "error": error,
        })
        .to_string();

        Ok(Response::new(GetMetricsResponse {
            samples,
            prom_payload,
            error,
        }))
    }
}

/// Serves the RPC endpoint with mutual TLS. When the certificate
/// directory changes the listener is rebound atomically with the fresh
/// material; in-flight connections on the old pair complete first.
pub async fn serve(
    service: OperatorMetricsService,
    addr: SocketAddr,
    cert_dir: PathBuf,
    shutdown: CancellationToken,
) -> Result<()> {
    let store = Arc::new(CertificateStore::new(cert_dir)?);
    tracing::info!(
        "Metrics service listening on {} (minimum {})",
        addr,
        service.settings.min_tls_version
    );

    loop {
        let material = store.current();
        let tls = ServerTlsConfig::new()
            .identity(Identity::from_pem(&material.cert, &material.key))
            .client_ca_root(Certificate::from_pem(&material.ca));

        let rebind = CancellationToken::new();
        let watcher = {
            let store = store.clone();
            let shutdown = shutdown.clone();
            let rebind = rebind.clone();
            tokio::spawn(async move {
                if store.wait_for_change(&shutdown).await {
                    rebind.cancel();
                }
            })
        };

        let server_shutdown = {
            let shutdown = shutdown.clone();
            let rebind = rebind.clone();
            async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {},
                    _ = rebind.cancelled() => {},
                }
            }
        };

        Server::builder()
            .tls_config(tls)
            .with_context(|| "invalid TLS material")?
            .timeout(Duration::from_secs(10))
            .add_service(MetricsServiceServer::new(service.clone()))
            .serve_with_shutdown(addr, server_shutdown)
            .await
            .with_context(|| "metrics service failed")?;

        watcher.abort();
        if shutdown.is_cancelled() {
            tracing::info!("Metrics service stopped");
            return Ok(());
        }
        tracing::info!("Rebinding metrics service with rotated TLS material");
    }
}
