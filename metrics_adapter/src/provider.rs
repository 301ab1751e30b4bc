use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use resources::{
    objects::{metrics::ExternalMetricValue, quantity::Quantity},
    proto::metricsservice::{metrics_service_client::MetricsServiceClient, TargetRef},
};
use tokio::sync::Mutex;
use tonic::{
    transport::{Certificate, Channel, ClientTlsConfig, Identity},
    Code,
};

/// Retry schedule for the RPC channel: initial backoff, multiplier 2,
/// capped. Only `Unavailable` is retried; anything else is the
/// operator's answer.
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum ProviderError {
    /// The operator could not be reached within the retry budget.
    Unavailable(String),
    /// The operator answered with an error for this metric.
    Upstream(String),
}

/// Lazily connected gRPC client for the operator's metrics service,
/// shared by all request handlers.
pub struct MetricsProvider {
    address: String,
    cert_dir: PathBuf,
    client: Mutex<Option<MetricsServiceClient<Channel>>>,
}

impl MetricsProvider {
    pub fn new(address: String, cert_dir: PathBuf) -> Self {
        MetricsProvider {
            address,
            cert_dir,
            client: Mutex::new(None),
        }
    }

    pub async fn get_metrics(
        &self,
        namespace: &str,
        target_name: &str,
        metric_name: &str,
    ) -> Result<Vec<ExternalMetricValue>, ProviderError> {
        let request = TargetRef {
            namespace: namespace.to_string(),
            name: target_name.to_string(),
            metric_name: metric_name.to_string(),
        };

        let started = std::time::Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.call(&request).await {
                Ok(response) => {
                    if !response.error.is_empty() {
                        return Err(ProviderError::Upstream(response.error));
                    }
                    return Ok(response
                        .samples
                        .iter()
                        .map(|sample| ExternalMetricValue {
                            metric_name: sample.metric_name.to_owned(),
                            timestamp: chrono_from_millis(sample.timestamp_ms),
                            value: Quantity::from_milli(sample.value_milli),
                        })
                        .collect());
                },
                Err(status) if status.code() == Code::Unavailable => {
                    // The connection may be stale (operator restarted);
                    // drop it so the next attempt redials.
                    *self.client.lock().await = None;
                    if started.elapsed() + backoff > BACKOFF_CAP {
                        return Err(ProviderError::Unavailable(status.message().to_string()));
                    }
                    tracing::debug!(
                        "Metrics service unavailable, retrying in {:?}: {}",
                        backoff,
                        status.message()
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                },
                Err(status) => {
                    return Err(ProviderError::Upstream(status.message().to_string()));
                },
            }
        }
    }

    async fn call(
        &self,
        request: &TargetRef,
    ) -> Result<resources::proto::metricsservice::GetMetricsResponse, tonic::Status> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            let client = self.connect().await.map_err(|e| {
                tonic::Status::unavailable(format!("connecting to metrics service: {:#}", e))
            })?;
            *guard = Some(client);
        }
        let client = guard.as_mut().unwrap();
        client
            .get_metrics(tonic::Request::new(request.clone()))
            .await
            .map(|response| response.into_inner())
    }

    async fn connect(&self) -> Result<MetricsServiceClient<Channel>> {
        let read = |name: &str| {
            let path = self.cert_dir.join(name);
            std::fs::read(&path).with_context(|| format!("read {}", path.display()))
        };
        let tls = ClientTlsConfig::new()
            .identity(Identity::from_pem(read("tls.crt")?, read("tls.key")?))
            .ca_certificate(Certificate::from_pem(read("ca.crt")?));

        let channel = Channel::from_shared(self.address.to_owned())
            .with_context(|| format!("invalid metrics service address {}", self.address))?
            .tls_config(tls)
            .with_context(|| "invalid TLS material")?
            .connect_timeout(Duration::from_millis(500))
            .connect()
            .await
            .with_context(|| format!("dialing {}", self.address))?;
        Ok(MetricsServiceClient::new(channel))
    }
}

fn chrono_from_millis(millis: i64) -> chrono::NaiveDateTime {
    chrono::NaiveDateTime::from_timestamp_opt(millis / 1000, ((millis % 1000) * 1_000_000) as u32)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_doubles_to_the_cap() {
        let mut backoff = INITIAL_BACKOFF;
        let mut schedule = Vec::new();
        for _ in 0..4 {
            schedule.push(backoff);
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }
        assert_eq!(
            schedule,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
            ]
        );
    }
}
