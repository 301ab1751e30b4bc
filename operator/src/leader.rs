use anyhow::{anyhow, Result};
use chrono::Local;
use resources::{
    config::LeaderElectionSettings,
    models::Response,
    objects::{
        lease::{Lease, LeaseSpec},
        list_path, uri_of, Metadata, Object,
    },
};
use tokio_util::sync::CancellationToken;

use crate::CONFIG;

const LEASE_NAME: &str = "rkeda-operator";

/// Lease-based leader election. Only the holder runs the scale loop
/// manager and the metrics RPC service; other replicas keep their
/// watches warm and retry.
pub struct LeaderElector {
    identity: String,
    namespace: String,
    settings: LeaderElectionSettings,
    client: reqwest::Client,
}

impl LeaderElector {
    pub fn new(namespace: String, settings: LeaderElectionSettings) -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "operator".to_string());
        LeaderElector {
            identity: format!("{}-{}", hostname, uuid::Uuid::new_v4().simple()),
            namespace,
            settings,
            client: reqwest::Client::new(),
        }
    }

    /// Blocks until this replica holds the lease or the token fires.
    pub async fn acquire(&self, shutdown: &CancellationToken) -> Result<()> {
        loop {
            if shutdown.is_cancelled() {
                return Err(anyhow!("shutdown before leadership was acquired"));
            }
            match self.try_acquire().await {
                Ok(true) => {
                    tracing::info!("Acquired leadership as {}", self.identity);
                    return Ok(());
                },
                Ok(false) => {},
                Err(e) => tracing::warn!("Leader election attempt failed: {:#}", e),
            }
            tokio::select! {
                _ = shutdown.cancelled() => {},
                _ = tokio::time::sleep(self.settings.retry_period) => {},
            }
        }
    }

    /// Renews until the lease is lost (an error) or shutdown (Ok).
    pub async fn keep_renewing(&self, shutdown: &CancellationToken) -> Result<()> {
        let mut last_renewal = std::time::Instant::now();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.settings.retry_period) => {},
            }
            match self.renew().await {
                Ok(()) => last_renewal = std::time::Instant::now(),
                Err(e) => {
                    tracing::warn!("Lease renewal failed: {:#}", e);
                    if last_renewal.elapsed() >= self.settings.renew_deadline {
                        return Err(anyhow!("lost leadership: {:#}", e));
                    }
                },
            }
        }
    }

    async fn try_acquire(&self) -> Result<bool> {
        let now = Local::now().naive_utc();
        match self.get_lease().await? {
            Some(mut lease) => {
                if !lease.held_by(&self.identity) && !lease.expired(now) {
                    return Ok(false);
                }
                if !lease.held_by(&self.identity) {
                    lease.spec.lease_transitions += 1;
                    lease.spec.acquire_time = Some(now);
                }
                lease.spec.holder_identity = Some(self.identity.to_owned());
                lease.spec.lease_duration_seconds =
                    Some(self.settings.lease_duration.as_secs() as u32);
                lease.spec.renew_time = Some(now);
                self.put_lease(&lease).await?;
                Ok(true)
            },
            None => {
                let lease = Lease {
                    metadata: Metadata {
                        name: LEASE_NAME.to_string(),
                        namespace: self.namespace.to_owned(),
                        ..Metadata::default()
                    },
                    spec: LeaseSpec {
                        holder_identity: Some(self.identity.to_owned()),
                        lease_duration_seconds: Some(
                            self.settings.lease_duration.as_secs() as u32
                        ),
                        acquire_time: Some(now),
                        renew_time: Some(now),
                        lease_transitions: 0,
                    },
                };
                self.create_lease(&lease).await?;
                Ok(true)
            },
        }
    }

    async fn renew(&self) -> Result<()> {
        let mut lease = self
            .get_lease()
            .await?
            .ok_or_else(|| anyhow!("lease disappeared"))?;
        if !lease.held_by(&self.identity) {
            return Err(anyhow!(
                "lease taken over by {}",
                lease.spec.holder_identity.as_deref().unwrap_or("nobody")
            ));
        }
        lease.spec.renew_time = Some(Local::now().naive_utc());
        self.put_lease(&lease).await
    }

    async fn get_lease(&self) -> Result<Option<Lease>> {
        let response = self
            .client
            .get(format!(
                "{}{}",
                CONFIG.api_server_url,
                uri_of::<Lease>(&self.namespace, LEASE_NAME)
            ))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(response.json::<Response<Lease>>().await?.data)
    }

    async fn put_lease(&self, lease: &Lease) -> Result<()> {
        self.client
            .put(format!("{}{}", CONFIG.api_server_url, lease.uri()))
            .json(lease)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn create_lease(&self, lease: &Lease) -> Result<()> {
        self.client
            .post(format!(
                "{}{}",
                CONFIG.api_server_url,
                list_path::<Lease>(Some(self.namespace.as_str()))
            ))
            .json(lease)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
