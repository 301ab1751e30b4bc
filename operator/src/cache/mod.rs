use std::{
    collections::HashSet,
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use resources::{
    config::Settings,
    objects::{trigger_auth::PodIdentityProvider, workload::Workload},
};
use tokio::sync::Mutex;

use crate::{
    error::ScaleError,
    resolver::Resolver,
    scaler::{registry, MetricSpec, SampleResult, Scaler, ScalerContext},
    target::ScalingTarget,
};

/// Delay before a replaced entry's scalers are closed, so in-flight
/// samples against the old generation can finish.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// One built adapter plus its static specs. Sampling goes through the
/// lock, serializing calls per (target, generation).
pub struct CachedScaler {
    pub trigger_index: usize,
    pub trigger_type: String,
    pub specs: Vec<MetricSpec>,
    scaler: Mutex<Box<dyn Scaler>>,
}

impl CachedScaler {
    pub(crate) fn new(
        trigger_index: usize,
        trigger_type: String,
        scaler: Box<dyn Scaler>,
    ) -> Self {
        CachedScaler {
            trigger_index,
            trigger_type,
            specs: scaler.metric_specs(),
            scaler: Mutex::new(scaler),
        }
    }

    pub async fn sample(&self, metric_name: &str) -> Result<SampleResult, ScaleError> {
        self.scaler.lock().await.sample_and_activity(metric_name).await
    }

    pub async fn close(&self) -> Result<(), ScaleError> {
        self.scaler.lock().await.close().await
    }
}

/// Immutable snapshot of a target's built scalers at one generation.
/// Borrowers hold the `Arc`, so a rebuild can never hand them a mix of
/// two generations.
pub struct CacheEntry {
    pub target_key: String,
    pub generation: i64,
    pub scalers: Vec<CachedScaler>,
    pub pod_identities: Vec<PodIdentityProvider>,
    pub auth_keys: Vec<String>,
}

impl CacheEntry {
    pub fn metric_specs(&self) -> Vec<MetricSpec> {
        self.scalers
            .iter()
            .flat_map(|s| s.specs.iter().cloned())
            .collect()
    }

    pub fn find_by_metric(&self, metric_name: &str) -> Option<&CachedScaler> {
        self.scalers
            .iter()
            .find(|s| s.specs.iter().any(|spec| spec.name == metric_name))
    }

    pub async fn close_all(&self) {
        for scaler in &self.scalers {
            if let Err(e) = scaler.close().await {
                tracing::warn!(
                    "Error closing {} scaler of {}: {:#}",
                    scaler.trigger_type,
                    self.target_key,
                    e
                );
            }
        }
    }
}

/// Process-wide registry of live scalers, keyed by target. Builds are
/// single-flight per key and swapped in atomically; partial entries are
/// never stored.
pub struct ScalersCache {
    resolver: Resolver,
    settings: Arc<Settings>,
    entries: DashMap<String, Arc<CacheEntry>>,
    build_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Authentication store key -> targets depending on it.
    auth_index: DashMap<String, HashSet<String>>,
}

impl ScalersCache {
    pub fn new(resolver: Resolver, settings: Arc<Settings>) -> Self {
        ScalersCache {
            resolver,
            settings,
            entries: DashMap::new(),
            build_locks: DashMap::new(),
            auth_index: DashMap::new(),
        }
    }

    pub fn get(&self, target_key: &str) -> Option<Arc<CacheEntry>> {
        self.entries.get(target_key).map(|e| e.clone())
    }

    /// Returns the live entry for the target, building it on first use
    /// or when the generation moved. The previous entry keeps serving
    /// in-flight borrowers and is closed in the background after a grace
    /// period.
    pub async fn get_or_build(
        &self,
        target: &ScalingTarget,
        workload: Option<&Workload>,
    ) -> Result<Arc<CacheEntry>, ScaleError> {
        let key = target.key();
        if let Some(entry) = self.entries.get(&key) {
            if entry.generation == target.generation() {
                return Ok(entry.clone());
            }
        }

        let lock = self
            .build_locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have finished the same build while we
        // waited on the lock.
        if let Some(entry) = self.entries.get(&key) {
            if entry.generation == target.generation() {
                return Ok(entry.clone());
            }
        }

        let entry = Arc::new(self.build_entry(target, workload).await?);
        for auth_key in &entry.auth_keys {
            self.auth_index
                .entry(auth_key.to_owned())
                .or_insert_with(HashSet::new)
                .insert(key.to_owned());
        }

        let previous = self.entries.insert(key.to_owned(), entry.clone());
        if let Some(previous) = previous {
            tracing::info!(
                "Rebuilt scalers for {} at generation {}, retiring generation {}",
                key,
                entry.generation,
                previous.generation
            );
            tokio::spawn(async move {
                tokio::time::sleep(CLOSE_GRACE).await;
                previous.close_all().await;
            });
        }
        Ok(entry)
    }

    async fn build_entry(
        &self,
        target: &ScalingTarget,
        workload: Option<&Workload>,
    ) -> Result<CacheEntry, ScaleError> {
        let key = target.key();
        let mut scalers = Vec::with_capacity(target.triggers().len());
        let mut pod_identities = Vec::new();
        let mut auth_keys = Vec::new();

        for (index, trigger) in target.triggers().iter().enumerate() {
            let resolved = self
                .resolver
                .resolve_trigger(
                    trigger,
                    target.namespace(),
                    workload,
                    target.env_source_container(),
                )
                .await;
            let resolved = match resolved {
                Ok(resolved) => resolved,
                Err(e) => {
                    close_partial(&key, scalers).await;
                    return Err(e);
                },
            };

            let ctx = ScalerContext {
                target_key: key.to_owned(),
                trigger_index: index,
                trigger_type: trigger.type_.to_owned(),
                trigger_name: trigger.name.to_owned(),
                metric_type: trigger.metric_type.unwrap_or_default(),
                params: resolved.params,
                pod_identity: resolved.pod_identity,
                http_timeout: self.settings.http_default_timeout,
            };
            let scaler = match registry::build_scaler(ctx) {
                Ok(scaler) => scaler,
                Err(e) => {
                    close_partial(&key, scalers).await;
                    return Err(e);
                },
            };

            scalers.push(CachedScaler::new(index, trigger.type_.to_owned(), scaler));
            pod_identities.push(resolved.pod_identity);
            if let Some(auth_key) = resolved.auth_key {
                auth_keys.push(auth_key);
            }
        }
        auth_keys.dedup();

        Ok(CacheEntry {
            target_key: key,
            generation: target.generation(),
            scalers,
            pod_identities,
            auth_keys,
        })
    }

    /// Synchronous removal; all scalers are closed before returning.
    pub async fn evict(&self, target_key: &str) {
        if let Some((_, entry)) = self.entries.remove(target_key) {
            entry.close_all().await;
        }
        self.build_locks.remove(target_key);
        for mut targets in self.auth_index.iter_mut() {
            targets.remove(target_key);
        }
    }

    /// Drops the entry so the next poll rebuilds it at the same
    /// generation, used when an authentication it depends on rotated.
    pub fn refresh(&self, target_key: &str) {
        if let Some((_, previous)) = self.entries.remove(target_key) {
            tracing::info!("Refreshing scalers for {}", target_key);
            tokio::spawn(async move {
                tokio::time::sleep(CLOSE_GRACE).await;
                previous.close_all().await;
            });
        }
    }

    pub fn targets_for_auth(&self, auth_key: &str) -> Vec<String> {
        self.auth_index
            .get(auth_key)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }
}

async fn close_partial(target_key: &str, scalers: Vec<CachedScaler>) {
    for scaler in &scalers {
        if let Err(e) = scaler.close().await {
            tracing::warn!(
                "Error closing partially built scaler for {}: {:#}",
                target_key,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use resources::objects::{
        config_map::ConfigMap,
        object_reference::ScaleTargetRef,
        scaled_object::*,
        secret::Secret,
        trigger::Trigger,
        trigger_auth::{ClusterTriggerAuthentication, TriggerAuthentication},
        Metadata,
    };
    use tokio::sync::RwLock;

    use super::*;
    use crate::target::ScalingTarget;

    fn empty_store<T: resources::objects::Object>() -> resources::informer::Store<T> {
        Arc::new(RwLock::new(HashMap::new()))
    }

    fn cache() -> ScalersCache {
        let settings = Arc::new(Settings::default());
        let resolver = Resolver::new(
            empty_store::<TriggerAuthentication>(),
            empty_store::<ClusterTriggerAuthentication>(),
            empty_store::<Secret>(),
            empty_store::<ConfigMap>(),
            settings.clone(),
        );
        ScalersCache::new(resolver, settings)
    }

    fn scaled_object(generation: i64) -> ScalingTarget {
        ScalingTarget::Object(ScaledObject {
            metadata: Metadata {
                name: "worker".to_string(),
                namespace: "default".to_string(),
                generation,
                ..Metadata::default()
            },
            spec: ScaledObjectSpec {
                scale_target_ref: ScaleTargetRef {
                    api_group: None,
                    kind: "Workload".to_string(),
                    name: "worker".to_string(),
                    env_source_container_name: None,
                },
                polling_interval: 30,
                cooldown_period: 300,
                initial_cooldown_period: None,
                idle_replica_count: None,
                min_replica_count: Some(0),
                max_replica_count: 10,
                fallback: None,
                advanced: Advanced::default(),
                triggers: vec![Trigger {
                    type_: "metrics-api".to_string(),
                    name: None,
                    metadata: [
                        ("url", "http://metrics.default.svc/queue"),
                        ("valueLocation", "depth"),
                        ("targetValue", "5"),
                    ]
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                    authentication_ref: None,
                    metric_type: None,
                }],
            },
            status: None,
        })
    }

    #[tokio::test]
    async fn same_generation_reuses_the_entry() {
        let cache = cache();
        let target = scaled_object(1);
        let first = cache.get_or_build(&target, None).await.unwrap();
        let second = cache.get_or_build(&target, None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn rebuilding_yields_structurally_equal_specs() {
        let cache = cache();
        let target = scaled_object(1);
        let first = cache.get_or_build(&target, None).await.unwrap();
        cache.evict(&target.key()).await;
        let second = cache.get_or_build(&target, None).await.unwrap();
        assert_eq!(first.metric_specs(), second.metric_specs());
        assert_eq!(first.metric_specs()[0].name, "s0-metrics-api");
    }

    #[tokio::test]
    async fn generation_change_swaps_without_mixing() {
        let cache = cache();
        let old = cache.get_or_build(&scaled_object(1), None).await.unwrap();
        let new = cache.get_or_build(&scaled_object(2), None).await.unwrap();
        // The borrowed snapshot still reflects its own generation.
        assert_eq!(old.generation, 1);
        assert_eq!(new.generation, 2);
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(cache.get(&old.target_key).unwrap().generation, 2);
    }

    #[tokio::test]
    async fn build_errors_leave_no_entry() {
        let cache = cache();
        let mut target = scaled_object(1);
        if let ScalingTarget::Object(so) = &mut target {
            so.spec.triggers[0].type_ = "carrier-pigeon".to_string();
        }
        assert!(matches!(
            cache.get_or_build(&target, None).await,
            Err(ScaleError::ConfigInvalid(_))
        ));
        assert!(cache.get(&target.key()).is_none());
    }

    #[tokio::test]
    async fn refresh_drops_the_entry_for_rebuild() {
        let cache = cache();
        let target = scaled_object(1);
        cache.get_or_build(&target, None).await.unwrap();
        cache.refresh(&target.key());
        assert!(cache.get(&target.key()).is_none());
        assert!(cache.get_or_build(&target, None).await.is_ok());
    }
}
