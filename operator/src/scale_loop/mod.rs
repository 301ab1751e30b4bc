use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::{Error, Result};
use dashmap::DashMap;
use futures_delay_queue::{delay_queue, DelayQueue};
use futures_intrusive::{buffer::GrowingHeapBuf, channel::shared::GenericReceiver};
use parking_lot::RawMutex;
use resources::{
    config::Settings,
    informer::Store,
    objects::{
        config_map::ConfigMap,
        job::Job,
        metrics::ExternalMetricValue,
        scaled_job::ScaledJob,
        scaled_object::ScaledObject,
        secret::Secret,
        trigger_auth::{ClusterTriggerAuthentication, TriggerAuthentication},
        uri_of,
        workload::Workload,
        Object,
    },
};
use tokio::{
    select,
    sync::mpsc::{self, Receiver, Sender},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::ScalersCache,
    error::ScaleError,
    resolver::Resolver,
    utils::{create_informer, Event, ResyncNotification},
};

pub mod evaluator;
pub mod jobs;
pub mod target_loop;

use target_loop::TargetLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    ScaledObject,
    ScaledJob,
}

/// Samples published by target tasks and read by the metrics RPC
/// service; single writer per target.
pub type LastSamples = Arc<DashMap<String, Vec<ExternalMetricValue>>>;

pub fn sample_key(target_key: &str, metric_name: &str) -> String {
    format!("{}#{}", target_key, metric_name)
}

/// Informer-backed read caches shared across the operator.
#[derive(Clone)]
pub struct Stores {
    pub scaled_objects: Store<ScaledObject>,
    pub scaled_jobs: Store<ScaledJob>,
    pub trigger_auths: Store<TriggerAuthentication>,
    pub cluster_trigger_auths: Store<ClusterTriggerAuthentication>,
    pub secrets: Store<Secret>,
    pub config_maps: Store<ConfigMap>,
    pub workloads: Store<Workload>,
    pub jobs: Store<Job>,
}

struct RunningTarget {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct TaskExit {
    key: String,
    result: Result<(), ScaleError>,
}

/// Seconds the manager waits for target tasks on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
/// Cap for the Failed -> Starting retry backoff.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(300);

/// Owns every informer and one long-running task per scaling target.
pub struct ScaleLoopManager {
    stores: Stores,
    informer_handles: Vec<JoinHandle<Result<(), Error>>>,

    so_rx: Receiver<Event<ScaledObject>>,
    sj_rx: Receiver<Event<ScaledJob>>,
    auth_rx: Receiver<Event<TriggerAuthentication>>,
    cluster_auth_rx: Receiver<Event<ClusterTriggerAuthentication>>,
    secret_rx: Receiver<Event<Secret>>,
    resync_rx: Receiver<ResyncNotification>,

    cache: Arc<ScalersCache>,
    last_samples: LastSamples,
    settings: Arc<Settings>,
    shutdown: CancellationToken,

    tasks: HashMap<String, RunningTarget>,
    pending_restart: HashSet<String>,
    /// Targets with an invalid spec, parked until the spec changes.
    config_invalid: HashSet<String>,
    retry_attempts: HashMap<String, u32>,
    exit_tx: Sender<TaskExit>,
    exit_rx: Receiver<TaskExit>,

    work_queue: DelayQueue<String, GrowingHeapBuf<String>>,
    work_queue_rx: GenericReceiver<RawMutex, String, GrowingHeapBuf<String>>,
    in_queue: HashSet<String>,
}

impl ScaleLoopManager {
    pub fn new(settings: Arc<Settings>, shutdown: CancellationToken) -> Self {
        let namespace = settings.watch_namespace.to_owned();
        let (resync_tx, resync_rx) = mpsc::channel::<ResyncNotification>(16);

        let (so_tx, so_rx) = mpsc::channel(16);
        let so_informer = create_informer::<ScaledObject>(namespace.clone(), so_tx, resync_tx.clone());
        let scaled_objects = so_informer.get_store();

        let (sj_tx, sj_rx) = mpsc::channel(16);
        let sj_informer = create_informer::<ScaledJob>(namespace.clone(), sj_tx, resync_tx.clone());
        let scaled_jobs = sj_informer.get_store();

        let (auth_tx, auth_rx) = mpsc::channel(16);
        let auth_informer =
            create_informer::<TriggerAuthentication>(namespace.clone(), auth_tx, resync_tx.clone());
        let trigger_auths = auth_informer.get_store();

        let (cluster_auth_tx, cluster_auth_rx) = mpsc::channel(16);
        let cluster_auth_informer = create_informer::<ClusterTriggerAuthentication>(
            None,
            cluster_auth_tx,
            resync_tx.clone(),
        );
        let cluster_trigger_auths = cluster_auth_informer.get_store();

        let (secret_tx, secret_rx) = mpsc::channel(16);
        let secret_informer =
            create_informer::<Secret>(namespace.clone(), secret_tx, resync_tx.clone());
        let secrets = secret_informer.get_store();

        let (noop_cm_tx, mut noop_cm_rx) = mpsc::channel::<Event<ConfigMap>>(16);
        let cm_informer =
            create_informer::<ConfigMap>(namespace.clone(), noop_cm_tx, resync_tx.clone());
        let config_maps = cm_informer.get_store();
        // Config map contents are read lazily at resolution time; the
        // events only need draining.
        tokio::spawn(async move { while noop_cm_rx.recv().await.is_some() {} });

        let (noop_wl_tx, mut noop_wl_rx) = mpsc::channel::<Event<Workload>>(16);
        let wl_informer =
            create_informer::<Workload>(namespace.clone(), noop_wl_tx, resync_tx.clone());
        let workloads = wl_informer.get_store();
        tokio::spawn(async move { while noop_wl_rx.recv().await.is_some() {} });

        let (noop_job_tx, mut noop_job_rx) = mpsc::channel::<Event<Job>>(16);
        let job_informer = create_informer::<Job>(namespace, noop_job_tx, resync_tx);
        let jobs = job_informer.get_store();
        tokio::spawn(async move { while noop_job_rx.recv().await.is_some() {} });

        let informer_handles = vec![
            tokio::spawn(async move { so_informer.run().await }),
            tokio::spawn(async move { sj_informer.run().await }),
            tokio::spawn(async move { auth_informer.run().await }),
            tokio::spawn(async move { cluster_auth_informer.run().await }),
            tokio::spawn(async move { secret_informer.run().await }),
            tokio::spawn(async move { cm_informer.run().await }),
            tokio::spawn(async move { wl_informer.run().await }),
            tokio::spawn(async move { job_informer.run().await }),
        ];

        let stores = Stores {
            scaled_objects,
            scaled_jobs,
            trigger_auths: trigger_auths.clone(),
            cluster_trigger_auths: cluster_trigger_auths.clone(),
            secrets: secrets.clone(),
            config_maps: config_maps.clone(),
            workloads,
            jobs,
        };

        let resolver = Resolver::new(
            trigger_auths,
            cluster_trigger_auths,
            secrets,
            config_maps,
            settings.clone(),
        );
        let cache = Arc::new(ScalersCache::new(resolver, settings.clone()));

        let (exit_tx, exit_rx) = mpsc::channel(16);
        let (work_queue, work_queue_rx) = delay_queue::<String>();

        ScaleLoopManager {
            stores,
            informer_handles,
            so_rx,
            sj_rx,
            auth_rx,
            cluster_auth_rx,
            secret_rx,
            resync_rx,
            cache,
            last_samples: Arc::new(DashMap::new()),
            settings,
            shutdown,
            tasks: HashMap::new(),
            pending_restart: HashSet::new(),
            config_invalid: HashSet::new(),
            retry_attempts: HashMap::new(),
            exit_tx,
            exit_rx,
            work_queue,
            work_queue_rx,
            in_queue: HashSet::new(),
        }
    }

    pub fn scaled_object_store(&self) -> Store<ScaledObject> {
        self.stores.scaled_objects.clone()
    }

    pub fn cache(&self) -> Arc<ScalersCache> {
        self.cache.clone()
    }

    pub fn last_samples(&self) -> LastSamples {
        self.last_samples.clone()
    }

    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("Scale loop manager started");

        loop {
            select! {
                Some(event) = self.so_rx.recv() => self.handle_scaled_object_event(event).await,
                Some(event) = self.sj_rx.recv() => self.handle_scaled_job_event(event).await,
                Some(event) = self.auth_rx.recv() => {
                    if let Event::Update(_, auth) | Event::Delete(auth) = event {
                        self.refresh_auth_dependents(&auth.uri()).await;
                    }
                },
                Some(event) = self.cluster_auth_rx.recv() => {
                    if let Event::Update(_, auth) | Event::Delete(auth) = event {
                        self.refresh_auth_dependents(&auth.uri()).await;
                    }
                },
                Some(event) = self.secret_rx.recv() => {
                    if let Event::Update(_, secret) | Event::Delete(secret) = event {
                        self.handle_secret_change(&secret).await;
                    }
                },
                Some(_) = self.resync_rx.recv() => self.reconcile_tasks().await,
                Some(key) = self.work_queue_rx.receive() => {
                    self.in_queue.remove(&key);
                    self.start_target(&key).await;
                },
                Some(exit) = self.exit_rx.recv() => self.handle_task_exit(exit).await,
                _ = self.shutdown.cancelled() => break,
                else => break,
            }
        }

        self.drain().await;
        tracing::info!("Scale loop manager exited");
        Ok(())
    }

    async fn handle_scaled_object_event(&mut self, event: Event<ScaledObject>) {
        match event {
            Event::Add(so) => self.ensure_task(so.uri()).await,
            Event::Update(old, new) => {
                if old.spec != new.spec || old.metadata.annotations != new.metadata.annotations {
                    self.restart_task(new.uri()).await;
                }
            },
            Event::Delete(so) => {
                let key = so.uri();
                tracing::info!("ScaledObject {} deleted", key);
                self.stop_task(&key);
                self.cache.evict(&key).await;
                let prefix = sample_key(&key, "");
                self.last_samples.retain(|k, _| !k.starts_with(&prefix));
                self.retry_attempts.remove(&key);
                self.config_invalid.remove(&key);
                self.restore_original_replicas(&so).await;
            },
        }
    }

    async fn handle_scaled_job_event(&mut self, event: Event<ScaledJob>) {
        match event {
            Event::Add(sj) => self.ensure_task(sj.uri()).await,
            Event::Update(old, new) => {
                if old.spec != new.spec || old.metadata.annotations != new.metadata.annotations {
                    self.restart_task(new.uri()).await;
                }
            },
            Event::Delete(sj) => {
                let key = sj.uri();
                tracing::info!("ScaledJob {} deleted", key);
                self.stop_task(&key);
                self.cache.evict(&key).await;
                self.retry_attempts.remove(&key);
                self.config_invalid.remove(&key);
            },
        }
    }

    /// A rotated secret invalidates every target whose authentication
    /// reads it; entries rebuild on their next poll.
    async fn handle_secret_change(&self, secret: &Secret) {
        let mut auth_keys = Vec::new();
        for auth in self.stores.trigger_auths.read().await.values() {
            if auth.namespace() == secret.namespace()
                && auth.spec.referenced_secrets().contains(secret.name())
            {
                auth_keys.push(auth.uri());
            }
        }
        if secret.namespace() == &self.settings.cluster_object_namespace {
            for auth in self.stores.cluster_trigger_auths.read().await.values() {
                if auth.spec.referenced_secrets().contains(secret.name()) {
                    auth_keys.push(auth.uri());
                }
            }
        }
        for auth_key in auth_keys {
            self.refresh_auth_dependents(&auth_key).await;
        }
    }

    async fn refresh_auth_dependents(&self, auth_key: &str) {
        for target_key in self.cache.targets_for_auth(auth_key) {
            tracing::info!(
                "Authentication {} changed, refreshing {}",
                auth_key,
                target_key
            );
            self.cache.refresh(&target_key);
        }
    }

    async fn ensure_task(&mut self, key: String) {
        if self.tasks.contains_key(&key) {
            self.restart_task(key).await;
        } else {
            self.enqueue(key, Duration::ZERO);
        }
    }

    /// Restart goes through the exit channel so two tasks never overlap
    /// on one target.
    async fn restart_task(&mut self, key: String) {
        self.retry_attempts.remove(&key);
        self.config_invalid.remove(&key);
        match self.tasks.get(&key) {
            Some(running) => {
                self.pending_restart.insert(key);
                running.token.cancel();
            },
            None => self.enqueue(key, Duration::ZERO),
        }
    }

    fn stop_task(&mut self, key: &str) {
        self.pending_restart.remove(key);
        if let Some(running) = self.tasks.get(key) {
            running.token.cancel();
        }
    }

    async fn start_target(&mut self, key: &str) {
        if self.tasks.contains_key(key) {
            return;
        }
        let kind = if self.stores.scaled_objects.read().await.contains_key(key) {
            TargetKind::ScaledObject
        } else if self.stores.scaled_jobs.read().await.contains_key(key) {
            TargetKind::ScaledJob
        } else {
            // Deleted while queued.
            return;
        };

        let token = self.shutdown.child_token();
        let task = TargetLoop::new(
            key.to_string(),
            kind,
            self.stores.clone(),
            self.cache.clone(),
            self.last_samples.clone(),
            self.settings.clone(),
            token.clone(),
        );
        let exit_tx = self.exit_tx.clone();
        let exit_key = key.to_string();
        let handle = tokio::spawn(async move {
            let result = task.run().await;
            let _ = exit_tx
                .send(TaskExit {
                    key: exit_key,
                    result,
                })
                .await;
        });
        tracing::info!("Started scale loop for {}", key);
        self.tasks.insert(key.to_string(), RunningTarget { token, handle });
    }

    async fn handle_task_exit(&mut self, exit: TaskExit) {
        self.tasks.remove(&exit.key);
        if self.shutdown.is_cancelled() {
            return;
        }
        if self.pending_restart.remove(&exit.key) {
            self.enqueue(exit.key, Duration::ZERO);
            return;
        }
        match exit.result {
            Ok(()) => {},
            Err(ScaleError::ConfigInvalid(reason)) => {
                // Not retried; the next spec change unparks the target.
                tracing::warn!("Parking {}: {}", exit.key, reason);
                self.config_invalid.insert(exit.key);
            },
            Err(e) => {
                let attempts = self.retry_attempts.entry(exit.key.to_owned()).or_insert(0);
                *attempts += 1;
                let backoff = Duration::from_secs(1 << (*attempts - 1).min(16))
                    .min(MAX_RETRY_BACKOFF);
                tracing::warn!(
                    "Scale loop for {} failed (attempt {}), retrying in {:?}: {:#}",
                    exit.key,
                    attempts,
                    backoff,
                    e
                );
                self.enqueue(exit.key, backoff);
            },
        }
    }

    /// Safety net: every stored target gets a task, even if its watch
    /// event was missed.
    async fn reconcile_tasks(&mut self) {
        let mut keys: Vec<String> = self
            .stores
            .scaled_objects
            .read()
            .await
            .keys()
            .cloned()
            .collect();
        keys.extend(self.stores.scaled_jobs.read().await.keys().cloned());
        for key in keys {
            if !self.tasks.contains_key(&key)
                && !self.in_queue.contains(&key)
                && !self.pending_restart.contains(&key)
                && !self.config_invalid.contains(&key)
            {
                self.enqueue(key, Duration::ZERO);
            }
        }
    }

    fn enqueue(&mut self, key: String, delay: Duration) {
        if self.in_queue.insert(key.to_owned()) {
            self.work_queue.insert(key, delay);
        }
    }

    async fn restore_original_replicas(&self, so: &ScaledObject) {
        if !so.spec.advanced.restore_to_original_replica_count {
            return;
        }
        let original = match so.status.as_ref().and_then(|s| s.original_replica_count) {
            Some(original) => original,
            None => return,
        };
        let workload = self
            .stores
            .workloads
            .read()
            .await
            .get(&uri_of::<Workload>(
                so.namespace(),
                &so.spec.scale_target_ref.name,
            ))
            .cloned();
        if let Some(mut workload) = workload {
            tracing::info!(
                "Restoring workload {} to {} replicas",
                workload.name(),
                original
            );
            workload.spec.replicas = original;
            if let Err(e) = crate::utils::post_update(&workload).await {
                tracing::error!("Failed to restore workload replicas: {:#}", e);
            }
        }
    }

    /// Cancellation fans out to every task; stragglers are aborted after
    /// the grace window.
    async fn drain(&mut self) {
        for running in self.tasks.values() {
            running.token.cancel();
        }
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        for (key, running) in self.tasks.drain() {
            let mut handle = running.handle;
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                tracing::warn!("Target task {} exceeded the shutdown grace window", key);
                handle.abort();
            }
        }
        for handle in &self.informer_handles {
            handle.abort();
        }
    }
}
