use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::NaiveDateTime;
use rand::Rng;
use resources::{
    config::Settings,
    objects::{
        job::{Job, JobPhase},
        scaled_job::ScaledJob,
        scaled_object::ScaledObject,
        set_condition, uri_of,
        workload::Workload,
        Condition, ConditionType, Object,
    },
};
use tokio_util::sync::CancellationToken;

use super::{
    evaluator::{self, ScaleDecision, TriggerHealth},
    jobs, sample_key, LastSamples, Stores, TargetKind,
};
use crate::{
    cache::ScalersCache, error::ScaleError, fallback::FallbackTracker, target::ScalingTarget,
    utils,
};

/// Replica mutation the operator owns; everything between the edges is
/// the native autoscaler's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleEdge {
    None,
    /// Activate an idle workload to the given count.
    FromZero(u32),
    /// Inactive but still cooling down; hold the idle floor.
    HoldFloor(u32),
    ToZero,
}

/// Decides the zero-edge for one cycle under the cooldown rules.
pub fn compute_scale_edge(
    active: bool,
    current_replicas: u32,
    min_replicas: u32,
    idle_floor: u32,
    now: NaiveDateTime,
    last_active: Option<NaiveDateTime>,
    started_at: NaiveDateTime,
    cooldown_seconds: u32,
    initial_cooldown_seconds: Option<u32>,
) -> ScaleEdge {
    if active {
        return if current_replicas == 0 {
            ScaleEdge::FromZero(min_replicas.max(1))
        } else {
            ScaleEdge::None
        };
    }

    if current_replicas == 0 || min_replicas > 0 {
        return ScaleEdge::None;
    }

    // Before any activity has been observed the initial cooldown counts
    // from the moment the scalers were built.
    let (reference, window) = match last_active {
        Some(at) => (at, cooldown_seconds),
        None => (
            started_at,
            initial_cooldown_seconds.unwrap_or(cooldown_seconds),
        ),
    };
    if now - reference >= chrono::Duration::seconds(window as i64) {
        ScaleEdge::ToZero
    } else if current_replicas < idle_floor {
        ScaleEdge::HoldFloor(idle_floor)
    } else {
        ScaleEdge::None
    }
}

/// One long-running task per scaling target. Private mutable state, a
/// cancellation token plumbed through every blocking call, and one
/// evaluation in flight at a time.
pub struct TargetLoop {
    key: String,
    kind: TargetKind,
    stores: Stores,
    cache: Arc<ScalersCache>,
    last_samples: LastSamples,
    settings: Arc<Settings>,
    token: CancellationToken,

    tracker: FallbackTracker,
    started_at: NaiveDateTime,
    last_active_time: Option<NaiveDateTime>,
    previous_decision: Option<ScaleDecision>,
    was_paused: bool,
    /// Executions submitted but not yet observed through the job watch.
    dispatched: HashSet<String>,
}

impl TargetLoop {
    pub fn new(
        key: String,
        kind: TargetKind,
        stores: Stores,
        cache: Arc<ScalersCache>,
        last_samples: LastSamples,
        settings: Arc<Settings>,
        token: CancellationToken,
    ) -> Self {
        TargetLoop {
            key,
            kind,
            stores,
            cache,
            last_samples,
            settings,
            token,
            tracker: FallbackTracker::new(),
            started_at: chrono::Local::now().naive_utc(),
            last_active_time: None,
            previous_decision: None,
            was_paused: false,
            dispatched: HashSet::new(),
        }
    }

    pub async fn run(mut self) -> Result<(), ScaleError> {
        // Rebuild activity state from the observed status on restart.
        if let Some(ScalingTarget::Object(so)) = self.load_target().await {
            self.last_active_time = so.status.as_ref().and_then(|s| s.last_active_time);
        }

        loop {
            let target = match self.load_target().await {
                Some(target) => target,
                // Deleted; the manager evicts the cache entry.
                None => return Ok(()),
            };

            if target.paused() {
                if !self.was_paused {
                    self.enter_paused(&target).await;
                    self.was_paused = true;
                }
            } else {
                if self.was_paused {
                    tracing::info!("Target {} resumed", self.key);
                    self.was_paused = false;
                }
                if let Err(e) = self.tick(&target).await {
                    match e {
                        ScaleError::Conflict => {
                            tracing::debug!("Discarding stale evaluation of {}", self.key);
                        },
                        ScaleError::ShuttingDown => return Ok(()),
                        // A malformed spec cannot recover on its own; the
                        // manager parks the target until it changes.
                        e @ ScaleError::ConfigInvalid(_) => {
                            self.report_not_ready(&target, &e).await;
                            return Err(e);
                        },
                        // Missing credentials may appear later; retried
                        // on the next poll.
                        e @ ScaleError::ResolutionFailed(_) => {
                            tracing::warn!("Cannot build scalers for {}: {:#}", self.key, e);
                            self.report_not_ready(&target, &e).await;
                        },
                        e => {
                            tracing::error!("Error evaluating {}: {:#}", self.key, e);
                        },
                    }
                }
            }

            let sleep = self.jittered_interval(target.polling_interval());
            tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(sleep) => {},
            }
        }
    }

    /// Polling interval jittered by ±10% to spread load across targets.
    fn jittered_interval(&self, seconds: u32) -> Duration {
        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::from_secs_f64(seconds.max(1) as f64 * factor)
    }

    async fn tick(&mut self, target: &ScalingTarget) -> Result<(), ScaleError> {
        let workload = self.load_workload(target).await;
        let entry = self.cache.get_or_build(target, workload.as_ref()).await?;

        let interval = Duration::from_secs(target.polling_interval().max(1) as u64);
        let budget = self.settings.http_default_timeout.min(interval.mul_f64(0.9));
        let mut decision =
            evaluator::evaluate(&entry, target, &mut self.tracker, budget).await;

        if self.token.is_cancelled() {
            return Err(ScaleError::ShuttingDown);
        }
        // The spec may have moved while we were sampling; the result
        // belongs to a dead generation then.
        if let Some(current) = self.load_target().await {
            if current.generation() != entry.generation {
                return Err(ScaleError::Conflict);
            }
        } else {
            return Err(ScaleError::Conflict);
        }

        let ready = !decision.all_failed;
        if decision.all_failed {
            // Retain the previous cycle's decision, only flip Ready.
            if let Some(previous) = &self.previous_decision {
                decision.desired_replicas = previous.desired_replicas;
                decision.active = previous.active;
            }
        } else {
            self.previous_decision = Some(decision.clone());
        }

        if decision.active {
            self.last_active_time = Some(decision.timestamp);
        }

        match (target, self.kind) {
            (ScalingTarget::Object(so), TargetKind::ScaledObject) => {
                self.apply_scaled_object(so, &decision, workload.as_ref(), ready)
                    .await
            },
            (ScalingTarget::Job(sj), TargetKind::ScaledJob) => {
                self.apply_scaled_job(sj, &decision, ready).await
            },
            _ => Err(ScaleError::Conflict),
        }
    }

    async fn apply_scaled_object(
        &mut self,
        so: &ScaledObject,
        decision: &ScaleDecision,
        workload: Option<&Workload>,
        ready: bool,
    ) -> Result<(), ScaleError> {
        // Publish samples for the native autoscaler; a retained decision
        // keeps the previous samples in place.
        if !decision.all_failed {
            for observation in &decision.observations {
                if observation.health == TriggerHealth::Fatal {
                    continue;
                }
                self.last_samples.insert(
                    sample_key(&self.key, &observation.metric_name),
                    observation.values.clone(),
                );
            }
        }

        if let Some(workload) = workload {
            let edge = compute_scale_edge(
                decision.active,
                workload.spec.replicas,
                so.min_replicas(),
                so.idle_floor(),
                decision.timestamp,
                self.last_active_time,
                self.started_at,
                so.spec.cooldown_period,
                so.spec.initial_cooldown_period,
            );
            match edge {
                ScaleEdge::FromZero(replicas) => {
                    tracing::info!("Activating {} to {} replicas", self.key, replicas);
                    self.write_workload_replicas(workload, replicas).await;
                },
                ScaleEdge::HoldFloor(replicas) => {
                    tracing::info!("Holding {} at idle floor {}", self.key, replicas);
                    self.write_workload_replicas(workload, replicas).await;
                },
                ScaleEdge::ToZero => {
                    tracing::info!("Scaling {} to zero after cooldown", self.key);
                    self.write_workload_replicas(workload, 0).await;
                },
                ScaleEdge::None => {},
            }
        } else {
            tracing::warn!(
                "Workload {} referenced by {} not found",
                so.spec.scale_target_ref.name,
                self.key
            );
        }

        self.post_scaled_object_status(so, decision, workload, ready)
            .await;
        Ok(())
    }

    async fn write_workload_replicas(&self, workload: &Workload, replicas: u32) {
        let mut updated = workload.clone();
        updated.spec.replicas = replicas;
        if let Err(e) = utils::post_update(&updated).await {
            tracing::error!("Failed to scale workload {}: {:#}", workload.name(), e);
        }
    }

    async fn post_scaled_object_status(
        &self,
        so: &ScaledObject,
        decision: &ScaleDecision,
        workload: Option<&Workload>,
        ready: bool,
    ) {
        let mut updated = so.clone();
        let status = updated.status.get_or_insert_with(Default::default);

        set_condition(&mut status.conditions, Condition::new(
            ConditionType::Ready,
            ready,
            (!ready).then(|| "every trigger failed this cycle".to_string()),
        ));
        set_condition(
            &mut status.conditions,
            Condition::new(ConditionType::Active, decision.active, None),
        );
        set_condition(
            &mut status.conditions,
            Condition::new(
                ConditionType::Fallback,
                decision.fallback_active,
                decision
                    .fallback_active
                    .then(|| format!("consecutive failures: {:?}", self.tracker.snapshot())),
            ),
        );
        set_condition(
            &mut status.conditions,
            Condition::new(ConditionType::Paused, false, None),
        );

        status.external_metric_names = decision
            .observations
            .iter()
            .map(|o| o.metric_name.to_owned())
            .collect();
        status.last_active_time = self.last_active_time;
        if status.original_replica_count.is_none() {
            status.original_replica_count = workload.map(|w| w.spec.replicas);
        }

        // Status updates are throttled: only observed changes are posted.
        if so.status.as_ref() != Some(&*status) {
            if let Err(e) = utils::post_update(&updated).await {
                tracing::error!("Failed to post status for {}: {:#}", self.key, e);
            }
        }
    }

    async fn apply_scaled_job(
        &mut self,
        sj: &ScaledJob,
        decision: &ScaleDecision,
        ready: bool,
    ) -> Result<(), ScaleError> {
        let store = self.stores.jobs.read().await;
        // Forget dispatched names once the watch has caught up.
        self.dispatched
            .retain(|name| !store.contains_key(&uri_of::<Job>(sj.namespace(), name)));
        let visible_running = jobs::running_executions(store.values(), sj);
        let running = visible_running + self.dispatched.len() as u32;

        let to_prune: Vec<String> = [
            (JobPhase::Succeeded, sj.spec.successful_jobs_history_limit),
            (JobPhase::Failed, sj.spec.failed_jobs_history_limit),
        ]
        .into_iter()
        .flat_map(|(phase, limit)| jobs::history_to_prune(store.values(), sj, phase, limit))
        .collect();
        drop(store);

        let count = jobs::dispatch_count(decision.desired_replicas, running, sj.spec.max_replica_count);
        if count > 0 {
            tracing::info!(
                "Dispatching {} executions for {} (desired {}, running {})",
                count,
                self.key,
                decision.desired_replicas,
                running
            );
        }
        for _ in 0..count {
            let job = jobs::build_job(sj);
            match utils::create_object(&job).await {
                Ok(()) => {
                    self.dispatched.insert(job.metadata.name.to_owned());
                },
                Err(e) => {
                    tracing::error!("Failed to dispatch execution for {}: {:#}", self.key, e);
                },
            }
        }

        for name in to_prune {
            if let Err(e) = utils::delete_object::<Job>(sj.namespace(), &name).await {
                tracing::warn!("Failed to prune job {}/{}: {:#}", sj.namespace(), name, e);
            }
        }

        self.post_scaled_job_status(sj, decision, ready).await;
        Ok(())
    }

    async fn post_scaled_job_status(
        &self,
        sj: &ScaledJob,
        decision: &ScaleDecision,
        ready: bool,
    ) {
        let mut updated = sj.clone();
        let status = updated.status.get_or_insert_with(Default::default);
        set_condition(&mut status.conditions, Condition::new(
            ConditionType::Ready,
            ready,
            (!ready).then(|| "every trigger failed this cycle".to_string()),
        ));
        set_condition(
            &mut status.conditions,
            Condition::new(ConditionType::Active, decision.active, None),
        );
        set_condition(
            &mut status.conditions,
            Condition::new(ConditionType::Fallback, decision.fallback_active, None),
        );
        status.last_active_time = self.last_active_time;

        if sj.status.as_ref() != Some(&*status) {
            if let Err(e) = utils::post_update(&updated).await {
                tracing::error!("Failed to post status for {}: {:#}", self.key, e);
            }
        }
    }

    async fn enter_paused(&mut self, target: &ScalingTarget) {
        tracing::info!("Target {} paused, polling suspended", self.key);
        if let ScalingTarget::Object(so) = target {
            // A pinned replica count is applied once on entry.
            if let Some(replicas) = so.paused_replicas() {
                if let Some(workload) = self.load_workload(target).await {
                    self.write_workload_replicas(&workload, replicas).await;
                }
            }
            let mut updated = so.clone();
            let status = updated.status.get_or_insert_with(Default::default);
            set_condition(
                &mut status.conditions,
                Condition::new(ConditionType::Paused, true, None),
            );
            if so.status.as_ref() != Some(&*status) {
                if let Err(e) = utils::post_update(&updated).await {
                    tracing::error!("Failed to post status for {}: {:#}", self.key, e);
                }
            }
        }
    }

    async fn report_not_ready(&self, target: &ScalingTarget, error: &ScaleError) {
        if let ScalingTarget::Object(so) = target {
            let mut updated = so.clone();
            let status = updated.status.get_or_insert_with(Default::default);
            set_condition(
                &mut status.conditions,
                Condition::new(ConditionType::Ready, false, Some(error.to_string())),
            );
            if so.status.as_ref() != Some(&*status) {
                if let Err(e) = utils::post_update(&updated).await {
                    tracing::error!("Failed to post status for {}: {:#}", self.key, e);
                }
            }
        }
    }

    async fn load_target(&self) -> Option<ScalingTarget> {
        match self.kind {
            TargetKind::ScaledObject => self
                .stores
                .scaled_objects
                .read()
                .await
                .get(&self.key)
                .cloned()
                .map(ScalingTarget::Object),
            TargetKind::ScaledJob => self
                .stores
                .scaled_jobs
                .read()
                .await
                .get(&self.key)
                .cloned()
                .map(ScalingTarget::Job),
        }
    }

    async fn load_workload(&self, target: &ScalingTarget) -> Option<Workload> {
        let so = match target {
            ScalingTarget::Object(so) => so,
            ScalingTarget::Job(_) => return None,
        };
        self.stores
            .workloads
            .read()
            .await
            .get(&uri_of::<Workload>(
                so.namespace(),
                &so.spec.scale_target_ref.name,
            ))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> NaiveDateTime {
        NaiveDateTime::from_timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn inactive_target_reaches_zero_after_cooldown() {
        // min=0, cooldown=60s, last activity at t=0.
        let edge = compute_scale_edge(false, 1, 0, 1, at(65), Some(at(0)), at(0), 60, None);
        assert_eq!(edge, ScaleEdge::ToZero);

        let edge = compute_scale_edge(false, 1, 0, 1, at(30), Some(at(0)), at(0), 60, None);
        assert_eq!(edge, ScaleEdge::None);
    }

    #[test]
    fn activity_scales_from_zero() {
        assert_eq!(
            compute_scale_edge(true, 0, 0, 1, at(10), None, at(0), 60, None),
            ScaleEdge::FromZero(1)
        );
        assert_eq!(
            compute_scale_edge(true, 0, 3, 3, at(10), None, at(0), 60, None),
            ScaleEdge::FromZero(3)
        );
        assert_eq!(
            compute_scale_edge(true, 2, 0, 1, at(10), None, at(0), 60, None),
            ScaleEdge::None
        );
    }

    #[test]
    fn positive_min_never_reaches_zero() {
        let edge = compute_scale_edge(false, 2, 2, 2, at(1000), Some(at(0)), at(0), 60, None);
        assert_eq!(edge, ScaleEdge::None);
    }

    #[test]
    fn idle_floor_holds_during_cooldown() {
        let edge = compute_scale_edge(false, 1, 0, 2, at(30), Some(at(0)), at(0), 60, None);
        assert_eq!(edge, ScaleEdge::HoldFloor(2));
        // Past the cooldown the floor no longer applies.
        let edge = compute_scale_edge(false, 1, 0, 2, at(65), Some(at(0)), at(0), 60, None);
        assert_eq!(edge, ScaleEdge::ToZero);
    }

    #[test]
    fn initial_cooldown_counts_from_start() {
        // Never active: the initial window applies from started_at.
        let edge = compute_scale_edge(false, 1, 0, 1, at(100), None, at(0), 60, Some(120));
        assert_eq!(edge, ScaleEdge::None);
        let edge = compute_scale_edge(false, 1, 0, 1, at(130), None, at(0), 60, Some(120));
        assert_eq!(edge, ScaleEdge::ToZero);
    }

    #[test]
    fn already_at_zero_needs_no_edge() {
        let edge = compute_scale_edge(false, 0, 0, 1, at(1000), Some(at(0)), at(0), 60, None);
        assert_eq!(edge, ScaleEdge::None);
    }
}
