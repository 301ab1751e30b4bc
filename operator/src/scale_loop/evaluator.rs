use std::time::Duration;

use chrono::NaiveDateTime;
use resources::objects::{
    metrics::ExternalMetricValue, quantity::Quantity, scaled_object::Aggregation,
};

use crate::{
    cache::CacheEntry, error::ScaleError, fallback::FallbackTracker, target::ScalingTarget,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerHealth {
    Ok,
    /// Persistently failing, the fallback replica count substitutes.
    Degraded,
    /// Failing and excluded from aggregation this cycle.
    Fatal,
}

#[derive(Debug, Clone)]
pub struct TriggerObservation {
    pub trigger_index: usize,
    pub metric_name: String,
    pub target: Quantity,
    pub value: Quantity,
    pub values: Vec<ExternalMetricValue>,
    pub desired: u32,
    pub active: bool,
    pub health: TriggerHealth,
}

/// Raw recommendation for one cycle; cooldown is the caller's concern.
#[derive(Debug, Clone)]
pub struct ScaleDecision {
    pub desired_replicas: u32,
    pub active: bool,
    pub observations: Vec<TriggerObservation>,
    pub timestamp: NaiveDateTime,
    /// Every trigger failed and no fallback applied; the caller should
    /// retain its previous decision and report Ready=false.
    pub all_failed: bool,
    pub fallback_active: bool,
}

/// Samples every trigger of the entry and aggregates the results into a
/// bounded replica recommendation.
pub async fn evaluate(
    entry: &CacheEntry,
    target: &ScalingTarget,
    tracker: &mut FallbackTracker,
    budget: Duration,
) -> ScaleDecision {
    let mut observations = Vec::new();

    for scaler in &entry.scalers {
        for spec in &scaler.specs {
            let sample = match tokio::time::timeout(budget, scaler.sample(&spec.name)).await {
                Ok(result) => result,
                Err(_) => Err(ScaleError::TransientBackend(format!(
                    "sampling {} timed out after {:?}",
                    spec.name, budget
                ))),
            };

            let observation = match sample {
                Ok(sample) => {
                    tracker.record_success(scaler.trigger_index);
                    let value = sample
                        .values
                        .first()
                        .map(|v| v.value)
                        .unwrap_or(Quantity::ZERO);
                    TriggerObservation {
                        trigger_index: scaler.trigger_index,
                        metric_name: spec.name.to_owned(),
                        target: spec.target,
                        value,
                        desired: value.div_ceil(spec.target),
                        active: sample.active,
                        health: TriggerHealth::Ok,
                        values: sample.values,
                    }
                },
                Err(e) => {
                    let failures = tracker.record_failure(scaler.trigger_index);
                    tracing::warn!(
                        "Trigger {} of {} failed ({} consecutive): {:#}",
                        spec.name,
                        entry.target_key,
                        failures,
                        e
                    );
                    match target.fallback() {
                        Some(fallback) if failures >= fallback.failure_threshold => {
                            // Substitute a value that aggregates back to
                            // exactly the fallback replica count.
                            let value = spec.target * fallback.replicas;
                            TriggerObservation {
                                trigger_index: scaler.trigger_index,
                                metric_name: spec.name.to_owned(),
                                target: spec.target,
                                value,
                                desired: fallback.replicas,
                                active: true,
                                health: TriggerHealth::Degraded,
                                values: vec![ExternalMetricValue::new(&spec.name, value)],
                            }
                        },
                        _ => TriggerObservation {
                            trigger_index: scaler.trigger_index,
                            metric_name: spec.name.to_owned(),
                            target: spec.target,
                            value: Quantity::ZERO,
                            desired: 0,
                            active: false,
                            health: TriggerHealth::Fatal,
                            values: Vec::new(),
                        },
                    }
                },
            };
            observations.push(observation);
        }
    }

    let healthy = observations
        .iter()
        .filter(|o| o.health != TriggerHealth::Fatal);
    let desired = match target.aggregation() {
        Aggregation::Max => healthy.map(|o| o.desired).max().unwrap_or(0),
        Aggregation::Sum => healthy.map(|o| o.desired).sum(),
    };
    let active = observations.iter().any(|o| o.active);
    let all_failed = !observations.is_empty()
        && observations.iter().all(|o| o.health == TriggerHealth::Fatal);

    let floor = target
        .min_replicas()
        .unwrap_or(if active { 1 } else { 0 });
    let desired_replicas = desired.max(floor).min(target.max_replicas());

    ScaleDecision {
        desired_replicas,
        active,
        observations,
        timestamp: chrono::Local::now().naive_utc(),
        all_failed,
        fallback_active: tracker.fallback_active(target.fallback()),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;
    use resources::objects::{
        object_reference::ScaleTargetRef,
        scaled_object::*,
        trigger::MetricType,
        Metadata,
    };

    use super::*;
    use crate::{
        cache::CachedScaler,
        scaler::{MetricSpec, SampleResult, Scaler},
    };

    struct ScriptedScaler {
        specs: Vec<MetricSpec>,
        script: Mutex<VecDeque<Result<SampleResult, ScaleError>>>,
        delay: Option<Duration>,
    }

    impl ScriptedScaler {
        fn new(metric_name: &str, target: i64) -> Self {
            ScriptedScaler {
                specs: vec![MetricSpec {
                    name: metric_name.to_string(),
                    target: Quantity::from_whole(target),
                    metric_type: MetricType::AverageValue,
                }],
                script: Mutex::new(VecDeque::new()),
                delay: None,
            }
        }

        fn push_value(self, value: i64, active: bool) -> Self {
            let metric_name = self.specs[0].name.to_owned();
            self.script
                .lock()
                .unwrap()
                .push_back(Ok(SampleResult {
                    values: vec![ExternalMetricValue::new(
                        &metric_name,
                        Quantity::from_whole(value),
                    )],
                    active,
                }));
            self
        }

        fn push_error(self) -> Self {
            self.script
                .lock()
                .unwrap()
                .push_back(Err(ScaleError::TransientBackend("boom".to_string())));
            self
        }
    }

    #[async_trait]
    impl Scaler for ScriptedScaler {
        fn metric_specs(&self) -> Vec<MetricSpec> {
            self.specs.clone()
        }

        async fn sample_and_activity(
            &self,
            _metric_name: &str,
        ) -> Result<SampleResult, ScaleError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ScaleError::TransientBackend("script empty".to_string())))
        }

        async fn close(&mut self) -> Result<(), ScaleError> {
            Ok(())
        }
    }

    fn entry(scalers: Vec<ScriptedScaler>) -> CacheEntry {
        CacheEntry {
            target_key: "/api/v1/namespaces/default/scaledobjects/worker".to_string(),
            generation: 1,
            scalers: scalers
                .into_iter()
                .enumerate()
                .map(|(i, s)| CachedScaler::new(i, "scripted".to_string(), Box::new(s)))
                .collect(),
            pod_identities: Vec::new(),
            auth_keys: Vec::new(),
        }
    }

    fn target(
        min: Option<u32>,
        max: u32,
        fallback: Option<Fallback>,
        aggregation: Aggregation,
    ) -> ScalingTarget {
        ScalingTarget::Object(ScaledObject {
            metadata: Metadata {
                name: "worker".to_string(),
                namespace: "default".to_string(),
                generation: 1,
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
                cooldown_period: 60,
                initial_cooldown_period: None,
                idle_replica_count: None,
                min_replica_count: min,
                max_replica_count: max,
                fallback,
                advanced: Advanced {
                    aggregation,
                    ..Advanced::default()
                },
                triggers: Vec::new(),
            },
            status: None,
        })
    }

    const BUDGET: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn desired_is_ceil_of_value_over_target() {
        let entry = entry(vec![ScriptedScaler::new("s0-scripted", 5).push_value(12, true)]);
        let target = target(Some(0), 10, None, Aggregation::Max);
        let mut tracker = FallbackTracker::new();

        let decision = evaluate(&entry, &target, &mut tracker, BUDGET).await;
        assert_eq!(decision.desired_replicas, 3);
        assert!(decision.active);
        assert_eq!(decision.observations[0].health, TriggerHealth::Ok);
    }

    #[tokio::test]
    async fn aggregation_max_and_sum() {
        let scalers = || {
            vec![
                ScriptedScaler::new("s0-scripted", 5).push_value(12, true),
                ScriptedScaler::new("s1-scripted", 5).push_value(4, true),
            ]
        };
        let mut tracker = FallbackTracker::new();

        let decision = evaluate(
            &entry(scalers()),
            &target(Some(0), 100, None, Aggregation::Max),
            &mut tracker,
            BUDGET,
        )
        .await;
        assert_eq!(decision.desired_replicas, 3);

        let decision = evaluate(
            &entry(scalers()),
            &target(Some(0), 100, None, Aggregation::Sum),
            &mut tracker,
            BUDGET,
        )
        .await;
        assert_eq!(decision.desired_replicas, 4);
    }

    #[tokio::test]
    async fn result_is_bounded_by_min_and_max() {
        let entry1 = entry(vec![ScriptedScaler::new("s0-scripted", 1).push_value(500, true)]);
        let decision = evaluate(
            &entry1,
            &target(Some(2), 10, None, Aggregation::Max),
            &mut FallbackTracker::new(),
            BUDGET,
        )
        .await;
        assert_eq!(decision.desired_replicas, 10);

        let entry2 = entry(vec![ScriptedScaler::new("s0-scripted", 5).push_value(0, false)]);
        let decision = evaluate(
            &entry2,
            &target(Some(2), 10, None, Aggregation::Max),
            &mut FallbackTracker::new(),
            BUDGET,
        )
        .await;
        assert_eq!(decision.desired_replicas, 2);
        assert!(!decision.active);
    }

    #[tokio::test]
    async fn unset_min_floors_at_one_only_when_active() {
        let active_zero = entry(vec![ScriptedScaler::new("s0-scripted", 5).push_value(0, true)]);
        let decision = evaluate(
            &active_zero,
            &target(None, 10, None, Aggregation::Max),
            &mut FallbackTracker::new(),
            BUDGET,
        )
        .await;
        assert_eq!(decision.desired_replicas, 1);

        let idle = entry(vec![ScriptedScaler::new("s0-scripted", 5).push_value(0, false)]);
        let decision = evaluate(
            &idle,
            &target(None, 10, None, Aggregation::Max),
            &mut FallbackTracker::new(),
            BUDGET,
        )
        .await;
        assert_eq!(decision.desired_replicas, 0);
    }

    #[tokio::test]
    async fn min_equal_max_zero_pins_the_target_at_zero() {
        let entry = entry(vec![ScriptedScaler::new("s0-scripted", 5).push_value(500, true)]);
        let decision = evaluate(
            &entry,
            &target(Some(0), 0, None, Aggregation::Max),
            &mut FallbackTracker::new(),
            BUDGET,
        )
        .await;
        assert_eq!(decision.desired_replicas, 0);
    }

    #[tokio::test]
    async fn fallback_substitutes_after_threshold() {
        let fallback = Fallback {
            failure_threshold: 3,
            replicas: 4,
        };
        let target = target(Some(0), 100, Some(fallback), Aggregation::Max);
        let mut tracker = FallbackTracker::new();

        for cycle in 1..=2 {
            let entry = entry(vec![ScriptedScaler::new("s0-scripted", 10).push_error()]);
            let decision = evaluate(&entry, &target, &mut tracker, BUDGET).await;
            assert!(decision.all_failed, "cycle {}", cycle);
            assert!(!decision.fallback_active);
            assert_eq!(decision.desired_replicas, 0);
        }

        // Third consecutive failure crosses the threshold: the published
        // sample is 40, driving value/target = 4 replicas.
        let entry3 = entry(vec![ScriptedScaler::new("s0-scripted", 10).push_error()]);
        let decision = evaluate(&entry3, &target, &mut tracker, BUDGET).await;
        assert!(decision.fallback_active);
        assert!(!decision.all_failed);
        assert_eq!(decision.desired_replicas, 4);
        assert_eq!(
            decision.observations[0].values[0].value,
            Quantity::from_whole(40)
        );
        assert_eq!(decision.observations[0].health, TriggerHealth::Degraded);

        // First success resumes the actual value and clears the counter.
        let entry4 = entry(vec![ScriptedScaler::new("s0-scripted", 10).push_value(12, true)]);
        let decision = evaluate(&entry4, &target, &mut tracker, BUDGET).await;
        assert!(!decision.fallback_active);
        assert_eq!(decision.desired_replicas, 2);
        assert_eq!(
            decision.observations[0].values[0].value,
            Quantity::from_whole(12)
        );
    }

    #[tokio::test]
    async fn slow_scalers_hit_the_deadline() {
        let mut scaler = ScriptedScaler::new("s0-scripted", 5).push_value(10, true);
        scaler.delay = Some(Duration::from_millis(100));
        let entry = entry(vec![scaler]);
        let target = target(Some(0), 10, None, Aggregation::Max);
        let mut tracker = FallbackTracker::new();

        let decision = evaluate(&entry, &target, &mut tracker, Duration::from_millis(10)).await;
        assert!(decision.all_failed);
        assert_eq!(decision.observations[0].health, TriggerHealth::Fatal);
        assert_eq!(tracker.failures(0), 1);
    }
}
