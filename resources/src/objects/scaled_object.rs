use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{
    object_reference::ScaleTargetRef, trigger::Trigger, Condition, Metadata, Object,
    PAUSED_ANNOTATION, PAUSED_REPLICAS_ANNOTATION,
};

/// Declarative autoscaling policy for a scalable workload. The operator
/// publishes external metrics for it and only touches replicas on the
/// zero to non-zero edge; the native autoscaler does the rest.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScaledObject {
    pub metadata: Metadata,
    pub spec: ScaledObjectSpec,
    #[serde(default)]
    pub status: Option<ScaledObjectStatus>,
}

impl Object for ScaledObject {
    fn kind(&self) -> &'static str {
        "ScaledObject"
    }

    fn plural() -> &'static str {
        "scaledobjects"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl ScaledObject {
    pub fn paused(&self) -> bool {
        self.metadata
            .annotation(PAUSED_ANNOTATION)
            .map_or(false, |v| v == "true")
    }

    /// Replica count pinned while paused, applied once on entering the
    /// Paused state.
    pub fn paused_replicas(&self) -> Option<u32> {
        self.metadata
            .annotation(PAUSED_REPLICAS_ANNOTATION)
            .and_then(|v| v.parse().ok())
    }

    pub fn min_replicas(&self) -> u32 {
        self.spec.min_replica_count.unwrap_or(0)
    }

    pub fn max_replicas(&self) -> u32 {
        self.spec.max_replica_count
    }

    /// Floor held while the cooldown window has not elapsed.
    pub fn idle_floor(&self) -> u32 {
        self.spec
            .idle_replica_count
            .unwrap_or(1)
            .max(self.min_replicas())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaledObjectSpec {
    pub scale_target_ref: ScaleTargetRef,
    /// Seconds between evaluation cycles.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u32,
    /// Seconds of inactivity required before the target may reach zero.
    #[serde(default = "default_cooldown_period")]
    pub cooldown_period: u32,
    /// Cooldown applied right after the scalers are first built,
    /// before `lastActiveTime` has ever been observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_cooldown_period: Option<u32>,
    /// Replicas held while inactive but still within the cooldown window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_replica_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replica_count: Option<u32>,
    #[serde(default = "default_max_replicas")]
    pub max_replica_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Fallback>,
    #[serde(default)]
    pub advanced: Advanced,
    pub triggers: Vec<Trigger>,
}

pub fn default_polling_interval() -> u32 {
    30
}

pub fn default_cooldown_period() -> u32 {
    300
}

pub fn default_max_replicas() -> u32 {
    100
}

/// Substitute replica count served while triggers persistently fail.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Fallback {
    /// Consecutive failures after which the fallback activates.
    pub failure_threshold: u32,
    pub replicas: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Advanced {
    /// How per-trigger recommendations combine into one count.
    #[serde(default)]
    pub aggregation: Aggregation,
    /// Scale the workload back to its pre-managed replica count when the
    /// ScaledObject is deleted.
    #[serde(default)]
    pub restore_to_original_replica_count: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up_stabilization_window_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_stabilization_window_seconds: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Max,
    Sum,
}

impl Default for Aggregation {
    fn default() -> Self {
        Aggregation::Max
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScaledObjectStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Metric names exposed on the external metrics API, one per trigger.
    #[serde(default)]
    pub external_metric_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_time: Option<NaiveDateTime>,
    /// Replica count observed before the operator first managed the
    /// workload; restored on delete when the spec asks for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_replica_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaled_object(json: serde_json::Value) -> ScaledObject {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn spec_defaults_apply() {
        let so = scaled_object(serde_json::json!({
            "metadata": {"name": "worker", "namespace": "default"},
            "spec": {
                "scaleTargetRef": {"name": "worker"},
                "triggers": [{"type": "metrics-api"}]
            },
            "status": null
        }));
        assert_eq!(so.spec.polling_interval, 30);
        assert_eq!(so.spec.cooldown_period, 300);
        assert_eq!(so.spec.max_replica_count, 100);
        assert_eq!(so.min_replicas(), 0);
        assert_eq!(so.spec.advanced.aggregation, Aggregation::Max);
    }

    #[test]
    fn paused_annotation_only_true_pauses() {
        let mut so = scaled_object(serde_json::json!({
            "metadata": {"name": "worker", "namespace": "default"},
            "spec": {
                "scaleTargetRef": {"name": "worker"},
                "triggers": []
            },
            "status": null
        }));
        assert!(!so.paused());
        so.metadata
            .annotations
            .insert(PAUSED_ANNOTATION.to_string(), "true".to_string());
        assert!(so.paused());
        so.metadata
            .annotations
            .insert(PAUSED_ANNOTATION.to_string(), "false".to_string());
        assert!(!so.paused());
        so.metadata
            .annotations
            .insert(PAUSED_ANNOTATION.to_string(), "later".to_string());
        assert!(!so.paused());
    }
}
