use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{
    job::JobSpec, scaled_object::default_polling_interval, trigger::Trigger, Condition, Labels,
    Metadata, Object, PAUSED_ANNOTATION,
};

/// Declarative autoscaling policy for singleton job dispatch. Unlike a
/// ScaledObject the operator submits executions itself.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScaledJob {
    pub metadata: Metadata,
    pub spec: ScaledJobSpec,
    #[serde(default)]
    pub status: Option<ScaledJobStatus>,
}

impl Object for ScaledJob {
    fn kind(&self) -> &'static str {
        "ScaledJob"
    }

    fn plural() -> &'static str {
        "scaledjobs"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl ScaledJob {
    pub fn paused(&self) -> bool {
        self.metadata
            .annotation(PAUSED_ANNOTATION)
            .map_or(false, |v| v == "true")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaledJobSpec {
    pub job_template: JobTemplate,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u32,
    #[serde(default)]
    pub min_replica_count: u32,
    #[serde(default = "default_max_job_replicas")]
    pub max_replica_count: u32,
    #[serde(default = "default_history_limit")]
    pub successful_jobs_history_limit: u32,
    #[serde(default = "default_history_limit")]
    pub failed_jobs_history_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<super::scaled_object::Fallback>,
    pub triggers: Vec<Trigger>,
}

fn default_max_job_replicas() -> u32 {
    100
}

fn default_history_limit() -> u32 {
    100
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobTemplate {
    #[serde(default)]
    pub labels: Labels,
    pub spec: JobSpec,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScaledJobStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_time: Option<NaiveDateTime>,
}
