use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{workload::Container, Metadata, Object};

/// One dispatched execution of a ScaledJob template.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Job {
    pub metadata: Metadata,
    pub spec: JobSpec,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

impl Object for Job {
    fn kind(&self) -> &'static str {
        "Job"
    }

    fn plural() -> &'static str {
        "jobs"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl Job {
    /// Pending and Running executions count against target parallelism.
    pub fn is_active(&self) -> bool {
        match &self.status {
            Some(status) => matches!(status.phase, JobPhase::Pending | JobPhase::Running),
            // Not yet picked up by the orchestrator, treated as pending.
            None => true,
        }
    }

    pub fn is_completed(&self) -> bool {
        match &self.status {
            Some(status) => matches!(status.phase, JobPhase::Succeeded | JobPhase::Failed),
            None => false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Seconds after which a running execution is failed by the
    /// orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub phase: JobPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}
