use serde::{Deserialize, Serialize};

use super::{Labels, Metadata, Object};

/// The scalable collaborator object a ScaledObject points at. Only the
/// parts the operator consumes are modelled: the replica count it nudges
/// on the zero edge and the pod template whose env feeds resolution.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Workload {
    pub metadata: Metadata,
    pub spec: WorkloadSpec,
    #[serde(default)]
    pub status: Option<WorkloadStatus>,
}

impl Object for Workload {
    fn kind(&self) -> &'static str {
        "Workload"
    }

    fn plural() -> &'static str {
        "workloads"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    pub template: PodTemplate,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default)]
    pub ready_replicas: u32,
}
