use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
}

/// Reference to the scalable workload a ScaledObject manages.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTargetRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    #[serde(default = "default_target_kind")]
    pub kind: String,
    pub name: String,
    /// Container whose environment resolves `valueFrom` env references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_source_container_name: Option<String>,
}

fn default_target_kind() -> String {
    "Workload".to_string()
}
