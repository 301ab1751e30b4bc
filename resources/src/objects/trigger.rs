use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One event-source row inside a scaling target.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    /// Tag selecting the scaler adapter, e.g. `"rabbitmq"`.
    #[serde(rename = "type")]
    pub type_: String,
    /// Optional stable identifier folded into the metric name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Adapter parameters; authentication entries are merged on top.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_ref: Option<AuthenticationRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<MetricType>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRef {
    pub name: String,
    #[serde(default)]
    pub kind: AuthenticationKind,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum AuthenticationKind {
    TriggerAuthentication,
    ClusterTriggerAuthentication,
}

impl Default for AuthenticationKind {
    fn default() -> Self {
        AuthenticationKind::TriggerAuthentication
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    AverageValue,
    Value,
}

impl Default for MetricType {
    fn default() -> Self {
        MetricType::AverageValue
    }
}
