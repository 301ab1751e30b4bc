use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::quantity::Quantity;

/// One sample served on the external metrics API.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetricValue {
    pub metric_name: String,
    pub timestamp: NaiveDateTime,
    pub value: Quantity,
}

impl ExternalMetricValue {
    pub fn new(metric_name: &str, value: Quantity) -> Self {
        ExternalMetricValue {
            metric_name: metric_name.to_string(),
            timestamp: chrono::Local::now().naive_utc(),
            value,
        }
    }
}

/// The native external-metrics envelope consumed by the platform autoscaler.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetricValueList {
    pub kind: String,
    pub api_version: String,
    pub items: Vec<ExternalMetricValue>,
}

impl ExternalMetricValueList {
    pub fn new(items: Vec<ExternalMetricValue>) -> Self {
        ExternalMetricValueList {
            kind: "ExternalMetricValueList".to_string(),
            api_version: "external.metrics.k8s.io/v1beta1".to_string(),
            items,
        }
    }
}
