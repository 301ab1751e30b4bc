use std::{collections::HashMap, str::FromStr, time::Duration};

use async_trait::async_trait;
use resources::objects::{
    metrics::ExternalMetricValue,
    quantity::Quantity,
    trigger::MetricType,
    trigger_auth::PodIdentityProvider,
};

use crate::error::ScaleError;

pub mod metrics_api;
pub mod rabbitmq;
pub mod registry;

/// Static description of one metric a scaler serves.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    /// Unique per trigger index on the owning target.
    pub name: String,
    pub target: Quantity,
    pub metric_type: MetricType,
}

#[derive(Debug, Clone)]
pub struct SampleResult {
    pub values: Vec<ExternalMetricValue>,
    /// Whether this trigger votes to keep the target above zero.
    pub active: bool,
}

/// Contract every event-source adapter implements. Calls are serialized
/// per (target, generation) by the cache unless an adapter documents
/// otherwise.
#[async_trait]
pub trait Scaler: Send + Sync {
    fn metric_specs(&self) -> Vec<MetricSpec>;

    async fn sample_and_activity(&self, metric_name: &str)
        -> Result<SampleResult, ScaleError>;

    /// Closes underlying connections; safe to call more than once.
    async fn close(&mut self) -> Result<(), ScaleError>;
}

/// Everything a factory needs to construct one adapter instance. Not
/// `Debug`: the parameter map carries resolved credentials.
pub struct ScalerContext {
    pub target_key: String,
    pub trigger_index: usize,
    pub trigger_type: String,
    pub trigger_name: Option<String>,
    pub metric_type: MetricType,
    pub params: HashMap<String, String>,
    pub pod_identity: PodIdentityProvider,
    pub http_timeout: Duration,
}

impl ScalerContext {
    /// `s{index}-{identifier}`, stable across rebuilds at the same spec.
    pub fn metric_name(&self) -> String {
        let base = self
            .trigger_name
            .as_deref()
            .unwrap_or(self.trigger_type.as_str());
        format!("s{}-{}", self.trigger_index, sanitize(base))
    }

    pub fn required(&self, key: &str) -> Result<&String, ScaleError> {
        self.params.get(key).ok_or_else(|| {
            ScaleError::ConfigInvalid(format!(
                "trigger {} is missing required parameter {:?}",
                self.trigger_type, key
            ))
        })
    }

    pub fn required_quantity(&self, key: &str) -> Result<Quantity, ScaleError> {
        Quantity::from_str(self.required(key)?).map_err(|e| {
            ScaleError::ConfigInvalid(format!("trigger {} parameter {}: {}", self.trigger_type, key, e))
        })
    }

    pub fn optional_quantity(&self, key: &str, default: Quantity) -> Result<Quantity, ScaleError> {
        match self.params.get(key) {
            Some(raw) => Quantity::from_str(raw).map_err(|e| {
                ScaleError::ConfigInvalid(format!(
                    "trigger {} parameter {}: {}",
                    self.trigger_type, key, e
                ))
            }),
            None => Ok(default),
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(index: usize, name: Option<&str>) -> ScalerContext {
        ScalerContext {
            target_key: "/api/v1/namespaces/default/scaledobjects/worker".to_string(),
            trigger_index: index,
            trigger_type: "metrics-api".to_string(),
            trigger_name: name.map(str::to_string),
            metric_type: MetricType::AverageValue,
            params: HashMap::new(),
            pod_identity: PodIdentityProvider::None,
            http_timeout: Duration::from_secs(3),
        }
    }

    #[test]
    fn metric_names_are_unique_per_index() {
        assert_eq!(context(0, None).metric_name(), "s0-metrics-api");
        assert_eq!(context(1, None).metric_name(), "s1-metrics-api");
        assert_eq!(context(2, Some("Queue Depth")).metric_name(), "s2-queue-depth");
    }

    #[test]
    fn missing_required_parameter_is_config_invalid() {
        assert!(matches!(
            context(0, None).required("url"),
            Err(ScaleError::ConfigInvalid(_))
        ));
    }
}
