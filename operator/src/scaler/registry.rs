use std::collections::HashMap;

use lazy_static::lazy_static;

use super::{metrics_api, rabbitmq, Scaler, ScalerContext};
use crate::error::ScaleError;

/// A factory is a pure function from resolved parameters to an adapter
/// instance; connections are opened lazily on first sample.
pub type ScalerFactory = fn(ScalerContext) -> Result<Box<dyn Scaler>, ScaleError>;

lazy_static! {
    /// Compile-time dispatch table; new adapters register here.
    static ref REGISTRY: HashMap<&'static str, ScalerFactory> = {
        let mut table: HashMap<&'static str, ScalerFactory> = HashMap::new();
        table.insert("metrics-api", metrics_api::build);
        table.insert("rabbitmq", rabbitmq::build);
        table
    };
}

pub fn build_scaler(ctx: ScalerContext) -> Result<Box<dyn Scaler>, ScaleError> {
    match REGISTRY.get(ctx.trigger_type.as_str()) {
        Some(factory) => factory(ctx),
        None => Err(ScaleError::ConfigInvalid(format!(
            "unknown trigger type {:?}",
            ctx.trigger_type
        ))),
    }
}

pub fn known_types() -> Vec<&'static str> {
    let mut types: Vec<&'static str> = REGISTRY.keys().copied().collect();
    types.sort_unstable();
    types
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use resources::objects::{trigger::MetricType, trigger_auth::PodIdentityProvider};

    use super::*;

    #[test]
    fn unknown_type_is_config_invalid() {
        let ctx = ScalerContext {
            target_key: "/api/v1/namespaces/default/scaledobjects/worker".to_string(),
            trigger_index: 0,
            trigger_type: "carrier-pigeon".to_string(),
            trigger_name: None,
            metric_type: MetricType::AverageValue,
            params: HashMap::new(),
            pod_identity: PodIdentityProvider::None,
            http_timeout: Duration::from_secs(3),
        };
        assert!(matches!(
            build_scaler(ctx),
            Err(ScaleError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn reference_adapters_are_registered() {
        assert_eq!(known_types(), vec!["metrics-api", "rabbitmq"]);
    }
}
