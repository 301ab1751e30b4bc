use async_trait::async_trait;
use resources::objects::{metrics::ExternalMetricValue, quantity::Quantity};

use super::{MetricSpec, SampleResult, Scaler, ScalerContext};
use crate::error::ScaleError;

/// Polls an HTTP endpoint returning JSON and reads a numeric field at a
/// dotted path. Parameters: `url`, `valueLocation`, `targetValue`,
/// optional `activationTargetValue` and `authToken`.
pub struct MetricsApiScaler {
    specs: Vec<MetricSpec>,
    url: String,
    value_location: String,
    activation_target: Quantity,
    auth_header: Option<String>,
    client: reqwest::Client,
}

pub fn build(ctx: ScalerContext) -> Result<Box<dyn Scaler>, ScaleError> {
    let url = ctx.required("url")?.to_owned();
    let value_location = ctx.required("valueLocation")?.to_owned();
    let target = ctx.required_quantity("targetValue")?;
    let activation_target = ctx.optional_quantity("activationTargetValue", Quantity::ZERO)?;
    let auth_header = ctx
        .params
        .get("authToken")
        .map(|token| format!("Bearer {}", token));
    let client = reqwest::Client::builder()
        .timeout(ctx.http_timeout)
        .build()
        .map_err(|e| ScaleError::ConfigInvalid(format!("http client: {}", e)))?;

    let specs = vec![MetricSpec {
        name: ctx.metric_name(),
        target,
        metric_type: ctx.metric_type,
    }];
    Ok(Box::new(MetricsApiScaler {
        specs,
        url,
        value_location,
        activation_target,
        auth_header,
        client,
    }))
}

#[async_trait]
impl Scaler for MetricsApiScaler {
    fn metric_specs(&self) -> Vec<MetricSpec> {
        self.specs.clone()
    }

    async fn sample_and_activity(
        &self,
        metric_name: &str,
    ) -> Result<SampleResult, ScaleError> {
        let mut request = self.client.get(&self.url);
        if let Some(header) = &self.auth_header {
            request = request.header(reqwest::header::AUTHORIZATION, header);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScaleError::TransientBackend(format!("{}: {}", self.url, e)))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ScaleError::FatalBackend(format!(
                "{} rejected credentials with {}",
                self.url, status
            )));
        }
        if !status.is_success() {
            return Err(ScaleError::TransientBackend(format!(
                "{} returned {}",
                self.url, status
            )));
        }

        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ScaleError::TransientBackend(format!("{}: {}", self.url, e)))?;
        let value = value_at_path(&document, &self.value_location).ok_or_else(|| {
            ScaleError::FatalBackend(format!(
                "no numeric value at {:?} in response from {}",
                self.value_location, self.url
            ))
        })?;

        let value = Quantity::from_f64(value);
        Ok(SampleResult {
            values: vec![ExternalMetricValue::new(metric_name, value)],
            active: value > self.activation_target,
        })
    }

    async fn close(&mut self) -> Result<(), ScaleError> {
        // Plain HTTP, nothing persistent to tear down.
        Ok(())
    }
}

/// Walks a dotted path (`"queue.depth"`) into a JSON document, accepting
/// numbers and numeric strings at the leaf.
fn value_at_path(document: &serde_json::Value, path: &str) -> Option<f64> {
    let mut current = document;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_at_path_walks_nested_documents() {
        let document = serde_json::json!({"queue": {"depth": 42, "label": "work"}});
        assert_eq!(value_at_path(&document, "queue.depth"), Some(42.0));
        assert_eq!(value_at_path(&document, "queue.label"), None);
        assert_eq!(value_at_path(&document, "queue.missing"), None);
    }

    #[test]
    fn value_at_path_parses_numeric_strings() {
        let document = serde_json::json!({"value": "12.5"});
        assert_eq!(value_at_path(&document, "value"), Some(12.5));
    }
}
