use async_trait::async_trait;
use lapin::{options::QueueDeclareOptions, types::FieldTable, Channel, Connection, ConnectionProperties};
use resources::objects::{metrics::ExternalMetricValue, quantity::Quantity};
use tokio::sync::Mutex;

use super::{MetricSpec, SampleResult, Scaler, ScalerContext};
use crate::error::ScaleError;

/// Scales on AMQP queue depth. Parameters: `host` (connection URI,
/// usually supplied through authentication), `queueName`, `queueLength`
/// (target depth per replica, default 20) and `activationQueueLength`.
pub struct RabbitMqScaler {
    specs: Vec<MetricSpec>,
    uri: String,
    queue_name: String,
    activation_length: Quantity,
    connection: Mutex<Option<(Connection, Channel)>>,
}

pub fn build(ctx: ScalerContext) -> Result<Box<dyn Scaler>, ScaleError> {
    let uri = ctx.required("host")?.to_owned();
    let queue_name = ctx.required("queueName")?.to_owned();
    let target = ctx.optional_quantity("queueLength", Quantity::from_whole(20))?;
    let activation_length = ctx.optional_quantity("activationQueueLength", Quantity::ZERO)?;

    let specs = vec![MetricSpec {
        name: ctx.metric_name(),
        target,
        metric_type: ctx.metric_type,
    }];
    Ok(Box::new(RabbitMqScaler {
        specs,
        uri,
        queue_name,
        activation_length,
        connection: Mutex::new(None),
    }))
}

impl RabbitMqScaler {
    async fn queue_depth(&self) -> Result<u32, ScaleError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            let connection = Connection::connect(&self.uri, ConnectionProperties::default())
                .await
                .map_err(classify)?;
            let channel = connection.create_channel().await.map_err(classify)?;
            *guard = Some((connection, channel));
        }

        let channel = &guard.as_ref().unwrap().1;
        let declare = channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await;
        match declare {
            Ok(queue) => Ok(queue.message_count()),
            Err(e) => {
                // Drop the broken channel so the next sample reconnects.
                *guard = None;
                Err(classify(e))
            },
        }
    }
}

fn classify(error: lapin::Error) -> ScaleError {
    let message = error.to_string();
    if message.contains("ACCESS-REFUSED") || message.contains("ACCESS_REFUSED") {
        ScaleError::FatalBackend(format!("broker refused credentials: {}", message))
    } else {
        ScaleError::TransientBackend(message)
    }
}

#[async_trait]
impl Scaler for RabbitMqScaler {
    fn metric_specs(&self) -> Vec<MetricSpec> {
        self.specs.clone()
    }

    async fn sample_and_activity(
        &self,
        metric_name: &str,
    ) -> Result<SampleResult, ScaleError> {
        let depth = self.queue_depth().await?;
        let value = Quantity::from_whole(depth as i64);
        Ok(SampleResult {
            values: vec![ExternalMetricValue::new(metric_name, value)],
            active: value > self.activation_length,
        })
    }

    async fn close(&mut self) -> Result<(), ScaleError> {
        // Idempotent: the connection is gone after the first call.
        if let Some((connection, _)) = self.connection.lock().await.take() {
            if let Err(e) = connection.close(200, "scaler evicted").await {
                tracing::debug!("Error closing AMQP connection: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use resources::objects::{trigger::MetricType, trigger_auth::PodIdentityProvider};

    use super::*;

    fn context(params: &[(&str, &str)]) -> ScalerContext {
        ScalerContext {
            target_key: "/api/v1/namespaces/default/scaledjobs/consumer".to_string(),
            trigger_index: 0,
            trigger_type: "rabbitmq".to_string(),
            trigger_name: None,
            metric_type: MetricType::AverageValue,
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            pod_identity: PodIdentityProvider::None,
            http_timeout: Duration::from_secs(3),
        }
    }

    #[test]
    fn build_requires_host_and_queue() {
        assert!(build(context(&[("queueName", "work")])).is_err());
        assert!(build(context(&[("host", "amqp://localhost")])).is_err());
        let scaler = build(context(&[
            ("host", "amqp://localhost"),
            ("queueName", "work"),
            ("queueLength", "5"),
        ]))
        .unwrap();
        let specs = scaler.metric_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "s0-rabbitmq");
        assert_eq!(specs[0].target, Quantity::from_whole(5));
    }

    #[tokio::test]
    async fn close_is_idempotent_without_a_connection() {
        let mut scaler = build(context(&[
            ("host", "amqp://localhost"),
            ("queueName", "work"),
        ]))
        .unwrap();
        assert!(scaler.close().await.is_ok());
        assert!(scaler.close().await.is_ok());
    }
}
