//! Periodic sample publisher
//!
//! Publishes one synthetic line protocol point per interval to the relay's
//! main topic so the whole pipeline can be exercised without real sensors.

use chrono::Utc;
use mqtt_relay_broker::line_protocol;
use mqtt_relay_broker::{FieldValue, Point};
use rand::Rng;
use rumqttc::{AsyncClient, QoS};
use std::time::Duration;
use tracing::{error, info};

use crate::config::RelayConfig;

pub struct SampleProducer {
    client: AsyncClient,
    topic: String,
    measurement: String,
    host: String,
    interval: Duration,
}

impl SampleProducer {
    pub fn new(client: AsyncClient, config: &RelayConfig) -> Self {
        Self {
            client,
            topic: config.mqtt.topic.clone(),
            measurement: config.producer.measurement.clone(),
            host: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()),
            interval: Duration::from_millis(config.producer.interval_ms.max(1)),
        }
    }

    /// One sample: `<measurement>,host=<host> temperature=<0..30> <now>`
    pub fn sample_line(&self) -> String {
        let temperature = rand::thread_rng().gen_range(0.0..30.0);
        let point = Point::new(
            self.measurement.as_str(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        )
        .tag("host", &self.host)
        .field("temperature", FieldValue::Float(temperature));
        line_protocol::to_line(&point)
    }

    /// Publish immediately, then once per interval
    pub async fn run(self) {
        info!("Publishing samples to {} every {:?}", self.topic, self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let line = self.sample_line();
            info!("{}", line);
            if let Err(e) = self
                .client
                .publish(self.topic.as_str(), QoS::AtMostOnce, false, line)
                .await
            {
                error!("Unable to publish data: {}", e);
            }
        }
    }
}
