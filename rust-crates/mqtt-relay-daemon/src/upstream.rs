//! MQTT ingestion feeding the fan-out dispatcher

use anyhow::{bail, Context, Result};
use mqtt_relay_broker::FanoutDispatcher;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS, SubscribeReasonCode};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 64;

/// Upstream MQTT connection with all relay topics subscribed
pub struct MqttUpstream {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Vec<String>,
    reconnect_delay: Duration,
    /// Publishes (e.g. retained messages) received before the last SUBACK
    pending: Vec<Publish>,
}

impl MqttUpstream {
    /// Connect and subscribe to `topics`
    ///
    /// Fails if the broker is unreachable, refuses the connection or a
    /// subscription, or does not acknowledge within the configured timeout.
    /// Without these subscriptions the relay has nothing to deliver.
    pub async fn connect(config: &MqttConfig, topics: &[String]) -> Result<Self> {
        let (host, port) = config.host_port()?;
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("mqtt-relay-{}", std::process::id()));

        let mut options = MqttOptions::new(client_id, host.clone(), port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        for topic in topics {
            client
                .subscribe(topic, QoS::AtMostOnce)
                .await
                .with_context(|| format!("Failed to queue subscription to {}", topic))?;
        }

        let mut pending = Vec::new();
        let deadline = Duration::from_millis(config.connect_timeout_ms);
        tokio::time::timeout(
            deadline,
            await_subscriptions(&mut eventloop, topics.len(), &mut pending),
        )
        .await
            .with_context(|| format!("Timed out connecting to MQTT broker at {}:{}", host, port))??;

        info!("Subscribed to {:?} at {}:{}", topics, host, port);

        Ok(Self {
            client,
            eventloop,
            topics: topics.to_vec(),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            pending,
        })
    }

    /// Handle for publishing on the same connection
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Relay every incoming publish until the task is cancelled
    pub async fn run(mut self, dispatcher: FanoutDispatcher) {
        self.flush_pending(&dispatcher).await;
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    relay(&dispatcher, &publish).await;
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // Clean sessions drop subscriptions on reconnect
                    info!("Reconnected to MQTT broker, resubscribing");
                    for topic in &self.topics {
                        if let Err(e) = self.client.try_subscribe(topic, QoS::AtMostOnce) {
                            warn!("Failed to resubscribe to {}: {}", topic, e);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    /// Relay publishes that arrived while waiting for subscriptions
    async fn flush_pending(&mut self, dispatcher: &FanoutDispatcher) -> usize {
        let pending = std::mem::take(&mut self.pending);
        for publish in &pending {
            relay(dispatcher, publish).await;
        }
        pending.len()
    }
}

async fn relay(dispatcher: &FanoutDispatcher, publish: &Publish) {
    if !dispatcher.table().contains(&publish.topic) {
        debug!("Ignoring publish on unrouted topic {}", publish.topic);
        return;
    }
    let report = dispatcher.dispatch(&publish.topic, &publish.payload).await;
    debug!(
        "{}: {} points, {} deliveries, {} failures",
        publish.topic, report.points, report.deliveries, report.failures
    );
}

async fn await_subscriptions(
    eventloop: &mut EventLoop,
    expected: usize,
    pending: &mut Vec<Publish>,
) -> Result<()> {
    let mut acknowledged = 0;
    while acknowledged < expected {
        match eventloop.poll().await.context("Failed to connect to MQTT broker")? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                debug!("MQTT connection acknowledged: {:?}", ack.code);
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    bail!("MQTT broker rejected subscription (packet {})", ack.pkid);
                }
                acknowledged += 1;
            }
            Event::Incoming(Packet::Publish(publish)) => {
                debug!("Holding publish on {} until subscriptions complete", publish.topic);
                pending.push(publish);
            }
            _ => {}
        }
    }
    Ok(())
}
