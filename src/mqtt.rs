use crate::config::{Credentials, SimulatorConfig};
use crate::transport::{BusEvent, ChannelEvents, InboundMessage, Transport, TransportError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Broker-backed transport. Everything goes out at `QoS::AtMostOnce`.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    /// Connects to the broker and waits for its acknowledgement.
    ///
    /// On success the connection is driven by a background task which forwards
    /// inbound traffic to the returned event source and reconnects on errors.
    pub async fn connect(
        config: &SimulatorConfig,
        credentials: Option<&Credentials>,
    ) -> Result<(Self, ChannelEvents), TransportError> {
        let mut options = MqttOptions::new(&config.client_id, &config.mqtt_server, config.mqtt_port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);
        if let Some(credentials) = credentials {
            options.set_credentials(&credentials.username, &credentials.password);
        }

        info!(
            "🔌 Connecting to MQTT server: {}:{}",
            config.mqtt_server, config.mqtt_port
        );

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(TransportError::Refused(format!("{:?}", ack.code)))
                        };
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(TransportError::Connect {
                            host: config.mqtt_server.clone(),
                            port: config.mqtt_port,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        };

        tokio::time::timeout(CONNECT_TIMEOUT, handshake)
            .await
            .map_err(|_| TransportError::ConnectTimeout)??;

        info!("✅ Connected to MQTT server");

        let (tx, events) = ChannelEvents::new();
        tokio::spawn(pump(eventloop, tx));

        Ok((Self { client }, events))
    }
}

async fn pump(mut eventloop: EventLoop, tx: UnboundedSender<BusEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("🔁 Reconnected to MQTT server ({:?})", ack.code);
                BusEvent::Connected
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => BusEvent::Message(InboundMessage::new(
                publish.topic,
                publish.payload.to_vec(),
            )),
            Ok(other) => {
                debug!("MQTT event: {:?}", other);
                continue;
            }
            Err(e) => {
                // the next poll reconnects
                warn!("MQTT connection error: {}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        if tx.send(event).is_err() {
            debug!("Event receiver dropped, stopping MQTT pump");
            break;
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::Unsubscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}
