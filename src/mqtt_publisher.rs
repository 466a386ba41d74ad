use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, QoS};
use tracing::{debug, info, warn};

use crate::{config::MqttEndpoint, error::PublishError, publisher::Publisher};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
// Roughly two cycles of flat publishes; beyond that the broker is not keeping up.
const REQUEST_CAPACITY: usize = 128;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// MQTT transport of a sink.
///
/// Publishing only queues the message, the event loop task does the
/// network I/O and reconnects after errors.
pub struct MqttPublisher {
    client: AsyncClient,
    endpoint: MqttEndpoint,
}

impl MqttPublisher {
    pub fn connect(endpoint: &MqttEndpoint, client_id: &str) -> Self {
        let mut options = MqttOptions::new(client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some(username) = &endpoint.username {
            options.set_credentials(username, endpoint.password.as_deref().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let label = endpoint.to_string();
        tokio::spawn(async move {
            Self::drive(eventloop, label).await;
        });

        info!("MQTT publisher {client_id} targeting {endpoint}");
        Self {
            client,
            endpoint: endpoint.clone(),
        }
    }

    async fn drive(mut eventloop: EventLoop, label: String) {
        let mut state = LinkState::Connecting;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker {label}");
                    state = LinkState::Connected;
                }
                Ok(_) => {}
                Err(e) => {
                    match state.on_error() {
                        Some(message) => warn!("MQTT broker {label} {message}: {e}"),
                        None => debug!("MQTT broker {label} still unavailable: {e}"),
                    }
                    state = LinkState::Down;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    fn send(&self, topic: &str, payload: String, retain: bool) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload)
            .map_err(|e| PublishError::Client(format!("{}: {e}", self.endpoint)))
    }
}

/// Connection state of the event loop, used to pick the log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Connected,
    Down,
}

impl LinkState {
    /// Warning to log for an event loop error, `None` while the broker stays down.
    fn on_error(self) -> Option<&'static str> {
        match self {
            Self::Connecting => Some("unreachable"),
            Self::Connected => Some("connection lost"),
            Self::Down => None,
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        self.send(topic, payload, false)
    }

    async fn announce(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        self.send(topic, payload, true)
    }
}
