//! MQTT bridge
//!
//! Publishes state snapshots and availability, and turns messages on the
//! command topics into [`InboundCommand`]s for the dispatcher. The broker
//! connection is driven by [`run_event_loop`]; rumqttc reconnects on the
//! next poll after an error, and subscriptions are renewed on every ConnAck.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, Publish, QoS,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::InboundCommand;
use crate::config::MqttConfig;
use crate::error::{GenSrvError, Result};
use crate::layout::RegisterLayout;
use crate::poller::StatePublisher;
use crate::snapshot::StateSnapshot;

const REQUEST_CHANNEL_CAPACITY: usize = 32;
const ONLINE: &str = "online";
const OFFLINE: &str = "offline";

pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

pub fn build_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options.set_clean_session(true);
    options.set_last_will(LastWill::new(
        config.availability_topic(),
        OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));
    options
}

/// Client half of the broker connection
pub struct MqttBridge {
    client: AsyncClient,
    config: MqttConfig,
    qos: QoS,
    connected: AtomicBool,
}

impl MqttBridge {
    /// Create the client; the returned event loop must be handed to
    /// [`run_event_loop`] before anything is sent
    pub fn new(config: &MqttConfig) -> (Self, EventLoop) {
        let (client, eventloop) = AsyncClient::new(build_options(config), REQUEST_CHANNEL_CAPACITY);
        let bridge = Self {
            client,
            config: config.clone(),
            qos: qos_from_level(config.qos),
            connected: AtomicBool::new(false),
        };
        (bridge, eventloop)
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Subscribe to every enabled command and announce availability
    pub async fn on_connected(&self, layout: &RegisterLayout) -> Result<()> {
        for command in layout.enabled_commands() {
            let topic = self.config.command_topic(&command.identifier);
            self.client.subscribe(&topic, self.qos).await?;
            debug!("Subscribed to {}", topic);
        }
        self.client
            .publish(self.config.availability_topic(), QoS::AtLeastOnce, true, ONLINE)
            .await?;
        Ok(())
    }

    /// Map a broker message to a command request, if it is on a command topic
    pub fn command_from_publish(&self, publish: &Publish) -> Option<InboundCommand> {
        self.config
            .command_identifier(&publish.topic)
            .map(|id| InboundCommand::new(id, publish.retain))
    }

    /// Queue the offline marker and a clean disconnect
    fn request_shutdown(&self) {
        if let Err(e) = self.client.try_publish(
            self.config.availability_topic(),
            QoS::AtLeastOnce,
            true,
            OFFLINE,
        ) {
            warn!("Could not queue offline availability: {}", e);
        }
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
        }
    }
}

#[async_trait]
impl StatePublisher for MqttBridge {
    async fn publish_state(&self, snapshot: &StateSnapshot) -> Result<()> {
        if !self.is_connected() {
            return Err(GenSrvError::messaging("broker not connected"));
        }
        let payload = snapshot.to_json()?;
        // never block the poll loop on a saturated request queue
        self.client.try_publish(
            self.config.state_topic(),
            self.qos,
            self.config.retain_state,
            payload,
        )?;
        Ok(())
    }
}

/// Drive the broker connection until cancelled
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    bridge: Arc<MqttBridge>,
    layout: Arc<RegisterLayout>,
    commands: mpsc::Sender<InboundCommand>,
    cancel: CancellationToken,
) {
    let reconnect_delay = Duration::from_millis(bridge.config().reconnect_delay_ms);
    info!(
        "Connecting to MQTT broker {}:{}",
        bridge.config().host,
        bridge.config().port
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker {}", bridge.config().host);
                    bridge.connected.store(true, Ordering::Release);
                    // the client queue is drained by this loop, so subscribe from another task
                    let bridge = Arc::clone(&bridge);
                    let layout = Arc::clone(&layout);
                    tokio::spawn(async move {
                        if let Err(e) = bridge.on_connected(&layout).await {
                            error!("MQTT subscribe failed: {}", e);
                        }
                    });
                },
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some(command) = bridge.command_from_publish(&publish) else {
                        debug!("Ignoring message on {}", publish.topic);
                        continue;
                    };
                    match commands.try_send(command) {
                        Ok(()) => {},
                        Err(TrySendError::Full(command)) => {
                            warn!("Command queue full, dropping '{}'", command.identifier);
                        },
                        Err(TrySendError::Closed(_)) => {
                            debug!("Command queue closed");
                        },
                    }
                },
                Ok(_) => {},
                Err(e) => {
                    bridge.connected.store(false, Ordering::Release);
                    warn!(
                        "MQTT connection error: {}; retrying in {}ms",
                        e,
                        reconnect_delay.as_millis()
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(reconnect_delay) => {},
                    }
                },
            },
        }
    }

    if bridge.is_connected() {
        bridge.request_shutdown();
        let flushed = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {},
                }
            }
        })
        .await;
        if flushed.is_err() {
            warn!("MQTT disconnect did not complete in time");
        }
        bridge.connected.store(false, Ordering::Release);
    }
    info!("MQTT bridge stopped");
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::decoder::RegisterImage;
    use crate::layout::default_layout;
    use crate::snapshot::StateAggregator;
    use chrono::Utc;

    fn config() -> MqttConfig {
        MqttConfig {
            base_topic: "site/genset1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_level(9), QoS::AtLeastOnce);
    }

    #[test]
    fn test_last_will_marks_offline() {
        let options = build_options(&config());
        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "site/genset1/availability");
        assert_eq!(&will.message[..], b"offline");
        assert!(will.retain);
    }

    #[tokio::test]
    async fn test_command_topics_map_to_identifiers() {
        let (bridge, _eventloop) = MqttBridge::new(&config());

        let fresh = Publish::new("site/genset1/command/start", QoS::AtLeastOnce, "1");
        assert_eq!(
            bridge.command_from_publish(&fresh),
            Some(InboundCommand::new("start", false))
        );

        let mut replay = Publish::new("site/genset1/command/stop", QoS::AtLeastOnce, "");
        replay.retain = true;
        assert_eq!(
            bridge.command_from_publish(&replay),
            Some(InboundCommand::new("stop", true))
        );

        let other = Publish::new("site/genset1/state", QoS::AtLeastOnce, "{}");
        assert_eq!(bridge.command_from_publish(&other), None);
    }

    #[tokio::test]
    async fn test_publish_refused_while_disconnected() {
        let (bridge, _eventloop) = MqttBridge::new(&config());
        let mut agg = StateAggregator::new(Arc::new(default_layout()));
        let snapshot = agg.compose(&RegisterImage::default(), Utc::now());
        let err = bridge.publish_state(&snapshot).await.unwrap_err();
        assert!(matches!(err, GenSrvError::MessagingError(_)));
    }
}
