// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/washwatch

//! Dual-broker MQTT bridge
//!
//! Runs two independent rumqttc sessions: a plaintext ingest session on
//! the local sensor broker and a mutual-TLS egress session on the cloud
//! broker. Each session has its own event-loop task and reconnect
//! discipline (fixed retry delay, resubscribe on every connect). Decoded
//! inbound publishes cross a bounded channel to a consumer task that
//! calls into the registry, so transport and business logic stay
//! decoupled. The bridge holds no domain state of its own.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::{Config, EgressConfig, IngestConfig};
use crate::monitor::MachineRegistry;

/// Connection lifecycle of one broker session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session established yet
    #[default]
    Disconnected,
    /// Attempting to (re)connect
    Connecting,
    /// Live session, subscriptions asserted
    Connected,
}

/// One decoded inbound publish
struct InboundMessage {
    topic: String,
    payload: Vec<u8>,
}

/// Bridges the local sensor broker and the cloud broker around the
/// machine registry
pub struct BrokerBridge {
    registry: Arc<MachineRegistry>,
    ingest: IngestConfig,
    egress: EgressConfig,
    publish_interval: Duration,
}

impl BrokerBridge {
    /// Create a bridge over the given registry
    pub fn new(config: &Config, registry: Arc<MachineRegistry>) -> Self {
        Self {
            registry,
            ingest: config.ingest.clone(),
            egress: config.egress.clone(),
            publish_interval: Duration::from_secs(config.publish_interval_secs),
        }
    }

    /// Run both sessions and the publish tick until shutdown.
    ///
    /// On shutdown the tick loop stops first, a final cycle-count
    /// persist runs, then both sessions are disconnected.
    pub async fn run(&self, shutdown: &broadcast::Sender<()>) -> Result<()> {
        let ingest_options = self.ingest_options();
        let egress_options = self.egress_options()?;

        let (ingest_client, ingest_eventloop) = AsyncClient::new(ingest_options, 100);
        let (egress_client, egress_eventloop) = AsyncClient::new(egress_options, 100);

        let ingest_state = Arc::new(RwLock::new(ConnectionState::Connecting));
        let egress_state = Arc::new(RwLock::new(ConnectionState::Connecting));

        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(1000);

        // Ingest event loop: decodes publishes, reasserts subscriptions
        // on every connect
        let ingest_task = tokio::spawn(run_event_loop(
            "ingest",
            ingest_eventloop,
            ingest_state.clone(),
            Duration::from_secs(self.ingest.reconnect_delay_secs),
            Some(inbound_tx),
            Some((ingest_client.clone(), self.registry.subscriptions())),
            shutdown.subscribe(),
        ));

        // Egress event loop: connection upkeep only
        let egress_task = tokio::spawn(run_event_loop(
            "egress",
            egress_eventloop,
            egress_state.clone(),
            Duration::from_secs(self.egress.reconnect_delay_secs),
            None,
            None,
            shutdown.subscribe(),
        ));

        // Consumer: drains decoded messages into the registry
        let consumer_task = tokio::spawn(run_consumer(
            self.registry.clone(),
            inbound_rx,
            shutdown.subscribe(),
        ));

        info!(
            "Bridge running: ingest {}:{}, egress {}:{}, publishing every {:?}",
            self.ingest.host, self.ingest.port, self.egress.host, self.egress.port,
            self.publish_interval
        );

        let mut tick = tokio::time::interval(self.publish_interval);
        let mut shutdown_rx = shutdown.subscribe();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.publish_statuses(&egress_client, &egress_state).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Bridge shutting down...");
                    break;
                }
            }
        }

        // Final persist before the sessions drop
        self.registry.persist_counts();

        let _ = ingest_client.disconnect().await;
        let _ = egress_client.disconnect().await;
        let _ = tokio::join!(ingest_task, egress_task, consumer_task);

        info!("Bridge stopped");
        Ok(())
    }

    async fn publish_statuses(
        &self,
        client: &AsyncClient,
        state: &Arc<RwLock<ConnectionState>>,
    ) {
        let statuses = self.registry.publish_tick();

        // Dropping beats buffering: a stale power average is worthless
        if *state.read() != ConnectionState::Connected {
            warn!(
                "Egress session not connected, dropping {} status records",
                statuses.len()
            );
            return;
        }

        for status in &statuses {
            let topic = self.egress_topic(&status.machine_id);
            let payload = match serde_json::to_vec(status) {
                Ok(p) => p,
                Err(e) => {
                    error!("Failed to encode status for {}: {}", status.machine_id, e);
                    continue;
                }
            };
            match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                Ok(()) => debug!(
                    "Published to {}: state={} power={}W cycles={}",
                    topic, status.state, status.average_power, status.cycle_count
                ),
                Err(e) => warn!("Publish to {} failed: {}", topic, e),
            }
        }
    }

    fn egress_topic(&self, machine_id: &str) -> String {
        format!("{}/{}/data", self.egress.topic_prefix, machine_id)
    }

    fn ingest_options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.ingest.client_id, &self.ingest.host, self.ingest.port);
        options.set_keep_alive(Duration::from_secs(self.ingest.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&self.ingest.username, &self.ingest.password) {
            options.set_credentials(user, pass);
        }
        options
    }

    fn egress_options(&self) -> Result<MqttOptions> {
        let mut options =
            MqttOptions::new(&self.egress.client_id, &self.egress.host, self.egress.port);
        options.set_keep_alive(Duration::from_secs(self.egress.keep_alive_secs));

        if self.egress.tls.enabled {
            let tls = &self.egress.tls;
            let ca = std::fs::read(&tls.ca_file)
                .with_context(|| format!("reading CA certificate {:?}", tls.ca_file))?;
            let cert = std::fs::read(&tls.cert_file)
                .with_context(|| format!("reading device certificate {:?}", tls.cert_file))?;
            let key = std::fs::read(&tls.key_file)
                .with_context(|| format!("reading device key {:?}", tls.key_file))?;

            options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: Some((cert, key)),
            }));
        }

        Ok(options)
    }
}

/// Poll one session's event loop until shutdown.
///
/// Every successful connect reasserts the session's subscriptions -
/// they are never assumed to survive a reconnect. Transport errors set
/// the state back to Connecting and wait out the fixed retry delay;
/// rumqttc re-dials on the next poll.
async fn run_event_loop(
    name: &'static str,
    mut eventloop: EventLoop,
    state: Arc<RwLock<ConnectionState>>,
    reconnect_delay: Duration,
    inbound: Option<mpsc::Sender<InboundMessage>>,
    subscriptions: Option<(AsyncClient, Vec<String>)>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    *state.write() = ConnectionState::Connected;
                    info!("{} session connected", name);
                    if let Some((client, topics)) = &subscriptions {
                        resubscribe(name, client, topics);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!("{} received on {}", name, publish.topic);
                    if let Some(tx) = &inbound {
                        let message = InboundMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        };
                        if tx.try_send(message).is_err() {
                            warn!("{} inbound channel full, dropping message", name);
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    *state.write() = ConnectionState::Connecting;
                    warn!("{} session disconnected by broker", name);
                }
                Ok(_) => {}
                Err(e) => {
                    *state.write() = ConnectionState::Connecting;
                    warn!(
                        "{} session error: {}, retrying in {:?}",
                        name, e, reconnect_delay
                    );
                    tokio::time::sleep(reconnect_delay).await;
                }
            },
            _ = shutdown.recv() => break,
        }
    }
    *state.write() = ConnectionState::Disconnected;
    debug!("{} event loop stopped", name);
}

/// Reassert a session's subscriptions after a (re)connect.
///
/// Uses the non-blocking subscribe variant: this runs on the task that
/// polls the event loop, and an awaited subscribe against a full
/// request queue would stall the poll loop for good. A queue-full
/// failure is logged; the next reconnect reasserts again.
fn resubscribe(name: &str, client: &AsyncClient, topics: &[String]) {
    for topic in topics {
        match client.try_subscribe(topic, QoS::AtLeastOnce) {
            Ok(()) => info!("Subscribed to {}", topic),
            Err(e) => warn!("{} subscribe to {} failed: {}", name, topic, e),
        }
    }
}

/// Drain decoded inbound messages into the registry
async fn run_consumer(
    registry: Arc<MachineRegistry>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            message = inbound.recv() => match message {
                Some(msg) => registry.route(&msg.topic, &msg.payload),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    debug!("Message consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MachineState;
    use crate::store::CycleStore;
    use tempfile::TempDir;

    fn test_bridge(config: &Config) -> BrokerBridge {
        let store = CycleStore::new(config.cycle_file());
        let registry = Arc::new(MachineRegistry::new(config, store));
        BrokerBridge::new(config, registry)
    }

    #[test]
    fn test_egress_topic_format() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let bridge = test_bridge(&config);
        assert_eq!(bridge.egress_topic("WM-01"), "washer/WM-01/data");
    }

    #[test]
    fn test_egress_options_require_readable_certs() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        // Default cert paths do not exist in the test environment
        let bridge = test_bridge(&config);
        assert!(bridge.egress_options().is_err());
    }

    #[test]
    fn test_egress_options_plaintext_when_tls_disabled() {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        config.egress.tls.enabled = false;
        let bridge = test_bridge(&config);
        assert!(bridge.egress_options().is_ok());
    }

    #[test]
    fn test_connection_state_default() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_consumer_routes_into_registry() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let store = CycleStore::new(config.cycle_file());
        let registry = Arc::new(MachineRegistry::new(&config, store));

        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, _) = broadcast::channel(1);
        let consumer = tokio::spawn(run_consumer(
            registry.clone(),
            rx,
            shutdown_tx.subscribe(),
        ));

        // Messages reach the registry through the channel alone; no
        // broker session is involved, which is what keeps routing
        // working across reconnects
        tx.send(InboundMessage {
            topic: "WM-01/plug/status".to_string(),
            payload: br#"{"apower": 150.0}"#.to_vec(),
        })
        .await
        .unwrap();
        drop(tx);
        consumer.await.unwrap();

        let statuses = registry.publish_tick();
        assert_eq!(statuses[0].machine_id, "WM-01");
        assert_eq!(statuses[0].state, MachineState::Running);
        assert_eq!(statuses[0].average_power, 150.0);
    }

    #[tokio::test]
    async fn test_consumer_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let store = CycleStore::new(config.cycle_file());
        let registry = Arc::new(MachineRegistry::new(&config, store));

        let (_tx, rx) = mpsc::channel::<InboundMessage>(16);
        let (shutdown_tx, _) = broadcast::channel(1);
        let consumer = tokio::spawn(run_consumer(registry, rx, shutdown_tx.subscribe()));

        shutdown_tx.send(()).unwrap();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn test_resubscribe_never_blocks_on_full_queue() {
        // Request queue of one, nothing polling: every subscribe after
        // the first fails queue-full. The helper must log and move on
        // instead of stalling what would be the poll task.
        let options = MqttOptions::new("washwatch-test", "localhost", 1883);
        let (client, _eventloop) = AsyncClient::new(options, 1);
        let topics: Vec<String> = (0..8).map(|i| format!("WM-0{}/plug/status", i)).collect();
        resubscribe("ingest", &client, &topics);
    }
}
