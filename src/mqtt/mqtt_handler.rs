use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, Publish, QoS,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{MqttConfig, Topics};
use super::message::ControlMessage;
use crate::telemetry::{
    CommandEvent, StatusSnapshot, Telemetry, TelemetryError, TelemetrySink, UnmappedKeyReport,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
const OFFLINE_PAYLOAD: &str = r#"{"status":"offline"}"#;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Publishes telemetry documents through a shared `rumqttc` client.
///
/// Every publish is queued with `try_publish`. When the request queue is full
/// (broker down, connection task behind) the document is dropped with an
/// error instead of blocking the dispatch path.
pub struct MqttSink {
    client: AsyncClient,
    topics: Topics,
}

impl MqttSink {
    pub fn new(client: AsyncClient, topics: Topics) -> Self {
        Self { client, topics }
    }

    fn queue<T: Serialize>(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        document: &T,
    ) -> Result<(), TelemetryError> {
        let payload = serde_json::to_string(document)?;
        self.client
            .try_publish(topic, qos, retain, payload)
            .map_err(|e| TelemetryError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl TelemetrySink for MqttSink {
    async fn publish_status(&self, snapshot: &StatusSnapshot) -> Result<(), TelemetryError> {
        self.queue(&self.topics.status, QoS::AtLeastOnce, true, snapshot)
    }

    async fn publish_event(&self, event: &CommandEvent) -> Result<(), TelemetryError> {
        self.queue(&self.topics.event, QoS::AtLeastOnce, false, event)
    }

    async fn publish_unmapped(&self, report: &UnmappedKeyReport) -> Result<(), TelemetryError> {
        self.queue(&self.topics.unknown, QoS::AtMostOnce, false, report)
    }
}

/// Tracks the connection and sends the birth and periodic status documents
struct StatusReporter {
    telemetry: Arc<Telemetry>,
    state: ConnectionState,
}

impl StatusReporter {
    fn new(telemetry: Arc<Telemetry>) -> Self {
        Self {
            telemetry,
            state: ConnectionState::Connecting,
        }
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connected(&mut self, sink: &dyn TelemetrySink) {
        self.state = ConnectionState::Connected;
        let snapshot = self.telemetry.snapshot().await;
        if let Err(e) = sink.publish_status(&snapshot).await {
            warn!("Birth status publish failed: {}", e);
        }
    }

    /// Returns true when this is a fresh loss of the connection
    fn disconnected(&mut self) -> bool {
        let fresh = self.state != ConnectionState::Reconnecting;
        self.state = ConnectionState::Reconnecting;
        fresh
    }

    /// Publishes the periodic status; nothing goes out while disconnected
    async fn tick(&self, sink: &dyn TelemetrySink) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        let snapshot = self.telemetry.snapshot().await;
        if let Err(e) = sink.publish_status(&snapshot).await {
            warn!("Periodic status publish failed: {}", e);
        }
        true
    }
}

/// Owns the broker connection task and the sink handed to the bridge
pub struct MqttHandle {
    sink: Arc<MqttSink>,
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl MqttHandle {
    pub fn spawn(
        config: MqttConfig,
        telemetry: Arc<Telemetry>,
        control_tx: mpsc::Sender<ControlMessage>,
    ) -> Self {
        let topics = config.topics();
        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        mqtt_options
            .set_keep_alive(config.keep_alive)
            .set_last_will(LastWill::new(
                &topics.status,
                OFFLINE_PAYLOAD,
                QoS::AtLeastOnce,
                true,
            ));
        if let Some(user) = &config.user {
            mqtt_options.set_credentials(user, config.pass.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);
        let sink = Arc::new(MqttSink::new(client, topics));
        let shutdown = CancellationToken::new();

        info!(
            "Connecting to MQTT broker {}:{} as {}",
            config.broker, config.port, config.client_id
        );

        let task = tokio::spawn(run_connection(
            eventloop,
            sink.clone(),
            telemetry,
            control_tx,
            config.status_interval,
            shutdown.clone(),
        ));

        Self {
            sink,
            task,
            shutdown,
        }
    }

    pub fn sink(&self) -> Arc<MqttSink> {
        self.sink.clone()
    }

    /// Flushes queued publishes, sends DISCONNECT and joins the connection task
    pub async fn shutdown(self) {
        if let Err(e) = self.sink.client.try_disconnect() {
            warn!("Failed to queue MQTT disconnect: {}", e);
        }
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!("MQTT connection task failed: {}", e);
        }
    }
}

async fn run_connection(
    mut eventloop: EventLoop,
    sink: Arc<MqttSink>,
    telemetry: Arc<Telemetry>,
    control_tx: mpsc::Sender<ControlMessage>,
    status_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut reporter = StatusReporter::new(telemetry);
    let mut status_timer = tokio::time::interval(status_interval);
    status_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            _ = status_timer.tick() => {
                reporter.tick(&*sink).await;
            }

            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connected");
                    if let Err(e) = sink
                        .client
                        .try_subscribe(&sink.topics.control, QoS::AtLeastOnce)
                    {
                        warn!("Failed to subscribe to {}: {}", sink.topics.control, e);
                    }
                    reporter.connected(&*sink).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handle_publish(&sink.topics, &publish, &control_tx);
                }
                Ok(_) => {}
                Err(e) => {
                    if reporter.disconnected() {
                        warn!("MQTT connection error: {}", e);
                    } else {
                        debug!("MQTT still unreachable: {}", e);
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }

    if reporter.state() == ConnectionState::Connected {
        flush(&mut eventloop).await;
    }
    debug!("MQTT connection task stopped ({:?})", ConnectionState::Disconnected);
}

/// Polls the event loop until the queued DISCONNECT has gone out
async fn flush(eventloop: &mut EventLoop) {
    let drained = tokio::time::timeout(FLUSH_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("MQTT flush ended: {}", e);
                    break;
                }
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!("Timed out flushing MQTT publishes on shutdown");
    }
}

fn handle_publish(topics: &Topics, publish: &Publish, control_tx: &mpsc::Sender<ControlMessage>) {
    if publish.topic != topics.control {
        return;
    }

    let payload = String::from_utf8_lossy(&publish.payload);
    match ControlMessage::parse(&payload) {
        Some(message) => {
            info!("Control request: {}", message);
            if let Err(e) = control_tx.try_send(message) {
                warn!("Dropping control request {}: {}", message, e);
            }
        }
        None => warn!("Ignoring unknown control payload: {:?}", payload),
    }
}
