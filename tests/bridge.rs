//! End-to-end runs of the bridge with a scripted source, a fake TV and a
//! recording telemetry sink.

use async_trait::async_trait;
use ir_bridge::bridge::{Bridge, BridgeServices, Initializing, StopReason};
use ir_bridge::debounce::DebounceSettings;
use ir_bridge::dispatch::{CommandTransport, DispatchSettings, Dispatcher, TransportError};
use ir_bridge::input::{KeyAction, Script, ScriptedEvent, SourceSpec};
use ir_bridge::mapping::{Command, KeyMapper};
use ir_bridge::mqtt::{ControlMessage, MqttConfig, MqttSink};
use ir_bridge::telemetry::{
    BridgeStatus, CommandEvent, StatusSnapshot, Telemetry, TelemetryError, TelemetrySink,
    UnmappedKeyReport,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use rumqttc::{AsyncClient, MqttOptions};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fake TV: fails the first `failures` requests, hangs forever on `stall`
#[derive(Default)]
struct FakeTv {
    sent: Mutex<Vec<&'static str>>,
    failures: AtomicU32,
    stall: Option<&'static str>,
}

impl FakeTv {
    fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    fn stalling_on(command: &'static str) -> Self {
        Self {
            stall: Some(command),
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandTransport for FakeTv {
    async fn send(&self, command: &Command) -> Result<u16, TransportError> {
        self.sent.lock().unwrap().push(command.id.as_str());

        if self.stall == Some(command.id.as_str()) {
            std::future::pending::<()>().await;
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Ok(503);
        }
        Ok(200)
    }
}

#[derive(Default)]
struct RecordingSink {
    statuses: Mutex<Vec<StatusSnapshot>>,
    events: Mutex<Vec<CommandEvent>>,
    unmapped: Mutex<Vec<u16>>,
}

impl RecordingSink {
    fn statuses(&self) -> Vec<StatusSnapshot> {
        self.statuses.lock().unwrap().clone()
    }

    fn events(&self) -> Vec<CommandEvent> {
        self.events.lock().unwrap().clone()
    }

    fn unmapped(&self) -> Vec<u16> {
        self.unmapped.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn publish_status(&self, snapshot: &StatusSnapshot) -> Result<(), TelemetryError> {
        self.statuses.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn publish_event(&self, event: &CommandEvent) -> Result<(), TelemetryError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn publish_unmapped(&self, report: &UnmappedKeyReport) -> Result<(), TelemetryError> {
        self.unmapped.lock().unwrap().push(report.key_code);
        Ok(())
    }
}

struct Harness {
    tv: Arc<FakeTv>,
    sink: Arc<RecordingSink>,
    telemetry: Arc<Telemetry>,
    control_tx: mpsc::Sender<ControlMessage>,
    shutdown: CancellationToken,
}

fn harness(script: Script, tv: FakeTv) -> (Harness, Bridge<Initializing>) {
    let sink = Arc::new(RecordingSink::default());
    harness_with_sink(script, tv, sink.clone(), sink)
}

/// Like `harness`, but telemetry goes to `publish_to` instead of the recorder
fn harness_with_sink(
    script: Script,
    tv: FakeTv,
    sink: Arc<RecordingSink>,
    publish_to: Arc<dyn TelemetrySink>,
) -> (Harness, Bridge<Initializing>) {
    let tv = Arc::new(tv);
    let telemetry = Arc::new(Telemetry::new(3));
    let (control_tx, control_rx) = mpsc::channel(8);

    let services = BridgeServices {
        dispatcher: Arc::new(Dispatcher::new(
            tv.clone(),
            DispatchSettings {
                retry_count: 3,
                retry_delay: Duration::from_secs(1),
            },
        )),
        telemetry: telemetry.clone(),
        sink: publish_to,
        device_address: "192.168.1.137".to_string(),
    };

    let bridge = Bridge::create(
        SourceSpec::Scripted(script),
        KeyMapper::sony_default(),
        DebounceSettings {
            debounce_window: Duration::from_millis(300),
            hold_timeout: Duration::from_millis(500),
        },
        services,
        control_rx,
    );

    let harness = Harness {
        tv,
        sink,
        telemetry,
        control_tx,
        shutdown: CancellationToken::new(),
    };
    (harness, bridge)
}

/// Runs a script to exhaustion
async fn run_script(script: Script, tv: FakeTv) -> (StopReason, Harness) {
    let (harness, bridge) = harness(script, tv);
    let reason = bridge
        .start()
        .await
        .unwrap()
        .run_until_stopped(harness.shutdown.clone())
        .await
        .shutdown()
        .await;
    (reason, harness)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn press(keycode: u16, at_ms: u64) -> ScriptedEvent {
    ScriptedEvent::new(keycode, KeyAction::Press, at_ms)
}

fn hold(keycode: u16, at_ms: u64) -> ScriptedEvent {
    ScriptedEvent::new(keycode, KeyAction::Hold, at_ms)
}

#[tokio::test(start_paused = true)]
async fn duplicate_press_within_window_sends_once() {
    let script = Script::new(vec![press(115, 0), press(115, 100)]);
    let (reason, h) = run_script(script, FakeTv::default()).await;

    assert_eq!(reason, StopReason::Exhausted);
    assert_eq!(h.tv.sent(), vec!["volumeup"]);

    let counters = h.telemetry.counters().await;
    assert_eq!(counters.keys_pressed, 1);
    assert_eq!(counters.commands_sent, 1);
    assert_eq!(counters.errors, 0);
}

#[tokio::test(start_paused = true)]
async fn held_key_repeats_every_hold_event() {
    let script = Script::new(vec![
        press(114, 0),
        hold(114, 40),
        hold(114, 80),
        hold(114, 120),
        ScriptedEvent::new(114, KeyAction::Release, 160),
    ]);
    let (_, h) = run_script(script, FakeTv::default()).await;

    assert_eq!(h.tv.sent(), vec!["volumedown"; 4]);

    let events = h.sink.events();
    assert_eq!(events.len(), 4);
    assert!(!events[0].repeat);
    assert!(events[1..].iter().all(|event| event.repeat));
}

#[tokio::test(start_paused = true)]
async fn unmapped_keys_are_reported_not_dispatched() {
    let script = Script::new(vec![press(19, 0), press(19, 100), press(19, 500), press(113, 600)]);
    let (_, h) = run_script(script, FakeTv::default()).await;

    assert_eq!(h.tv.sent(), vec!["mute"]);
    assert_eq!(h.sink.unmapped(), vec![19, 19]);

    let counters = h.telemetry.counters().await;
    assert_eq!(counters.unmapped_keys, 2);
    assert_eq!(counters.keys_pressed, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let script = Script::new(vec![press(44, 0)]);
    let started = tokio::time::Instant::now();
    let (_, h) = run_script(script, FakeTv::failing(2)).await;

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(h.tv.sent(), vec!["power"; 3]);

    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].success);
    assert_eq!(events[0].attempts, 3);

    let counters = h.telemetry.counters().await;
    assert_eq!(counters.commands_sent, 1);
    assert_eq!(counters.errors, 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_count_one_error() {
    let script = Script::new(vec![press(44, 0), press(113, 0)]);
    let (_, h) = run_script(script, FakeTv::failing(100)).await;

    let counters = h.telemetry.counters().await;
    assert_eq!(counters.keys_pressed, 2);
    assert_eq!(counters.commands_sent, 0);
    assert_eq!(counters.errors, 2);

    let events = h.sink.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| !event.success && event.attempts == 3));
}

#[tokio::test(start_paused = true)]
async fn status_request_reflects_live_counters() {
    let script = Script::new(vec![press(115, 0), press(113, 0)]).hold_open(true);
    let (
        Harness {
            sink,
            telemetry,
            control_tx,
            shutdown,
            ..
        },
        bridge,
    ) = harness(script, FakeTv::default());

    let running = bridge.start().await.unwrap();
    let task = tokio::spawn(running.run_until_stopped(shutdown.clone()));

    wait_until(|| sink.events().len() == 2).await;
    control_tx.send(ControlMessage::Status).await.unwrap();
    wait_until(|| sink.statuses().len() == 2).await;

    let live = sink.statuses().pop().unwrap();
    assert_eq!(live.status, BridgeStatus::Running);
    assert_eq!(live.commands_sent, 2);
    assert_eq!(live.keys_pressed, 2);

    shutdown.cancel();
    let reason = task.await.unwrap().shutdown().await;
    assert_eq!(reason, StopReason::Shutdown);
    assert_eq!(telemetry.status().await, BridgeStatus::Stopping);
    assert_eq!(
        sink.statuses().last().map(|status| status.status),
        Some(BridgeStatus::Stopping)
    );
}

#[tokio::test(start_paused = true)]
async fn restart_abandons_in_flight_dispatch() {
    let script = Script::new(vec![press(44, 0)]).hold_open(true);
    let (
        Harness {
            tv,
            sink,
            telemetry,
            control_tx,
            shutdown,
        },
        bridge,
    ) = harness(script, FakeTv::stalling_on("power"));

    let running = bridge.start().await.unwrap();
    let task = tokio::spawn(running.run_until_stopped(shutdown.clone()));

    wait_until(|| tv.sent().len() == 1).await;
    control_tx.send(ControlMessage::Restart).await.unwrap();

    // The script is replayed after the restart
    wait_until(|| tv.sent().len() == 2).await;

    shutdown.cancel();
    let reason = task.await.unwrap().shutdown().await;
    assert_eq!(reason, StopReason::Shutdown);

    let counters = telemetry.counters().await;
    assert_eq!(counters.errors, 0);
    assert_eq!(counters.commands_sent, 0);
    assert!(sink.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreachable_broker_does_not_stall_dispatch() {
    let config = MqttConfig::new("127.0.0.1", "test/bridge");
    let options = MqttOptions::new(&config.client_id, &config.broker, config.port);
    // Nothing polls the event loop, so the request queue fills and stays full
    let (client, _eventloop) = AsyncClient::new(options, 2);
    let mqtt = Arc::new(MqttSink::new(client, config.topics()));

    let presses = (0..5).map(|i| press(115, i * 1000)).collect();
    let script = Script::new(presses).realtime(true).hold_open(true);
    let (Harness { tv, shutdown, .. }, bridge) =
        harness_with_sink(script, FakeTv::default(), Arc::default(), mqtt);

    let running = bridge.start().await.unwrap();
    let task = tokio::spawn(running.run_until_stopped(shutdown.clone()));

    wait_until(|| tv.sent().len() == 5).await;

    shutdown.cancel();
    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        task.await.unwrap().shutdown().await
    })
    .await
    .expect("shutdown must not wait on the broker");
    assert_eq!(stopped, StopReason::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn read_error_reopens_source_and_keeps_running() {
    let script = Script::new(vec![
        press(115, 0),
        ScriptedEvent::read_error(2000, "receiver unplugged"),
    ])
    .realtime(true)
    .hold_open(true);
    let (
        Harness {
            tv,
            telemetry,
            shutdown,
            ..
        },
        bridge,
    ) = harness(script, FakeTv::default());

    let running = bridge.start().await.unwrap();
    let task = tokio::spawn(running.run_until_stopped(shutdown.clone()));

    // The reopened script replays its press after the retry delay
    wait_until(|| tv.sent().len() == 2).await;
    assert_eq!(tv.sent(), vec!["volumeup"; 2]);

    let counters = telemetry.counters().await;
    assert_eq!(counters.source_errors, 1);
    assert_eq!(counters.commands_sent, 2);
    assert_eq!(counters.errors, 0);

    shutdown.cancel();
    let reason = task.await.unwrap().shutdown().await;
    assert_eq!(reason, StopReason::Shutdown);
}
