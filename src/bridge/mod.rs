//! # Bridge Service
//!
//! Wires the event source, debounce engine, key mapper and dispatch workers
//! together and owns the bridge lifecycle.
//!
//! ```text
//! EventSource ──► DebounceEngine ──► KeyMapper ──┬─► KeyWorkers ──► Dispatcher ──► TV
//!                                                │        │
//!                                                │        └──► Telemetry / sink (/event)
//!                                                └─► unmapped ──► sink (/unknown)
//! ```
//!
//! The lifecycle is a typestate machine:
//!
//! ```text
//! Initializing ──start()──► Running ──run_until_stopped()──► Stopping ──shutdown()──► StopReason
//! ```
//!
//! While running, the loop is split into sessions. A restart request or a
//! source read failure ends the current session; the source is reopened and a
//! new session begins with fresh debounce state. Counters survive restarts.

pub mod worker;

pub use worker::{KeyJob, KeyWorkers};

use crate::debounce::{Decision, DebounceEngine, DebounceSettings, FireKind};
use crate::dispatch::Dispatcher;
use crate::input::{EventSource, EventSourceError, KeyEvent, SourceSpec};
use crate::mapping::KeyMapper;
use crate::mqtt::ControlMessage;
use crate::telemetry::{Telemetry, TelemetrySink, UnmappedKeyReport};
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SOURCE_RETRY_DELAY: Duration = Duration::from_secs(5);
const MIN_HOLD_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to open input source: {0}")]
    Source(#[from] EventSourceError),
}

/// Why the bridge left the running state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested
    Shutdown,
    /// A scripted source ran out of events
    Exhausted,
}

/// Shared handles every dispatch worker needs
#[derive(Clone)]
pub struct BridgeServices {
    pub dispatcher: Arc<Dispatcher>,
    pub telemetry: Arc<Telemetry>,
    pub sink: Arc<dyn TelemetrySink>,
    pub device_address: String,
}

enum SessionEnd {
    Shutdown,
    Restart,
    Exhausted,
    SourceFailed(EventSourceError),
}

#[state]
#[derive(Debug, Clone)]
pub enum BridgeState {
    Initializing,
    Running,
    Stopping(StopReason),
}

#[machine]
pub struct Bridge<S: BridgeState> {
    source_spec: SourceSpec,
    source: Option<EventSource>,
    mapper: KeyMapper,
    debounce: DebounceEngine,
    services: BridgeServices,
    control_rx: mpsc::Receiver<ControlMessage>,
}

impl<S: BridgeState> Bridge<S> {
    async fn publish_status(&self) {
        let snapshot = self.services.telemetry.snapshot().await;
        if let Err(e) = self.services.sink.publish_status(&snapshot).await {
            warn!("Failed to publish status: {}", e);
        }
    }
}

impl Bridge<Initializing> {
    pub fn create(
        source_spec: SourceSpec,
        mapper: KeyMapper,
        debounce: DebounceSettings,
        services: BridgeServices,
        control_rx: mpsc::Receiver<ControlMessage>,
    ) -> Self {
        info!(
            "Creating bridge for {} with {} mapped keys",
            services.device_address,
            mapper.len()
        );
        debug!("Debounce settings: {:?}", debounce);

        Self::new(
            source_spec,
            None,
            mapper,
            DebounceEngine::new(debounce),
            services,
            control_rx,
        )
    }

    /// Opens the event source and announces the running status
    pub async fn start(mut self) -> Result<Bridge<Running>, BridgeError> {
        let source = self.source_spec.open()?;
        info!("Listening on {}", source.describe());
        self.source = Some(source);

        self.services.telemetry.mark_running().await;
        self.publish_status().await;

        info!("Bridge started, transitioning to Running state");
        Ok(self.transition())
    }
}

impl Bridge<Running> {
    /// Runs sessions until shutdown is requested or a script is exhausted
    pub async fn run_until_stopped(mut self, shutdown: CancellationToken) -> Bridge<Stopping> {
        let reason = loop {
            let source = match self.source.take() {
                Some(source) => source,
                None => match self.reopen_source(&shutdown).await {
                    Some(source) => source,
                    None => break StopReason::Shutdown,
                },
            };

            let session = shutdown.child_token();
            let workers = KeyWorkers::new(self.services.clone(), session.clone());

            match self.run_session(source, workers, &shutdown).await {
                SessionEnd::Shutdown => break StopReason::Shutdown,
                SessionEnd::Exhausted => {
                    info!("Input source exhausted");
                    break StopReason::Exhausted;
                }
                SessionEnd::Restart => {
                    info!("Restarting bridge session");
                    self.debounce = DebounceEngine::new(self.debounce.settings().clone());
                }
                SessionEnd::SourceFailed(e) => {
                    error!("Input source failed: {}", e);
                    self.services.telemetry.record_source_error().await;
                    if !wait_or_shutdown(SOURCE_RETRY_DELAY, &shutdown).await {
                        break StopReason::Shutdown;
                    }
                }
            }
        };

        info!("Bridge stopping: {:?}", reason);
        self.transition_with(reason)
    }

    /// One pass over an open source; workers are drained before returning
    async fn run_session(
        &mut self,
        mut source: EventSource,
        mut workers: KeyWorkers,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let tick = self.debounce.settings().hold_timeout.max(MIN_HOLD_TICK);
        let mut hold_timer = tokio::time::interval(tick);
        hold_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break SessionEnd::Shutdown,

                Some(message) = self.control_rx.recv() => match message {
                    ControlMessage::Status => self.publish_status().await,
                    ControlMessage::Restart => break SessionEnd::Restart,
                },

                _ = hold_timer.tick() => {
                    let now = tokio::time::Instant::now().into_std();
                    let expired = self.debounce.expire_holds(now);
                    if expired > 0 {
                        debug!(
                            "{} held keys timed out, {} still held",
                            expired,
                            self.debounce.held_keys()
                        );
                    }
                }

                event = source.next_event() => match event {
                    Ok(Some(event)) => self.handle_event(&event, &mut workers).await,
                    Ok(None) => break SessionEnd::Exhausted,
                    Err(e) => break SessionEnd::SourceFailed(e),
                },
            }
        };

        match end {
            SessionEnd::Exhausted | SessionEnd::SourceFailed(_) => workers.drain().await,
            SessionEnd::Shutdown | SessionEnd::Restart => workers.cancel_and_drain().await,
        }
        end
    }

    async fn handle_event(&mut self, event: &KeyEvent, workers: &mut KeyWorkers) {
        let fire = match self.debounce.process(event) {
            Decision::Fire(fire) => fire,
            Decision::Suppressed { .. } | Decision::Ignored => return,
        };

        match self.mapper.command(fire.keycode) {
            Some(command) => {
                info!("Key {} -> {}", fire.keycode, command.id);
                workers.submit(KeyJob {
                    keycode: fire.keycode,
                    command,
                    repeat: fire.kind == FireKind::Repeat,
                });
            }
            None => {
                warn!("Unknown key code: {}", fire.keycode);
                self.services
                    .telemetry
                    .record_unmapped_key(fire.keycode)
                    .await;
                let report = UnmappedKeyReport::new(fire.keycode);
                if let Err(e) = self.services.sink.publish_unmapped(&report).await {
                    warn!("Failed to publish unmapped key report: {}", e);
                }
            }
        }
    }

    /// Reopens the source, retrying until it succeeds or shutdown is requested
    async fn reopen_source(&self, shutdown: &CancellationToken) -> Option<EventSource> {
        loop {
            match self.source_spec.open() {
                Ok(source) => {
                    info!("Reopened {}", source.describe());
                    return Some(source);
                }
                Err(e) => {
                    error!("Failed to reopen input source: {}", e);
                    self.services.telemetry.record_source_error().await;
                    if !wait_or_shutdown(SOURCE_RETRY_DELAY, shutdown).await {
                        return None;
                    }
                }
            }
        }
    }
}

impl Bridge<Stopping> {
    /// Publishes the final status and reports why the bridge stopped
    pub async fn shutdown(self) -> StopReason {
        let reason = self
            .get_state_data()
            .copied()
            .unwrap_or(StopReason::Shutdown);

        self.services.telemetry.mark_stopping().await;
        self.publish_status().await;

        let counters = self.services.telemetry.counters().await;
        info!(
            "Bridge stopped ({:?}): {} keys, {} commands sent, {} errors",
            reason, counters.keys_pressed, counters.commands_sent, counters.errors
        );
        reason
    }
}

/// Sleeps for `delay`; false if shutdown was requested first
async fn wait_or_shutdown(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
