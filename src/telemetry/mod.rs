//! Counters, process status and status snapshots
//!
//! [`Telemetry`] is the only cross-task mutable state in the bridge. Every
//! writer goes through the same `RwLock`, so counters stay monotonic no matter
//! how many key workers report concurrently. Snapshots read the counters live
//! at call time; nothing is cached between publications.
//!
//! # Status Machine
//!
//! ```text
//! Starting ──► Running ──► Degraded ──► Running
//!    │            │            │
//!    └────────────┴────────────┴──► Stopping
//! ```
//!
//! `Degraded` is informational: dispatches keep being attempted.

pub mod health;
pub mod report;
pub mod sink;

pub use health::{HealthProbe, ProcessHealth};
pub use report::{CommandEvent, UnmappedKeyReport};
pub use sink::{NullSink, TelemetryError, TelemetrySink};

use crate::dispatch::{DispatchOutcome, DispatchResult};
use crate::mapping::CommandId;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    #[default]
    Starting,
    Running,
    Degraded,
    Stopping,
}

impl BridgeStatus {
    pub fn can_transition_to(self, next: BridgeStatus) -> bool {
        use BridgeStatus::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Running, Degraded)
                | (Degraded, Running)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Degraded, Stopping)
        )
    }
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeStatus::Starting => "starting",
            BridgeStatus::Running => "running",
            BridgeStatus::Degraded => "degraded",
            BridgeStatus::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct Counters {
    pub keys_pressed: u64,
    pub commands_sent: u64,
    pub errors: u64,
    pub unmapped_keys: u64,
    pub source_errors: u64,
    pub consecutive_failures: u32,
    pub last_command: Option<CommandId>,
    pub last_key: Option<CommandId>,
    pub started_at: DateTime<Local>,
    pub status: BridgeStatus,
}

impl Counters {
    fn new() -> Self {
        Self {
            keys_pressed: 0,
            commands_sent: 0,
            errors: 0,
            unmapped_keys: 0,
            source_errors: 0,
            consecutive_failures: 0,
            last_command: None,
            last_key: None,
            started_at: Local::now(),
            status: BridgeStatus::Starting,
        }
    }

    fn transition(&mut self, next: BridgeStatus) {
        if self.status == next {
            return;
        }
        if self.status.can_transition_to(next) {
            info!("Bridge status: {} -> {}", self.status, next);
            self.status = next;
        } else {
            warn!("Ignoring status transition {} -> {}", self.status, next);
        }
    }
}

/// Immutable point-in-time copy of the counters plus process health
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub status: BridgeStatus,
    pub started_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    pub uptime_secs: u64,
    pub keys_pressed: u64,
    pub commands_sent: u64,
    pub errors: u64,
    pub unmapped_keys: u64,
    pub source_errors: u64,
    pub last_command: Option<CommandId>,
    pub last_key: Option<CommandId>,
    #[serde(flatten)]
    pub health: ProcessHealth,
    pub version: &'static str,
}

pub struct Telemetry {
    counters: RwLock<Counters>,
    health: HealthProbe,
    started: Instant,
    degraded_threshold: u32,
}

impl Telemetry {
    pub fn new(degraded_threshold: u32) -> Self {
        Self {
            counters: RwLock::new(Counters::new()),
            health: HealthProbe::new(),
            started: Instant::now(),
            degraded_threshold: degraded_threshold.max(1),
        }
    }

    pub async fn mark_running(&self) {
        self.counters.write().await.transition(BridgeStatus::Running);
    }

    pub async fn mark_stopping(&self) {
        self.counters.write().await.transition(BridgeStatus::Stopping);
    }

    pub async fn status(&self) -> BridgeStatus {
        self.counters.read().await.status
    }

    pub async fn record_dispatch(&self, result: &DispatchResult) {
        let mut counters = self.counters.write().await;
        counters.keys_pressed += 1;
        counters.last_key = Some(result.command);

        match result.outcome {
            DispatchOutcome::Delivered { .. } => {
                counters.commands_sent += 1;
                counters.last_command = Some(result.command);
                counters.consecutive_failures = 0;
                if counters.status == BridgeStatus::Degraded {
                    counters.transition(BridgeStatus::Running);
                }
            }
            DispatchOutcome::Failed(_) => {
                counters.errors += 1;
                counters.consecutive_failures += 1;
                if counters.consecutive_failures >= self.degraded_threshold
                    && counters.status == BridgeStatus::Running
                {
                    counters.transition(BridgeStatus::Degraded);
                }
            }
            DispatchOutcome::Cancelled => {}
        }
    }

    pub async fn record_unmapped_key(&self, keycode: u16) {
        let mut counters = self.counters.write().await;
        counters.unmapped_keys += 1;
        debug!(
            "Unmapped key {} recorded ({} total)",
            keycode,
            counters.unmapped_keys
        );
    }

    pub async fn record_source_error(&self) {
        self.counters.write().await.source_errors += 1;
    }

    pub async fn counters(&self) -> Counters {
        self.counters.read().await.clone()
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let counters = self.counters().await;
        StatusSnapshot {
            status: counters.status,
            started_at: counters.started_at,
            updated_at: Local::now(),
            uptime_secs: self.started.elapsed().as_secs(),
            keys_pressed: counters.keys_pressed,
            commands_sent: counters.commands_sent,
            errors: counters.errors,
            unmapped_keys: counters.unmapped_keys,
            source_errors: counters.source_errors,
            last_command: counters.last_command,
            last_key: counters.last_key,
            health: self.health.sample(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FailureKind;
    use crate::mapping::Command;
    use std::time::Duration;

    fn result(outcome: DispatchOutcome) -> DispatchResult {
        DispatchResult {
            command: Command::from_catalog("volumeup").unwrap().id,
            outcome,
            attempts: 1,
            latency: Duration::from_millis(12),
        }
    }

    fn delivered() -> DispatchResult {
        result(DispatchOutcome::Delivered { status: 200 })
    }

    fn failed() -> DispatchResult {
        result(DispatchOutcome::Failed(FailureKind::Timeout))
    }

    #[tokio::test]
    async fn counters_track_outcomes() {
        let telemetry = Telemetry::new(3);
        telemetry.mark_running().await;

        telemetry.record_dispatch(&delivered()).await;
        telemetry.record_dispatch(&failed()).await;
        telemetry.record_dispatch(&result(DispatchOutcome::Cancelled)).await;
        telemetry.record_unmapped_key(19).await;

        let counters = telemetry.counters().await;
        assert_eq!(counters.keys_pressed, 3);
        assert_eq!(counters.commands_sent, 1);
        assert_eq!(counters.errors, 1);
        assert_eq!(counters.unmapped_keys, 1);
        assert_eq!(counters.last_command.map(|c| c.as_str()), Some("volumeup"));
    }

    #[tokio::test]
    async fn repeated_failures_degrade_and_success_recovers() {
        let telemetry = Telemetry::new(2);
        telemetry.mark_running().await;

        telemetry.record_dispatch(&failed()).await;
        assert_eq!(telemetry.status().await, BridgeStatus::Running);
        telemetry.record_dispatch(&failed()).await;
        assert_eq!(telemetry.status().await, BridgeStatus::Degraded);

        telemetry.record_dispatch(&delivered()).await;
        assert_eq!(telemetry.status().await, BridgeStatus::Running);
    }

    #[tokio::test]
    async fn stopping_is_terminal() {
        let telemetry = Telemetry::new(1);
        telemetry.mark_running().await;
        telemetry.mark_stopping().await;

        telemetry.record_dispatch(&failed()).await;
        telemetry.mark_running().await;
        assert_eq!(telemetry.status().await, BridgeStatus::Stopping);
    }

    #[tokio::test]
    async fn snapshot_reflects_latest_counters() {
        let telemetry = Telemetry::new(3);
        telemetry.mark_running().await;
        let before = telemetry.snapshot().await;

        telemetry.record_dispatch(&delivered()).await;
        let after = telemetry.snapshot().await;

        assert_eq!(before.commands_sent, 0);
        assert_eq!(after.commands_sent, 1);
        assert_eq!(after.status, BridgeStatus::Running);
    }

    #[tokio::test]
    async fn snapshot_serializes_flat_json() {
        let telemetry = Telemetry::new(3);
        let json = serde_json::to_value(telemetry.snapshot().await).unwrap();

        assert_eq!(json["status"], "starting");
        assert_eq!(json["commands_sent"], 0);
        assert!(json.get("memory_bytes").is_some());
        assert!(json["last_command"].is_null());
    }
}
