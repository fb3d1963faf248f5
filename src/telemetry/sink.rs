//! Telemetry output seam

use super::{CommandEvent, StatusSnapshot, UnmappedKeyReport};
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to encode telemetry document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },
}

/// Destination for status, command and unmapped-key documents
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Publishes the retained status document
    async fn publish_status(&self, snapshot: &StatusSnapshot) -> Result<(), TelemetryError>;

    async fn publish_event(&self, event: &CommandEvent) -> Result<(), TelemetryError>;

    async fn publish_unmapped(&self, report: &UnmappedKeyReport) -> Result<(), TelemetryError>;
}

/// Sink used when no broker is configured; documents only reach the log
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    async fn publish_status(&self, snapshot: &StatusSnapshot) -> Result<(), TelemetryError> {
        debug!(
            "Status: {} (sent {}, errors {})",
            snapshot.status, snapshot.commands_sent, snapshot.errors
        );
        Ok(())
    }

    async fn publish_event(&self, event: &CommandEvent) -> Result<(), TelemetryError> {
        debug!("Command event: {} success={}", event.command, event.success);
        Ok(())
    }

    async fn publish_unmapped(&self, report: &UnmappedKeyReport) -> Result<(), TelemetryError> {
        debug!("Unmapped key: {}", report.key_code);
        Ok(())
    }
}
