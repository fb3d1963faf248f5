//! Command dispatch with bounded retry
//!
//! The [`Dispatcher`] owns the retry policy and failure classification. The
//! actual wire call sits behind [`CommandTransport`] so the IRCC HTTP client can
//! be swapped for a scripted transport in tests.
//!
//! # Retry Policy
//!
//! ```text
//! attempt 1 ──► 2xx? ──yes──► Delivered
//!                │no
//!          sleep(retry_delay) ──► attempt 2 ... attempt N ──► Failed(last kind)
//! ```
//!
//! The retry sleep and the in-flight request race the cancellation token, so a
//! restart abandons a dispatch within one retry delay at most.

pub mod ircc;

pub use ircc::IrccTransport;

use crate::mapping::{Command, CommandId};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Transport-level failure before any HTTP status was received
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Device unreachable: {0}")]
    Unreachable(String),
}

/// Classified reason a dispatch attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum FailureKind {
    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("timeout")]
    Timeout,

    #[error("authentication rejected")]
    AuthRejected,

    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),
}

impl FailureKind {
    fn classify(response: Result<u16, TransportError>) -> Result<u16, Self> {
        match response {
            Ok(status) if (200..300).contains(&status) => Ok(status),
            Ok(401) | Ok(403) => Err(FailureKind::AuthRejected),
            Ok(status) => Err(FailureKind::UnexpectedStatus(status)),
            Err(TransportError::Timeout(_)) => Err(FailureKind::Timeout),
            Err(TransportError::Unreachable(_)) => Err(FailureKind::NetworkUnreachable),
        }
    }
}

/// Sends one command to the device and reports the HTTP status
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send(&self, command: &Command) -> Result<u16, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { status: u16 },
    Failed(FailureKind),
    /// Abandoned because of a restart or shutdown
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub command: CommandId,
    pub outcome: DispatchOutcome,
    pub attempts: u32,
    pub latency: Duration,
}

impl DispatchResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Delivered { .. })
    }

    pub fn failure(&self) -> Option<FailureKind> {
        match self.outcome {
            DispatchOutcome::Failed(kind) => Some(kind),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub struct Dispatcher {
    transport: Arc<dyn CommandTransport>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn CommandTransport>, settings: DispatchSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub async fn dispatch(&self, command: &Command, cancel: &CancellationToken) -> DispatchResult {
        let started = Instant::now();
        let retry_count = self.settings.retry_count.max(1);
        let mut last_failure = FailureKind::NetworkUnreachable;

        let finish = |outcome, attempts| DispatchResult {
            command: command.id,
            outcome,
            attempts,
            latency: started.elapsed(),
        };

        for attempt in 1..=retry_count {
            if cancel.is_cancelled() {
                return finish(DispatchOutcome::Cancelled, attempt - 1);
            }

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Dispatch of {} cancelled during attempt {}", command.id, attempt);
                    return finish(DispatchOutcome::Cancelled, attempt);
                }
                response = self.transport.send(command) => response,
            };

            match FailureKind::classify(response) {
                Ok(status) => {
                    debug!(
                        "Command sent successfully: {} (attempt {}, status {})",
                        command.id, attempt, status
                    );
                    return finish(DispatchOutcome::Delivered { status }, attempt);
                }
                Err(kind) => {
                    warn!(
                        "Command {} failed (attempt {}/{}): {}",
                        command.id, attempt, retry_count, kind
                    );
                    last_failure = kind;
                }
            }

            if attempt < retry_count {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Retry wait for {} abandoned", command.id);
                        return finish(DispatchOutcome::Cancelled, attempt);
                    }
                    _ = tokio::time::sleep(self.settings.retry_delay) => {}
                }
            }
        }

        finish(DispatchOutcome::Failed(last_failure), retry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<u16, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<u16, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CommandTransport for ScriptedTransport {
        async fn send(&self, _command: &Command) -> Result<u16, TransportError> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(200))
        }
    }

    fn volume_up() -> Command {
        Command::from_catalog("volumeup").unwrap()
    }

    fn unreachable() -> Result<u16, TransportError> {
        Err(TransportError::Unreachable("connection refused".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_delays() {
        let transport = ScriptedTransport::new(vec![unreachable(), Ok(500), Ok(200)]);
        let dispatcher = Dispatcher::new(transport.clone(), DispatchSettings::default());

        let started = Instant::now();
        let result = dispatcher.dispatch(&volume_up(), &CancellationToken::new()).await;

        assert!(result.success());
        assert_eq!(result.attempts, 3);
        assert_eq!(result.outcome, DispatchOutcome::Delivered { status: 200 });
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_reports_last_failure() {
        let transport = ScriptedTransport::new(vec![unreachable(), unreachable(), Ok(404)]);
        let dispatcher = Dispatcher::new(transport, DispatchSettings::default());

        let result = dispatcher.dispatch(&volume_up(), &CancellationToken::new()).await;

        assert!(!result.success());
        assert_eq!(result.attempts, 3);
        assert_eq!(result.failure(), Some(FailureKind::UnexpectedStatus(404)));
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_stops_retrying() {
        let transport = ScriptedTransport::new(vec![Ok(204)]);
        let dispatcher = Dispatcher::new(transport.clone(), DispatchSettings::default());

        let result = dispatcher.dispatch(&volume_up(), &CancellationToken::new()).await;

        assert_eq!(result.attempts, 1);
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn statuses_are_classified() {
        assert_eq!(FailureKind::classify(Ok(200)), Ok(200));
        assert_eq!(FailureKind::classify(Ok(403)), Err(FailureKind::AuthRejected));
        assert_eq!(FailureKind::classify(Ok(401)), Err(FailureKind::AuthRejected));
        assert_eq!(
            FailureKind::classify(Ok(500)),
            Err(FailureKind::UnexpectedStatus(500))
        );
        assert_eq!(
            FailureKind::classify(Err(TransportError::Timeout("5s".into()))),
            Err(FailureKind::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_retry_wait() {
        let transport = ScriptedTransport::new(vec![unreachable(), unreachable(), unreachable()]);
        let settings = DispatchSettings {
            retry_count: 3,
            retry_delay: Duration::from_secs(30),
        };
        let dispatcher = Dispatcher::new(transport.clone(), settings);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result = dispatcher.dispatch(&volume_up(), &cancel).await;

        assert_eq!(result.outcome, DispatchOutcome::Cancelled);
        assert_eq!(result.attempts, 1);
        assert_eq!(transport.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_the_request() {
        let transport = ScriptedTransport::new(vec![]);
        let dispatcher = Dispatcher::new(transport.clone(), DispatchSettings::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = dispatcher.dispatch(&volume_up(), &cancel).await;

        assert_eq!(result.outcome, DispatchOutcome::Cancelled);
        assert_eq!(result.attempts, 0);
        assert_eq!(transport.calls(), 0);
    }
}
