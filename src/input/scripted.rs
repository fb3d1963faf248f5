//! Scripted key events for simulation and tests
//!
//! Scripts are plain TOML:
//!
//! ```toml
//! realtime = true
//!
//! [[event]]
//! keycode = 115
//! action = "press"
//! at_ms = 0
//!
//! [[event]]
//! keycode = 115
//! action = "hold"
//! at_ms = 250
//!
//! [[event]]
//! fail = "receiver unplugged"
//! at_ms = 2000
//! ```
//!
//! An entry with `fail` stands for a read error from the receiver.

use super::{EventSourceError, KeyAction, KeyEvent};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedEvent {
    #[serde(default)]
    pub keycode: u16,
    #[serde(default = "default_action")]
    pub action: KeyAction,
    /// Offset from the start of the replay
    pub at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
}

fn default_action() -> KeyAction {
    KeyAction::Release
}

impl ScriptedEvent {
    pub fn new(keycode: u16, action: KeyAction, at_ms: u64) -> Self {
        Self {
            keycode,
            action,
            at_ms,
            fail: None,
        }
    }

    /// A read error surfaced at `at_ms`
    pub fn read_error(at_ms: u64, message: impl Into<String>) -> Self {
        Self {
            keycode: 0,
            action: default_action(),
            at_ms,
            fail: Some(message.into()),
        }
    }

    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.at_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    /// Sleep until each event's offset instead of emitting back to back
    #[serde(default)]
    pub realtime: bool,

    /// Keep the source open after the last event instead of ending the run
    #[serde(default)]
    pub hold_open: bool,

    #[serde(default, rename = "event")]
    pub events: Vec<ScriptedEvent>,
}

impl Script {
    pub fn new(events: Vec<ScriptedEvent>) -> Self {
        Self {
            realtime: false,
            hold_open: false,
            events,
        }
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn hold_open(mut self, hold_open: bool) -> Self {
        self.hold_open = hold_open;
        self
    }

    pub fn load(path: &Path) -> Result<Self, EventSourceError> {
        let content = std::fs::read_to_string(path).map_err(|source| EventSourceError::ScriptIo {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| EventSourceError::ScriptParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub struct ScriptedSource {
    pending: VecDeque<ScriptedEvent>,
    realtime: bool,
    hold_open: bool,
    started_at: Option<Instant>,
}

impl ScriptedSource {
    pub fn new(script: Script) -> Self {
        Self {
            pending: script.events.into(),
            realtime: script.realtime,
            hold_open: script.hold_open,
            started_at: None,
        }
    }

    /// A source that never yields and never ends
    pub fn idle() -> Self {
        Self {
            pending: VecDeque::new(),
            realtime: false,
            hold_open: true,
            started_at: None,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<KeyEvent>, EventSourceError> {
        let Some(offset) = self.pending.front().map(ScriptedEvent::offset) else {
            if self.hold_open {
                std::future::pending::<()>().await;
            }
            return Ok(None);
        };

        // Timestamps are anchored at the first read so offsets stay relative
        let started_at = *self.started_at.get_or_insert_with(Instant::now);
        let due = started_at + offset;
        if self.realtime {
            tokio::time::sleep_until(due).await;
        }

        // Only consume once due, so a dropped wait leaves the event queued
        let Some(next) = self.pending.pop_front() else {
            return Ok(None);
        };

        if let Some(message) = next.fail {
            debug!("Scripted read error at +{}ms: {}", next.at_ms, message);
            return Err(EventSourceError::Read(io::Error::other(message)));
        }

        debug!(
            "Scripted event: {} {:?} at +{}ms",
            next.keycode, next.action, next.at_ms
        );
        Ok(Some(KeyEvent::new(next.keycode, next.action, due.into_std())))
    }

    pub fn describe(&self) -> String {
        if self.pending.is_empty() && self.hold_open {
            "simulation (idle)".to_string()
        } else {
            format!("script ({} events pending)", self.pending.len())
        }
    }
}
