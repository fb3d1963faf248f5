//! Event sources for raw key events
//!
//! The bridge consumes `(keycode, action, timestamp)` tuples and does not care
//! where they come from:
//!
//! ```text
//! FLIRC (evdev) ──┐
//!                 ├──► EventSource ──► KeyEvent ──► Debounce engine
//! Script (TOML) ──┘
//! ```
//!
//! [`SourceSpec`] remembers how a source was opened so the bridge can reopen it
//! after a restart request or a read failure.

pub mod device;
pub mod scripted;

pub use device::DeviceSource;
pub use scripted::{Script, ScriptedEvent, ScriptedSource};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Key transition reported by the input layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Press,
    Hold,
    Release,
}

impl KeyAction {
    /// Maps an evdev `EV_KEY` value (0 up, 1 down, 2 autorepeat)
    pub fn from_evdev_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyAction::Release),
            1 => Some(KeyAction::Press),
            2 => Some(KeyAction::Hold),
            _ => None,
        }
    }
}

// Raw key event with a monotonic timestamp
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub keycode: u16,
    pub action: KeyAction,
    pub timestamp: Instant,
}

impl KeyEvent {
    pub fn new(keycode: u16, action: KeyAction, timestamp: Instant) -> Self {
        Self {
            keycode,
            action,
            timestamp,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventSourceError {
    #[error("Failed to open input device {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read input event: {0}")]
    Read(#[source] std::io::Error),

    #[error("Input device unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read script {path:?}: {source}")]
    ScriptIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid script {path:?}: {source}")]
    ScriptParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Source of raw key events
pub enum EventSource {
    Device(DeviceSource),
    Scripted(ScriptedSource),
}

impl EventSource {
    /// Waits for the next key event.
    ///
    /// `Ok(None)` means the source is exhausted (scripts only). Waiting for
    /// hardware input is not an error and may take arbitrarily long.
    pub async fn next_event(&mut self) -> Result<Option<KeyEvent>, EventSourceError> {
        match self {
            EventSource::Device(device) => device.next_event().await.map(Some),
            EventSource::Scripted(script) => script.next_event().await,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            EventSource::Device(device) => device.describe(),
            EventSource::Scripted(script) => script.describe(),
        }
    }
}

/// Recipe for (re)opening an event source
#[derive(Clone, Debug)]
pub enum SourceSpec {
    /// Real receiver, discovered by name or opened at the configured path
    Device {
        path: PathBuf,
        name_hint: String,
        require_hardware: bool,
    },
    /// Replay of a scripted sequence
    Scripted(Script),
    /// Simulation without input: waits forever
    Idle,
}

impl SourceSpec {
    pub fn device(path: impl AsRef<Path>, name_hint: &str, require_hardware: bool) -> Self {
        SourceSpec::Device {
            path: path.as_ref().to_path_buf(),
            name_hint: name_hint.to_string(),
            require_hardware,
        }
    }

    /// Opens the source.
    ///
    /// A missing receiver is only fatal when hardware is required; otherwise the
    /// bridge falls back to an idle simulated source.
    pub fn open(&self) -> Result<EventSource, EventSourceError> {
        match self {
            SourceSpec::Device {
                path,
                name_hint,
                require_hardware,
            } => match DeviceSource::discover(path, name_hint) {
                Ok(device) => {
                    info!("Using input device: {}", device.describe());
                    Ok(EventSource::Device(device))
                }
                Err(e) if *require_hardware => Err(e),
                Err(e) => {
                    warn!("Input device not available ({}), running in simulation mode", e);
                    Ok(EventSource::Scripted(ScriptedSource::idle()))
                }
            },
            SourceSpec::Scripted(script) => {
                info!("Replaying script with {} events", script.events.len());
                Ok(EventSource::Scripted(ScriptedSource::new(script.clone())))
            }
            SourceSpec::Idle => {
                info!("Simulation mode without input events");
                Ok(EventSource::Scripted(ScriptedSource::idle()))
            }
        }
    }
}
