//! evdev-backed receiver input
//!
//! FLIRC receivers enumerate as ordinary keyboards. Discovery prefers a device
//! whose name contains the configured hint and falls back to the configured
//! device path.

use super::{EventSourceError, KeyEvent};
use std::path::Path;

#[cfg(target_os = "linux")]
pub use linux::DeviceSource;

#[cfg(not(target_os = "linux"))]
pub use unsupported::DeviceSource;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use crate::input::KeyAction;
    use evdev::{Device, EventStream, InputEventKind};
    use std::path::PathBuf;
    use std::time::Instant;
    use tracing::{debug, info};

    pub struct DeviceSource {
        stream: EventStream,
        path: PathBuf,
        name: String,
    }

    impl DeviceSource {
        pub fn open(path: &Path) -> Result<Self, EventSourceError> {
            let device = Device::open(path).map_err(|source| EventSourceError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_device(path.to_path_buf(), device)
        }

        pub fn discover(configured: &Path, name_hint: &str) -> Result<Self, EventSourceError> {
            let hint = name_hint.to_lowercase();
            if !hint.is_empty() {
                for (path, device) in evdev::enumerate() {
                    let name = device.name().unwrap_or_default().to_lowercase();
                    if name.contains(&hint) {
                        info!("Auto-discovered receiver {:?} at {:?}", device.name(), path);
                        return Self::from_device(path, device);
                    }
                    debug!("Skipping input device {:?} ({})", path, name);
                }
            }

            info!("No device matching '{}', using {:?}", name_hint, configured);
            Self::open(configured)
        }

        fn from_device(path: PathBuf, device: Device) -> Result<Self, EventSourceError> {
            let name = device.name().unwrap_or("unknown").to_string();
            let stream = device
                .into_event_stream()
                .map_err(|source| EventSourceError::Open {
                    path: path.clone(),
                    source,
                })?;
            Ok(Self { stream, path, name })
        }

        /// Blocks until the next key transition; non-key events are skipped
        pub async fn next_event(&mut self) -> Result<KeyEvent, EventSourceError> {
            loop {
                let event = self
                    .stream
                    .next_event()
                    .await
                    .map_err(EventSourceError::Read)?;

                if let InputEventKind::Key(key) = event.kind() {
                    if let Some(action) = KeyAction::from_evdev_value(event.value()) {
                        return Ok(KeyEvent::new(key.code(), action, Instant::now()));
                    }
                }
            }
        }

        pub fn describe(&self) -> String {
            format!("{} ({})", self.name, self.path.display())
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::*;

    pub struct DeviceSource {
        _private: (),
    }

    impl DeviceSource {
        pub fn open(path: &Path) -> Result<Self, EventSourceError> {
            Err(EventSourceError::Unavailable(format!(
                "evdev input is only supported on Linux ({})",
                path.display()
            )))
        }

        pub fn discover(configured: &Path, _name_hint: &str) -> Result<Self, EventSourceError> {
            Self::open(configured)
        }

        pub async fn next_event(&mut self) -> Result<KeyEvent, EventSourceError> {
            Err(EventSourceError::Unavailable(
                "evdev input is only supported on Linux".to_string(),
            ))
        }

        pub fn describe(&self) -> String {
            "unsupported".to_string()
        }
    }
}
