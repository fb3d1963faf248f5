//! # MQTT Telemetry Channel
//!
//! Connects the bridge to a broker for status, command events and unmapped-key
//! reports, and listens on the control topic for `status` and `restart`
//! requests.
//!
//! ```text
//! mqtt/
//! ├── config.rs        - Broker settings and topic layout
//! ├── message.rs       - Control topic payloads
//! └── mqtt_handler.rs  - Connection task and the TelemetrySink implementation
//! ```
//!
//! The status document is retained, and the broker replaces it with
//! `{"status":"offline"}` through the last will if the bridge disappears.
//! Connection errors never stop the bridge; the connection task keeps retrying
//! in the background.

pub mod config;
pub mod message;
pub mod mqtt_handler;

pub use config::{MqttConfig, Topics};
pub use message::ControlMessage;
pub use mqtt_handler::{MqttHandle, MqttSink};
