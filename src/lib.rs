//! IR remote to Sony Bravia bridge
//!
//! Reads key events from an IR receiver, debounces them, maps keycodes to IRCC
//! commands and POSTs them to the TV with bounded retry, reporting status and
//! every command over MQTT.

pub mod bridge;
pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod input;
pub mod mapping;
pub mod mqtt;
pub mod telemetry;
