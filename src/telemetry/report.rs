//! Discrete telemetry documents

use crate::dispatch::{DispatchResult, FailureKind};
use crate::mapping::CommandId;
use chrono::{DateTime, Local};
use serde::Serialize;

/// Published once per dispatched command
#[derive(Clone, Debug, Serialize)]
pub struct CommandEvent {
    pub timestamp: DateTime<Local>,
    pub key_code: u16,
    pub command: CommandId,
    pub repeat: bool,
    pub success: bool,
    pub attempts: u32,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub tv_ip: String,
}

impl CommandEvent {
    pub fn from_result(key_code: u16, repeat: bool, result: &DispatchResult, tv_ip: &str) -> Self {
        Self {
            timestamp: Local::now(),
            key_code,
            command: result.command,
            repeat,
            success: result.success(),
            attempts: result.attempts,
            latency_ms: result.latency.as_millis() as u64,
            failure: result.failure(),
            tv_ip: tv_ip.to_string(),
        }
    }
}

/// Published for every fired key that has no command, to aid key discovery
#[derive(Clone, Debug, Serialize)]
pub struct UnmappedKeyReport {
    pub timestamp: DateTime<Local>,
    pub key_code: u16,
    pub message: String,
}

impl UnmappedKeyReport {
    pub fn new(key_code: u16) -> Self {
        Self {
            timestamp: Local::now(),
            key_code,
            message: format!("Unknown key code {} - not mapped to any command", key_code),
        }
    }
}
