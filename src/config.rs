//! Bridge configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! command line flags and their environment variables. Validation runs once on
//! the merged result.

use crate::debounce::DebounceSettings;
use crate::dispatch::DispatchSettings;
use crate::mqtt::MqttConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_DIR: &str = "ir-bridge";
const CONFIG_FILE: &str = "config.toml";
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("auth_secret is required (set SONY_TV_PSK or --auth-secret)")]
    MissingAuthSecret,

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Command line flags; every flag can also come from the environment
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "ir-bridge", version, about = "Forward IR remote keys to a Sony Bravia TV")]
pub struct CliArgs {
    /// TOML config file (default: <config dir>/ir-bridge/config.toml)
    #[arg(short, long, env = "IR_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// TV address, host or host:port
    #[arg(long, env = "SONY_TV_IP")]
    pub device_address: Option<String>,

    /// Pre-shared key configured on the TV
    #[arg(long, env = "SONY_TV_PSK", hide_env_values = true)]
    pub auth_secret: Option<String>,

    /// Input event device of the IR receiver
    #[arg(long, env = "FLIRC_DEVICE")]
    pub input_device: Option<PathBuf>,

    #[arg(long, env = "MQTT_BROKER")]
    pub mqtt_broker: Option<String>,

    #[arg(long, env = "MQTT_PORT")]
    pub mqtt_port: Option<u16>,

    #[arg(long, env = "MQTT_USER")]
    pub mqtt_user: Option<String>,

    #[arg(long, env = "MQTT_PASS", hide_env_values = true)]
    pub mqtt_pass: Option<String>,

    #[arg(long, env = "MQTT_TOPIC")]
    pub mqtt_topic: Option<String>,

    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, env = "DEBOUNCE_MS")]
    pub debounce_ms: Option<u64>,

    #[arg(long, env = "HOLD_TIMEOUT_MS")]
    pub hold_timeout_ms: Option<u64>,

    #[arg(long, env = "RETRY_COUNT")]
    pub retry_count: Option<u32>,

    /// Seconds between attempts, fractions allowed
    #[arg(long, env = "RETRY_DELAY")]
    pub retry_delay: Option<f64>,

    #[arg(long, env = "REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    #[arg(long, env = "STATUS_INTERVAL")]
    pub status_interval: Option<u64>,

    /// Exit instead of falling back to simulation when no receiver is found
    #[arg(long, env = "REQUIRE_HARDWARE")]
    pub require_hardware: bool,

    /// Run without hardware
    #[arg(long, env = "SIMULATE")]
    pub simulate: bool,

    /// Replay key events from a TOML script instead of a device
    #[arg(long, env = "IR_BRIDGE_SCRIPT")]
    pub script: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub device_address: String,
    pub auth_secret: String,
    pub input_device_path: PathBuf,
    /// Substring of the input device name to prefer when enumerating
    pub input_device_name: String,
    pub telemetry_broker: Option<String>,
    pub mqtt_port: u16,
    pub mqtt_user: Option<String>,
    pub mqtt_pass: Option<String>,
    pub mqtt_client_id: String,
    pub telemetry_topic_base: String,
    pub debounce_window_ms: u64,
    pub hold_timeout_ms: u64,
    pub retry_count: u32,
    pub retry_delay_seconds: f64,
    pub request_timeout_seconds: u64,
    pub status_interval_seconds: u64,
    pub degraded_threshold: u32,
    pub require_hardware: bool,
    pub simulate: bool,
    pub script: Option<PathBuf>,
    pub log_level: String,
    /// Keycode to command name overrides; an empty name removes the binding
    pub mapping: BTreeMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_address: "192.168.1.137".to_string(),
            auth_secret: String::new(),
            input_device_path: PathBuf::from("/dev/input/event0"),
            input_device_name: "flirc".to_string(),
            telemetry_broker: None,
            mqtt_port: 1883,
            mqtt_user: None,
            mqtt_pass: None,
            mqtt_client_id: "ir-bridge".to_string(),
            telemetry_topic_base: "home/hsb2/ir-bridge".to_string(),
            debounce_window_ms: 300,
            hold_timeout_ms: 500,
            retry_count: 3,
            retry_delay_seconds: 1.0,
            request_timeout_seconds: 5,
            status_interval_seconds: 60,
            degraded_threshold: 3,
            require_hardware: false,
            simulate: false,
            script: None,
            log_level: "INFO".to_string(),
            mapping: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Merges defaults, the config file and CLI/env overrides, then validates
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match Self::config_path(args) {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    fn config_path(args: &CliArgs) -> Option<PathBuf> {
        if let Some(path) = &args.config {
            return Some(path.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
            .filter(|path| path.exists())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &CliArgs) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut self.device_address, &args.device_address);
        set(&mut self.auth_secret, &args.auth_secret);
        set(&mut self.input_device_path, &args.input_device);
        set(&mut self.mqtt_port, &args.mqtt_port);
        set(&mut self.telemetry_topic_base, &args.mqtt_topic);
        set(&mut self.log_level, &args.log_level);
        set(&mut self.debounce_window_ms, &args.debounce_ms);
        set(&mut self.hold_timeout_ms, &args.hold_timeout_ms);
        set(&mut self.retry_count, &args.retry_count);
        set(&mut self.retry_delay_seconds, &args.retry_delay);
        set(&mut self.request_timeout_seconds, &args.request_timeout);
        set(&mut self.status_interval_seconds, &args.status_interval);

        if args.mqtt_broker.is_some() {
            self.telemetry_broker = args.mqtt_broker.clone();
        }
        if args.mqtt_user.is_some() {
            self.mqtt_user = args.mqtt_user.clone();
        }
        if args.mqtt_pass.is_some() {
            self.mqtt_pass = args.mqtt_pass.clone();
        }
        if args.script.is_some() {
            self.script = args.script.clone();
        }
        self.require_hardware |= args.require_hardware;
        self.simulate |= args.simulate;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_secret.trim().is_empty() {
            return Err(ConfigError::MissingAuthSecret);
        }
        if self.device_address.trim().is_empty() {
            return Err(invalid("device_address", "must not be empty"));
        }
        if self.retry_count == 0 {
            return Err(invalid("retry_count", "must be at least 1"));
        }
        if let Err(e) = Duration::try_from_secs_f64(self.retry_delay_seconds) {
            return Err(invalid(
                "retry_delay_seconds",
                format!("{} is not a usable delay: {}", self.retry_delay_seconds, e),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(invalid("request_timeout_seconds", "must be at least 1"));
        }
        if self.status_interval_seconds == 0 {
            return Err(invalid("status_interval_seconds", "must be at least 1"));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(invalid(
                "log_level",
                format!("{:?} is not one of {}", self.log_level, LOG_LEVELS.join(", ")),
            ));
        }
        if self.simulate && self.require_hardware {
            return Err(invalid(
                "simulate",
                "cannot be combined with require_hardware",
            ));
        }
        Ok(())
    }

    pub fn debounce_settings(&self) -> DebounceSettings {
        DebounceSettings {
            debounce_window: Duration::from_millis(self.debounce_window_ms),
            hold_timeout: Duration::from_millis(self.hold_timeout_ms),
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            retry_count: self.retry_count,
            retry_delay: Duration::try_from_secs_f64(self.retry_delay_seconds).unwrap_or_default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Broker settings, or `None` when telemetry goes to the log only
    pub fn mqtt_config(&self) -> Option<MqttConfig> {
        let broker = self.telemetry_broker.as_deref()?.trim();
        if broker.is_empty() {
            return None;
        }

        let mut mqtt = MqttConfig::new(broker, self.telemetry_topic_base.clone());
        mqtt.port = self.mqtt_port;
        mqtt.user = self.mqtt_user.clone();
        mqtt.pass = self.mqtt_pass.clone();
        mqtt.client_id = self.mqtt_client_id.clone();
        mqtt.status_interval = Duration::from_secs(self.status_interval_seconds);
        Some(mqtt)
    }

    /// Filter directive for the subscriber
    pub fn log_filter(&self) -> String {
        self.log_level.to_ascii_lowercase()
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
