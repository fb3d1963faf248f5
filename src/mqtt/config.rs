use std::time::Duration;

/// Broker connection and topic layout for the telemetry channel
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub client_id: String,
    pub topic_base: String,
    pub keep_alive: Duration,
    pub status_interval: Duration,
}

impl MqttConfig {
    pub fn new(broker: impl Into<String>, topic_base: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: 1883,
            user: None,
            pass: None,
            client_id: "ir-bridge".to_string(),
            topic_base: topic_base.into(),
            keep_alive: Duration::from_secs(60),
            status_interval: Duration::from_secs(60),
        }
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.topic_base)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub status: String,
    pub event: String,
    pub unknown: String,
    pub control: String,
}

impl Topics {
    pub fn new(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            status: format!("{}/status", base),
            event: format!("{}/event", base),
            unknown: format!("{}/unknown", base),
            control: format!("{}/control", base),
        }
    }
}
