use std::fmt;

/// Inbound request on the control topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Publish a fresh status document now
    Status,
    /// Abandon in-flight work and reopen the input
    Restart,
}

impl ControlMessage {
    pub fn parse(payload: &str) -> Option<Self> {
        match payload.trim().to_ascii_lowercase().as_str() {
            "status" => Some(ControlMessage::Status),
            "restart" => Some(ControlMessage::Restart),
            _ => None,
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ControlMessage::Status => write!(f, "status"),
            ControlMessage::Restart => write!(f, "restart"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(ControlMessage::parse("status"), Some(ControlMessage::Status));
        assert_eq!(ControlMessage::parse(" Restart\n"), Some(ControlMessage::Restart));
        assert_eq!(ControlMessage::parse("reboot"), None);
        assert_eq!(ControlMessage::parse(""), None);
    }
}
