//! Sony Bravia IRCC-IP transport
//!
//! Commands are SOAP envelopes POSTed to `/sony/IRCC`, authenticated with the
//! pre-shared key configured on the TV.

use super::{CommandTransport, TransportError};
use crate::mapping::Command;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("ir-bridge/", env!("CARGO_PKG_VERSION"));
const SOAP_ACTION: &str = "\"urn:schemas-sony-com:service:IRCC:1#X_SendIRCC\"";

pub struct IrccTransport {
    client: Client,
    endpoint: String,
    psk: String,
}

impl IrccTransport {
    pub fn new(
        device_address: &str,
        psk: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("http://{}/sony/IRCC", device_address),
            psk: psk.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

pub fn soap_envelope(ircc_code: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <u:X_SendIRCC xmlns:u="urn:schemas-sony-com:service:IRCC:1">
      <IRCCCode>{}</IRCCCode>
    </u:X_SendIRCC>
  </s:Body>
</s:Envelope>"#,
        ircc_code
    )
}

#[async_trait]
impl CommandTransport for IrccTransport {
    async fn send(&self, command: &Command) -> Result<u16, TransportError> {
        debug!("POST {} ({})", self.endpoint, command.id);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=UTF-8")
            .header("SOAPACTION", SOAP_ACTION)
            .header("X-Auth-PSK", &self.psk)
            .body(soap_envelope(command.ircc_code))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(e.to_string())
                } else {
                    TransportError::Unreachable(e.to_string())
                }
            })?;

        Ok(response.status().as_u16())
    }
}
