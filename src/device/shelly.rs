//! Shelly relay actuator
//!
//! Gen1 HTTP API: `POST /relay/{channel}?turn=on|off` switches the relay,
//! `POST /relay/{channel}` without parameters reports it. Both answer with a
//! JSON status whose `ison` field is the resulting relay state.

use super::{DeviceState, Switchable};
use crate::error::{HeliosError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct RelayStatus {
    ison: bool,
}

/// Shelly relay switched over HTTP
pub struct ShellyRelay {
    name: String,
    wattage: u32,
    url: String,
    client: reqwest::Client,
    logger: StructuredLogger,
}

impl ShellyRelay {
    pub fn new(
        name: &str,
        wattage: u32,
        host: &str,
        channel: u8,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HeliosError::actuator(name, format!("HTTP client: {}", e)))?;
        let logger = get_logger_with_context(
            LogContext::new("shelly")
                .with_device(name)
                .with_field("host", host.to_string()),
        );
        Ok(Self {
            name: name.to_string(),
            wattage,
            url: format!("http://{}/relay/{}", host.trim_end_matches('/'), channel),
            client,
            logger,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, turn: Option<&str>) -> Result<DeviceState> {
        let mut request = self.client.post(&self.url);
        if let Some(turn) = turn {
            request = request.query(&[("turn", turn)]);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| self.unavailable(format!("request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(self.unavailable(format!("HTTP {}", resp.status())));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| self.unavailable(format!("reading response failed: {}", e)))?;
        let status: RelayStatus = serde_json::from_slice(&body)
            .map_err(|e| self.unavailable(format!("malformed relay status: {}", e)))?;

        Ok(if status.ison {
            DeviceState::On
        } else {
            DeviceState::Off
        })
    }

    fn unavailable(&self, message: String) -> HeliosError {
        self.logger.warn(&message);
        HeliosError::actuator(self.name.as_str(), message)
    }
}

#[async_trait::async_trait]
impl Switchable for ShellyRelay {
    fn name(&self) -> &str {
        &self.name
    }

    fn rated_wattage(&self) -> u32 {
        self.wattage
    }

    async fn turn_on(&self) -> Result<DeviceState> {
        self.logger.debug("Switching relay on");
        self.post(Some("on")).await
    }

    async fn turn_off(&self) -> Result<DeviceState> {
        self.logger.debug("Switching relay off");
        self.post(Some("off")).await
    }

    async fn query_state(&self) -> Result<DeviceState> {
        self.post(None).await
    }
}
