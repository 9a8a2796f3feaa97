use crate::prelude::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoltageReading {
    /// `None` when the source had nothing to report
    pub voltage: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl VoltageReading {
    pub fn new(voltage: Option<f64>) -> Self {
        Self {
            voltage,
            fetched_at: Utc::now(),
        }
    }

    pub fn unavailable() -> Self {
        Self::new(None)
    }
}

/// Somewhere an AC voltage can be read from. Implementations never fail;
/// problems are logged and reported as an unavailable reading.
#[async_trait]
pub trait VoltageSource: Send + Sync {
    async fn read(&self) -> VoltageReading;
}

// Fronius Solar API {{{
#[derive(Debug, Deserialize)]
struct Response {
    #[serde(rename = "Body")]
    body: Body,
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(rename = "Data", default)]
    data: Data,
}

// an inverter that is asleep (night time) answers with no UAC at all
#[derive(Debug, Default, Deserialize)]
struct Data {
    #[serde(rename = "UAC")]
    uac: Option<Measurement>,
}

#[derive(Debug, Deserialize)]
struct Measurement {
    #[serde(rename = "Value")]
    value: Option<f64>,
}
// }}}

pub struct FroniusProbe {
    client: reqwest::Client,
    url: url::Url,
    device_id: String,
    credentials: Option<(String, String)>,
    scale: f64,
}

impl FroniusProbe {
    pub fn new(config: &config::Voltage) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("failed to build voltage http client")?;

        Ok(Self {
            client,
            url: config.url()?,
            device_id: config.device_id().to_string(),
            credentials: config
                .credentials()
                .map(|(u, p)| (u.to_string(), p.to_string())),
            scale: config.scale(),
        })
    }

    async fn fetch(&self) -> reqwest::Result<Option<f64>> {
        let mut request = self.client.get(self.url.clone()).query(&[
            ("Scope", "Device"),
            ("DeviceId", self.device_id.as_str()),
            ("DataCollection", "CommonInverterData"),
        ]);

        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response: Response = request.send().await?.error_for_status()?.json().await?;

        Ok(response
            .body
            .data
            .uac
            .and_then(|m| m.value)
            .map(|v| v * self.scale))
    }
}

#[async_trait]
impl VoltageSource for FroniusProbe {
    async fn read(&self) -> VoltageReading {
        match self.fetch().await {
            Ok(Some(voltage)) => {
                debug!("inverter voltage {:.1}V", voltage);
                VoltageReading::new(Some(voltage))
            }
            Ok(None) => {
                info!("inverter asleep, no voltage reported");
                VoltageReading::unavailable()
            }
            Err(err) if err.is_timeout() || err.is_connect() => {
                info!("inverter unreachable, assuming asleep: {}", err);
                VoltageReading::unavailable()
            }
            Err(err) => {
                warn!("voltage fetch failed: {}", err);
                VoltageReading::unavailable()
            }
        }
    }
}
