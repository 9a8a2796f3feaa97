use crate::prelude::*;

use chrono_tz::Tz;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds, DurationSecondsWithFrac};
use std::time::Duration;

// longest upload window we accept, one day
const MAX_INTERVAL_SECS: u64 = 86_400;

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_raven")]
    pub raven: Raven,

    pub pvoutput: Option<PvOutput>,

    /// Optional inverter used to enrich uploads with AC voltage
    pub voltage: Option<Voltage>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "shutdown_grace_secs", default = "Config::default_shutdown_grace")]
    pub shutdown_grace: Duration,
}

// Mqtt {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_client_id")]
    pub client_id: String,

    #[serde(default = "Config::default_mqtt_topic")]
    pub topic: String,

    #[serde(default = "Config::default_mqtt_status_topic")]
    pub status_topic: String,

    #[serde(default = "Config::default_mqtt_queue_capacity")]
    pub queue_capacity: usize,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "keep_alive_secs", default = "Config::default_mqtt_keep_alive")]
    pub keep_alive: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "backoff_initial_secs", default = "Config::default_backoff_initial")]
    pub backoff_initial: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "backoff_max_secs", default = "Config::default_backoff_max")]
    pub backoff_max: Duration,
}
impl Mqtt {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_initial, self.backoff_max)
    }
} // }}}

// Raven {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Raven {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_raven_device")]
    pub device: String,

    #[serde(default = "Config::default_raven_baud_rate")]
    pub baud_rate: u32,

    /// Largest unterminated frame kept before resynchronising
    #[serde(default = "Config::default_raven_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "frame_timeout_secs", default = "Config::default_raven_frame_timeout")]
    pub frame_timeout: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "reopen_max_secs", default = "Config::default_backoff_max")]
    pub reopen_max: Duration,
}
impl Raven {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn frame_timeout(&self) -> Duration {
        self.frame_timeout
    }

    pub fn reopen_backoff(&self) -> Backoff {
        Backoff::new(Config::default_backoff_initial(), self.reopen_max)
    }
} // }}}

// PvOutput {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct PvOutput {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_pvoutput_url")]
    pub url: String,
    pub api_key: String,
    pub system_id: String,

    #[serde(default)]
    pub mode: AccountingMode,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "interval_secs", default = "Config::default_pvoutput_interval")]
    pub interval: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "timeout_secs", default = "Config::default_pvoutput_timeout")]
    pub timeout: Duration,

    #[serde(default = "Config::default_timezone")]
    pub timezone: Tz,
}
impl PvOutput {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn mode(&self) -> AccountingMode {
        self.mode
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }
} // }}}

// Voltage {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Voltage {
    /// host, or host:port, of the Fronius inverter
    pub host: String,

    #[serde(default = "Config::default_voltage_device_id")]
    pub device_id: u32,

    pub username: Option<String>,
    pub password: Option<String>,

    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(rename = "timeout_secs", default = "Config::default_voltage_timeout")]
    pub timeout: Duration,

    /// multiplier applied to the reported value to get volts
    #[serde(default = "Config::default_voltage_scale")]
    pub scale: f64,
}
impl Voltage {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn url(&self) -> Result<url::Url> {
        let url = format!(
            "http://{}/solar_api/v1/GetInverterRealtimeData.cgi",
            self.host
        );
        url::Url::parse(&url).map_err(|err| anyhow!("invalid voltage host {}: {}", self.host, err))
    }
} // }}}

impl Config {
    pub fn new(file: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn mqtt(&self) -> &Mqtt {
        &self.mqtt
    }

    pub fn raven(&self) -> &Raven {
        &self.raven
    }

    /// PVOutput settings, only when the section is present and enabled
    pub fn pvoutput(&self) -> Option<&PvOutput> {
        self.pvoutput.as_ref().filter(|p| p.enabled())
    }

    pub fn voltage(&self) -> Option<&Voltage> {
        self.voltage.as_ref()
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  MQTT:");
        info!("    Host: {}:{}", self.mqtt.host, self.mqtt.port);
        info!("    Topic: {}", self.mqtt.topic);
        info!("    Queue capacity: {}", self.mqtt.queue_capacity);
        info!(
            "    Backoff: {:?} up to {:?}",
            self.mqtt.backoff_initial, self.mqtt.backoff_max
        );

        info!("  RAVEn: {}", if self.raven.enabled { "enabled" } else { "disabled" });
        if self.raven.enabled {
            info!("    Device: {} @ {} baud", self.raven.device, self.raven.baud_rate);
        }

        match self.pvoutput() {
            Some(p) => {
                info!("  PVOutput: enabled");
                info!("    System: {}", p.system_id);
                info!("    Mode: {:?}", p.mode);
                info!("    Interval: {}s", p.interval.as_secs());
                info!("    Timezone: {}", p.timezone);
            }
            None => info!("  PVOutput: disabled"),
        }

        match &self.voltage {
            Some(v) => info!("  Voltage source: {} (device {})", v.host, v.device_id),
            None => info!("  Voltage source: none"),
        }

        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.host.is_empty() {
            bail!("mqtt.host cannot be empty");
        }
        if self.mqtt.port == 0 {
            bail!("mqtt.port must be between 1 and 65535");
        }
        if self.mqtt.topic.is_empty() {
            bail!("mqtt.topic cannot be empty");
        }
        if self.mqtt.queue_capacity == 0 {
            bail!("mqtt.queue_capacity must be at least 1");
        }
        if self.mqtt.backoff_initial.is_zero() || self.mqtt.backoff_initial > self.mqtt.backoff_max {
            bail!("mqtt.backoff_initial_secs must be non-zero and not above backoff_max_secs");
        }

        if self.raven.enabled {
            if self.raven.device.is_empty() {
                bail!("raven.device cannot be empty");
            }
            if self.raven.max_frame_bytes < 64 {
                bail!("raven.max_frame_bytes must be at least 64");
            }
            if self.raven.frame_timeout.is_zero() {
                bail!("raven.frame_timeout_secs must be non-zero");
            }
        }

        if let Some(p) = self.pvoutput() {
            if p.api_key.is_empty() || p.system_id.is_empty() {
                bail!("pvoutput.api_key and pvoutput.system_id are required");
            }
            if let Err(e) = url::Url::parse(&p.url) {
                bail!("invalid pvoutput.url: {}", e);
            }
            let interval = p.interval.as_secs();
            if interval == 0 || interval > MAX_INTERVAL_SECS {
                bail!("pvoutput.interval_secs must be between 1 and {}", MAX_INTERVAL_SECS);
            }
        }

        if let Some(v) = &self.voltage {
            if v.host.is_empty() {
                bail!("voltage.host cannot be empty");
            }
            v.url()?;
            if v.timeout.is_zero() {
                bail!("voltage.timeout_secs must be non-zero");
            }
        }

        Ok(())
    }

    fn default_raven() -> Raven {
        Raven {
            enabled: Self::default_enabled(),
            device: Self::default_raven_device(),
            baud_rate: Self::default_raven_baud_rate(),
            max_frame_bytes: Self::default_raven_max_frame_bytes(),
            frame_timeout: Self::default_raven_frame_timeout(),
            reopen_max: Self::default_backoff_max(),
        }
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_shutdown_grace() -> Duration {
        Duration::from_secs(5)
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_client_id() -> String {
        "raven-bridge".to_string()
    }

    fn default_mqtt_topic() -> String {
        "raven/sensor/telemetry".to_string()
    }

    fn default_mqtt_status_topic() -> String {
        "raven/status".to_string()
    }

    fn default_mqtt_queue_capacity() -> usize {
        256
    }

    fn default_mqtt_keep_alive() -> Duration {
        Duration::from_secs(60)
    }

    fn default_backoff_initial() -> Duration {
        Duration::from_secs(1)
    }

    fn default_backoff_max() -> Duration {
        Duration::from_secs(60)
    }

    fn default_raven_device() -> String {
        "/dev/ttyUSB0".to_string()
    }

    fn default_raven_baud_rate() -> u32 {
        115_200
    }

    fn default_raven_max_frame_bytes() -> usize {
        4096
    }

    fn default_raven_frame_timeout() -> Duration {
        Duration::from_secs(5)
    }

    fn default_pvoutput_url() -> String {
        "https://pvoutput.org/service/r2/addstatus.jsp".to_string()
    }

    fn default_pvoutput_interval() -> Duration {
        Duration::from_secs(300)
    }

    fn default_pvoutput_timeout() -> Duration {
        Duration::from_secs(8)
    }

    fn default_timezone() -> Tz {
        chrono_tz::Australia::Melbourne
    }

    fn default_voltage_device_id() -> u32 {
        1
    }

    fn default_voltage_timeout() -> Duration {
        Duration::from_secs(3)
    }

    fn default_voltage_scale() -> f64 {
        1.0
    }
}
