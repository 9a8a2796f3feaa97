use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Unit {
    /// bridge and uploader in one process
    All,
    /// serial device to MQTT only
    Bridge,
    /// MQTT to PVOutput only
    Uploader,
}

impl Unit {
    pub fn runs_bridge(&self) -> bool {
        matches!(self, Unit::All | Unit::Bridge)
    }

    pub fn runs_uploader(&self) -> bool {
        matches!(self, Unit::All | Unit::Uploader)
    }
}

/// raven-bridge - RAVEn smart meter to MQTT, and MQTT to PVOutput
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Which part to run
    #[clap(short = 'u', long = "unit", value_enum, default_value_t = Unit::All)]
    pub unit: Unit,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
