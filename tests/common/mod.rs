#![allow(dead_code)]

pub mod broker;

use raven_bridge::prelude::*;

use chrono::{DateTime, Utc};

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("timestamp in range")
}

pub struct Factory();
impl Factory {
    pub fn demand_xml(demand: &str) -> String {
        format!(
            "<InstantaneousDemand>\r\n\
             \x20 <DeviceMacId>0xd8d5b90000001234</DeviceMacId>\r\n\
             \x20 <MeterMacId>0x00135003000a1b2c</MeterMacId>\r\n\
             \x20 <TimeStamp>0x1c531d6b</TimeStamp>\r\n\
             \x20 <Demand>{}</Demand>\r\n\
             \x20 <Multiplier>0x00000001</Multiplier>\r\n\
             \x20 <Divisor>0x000003e8</Divisor>\r\n\
             \x20 <DigitsRight>0x03</DigitsRight>\r\n\
             \x20 <DigitsLeft>0x0f</DigitsLeft>\r\n\
             \x20 <SuppressLeadingZero>Y</SuppressLeadingZero>\r\n\
             </InstantaneousDemand>\r\n",
            demand
        )
    }

    pub fn summation_xml(delivered: &str, received: &str) -> String {
        format!(
            "<CurrentSummationDelivered>\r\n\
             \x20 <DeviceMacId>0xd8d5b90000001234</DeviceMacId>\r\n\
             \x20 <MeterMacId>0x00135003000a1b2c</MeterMacId>\r\n\
             \x20 <TimeStamp>0x1c531d6b</TimeStamp>\r\n\
             \x20 <SummationDelivered>{}</SummationDelivered>\r\n\
             \x20 <SummationReceived>{}</SummationReceived>\r\n\
             \x20 <Multiplier>0x00000001</Multiplier>\r\n\
             \x20 <Divisor>0x000003e8</Divisor>\r\n\
             \x20 <DigitsRight>0x01</DigitsRight>\r\n\
             \x20 <DigitsLeft>0x06</DigitsLeft>\r\n\
             \x20 <SuppressLeadingZero>Y</SuppressLeadingZero>\r\n\
             </CurrentSummationDelivered>\r\n",
            delivered, received
        )
    }

    pub fn price_cluster_xml() -> String {
        "<PriceCluster>\r\n\
         \x20 <DeviceMacId>0xd8d5b90000001234</DeviceMacId>\r\n\
         \x20 <Price>0x0000000e</Price>\r\n\
         \x20 <Currency>0x0348</Currency>\r\n\
         </PriceCluster>\r\n"
            .to_string()
    }

    pub fn sample(raw_demand: i64, at: DateTime<Utc>) -> TelemetryFrame {
        let mut frame = TelemetryFrame::new(at);
        frame.raw_demand = Some(raw_demand);
        frame.demand = Some(raw_demand as f64 / 1000.0);
        frame
    }

    pub fn summation_sample(delivered: f64, at: DateTime<Utc>) -> TelemetryFrame {
        let mut frame = TelemetryFrame::new(at);
        frame.summation_delivered = Some(delivered);
        frame.summation_received = Some(0.0);
        frame
    }

    pub fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).expect("valid config")
    }

    pub fn mqtt_config() -> config::Mqtt {
        Self::config("mqtt:\n  host: localhost\n").mqtt().clone()
    }

    // quick reconnects against a broker on this host
    pub fn local_mqtt_config(port: u16) -> config::Mqtt {
        let yaml = format!(
            "mqtt:\n  host: 127.0.0.1\n  port: {}\n  backoff_initial_secs: 1\n  backoff_max_secs: 1\n",
            port
        );
        Self::config(&yaml).mqtt().clone()
    }

    pub fn raven_config() -> config::Raven {
        Self::config("mqtt:\n  host: localhost\n").raven().clone()
    }

    pub fn pvoutput_config(url: &str, mode: &str) -> config::PvOutput {
        let yaml = format!(
            "mqtt:\n  host: localhost\n\
             pvoutput:\n  url: {}\n  api_key: secret\n  system_id: \"12345\"\n  mode: {}\n  timezone: UTC\n",
            url, mode
        );
        Self::config(&yaml)
            .pvoutput()
            .expect("pvoutput enabled")
            .clone()
    }

    pub fn voltage_config(host: &str, timeout_secs: f64) -> config::Voltage {
        let yaml = format!(
            "mqtt:\n  host: localhost\n\
             voltage:\n  host: \"{}\"\n  timeout_secs: {}\n",
            host, timeout_secs
        );
        Self::config(&yaml)
            .voltage()
            .expect("voltage configured")
            .clone()
    }
}
