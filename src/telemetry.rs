use crate::prelude::*;
use crate::raven::frame::RavenFrame;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical meter reading as carried on the telemetry topic. Each message
/// holds the subset of fields its source block provided.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// W, positive = import, negative = export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_demand: Option<i64>,

    /// kW, used when raw_demand is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demand: Option<f64>,

    /// kWh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summation_delivered: Option<f64>,

    /// kWh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summation_received: Option<f64>,
}

impl TelemetryFrame {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            raw_demand: None,
            demand: None,
            summation_delivered: None,
            summation_received: None,
        }
    }

    /// Maps one decoded device frame onto telemetry fields. Frames that
    /// carry no measurements yield `None`.
    pub fn from_raven(frame: RavenFrame, received_at: DateTime<Utc>) -> Option<Self> {
        use RavenFrame::*;

        match frame {
            InstantaneousDemand(d) => {
                let mut r = Self::new(d.timestamp.unwrap_or(received_at));
                r.raw_demand = Some(d.watts());
                r.demand = Some(d.kilowatts());
                Some(r)
            }
            CurrentSummationDelivered(s) => {
                let mut r = Self::new(s.timestamp.unwrap_or(received_at));
                r.summation_delivered = Some(s.delivered_kwh());
                r.summation_received = Some(s.received_kwh());
                Some(r)
            }
            ConnectionStatus(status) => {
                info!(
                    "meter connection status: {} (link strength {})",
                    status.status,
                    status
                        .link_strength
                        .map(|s| format!("{}%", s))
                        .unwrap_or_else(|| "unknown".to_string())
                );
                None
            }
            TimeCluster(time) => {
                debug!("meter clock: {:?}", time.utc_time);
                None
            }
            Unrecognized(name) => {
                debug!("ignoring <{}> frame", name);
                None
            }
        }
    }

    pub fn has_power(&self) -> bool {
        self.raw_demand.is_some() || self.demand.is_some()
    }

    pub fn has_measurement(&self) -> bool {
        self.has_power() || self.summation_delivered.is_some() || self.summation_received.is_some()
    }

    /// Instantaneous demand in W, preferring `raw_demand`.
    pub fn demand_watts(&self) -> Option<f64> {
        match (self.raw_demand, self.demand) {
            (Some(w), _) => Some(w as f64),
            (None, Some(kw)) => Some(kw * 1000.0),
            (None, None) => None,
        }
    }

    /// Field-wise last-value-wins: everything `newer` carries replaces
    /// what we hold, everything it lacks is kept.
    pub fn merge(&mut self, newer: TelemetryFrame) {
        self.timestamp = newer.timestamp;

        // a fresh kW value must not be shadowed by an older W value
        if newer.raw_demand.is_some() || newer.demand.is_some() {
            self.raw_demand = newer.raw_demand;
            self.demand = newer.demand;
        }
        if newer.summation_delivered.is_some() {
            self.summation_delivered = newer.summation_delivered;
        }
        if newer.summation_received.is_some() {
            self.summation_received = newer.summation_received;
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
