use crate::prelude::*;

use chrono::{DateTime, Utc};
use nom::{
    bytes::complete::{tag, take_until, take_while1},
    character::complete::{char, multispace0},
    multi::many0,
    sequence::delimited,
    IResult,
};

// seconds between the Unix epoch and the RAVEn epoch, 2000-01-01T00:00:00Z
const RAVEN_EPOCH_OFFSET: i64 = 946_684_800;

// Block {{{
/// One `<Name>…</Name>` element with its flat list of child elements,
/// exactly as the device sent it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub fields: Vec<(String, String)>,
}

impl Block {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub fn parse(input: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(input)?;

        let (_, (name, fields)) =
            Self::block(text).map_err(|err| anyhow!("malformed block: {}", err))?;

        Ok(Self {
            name: name.to_string(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.trim().to_string()))
                .collect(),
        })
    }

    pub fn to_xml(&self) -> Vec<u8> {
        let mut r = format!("<{}>\r\n", self.name);
        for (name, value) in &self.fields {
            r.push_str(&format!("  <{name}>{value}</{name}>\r\n"));
        }
        r.push_str(&format!("</{}>\r\n", self.name));
        r.into_bytes()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| anyhow!("<{}> is missing <{}>", self.name, name))
    }

    fn hex_u64(&self, name: &str) -> Result<u64> {
        let value = self.require(name)?;
        u64::from_str_radix(strip_hex_prefix(value), 16)
            .map_err(|err| anyhow!("<{}>: bad <{}> {:?}: {}", self.name, name, value, err))
    }

    fn hex_i32(&self, name: &str) -> Result<i32> {
        let value = self.require(name)?;
        // two's complement on the wire
        u32::from_str_radix(strip_hex_prefix(value), 16)
            .map(|v| v as i32)
            .map_err(|err| anyhow!("<{}>: bad <{}> {:?}: {}", self.name, name, value, err))
    }

    fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name)?;
        match self.hex_u64(name) {
            Ok(secs) => raven_time(secs),
            Err(err) => {
                debug!("ignoring timestamp: {}", err);
                None
            }
        }
    }

    fn scale(&self) -> Result<Scale> {
        Ok(Scale::new(
            self.hex_u64("Multiplier")?,
            self.hex_u64("Divisor")?,
        ))
    }

    // nom parsers {{{
    fn tag_name(input: &str) -> IResult<&str, &str> {
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
    }

    fn open_tag(input: &str) -> IResult<&str, &str> {
        delimited(char('<'), Self::tag_name, char('>'))(input)
    }

    fn close_tag<'a>(name: &'a str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
        delimited(tag("</"), tag(name), char('>'))
    }

    fn field(input: &str) -> IResult<&str, (&str, &str)> {
        let (input, _) = multispace0(input)?;
        let (input, name) = Self::open_tag(input)?;
        let (input, value) = take_until("</")(input)?;
        let (input, _) = Self::close_tag(name)(input)?;
        Ok((input, (name, value)))
    }

    fn block(input: &str) -> IResult<&str, (&str, Vec<(&str, &str)>)> {
        let (input, _) = multispace0(input)?;
        let (input, name) = Self::open_tag(input)?;
        let (input, fields) = many0(Self::field)(input)?;
        let (input, _) = multispace0(input)?;
        let (input, _) = Self::close_tag(name)(input)?;
        Ok((input, (name, fields)))
    }
    // }}}
} // }}}

fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

pub fn raven_time(secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    DateTime::from_timestamp(RAVEN_EPOCH_OFFSET.checked_add(secs)?, 0)
}

// Scale {{{
/// The meter's own multiplier/divisor pair. The device documents a zero
/// in either position as meaning one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scale {
    pub multiplier: u64,
    pub divisor: u64,
}

impl Scale {
    pub fn new(multiplier: u64, divisor: u64) -> Self {
        Self {
            multiplier: multiplier.max(1),
            divisor: divisor.max(1),
        }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.multiplier as f64 / self.divisor as f64
    }
} // }}}

// frames {{{
#[derive(Clone, Debug, PartialEq)]
pub struct InstantaneousDemand {
    pub timestamp: Option<DateTime<Utc>>,
    pub demand: i32,
    pub scale: Scale,
}
impl InstantaneousDemand {
    /// Demand in kW, positive when importing.
    pub fn kilowatts(&self) -> f64 {
        self.scale.apply(self.demand as f64)
    }

    pub fn watts(&self) -> i64 {
        (self.kilowatts() * 1000.0).round() as i64
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CurrentSummation {
    pub timestamp: Option<DateTime<Utc>>,
    pub delivered: u64,
    pub received: u64,
    pub scale: Scale,
}
impl CurrentSummation {
    pub fn delivered_kwh(&self) -> f64 {
        self.scale.apply(self.delivered as f64)
    }

    pub fn received_kwh(&self) -> f64 {
        self.scale.apply(self.received as f64)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub status: String,
    pub link_strength: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeCluster {
    pub utc_time: Option<DateTime<Utc>>,
}

/// Every block type the bridge understands. Anything else ends up in
/// `Unrecognized` and is skipped.
#[derive(Clone, Debug, PartialEq)]
pub enum RavenFrame {
    InstantaneousDemand(InstantaneousDemand),
    CurrentSummationDelivered(CurrentSummation),
    ConnectionStatus(ConnectionStatus),
    TimeCluster(TimeCluster),
    Unrecognized(String),
}

impl TryFrom<Block> for RavenFrame {
    type Error = anyhow::Error;

    fn try_from(block: Block) -> Result<Self> {
        let r = match block.name.as_str() {
            "InstantaneousDemand" => Self::InstantaneousDemand(InstantaneousDemand {
                timestamp: block.timestamp("TimeStamp"),
                demand: block.hex_i32("Demand")?,
                scale: block.scale()?,
            }),
            "CurrentSummationDelivered" => {
                Self::CurrentSummationDelivered(CurrentSummation {
                    timestamp: block.timestamp("TimeStamp"),
                    delivered: block.hex_u64("SummationDelivered")?,
                    received: block.hex_u64("SummationReceived")?,
                    scale: block.scale()?,
                })
            }
            "ConnectionStatus" => Self::ConnectionStatus(ConnectionStatus {
                status: block.require("Status")?.to_string(),
                link_strength: block
                    .hex_u64("LinkStrength")
                    .ok()
                    .and_then(|v| u8::try_from(v).ok()),
            }),
            "TimeCluster" => Self::TimeCluster(TimeCluster {
                utc_time: block.timestamp("UTCTime"),
            }),
            _ => Self::Unrecognized(block.name),
        };

        Ok(r)
    }
} // }}}

// Command {{{
/// Requests the bridge writes to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Initialize,
    GetCurrentSummationDelivered,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::GetCurrentSummationDelivered => "get_current_summation_delivered",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let block = Block::new("Command").with_field("Name", self.name());
        match self {
            Self::Initialize => block,
            Self::GetCurrentSummationDelivered => block.with_field("Refresh", "Y"),
        }
        .to_xml()
    }
} // }}}
