mod common;
use common::*;
use raven_bridge::prelude::*;
use raven_bridge::raven::frame::{Block, Command, Scale};

use chrono::{TimeZone, Utc};

fn frame(xml: &str) -> Result<RavenFrame> {
    RavenFrame::try_from(Block::parse(xml.as_bytes())?)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn instantaneous_demand() -> Result<()> {
    common_setup();

    let RavenFrame::InstantaneousDemand(demand) = frame(&Factory::demand_xml("0x00032d"))? else {
        panic!("expected InstantaneousDemand");
    };

    assert_eq!(demand.demand, 813);
    assert_eq!(demand.watts(), 813);
    assert!(close(demand.kilowatts(), 0.813));
    assert_eq!(
        demand.timestamp,
        Some(Utc.with_ymd_and_hms(2015, 1, 22, 2, 31, 7).unwrap())
    );

    Ok(())
}

#[test]
fn export_is_negative_demand() -> Result<()> {
    common_setup();

    let RavenFrame::InstantaneousDemand(demand) = frame(&Factory::demand_xml("0xfffffce0"))? else {
        panic!("expected InstantaneousDemand");
    };

    assert_eq!(demand.watts(), -800);
    assert!(close(demand.kilowatts(), -0.8));

    Ok(())
}

#[test]
fn current_summation() -> Result<()> {
    common_setup();

    let RavenFrame::CurrentSummationDelivered(summation) =
        frame(&Factory::summation_xml("0x00000000000f4240", "0x2710"))?
    else {
        panic!("expected CurrentSummationDelivered");
    };

    assert!(close(summation.delivered_kwh(), 1000.0));
    assert!(close(summation.received_kwh(), 10.0));

    Ok(())
}

#[test]
fn zero_multiplier_and_divisor_mean_one() {
    let scale = Scale::new(0, 0);
    assert_eq!(scale, Scale::new(1, 1));
    assert!(close(scale.apply(42.0), 42.0));
}

#[test]
fn missing_required_field_is_an_error() {
    common_setup();

    let block = Block::new("InstantaneousDemand")
        .with_field("Demand", "0x10")
        .with_field("Multiplier", "0x01");

    assert!(RavenFrame::try_from(block).is_err());
}

#[test]
fn unknown_blocks_are_ignored() -> Result<()> {
    common_setup();

    let frame = frame(&Factory::price_cluster_xml())?;
    assert_eq!(frame, RavenFrame::Unrecognized("PriceCluster".to_string()));
    assert_eq!(TelemetryFrame::from_raven(frame, Utc::now()), None);

    Ok(())
}

#[test]
fn connection_status_carries_no_telemetry() -> Result<()> {
    common_setup();

    let xml = "<ConnectionStatus>\r\n  <Status>Connected</Status>\r\n  <LinkStrength>0x64</LinkStrength>\r\n</ConnectionStatus>\r\n";
    let RavenFrame::ConnectionStatus(status) = frame(xml)? else {
        panic!("expected ConnectionStatus");
    };
    assert_eq!(status.status, "Connected");
    assert_eq!(status.link_strength, Some(100));

    assert_eq!(
        TelemetryFrame::from_raven(RavenFrame::ConnectionStatus(status), Utc::now()),
        None
    );

    Ok(())
}

#[test]
fn commands_are_well_formed_blocks() -> Result<()> {
    let block = Block::parse(&Command::GetCurrentSummationDelivered.to_bytes())?;
    assert_eq!(block.name, "Command");
    assert_eq!(block.get("Name"), Some("get_current_summation_delivered"));
    assert_eq!(block.get("Refresh"), Some("Y"));

    let block = Block::parse(&Command::Initialize.to_bytes())?;
    assert_eq!(block.get("Name"), Some("initialize"));
    assert_eq!(block.get("Refresh"), None);

    Ok(())
}

#[test]
fn telemetry_from_demand_frame_round_trips_through_json() -> Result<()> {
    common_setup();

    let telemetry = TelemetryFrame::from_raven(frame(&Factory::demand_xml("0xfffffce0"))?, Utc::now())
        .expect("telemetry");
    assert_eq!(telemetry.raw_demand, Some(-800));
    assert_eq!(telemetry.summation_delivered, None);

    let json = telemetry.to_json()?;
    assert!(!json.contains("summation_delivered"));

    let decoded = TelemetryFrame::from_json(json.as_bytes())?;
    assert_eq!(decoded.raw_demand, Some(-800));
    assert!(close(decoded.demand.unwrap_or_default(), -0.8));
    assert_eq!(decoded.timestamp, telemetry.timestamp);

    Ok(())
}

#[test]
fn telemetry_json_tolerates_missing_timestamp_and_unknown_keys() -> Result<()> {
    let decoded = TelemetryFrame::from_json(
        br#"{"summation_delivered": 1234.5, "summation_received": 0.25, "meter": "abc"}"#,
    )?;

    assert_eq!(decoded.raw_demand, None);
    assert_eq!(decoded.summation_delivered, Some(1234.5));
    assert_eq!(decoded.summation_received, Some(0.25));
    assert_eq!(decoded.demand_watts(), None);

    Ok(())
}

#[test]
fn merge_keeps_fields_the_newer_sample_lacks() {
    let mut sample = Factory::sample(1500, at(1_700_000_000));
    sample.merge(Factory::summation_sample(99.5, at(1_700_000_010)));

    assert_eq!(sample.timestamp, at(1_700_000_010));
    assert_eq!(sample.demand_watts(), Some(1500.0));
    assert_eq!(sample.summation_delivered, Some(99.5));

    // a newer kW-only reading replaces the older watts too
    let mut kw_only = TelemetryFrame::new(at(1_700_000_020));
    kw_only.demand = Some(-0.25);
    sample.merge(kw_only);
    assert_eq!(sample.raw_demand, None);
    assert_eq!(sample.demand_watts(), Some(-250.0));

    // a decreasing counter is taken as is
    sample.merge(Factory::summation_sample(10.0, at(1_700_000_030)));
    assert_eq!(sample.summation_delivered, Some(10.0));
}
