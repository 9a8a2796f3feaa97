mod common;
use common::*;
use raven_bridge::mode::{self, AccountingMode, UploadParameters};
use raven_bridge::pvoutput::{format_decimal, StatusUpload};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn gross_import() {
    // 1500 W import
    assert_eq!(
        mode::select(1500.0, AccountingMode::Gross),
        UploadParameters {
            v2: None,
            v4: 1.5,
            n: None
        }
    );
}

#[test]
fn gross_export_is_clamped() {
    let params = mode::select(-800.0, AccountingMode::Gross);
    assert_eq!(params.v4, 0.0);
    assert_eq!(params.v2, None);
    assert_eq!(params.n, None);
}

#[test]
fn net_export() {
    let params = mode::select(-800.0, AccountingMode::Net);
    assert!(close(params.v2.unwrap_or(f64::NAN), 0.8));
    assert_eq!(params.v4, 0.0);
    assert_eq!(params.n, Some(1));
}

#[test]
fn net_holds_for_any_demand() {
    for watts in [-5000.0, -1.0, 0.0, 1.0, 250.0, 7200.0] {
        let params = mode::select(watts, AccountingMode::Net);

        assert!(close(params.v2.unwrap_or(f64::NAN), (-watts).max(0.0) / 1000.0));
        assert!(close(params.v4, watts.max(0.0) / 1000.0));
        assert_eq!(params.n, Some(1));
    }
}

#[test]
fn gross_holds_for_any_demand() {
    for watts in [-5000.0, -1.0, 0.0, 1.0, 250.0, 7200.0] {
        let params = mode::select(watts, AccountingMode::Gross);

        if watts >= 0.0 {
            assert!(close(params.v4, watts / 1000.0));
        } else {
            assert_eq!(params.v4, 0.0);
        }
        assert_eq!(params.v2, None);
    }
}

#[test]
fn zero_never_formats_negative() {
    let params = mode::select(-0.0, AccountingMode::Net);
    let upload = StatusUpload::new(at(1_700_000_100), params, None);

    let form = upload.form();
    assert!(form.contains(&("v2", "0.000".to_string())));
    assert!(form.contains(&("v4", "0.000".to_string())));
    assert_eq!(format_decimal(-0.0004, 3), "0.000");
    assert_eq!(format_decimal(-0.0006, 3), "-0.001");
}
