use serde::Deserialize;

/// How grid power is reported upstream.
///
/// `Gross` reports import only, as consumption. `Net` reports export as
/// generation and import as consumption, and flags the upload as net data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountingMode {
    #[default]
    Gross,
    Net,
}

/// Power parameters of one upload, in kW.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UploadParameters {
    /// generation (export)
    pub v2: Option<f64>,
    /// consumption (import)
    pub v4: f64,
    /// net data flag
    pub n: Option<u8>,
}

pub fn select(raw_demand: f64, mode: AccountingMode) -> UploadParameters {
    let import = raw_demand.max(0.0) / 1000.0;

    match mode {
        AccountingMode::Gross => UploadParameters {
            v2: None,
            v4: import,
            n: None,
        },
        AccountingMode::Net => UploadParameters {
            v2: Some((-raw_demand).max(0.0) / 1000.0),
            v4: import,
            n: Some(1),
        },
    }
}
