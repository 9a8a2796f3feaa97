use crate::prelude::*;

use chrono::{DateTime, TimeZone};
use reqwest::StatusCode;
use std::fmt::Display;

/// One addstatus request: date and time of the window end, in the
/// system's local time zone, plus the power figures.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusUpload {
    pub date: String,
    pub time: String,
    pub params: UploadParameters,
    pub voltage: Option<f64>,
}

impl StatusUpload {
    pub fn new<T>(at: DateTime<T>, params: UploadParameters, voltage: Option<f64>) -> Self
    where
        T: TimeZone,
        T::Offset: Display,
    {
        Self {
            date: at.format("%Y%m%d").to_string(),
            time: at.format("%H:%M").to_string(),
            params,
            voltage,
        }
    }

    pub fn form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![("d", self.date.clone()), ("t", self.time.clone())];

        if let Some(v2) = self.params.v2 {
            form.push(("v2", format_decimal(v2, 3)));
        }
        form.push(("v4", format_decimal(self.params.v4, 3)));
        if let Some(v6) = self.voltage {
            form.push(("v6", format_decimal(v6, 1)));
        }
        if let Some(n) = self.params.n {
            form.push(("n", n.to_string()));
        }

        form
    }
}

/// Fixed-point formatting that never produces "-0.000".
pub fn format_decimal(value: f64, places: usize) -> String {
    let s = format!("{:.*}", places, value);

    match s.strip_prefix('-') {
        Some(rest) if rest.chars().all(|c| c == '0' || c == '.') => rest.to_string(),
        _ => s,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted,
    RateLimited,
    Rejected(StatusCode),
}

pub struct PvOutputClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    system_id: String,
}

impl PvOutputClient {
    pub fn new(config: &config::PvOutput) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("failed to build pvoutput http client")?;

        Ok(Self {
            client,
            url: config.url().to_string(),
            api_key: config.api_key().to_string(),
            system_id: config.system_id().to_string(),
        })
    }

    /// Sends one status. Only transport failures are errors; whatever the
    /// service answers is reported as an outcome.
    pub async fn post(&self, upload: &StatusUpload) -> Result<UploadOutcome> {
        let form = upload.form();
        debug!("posting to pvoutput: {:?}", form);

        let response = self
            .client
            .post(&self.url)
            .header("X-Pvoutput-Apikey", &self.api_key)
            .header("X-Pvoutput-SystemId", &self.system_id)
            .header("X-Rate-Limit", "1")
            .form(&form)
            .send()
            .await
            .context("pvoutput request failed")?;

        let status = response.status();
        if let Some(remaining) = response
            .headers()
            .get("X-Rate-Limit-Remaining")
            .and_then(|v| v.to_str().ok())
        {
            debug!("pvoutput requests remaining this hour: {}", remaining);
        }
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            info!(
                "uploaded status for {} {}: {}",
                upload.date,
                upload.time,
                body.trim()
            );
            Ok(UploadOutcome::Accepted)
        } else if status == StatusCode::TOO_MANY_REQUESTS
            || (status == StatusCode::FORBIDDEN && body.contains("Exceeded"))
        {
            warn!(
                "pvoutput rate limit hit, dropping status for {} {}",
                upload.date, upload.time
            );
            Ok(UploadOutcome::RateLimited)
        } else {
            warn!(
                "pvoutput rejected status for {} {}: {} {}",
                upload.date,
                upload.time,
                status,
                body.trim()
            );
            Ok(UploadOutcome::Rejected(status))
        }
    }
}
