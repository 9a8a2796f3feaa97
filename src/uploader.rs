use crate::prelude::*;
use crate::mode;
use crate::mqtt::BrokerLink;
use crate::pvoutput::{PvOutputClient, StatusUpload, UploadOutcome};
use crate::voltage::{FroniusProbe, VoltageSource};
use crate::window::FlushSchedule;

use chrono::Utc;
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// A window that went through upload, now closed, and how PVOutput took it.
#[derive(Debug)]
pub struct FlushReport {
    pub window: UploadWindow,
    pub outcome: Option<UploadOutcome>,
}

/// Turns a flushed window into one PVOutput status and sends it.
pub struct FlushHandler {
    mode: AccountingMode,
    timezone: Tz,
    voltage: Option<Arc<dyn VoltageSource>>,
    client: PvOutputClient,
}

impl FlushHandler {
    pub fn new(config: &config::PvOutput, voltage: Option<Arc<dyn VoltageSource>>) -> Result<Self> {
        Ok(Self {
            mode: config.mode(),
            timezone: config.timezone(),
            voltage,
            client: PvOutputClient::new(config)?,
        })
    }

    /// Builds the status for `window`, probing the voltage source if there
    /// is one. `None` when the window holds no power reading.
    pub async fn prepare(&self, window: &UploadWindow) -> Option<StatusUpload> {
        let Some(watts) = window.latest_sample.demand_watts() else {
            warn!(
                "window ending {} had {} samples but no demand reading, skipping upload",
                window.window_end, window.sample_count
            );
            return None;
        };

        let params = mode::select(watts, self.mode);

        let voltage = match &self.voltage {
            Some(source) => source.read().await.voltage,
            None => None,
        };

        Some(StatusUpload::new(
            window.window_end.with_timezone(&self.timezone),
            params,
            voltage,
        ))
    }

    pub async fn handle(&self, mut window: UploadWindow) -> FlushReport {
        let outcome = match self.prepare(&window).await {
            Some(upload) => match self.client.post(&upload).await {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    warn!("upload for window ending {} abandoned: {:#}", window.window_end, err);
                    None
                }
            },
            None => None,
        };

        window.close();
        FlushReport { window, outcome }
    }
}

/// The aggregation side: subscribes to telemetry, keeps the current
/// window, and hands each flushed window to its own upload task.
pub struct Uploader {
    mqtt: config::Mqtt,
    interval: Duration,
    handler: Arc<FlushHandler>,
}

impl Uploader {
    pub fn new(config: &Config) -> Result<Self> {
        let Some(pvoutput) = config.pvoutput() else {
            bail!("uploader needs an enabled pvoutput section");
        };

        let voltage = match config.voltage() {
            Some(v) => Some(Arc::new(FroniusProbe::new(v)?) as Arc<dyn VoltageSource>),
            None => None,
        };

        Ok(Self::with_handler(
            config.mqtt().clone(),
            pvoutput.interval(),
            FlushHandler::new(pvoutput, voltage)?,
        ))
    }

    pub fn with_handler(mqtt: config::Mqtt, interval: Duration, handler: FlushHandler) -> Self {
        Self {
            mqtt,
            interval,
            handler: Arc::new(handler),
        }
    }

    pub async fn start(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let options = mqtt::options(&self.mqtt, "-uploader");
        info!(
            "uploader subscribing to {} at {}:{}",
            self.mqtt.topic(),
            self.mqtt.host(),
            self.mqtt.port()
        );

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let mut link = BrokerLink::new(self.mqtt.backoff());
        link.connecting();

        let mut aggregator = WindowAggregator::new(self.interval);
        let mut schedule = FlushSchedule::new(self.interval, Utc::now());
        let mut uploads = JoinSet::new();

        // set while waiting out a reconnect backoff
        let mut resume_at: Option<Instant> = None;

        loop {
            let flush_in = schedule.until_next(Utc::now());

            tokio::select! {
                _ = shutdown.recv() => break,

                _ = tokio::time::sleep(flush_in) => {
                    let boundary = schedule.advance(Utc::now());
                    match aggregator.flush(boundary) {
                        Some(window) => self.dispatch(&mut uploads, window),
                        None => debug!("no telemetry for window ending {}", boundary),
                    }
                }

                _ = tokio::time::sleep_until(resume_at.unwrap_or_else(Instant::now)), if resume_at.is_some() => {
                    resume_at = None;
                    link.connecting();
                }

                event = eventloop.poll(), if resume_at.is_none() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        link.connected();
                        info!("uploader connected to mqtt");

                        if let Err(err) = client.try_subscribe(self.mqtt.topic(), QoS::AtLeastOnce) {
                            warn!("failed to subscribe to {}: {}", self.mqtt.topic(), err);
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        match TelemetryFrame::from_json(&publish.payload) {
                            Ok(frame) => {
                                trace!("received {:?}", frame);
                                if let Some(stale) = aggregator.ingest(frame, Utc::now()) {
                                    self.dispatch(&mut uploads, stale);
                                }
                            }
                            Err(err) => warn!("ignoring bad telemetry on {}: {:#}", publish.topic, err),
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let delay = link.failed();
                        warn!(
                            "uploader mqtt connection error: {}; reconnecting in {:?} (attempt {})",
                            err,
                            delay,
                            link.attempts()
                        );
                        resume_at = Some(Instant::now() + delay);
                    }
                },

                Some(joined) = uploads.join_next(), if !uploads.is_empty() => match joined {
                    Ok(report) => debug!(
                        "window ending {} {:?}, outcome {:?}",
                        report.window.window_end,
                        report.window.state(),
                        report.outcome
                    ),
                    Err(err) => warn!("upload task failed: {}", err),
                }
            }
        }

        info!("uploader stopping");
        let _ = client.try_disconnect();
        let _ = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            while eventloop.poll().await.is_ok() {}
        })
        .await;

        if !uploads.is_empty() {
            info!("abandoning {} in-flight uploads", uploads.len());
        }
        uploads.shutdown().await;

        Ok(())
    }

    fn dispatch(&self, uploads: &mut JoinSet<FlushReport>, window: UploadWindow) {
        debug!(
            "flushing window {} - {} ({} samples)",
            window.window_start, window.window_end, window.sample_count
        );

        let handler = self.handler.clone();
        uploads.spawn(async move { handler.handle(window).await });
    }
}
