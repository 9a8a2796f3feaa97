use crate::prelude::*;
use crate::raven::{decoder::FrameDecoder, frame::Block, frame::Command};

use chrono::Utc;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::codec::FramedRead;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Reconnecting,
    Closed,
}

/// Why a streaming pass over the port ended.
#[derive(Debug)]
pub enum SessionEnd {
    Shutdown,
    Failed(anyhow::Error),
}

// sent on every (re)connect so a summation shows up without waiting for the meter
const STARTUP_COMMANDS: [Command; 2] = [Command::Initialize, Command::GetCurrentSummationDelivered];

/// Owns the serial port for the lifetime of the bridge and feeds every
/// decoded reading into the publisher queue.
pub struct DeviceSession {
    config: config::Raven,
    channels: Channels,
    state: SessionState,
    backoff: Backoff,
}

impl DeviceSession {
    pub fn new(config: config::Raven, channels: Channels) -> Self {
        let backoff = config.reopen_backoff();

        Self {
            config,
            channels,
            state: SessionState::Connecting,
            backoff,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("device {}: {:?} -> {:?}", self.config.device(), self.state, state);
            self.state = state;
        }
    }

    pub fn open(&mut self) -> Result<SerialStream> {
        self.set_state(SessionState::Connecting);

        info!(
            "opening {} at {} baud",
            self.config.device(),
            self.config.baud_rate()
        );

        let port = tokio_serial::new(self.config.device(), self.config.baud_rate())
            .open_native_async()
            .with_context(|| format!("failed to open serial device {}", self.config.device()))?;

        Ok(port)
    }

    /// Streams from `port` until shutdown, re-opening the device whenever it
    /// fails. The initial open is the caller's job so that a missing device
    /// stays fatal.
    pub async fn run(
        mut self,
        port: SerialStream,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut port = port;

        loop {
            match self.stream(port, &mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Failed(err) => {
                    warn!("device {}: {:#}", self.config.device(), err);
                }
            }

            self.set_state(SessionState::Reconnecting);
            port = match self.reopen(&mut shutdown).await {
                Some(port) => port,
                None => break,
            };
        }

        self.set_state(SessionState::Closed);
        info!("device {} closed", self.config.device());
        Ok(())
    }

    async fn reopen(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Option<SerialStream> {
        loop {
            let delay = self.backoff.next_delay();
            info!(
                "device {}: reopening in {:?} (attempt {})",
                self.config.device(),
                delay,
                self.backoff.attempts()
            );

            tokio::select! {
                _ = shutdown.recv() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.open() {
                Ok(port) => {
                    self.backoff.reset();
                    return Some(port);
                }
                Err(err) => {
                    warn!("{:#}", err);
                    self.set_state(SessionState::Reconnecting);
                }
            }
        }
    }

    /// One pass over an open port. Generic so anything byte-stream shaped
    /// can stand in for the serial device.
    pub async fn stream<P>(&mut self, mut port: P, shutdown: &mut broadcast::Receiver<()>) -> SessionEnd
    where
        P: AsyncRead + AsyncWrite + Unpin,
    {
        self.set_state(SessionState::Streaming);

        for command in STARTUP_COMMANDS {
            if let Err(err) = port.write_all(&command.to_bytes()).await {
                warn!("failed to send {} command: {}", command.name(), err);
                break;
            }
        }

        let mut frames = FramedRead::new(port, FrameDecoder::from_config(&self.config));

        loop {
            tokio::select! {
                _ = shutdown.recv() => return SessionEnd::Shutdown,
                next = frames.next() => match next {
                    Some(Ok(block)) => self.forward(block),
                    Some(Err(err)) => return SessionEnd::Failed(err),
                    None => return SessionEnd::Failed(anyhow!("device closed the stream")),
                }
            }
        }
    }

    fn forward(&self, block: Block) {
        let frame = match RavenFrame::try_from(block) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("skipping frame: {:#}", err);
                return;
            }
        };

        if let Some(telemetry) = TelemetryFrame::from_raven(frame, Utc::now()) {
            trace!("decoded {:?}", telemetry);
            if self
                .channels
                .to_mqtt
                .send(mqtt::ChannelData::Telemetry(telemetry))
                .is_err()
            {
                warn!("send(to_mqtt) failed - publisher not running?");
            }
        }
    }
}
