use crate::prelude::*;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

// how long we keep polling after a disconnect so it reaches the broker
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(PartialEq, Debug, Clone)]
pub enum ChannelData {
    Telemetry(TelemetryFrame),
    Shutdown,
}

pub fn options(config: &config::Mqtt, suffix: &str) -> MqttOptions {
    let mut options = MqttOptions::new(
        format!("{}{}", config.client_id(), suffix),
        config.host(),
        config.port(),
    );
    options.set_keep_alive(config.keep_alive());

    if let Some(username) = config.username() {
        options.set_credentials(username, config.password().clone().unwrap_or_default());
    }

    options
}

// BrokerLink {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connection state of one MQTT session together with its reconnect
/// backoff. The backoff only resets on a successful connect.
#[derive(Debug)]
pub struct BrokerLink {
    state: LinkState,
    backoff: Backoff,
}

impl BrokerLink {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: LinkState::Disconnected,
            backoff,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    pub fn connecting(&mut self) {
        self.state = LinkState::Connecting;
    }

    pub fn connected(&mut self) {
        self.state = LinkState::Connected;
        self.backoff.reset();
    }

    /// Records a failed attempt or a dropped connection and returns how
    /// long to wait before trying again.
    pub fn failed(&mut self) -> Duration {
        self.state = LinkState::Disconnected;
        self.backoff.next_delay()
    }
} // }}}

/// Publishes queued telemetry to the broker. Runs two halves: the
/// connection loop driving the rumqttc event loop and reconnecting with
/// backoff, and the sender draining the telemetry queue.
#[derive(Clone)]
pub struct Publisher {
    config: config::Mqtt,
    channels: Channels,
}

impl Publisher {
    pub fn new(config: config::Mqtt, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self, receiver: broadcast::Receiver<ChannelData>) -> Result<()> {
        let mut options = options(&self.config, "-bridge");

        let will = LastWill {
            topic: self.config.status_topic().to_string(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        info!(
            "initializing mqtt at {}:{}",
            self.config.host(),
            self.config.port()
        );

        let (client, eventloop) = AsyncClient::new(options, 10);
        let (stop_tx, stop_rx) = watch::channel(false);

        futures::try_join!(
            self.connection(client.clone(), eventloop, stop_rx),
            self.sender(client, receiver, stop_tx)
        )?;

        Ok(())
    }

    /// Queues a shutdown behind whatever telemetry is still waiting.
    pub fn stop(&self) {
        info!("Stopping MQTT publisher...");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
    }

    async fn connection(
        &self,
        client: AsyncClient,
        mut eventloop: EventLoop,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut link = BrokerLink::new(self.config.backoff());
        link.connecting();

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        link.connected();
                        info!("connected to mqtt at {}:{}", self.config.host(), self.config.port());

                        if let Err(err) = client.try_publish(
                            self.config.status_topic(),
                            QoS::AtLeastOnce,
                            true,
                            "online",
                        ) {
                            warn!("failed to publish online status: {}", err);
                        }
                    }
                    Ok(_) => {} // acks, keepalives etc
                    Err(err) => {
                        let delay = link.failed();
                        warn!(
                            "mqtt connection error: {}; reconnecting in {:?} (attempt {})",
                            err,
                            delay,
                            link.attempts()
                        );

                        tokio::select! {
                            _ = stop.changed() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        link.connecting();
                    }
                }
            }
        }

        // give a queued disconnect the chance to go out
        let _ = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            while eventloop.poll().await.is_ok() {}
        })
        .await;

        info!("MQTT connection loop exiting");
        Ok(())
    }

    // queue -> mqtt
    async fn sender(
        &self,
        client: AsyncClient,
        mut receiver: broadcast::Receiver<ChannelData>,
        stop: watch::Sender<bool>,
    ) -> Result<()> {
        loop {
            match receiver.recv().await {
                Ok(ChannelData::Telemetry(frame)) => {
                    let payload = frame.to_json()?;
                    debug!("publishing: {} = {}", self.config.topic(), payload);

                    // blocks while rumqttc's own request queue is full,
                    // which is what makes our queue overflow instead
                    if let Err(err) = client
                        .publish(self.config.topic(), QoS::AtLeastOnce, false, payload)
                        .await
                    {
                        error!("MQTT publish failed, event loop gone: {}", err);
                        break;
                    }
                }
                Ok(ChannelData::Shutdown) => {
                    info!("MQTT sender received shutdown signal");
                    let _ = client.try_publish(
                        self.config.status_topic(),
                        QoS::AtLeastOnce,
                        true,
                        "offline",
                    );
                    let _ = client.try_disconnect();
                    break;
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("telemetry queue full, dropped {} oldest records", n);
                }
                Err(RecvError::Closed) => break,
            }
        }

        let _ = stop.send(true);
        info!("MQTT sender loop exiting");
        Ok(())
    }
}
