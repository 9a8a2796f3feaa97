use crate::prelude::*;
use crate::raven::DeviceSession;

/// The serial to MQTT side. Owns the device session, the publisher and
/// the queue between them.
pub struct Bridge {
    raven: config::Raven,
    mqtt: config::Mqtt,
    channels: Channels,
}

impl Bridge {
    pub fn new(config: &Config) -> Self {
        Self {
            raven: config.raven().clone(),
            mqtt: config.mqtt().clone(),
            channels: Channels::new(config.mqtt().queue_capacity()),
        }
    }

    /// Fails straight away if the device cannot be opened. Once running,
    /// stops the device first and then lets the publisher drain.
    pub async fn start(self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let publisher = mqtt::Publisher::new(self.mqtt.clone(), self.channels.clone());
        let receiver = self.channels.to_mqtt.subscribe();

        let mut session = DeviceSession::new(self.raven.clone(), self.channels.clone());
        let port = session.open()?;

        let device = async {
            let result = session.run(port, shutdown).await;
            publisher.stop();
            result
        };

        futures::try_join!(publisher.start(receiver), device)?;

        info!("bridge stopped");
        Ok(())
    }
}
