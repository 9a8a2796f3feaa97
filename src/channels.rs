use crate::prelude::*;

const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Queues owned by the bridge unit. The uploader unit has none; it only
/// talks to the broker.
#[derive(Debug, Clone)]
pub struct Channels {
    /// telemetry waiting to be published. When full the oldest record is
    /// overwritten and the publisher sees a lag.
    pub to_mqtt: broadcast::Sender<mqtt::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Channels {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            to_mqtt: Self::channel(queue_capacity),
        }
    }

    fn channel<T: Clone>(capacity: usize) -> broadcast::Sender<T> {
        broadcast::channel(capacity.max(1)).0
    }
}
