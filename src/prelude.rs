pub use anyhow::{anyhow, bail, Context, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::backoff::Backoff;
pub use crate::channels::Channels;
pub use crate::config::{self, Config};
pub use crate::mode::{AccountingMode, UploadParameters};
pub use crate::mqtt;
pub use crate::raven::{self, RavenFrame};
pub use crate::telemetry::TelemetryFrame;
pub use crate::window::{UploadWindow, WindowAggregator};
