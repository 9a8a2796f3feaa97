pub mod backoff; // reconnect delays
pub mod bridge; // serial -> mqtt unit
pub mod channels; // bridge queue
pub mod config;
pub mod mode; // gross/net accounting
pub mod mqtt;
pub mod options;
pub mod prelude;
pub mod pvoutput;
pub mod raven; // device protocol
pub mod telemetry;
pub mod uploader; // mqtt -> pvoutput unit
pub mod voltage; // inverter voltage probe
pub mod window; // upload windows and flush timing

pub const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::bridge::Bridge;
use crate::options::{Options, Unit};
use crate::prelude::*;
use crate::uploader::Uploader;

use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::task::JoinHandle;

pub fn init_logging(default_level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();
}

/// Running units and the shutdown signal they all listen on.
pub struct Components {
    shutdown: broadcast::Sender<()>,
    handles: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl Components {
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);

        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub fn spawn<F>(&mut self, name: &'static str, unit: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        info!("starting {}", name);
        self.handles.push((name, tokio::spawn(unit)));
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for whichever unit ends first and forgets about it.
    pub async fn first_exit(&mut self) -> (&'static str, Result<()>) {
        if self.handles.is_empty() {
            return ("none", Ok(()));
        }

        let (joined, index, _) =
            futures::future::select_all(self.handles.iter_mut().map(|(_, handle)| handle)).await;
        let (name, _) = self.handles.remove(index);

        let result = match joined {
            Ok(result) => result,
            Err(err) => Err(anyhow!("{} task panicked: {}", name, err)),
        };

        (name, result)
    }

    /// Signals every unit and gives them `grace` in total to finish;
    /// anything still running after that is aborted.
    pub async fn stop(self, grace: Duration) {
        info!("Stopping all components...");
        let _ = self.shutdown.send(());

        let deadline = tokio::time::Instant::now() + grace;
        for (name, mut handle) in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => debug!("{} stopped", name),
                Ok(Ok(Err(err))) => error!("{} stopped with error: {:#}", name, err),
                Ok(Err(err)) => error!("{} task failed: {}", name, err),
                Err(_) => {
                    warn!("{} did not stop within {:?}, aborting", name, grace);
                    handle.abort();
                }
            }
        }

        info!("Shutdown complete");
    }
}

impl Default for Components {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() -> Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => r?,
        _ = terminate.recv() => {}
    }

    Ok(())
}

pub async fn app(options: Options, config: Config) -> Result<()> {
    let mut components = Components::new();

    if options.unit.runs_bridge() {
        if config.raven().enabled() {
            let bridge = Bridge::new(&config);
            components.spawn("bridge", bridge.start(components.shutdown_receiver()));
        } else if options.unit == Unit::Bridge {
            bail!("bridge unit selected but raven is disabled");
        }
    }

    if options.unit.runs_uploader() {
        if config.pvoutput().is_some() {
            let uploader = Uploader::new(&config)?;
            components.spawn("uploader", uploader.start(components.shutdown_receiver()));
        } else if options.unit == Unit::Uploader {
            bail!("uploader unit selected but pvoutput is not configured");
        }
    }

    if components.is_empty() {
        bail!("nothing to run, enable raven and/or pvoutput");
    }

    let result = tokio::select! {
        r = wait_for_signal() => {
            info!("Shutdown signal received, stopping components...");
            r
        }
        (name, r) = components.first_exit() => {
            // a unit only returns early on a fatal error
            match r {
                Ok(()) => Err(anyhow!("{} exited unexpectedly", name)),
                Err(err) => Err(err.context(format!("{} failed", name))),
            }
        }
    };

    components.stop(config.shutdown_grace()).await;

    result
}
