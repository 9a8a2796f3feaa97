use raven_bridge::options::Options;
use raven_bridge::prelude::*;
use raven_bridge::CARGO_PKG_VERSION;

#[tokio::main]
async fn main() {
    let options = Options::new();

    let config = match Config::new(&options.config_file) {
        Ok(config) => config,
        Err(err) => {
            raven_bridge::init_logging("info");
            error!("Failed to load config {}: {:#}", options.config_file, err);
            std::process::exit(255);
        }
    };

    raven_bridge::init_logging(config.loglevel());
    info!(
        "raven-bridge {} starting with config file: {}",
        CARGO_PKG_VERSION, options.config_file
    );
    config.log_summary();

    if let Err(err) = raven_bridge::app(options, config).await {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
