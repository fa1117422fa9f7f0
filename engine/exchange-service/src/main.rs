mod config;
mod logging;
mod service;

use anyhow::Result;
use tracing::error;

fn main() -> Result<()> {
    let config = config::load_config()?;
    logging::initialize(&config.log_level, &config.log_format)?;

    if let Err(e) = service::run(config) {
        error!(error = %e, "exchange service failed");
        return Err(e);
    }
    Ok(())
}
