use colored::Colorize;
use log::{error, info};

use encore_server::{logging, run_server, Config};

#[tokio::main]
async fn main() {
    logging::init_logger();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!("{} {}", "Invalid configuration!".bold(), error);
            return;
        }
    };

    info!("Starting encore on port {}...", config.port);

    if let Err(error) = run_server(config).await {
        error!("{}", "encore failed to start!".bold());
        error!("{}", error);
    }
}
