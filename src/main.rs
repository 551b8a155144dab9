use std::process::ExitCode;

use log::{error, info, LevelFilter};
use rocket::Error as RocketError;
use thiserror::Error;

/// Where the logging configuration lives unless `LOG_CONFIG` says otherwise.
const DEFAULT_LOG_CONFIG: &str = "log4rs.yaml";

/// Errors that stop the server.
#[derive(Debug, Error)]
enum Error {
    #[error("Server failed to start: {0}")]
    Ignite(RocketError),
    #[error("Server stopped abnormally: {0}")]
    Launch(RocketError),
}

async fn run() -> Result<(), Error> {
    info!("Configuring ballot server...");
    let rocket = ballot_backend::build()
        .ignite()
        .await
        .map_err(Error::Ignite)?;
    info!("...ballot server configured!");

    // The logger fairing reports requests from here on; rocket's own output is noise.
    log4rs_dynamic_filters::DynamicLevelFilter::set("rocket", LevelFilter::Off);
    rocket.launch().await.map_err(Error::Launch)?;
    Ok(())
}

#[rocket::main]
async fn main() -> ExitCode {
    let log_config = std::env::var("LOG_CONFIG").unwrap_or_else(|_| DEFAULT_LOG_CONFIG.to_string());
    if let Err(e) = log4rs::init_file(&log_config, log4rs_dynamic_filters::default_deserializers()) {
        eprintln!("Failed to initialise logging from {log_config}: {e}");
        return ExitCode::FAILURE;
    }
    info!("Initialised logging from {log_config}");

    match run().await {
        Ok(()) => {
            info!("Ballot server shut down");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            error!("Critical failure, shutting down");
            ExitCode::FAILURE
        }
    }
}
