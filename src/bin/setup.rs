use tracing::error;

use cloudsql_migrator::config::Config;
use cloudsql_migrator::phases::{self, PHASE_DEADLINE};
use cloudsql_migrator::{logging, Manager};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    logging::init(&cfg.logging);

    if let Err(err) = install_crypto_provider() {
        error!("{err}");
        std::process::exit(2);
    }

    let mgr = match Manager::new(&cfg).await {
        Ok(mgr) => mgr,
        Err(err) => {
            error!(error = %err, "Failed to complete configuration");
            std::process::exit(2);
        }
    };

    match tokio::time::timeout(PHASE_DEADLINE, phases::setup::run(&cfg, &mgr)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(error = %err, migrationStep = err.step, "Setup failed");
            std::process::exit(err.exit_code());
        }
        Err(_) => {
            error!("Setup exceeded the phase deadline");
            std::process::exit(2);
        }
    }
}

/// The TLS provider must be installed before any rustls use; a second
/// install attempt is fine as long as some provider is present.
fn install_crypto_provider() -> Result<(), &'static str> {
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available");
    }
    Ok(())
}
