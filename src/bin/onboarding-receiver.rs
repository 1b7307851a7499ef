//! Onboarding receiver service.
//!
//! Configured entirely from `ONBOARDING_*` environment variables.

use integrations_onboarding::observability::LoggingConfig;
use integrations_onboarding::{server, OnboardingResult, ReceiverConfig};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = LoggingConfig::from_env().and_then(LoggingConfig::init) {
        eprintln!("failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Receiver stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> OnboardingResult<()> {
    let config = ReceiverConfig::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        storage = ?config.storage,
        sheet = %config.sheet_name,
        notifications = config.recipient.is_some(),
        "Starting onboarding receiver"
    );
    server::serve(config).await
}
