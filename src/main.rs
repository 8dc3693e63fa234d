use std::process::ExitCode;

use terraform_provider_airplanedev::{
    init_logging, launched_by_host, serve, AirplaneProvider, REGISTRY_ADDRESS,
};

#[tokio::main]
async fn main() -> ExitCode {
    if !launched_by_host() {
        eprintln!(
            "This binary is a plugin. It is not meant to be executed directly.\n\
             Declare {} as a required provider and let the host start it.",
            REGISTRY_ADDRESS
        );
        return ExitCode::FAILURE;
    }

    init_logging();
    tracing::info!(
        address = REGISTRY_ADDRESS,
        version = env!("CARGO_PKG_VERSION"),
        "Starting provider"
    );

    match serve(AirplaneProvider::new()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Provider exited with error");
            ExitCode::FAILURE
        }
    }
}
