//! home-agents supervisor
//!
//! Starts the tool backend, waits for it to settle, starts the agent server
//! and keeps both alive until interrupted. Exits 0 after a requested
//! shutdown, 1 if either child exits on its own or cannot be started.

mod supervisor;

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::supervisor::SupervisorConfig;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    match supervise().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn supervise() -> anyhow::Result<u8> {
    let config = SupervisorConfig::from_env()?;
    let outcome = supervisor::run(&config, shutdown_signal()).await?;
    tracing::info!(?outcome, "Supervisor finished");
    Ok(u8::try_from(outcome.exit_code()).unwrap_or(1))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
