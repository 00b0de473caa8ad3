//! Process setup shared by the `abp-*` binaries.

use std::io;

use abp_core::shutdown::{self, Shutdown};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// For binaries whose stdout carries payload.
    Stderr,
    Stdout,
}

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_logging(target: LogTarget) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match target {
        LogTarget::Stderr => builder.with_writer(io::stderr).init(),
        LogTarget::Stdout => builder.with_writer(io::stdout).init(),
    }
}

/// A [`Shutdown`] that fires on Ctrl-C or SIGTERM. Must be called from
/// within a tokio runtime.
pub fn shutdown_on_signal() -> Shutdown {
    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        match termination().await {
            Ok(signal) => info!("received {signal}, shutting down"),
            Err(e) => {
                warn!(error = %e, "could not listen for termination signals");
                return;
            }
        }
        trigger.trigger();
    });
    shutdown
}

#[cfg(unix)]
async fn termination() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r.map(|()| "SIGINT"),
        _ = term.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn termination() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "Ctrl-C")
}

/// Log how a run loop ended.
pub fn report_completion(role: &str, completion: abp_core::Completion) {
    match completion {
        abp_core::Completion::Finished => info!("{role} finished"),
        abp_core::Completion::Cancelled => info!("{role} cancelled"),
    }
}
