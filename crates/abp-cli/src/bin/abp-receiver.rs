use abp_cli::{LogTarget, init_logging, report_completion, shutdown_on_signal};
use abp_core::transport::bind_dual_stack;
use abp_core::{ReceiverSession, run_receiver};
use anyhow::Context;
use clap::Parser;
use tracing::info;

/// Receive an alternating-bit stream and write it to standard output.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// UDP port to listen on, on all local addresses.
    local_port: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LogTarget::Stderr);

    let socket = bind_dual_stack(args.local_port)
        .await
        .context("failed to set up receiver socket")?;
    info!("listening on port {}", args.local_port);

    let mut shutdown = shutdown_on_signal();
    let mut session = ReceiverSession::new();
    let completion = run_receiver(&mut session, &socket, tokio::io::stdout(), &mut shutdown)
        .await
        .context("receiver failed")?;

    let stats = session.stats();
    info!(
        frames = stats.frames,
        delivered = stats.delivered,
        duplicates = stats.duplicates,
        "receiver statistics"
    );
    report_completion("receiver", completion);
    Ok(())
}
