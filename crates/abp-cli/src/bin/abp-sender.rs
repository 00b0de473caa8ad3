use abp_cli::{LogTarget, init_logging, report_completion, shutdown_on_signal};
use abp_core::transport::{connect_link, resolve};
use abp_core::{Completion, SenderConfig, SenderSession, run_sender};
use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tracing::info;

/// Send standard input to a receiver over the alternating-bit protocol.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// UDP port to bind locally.
    local_port: u16,
    /// Host of the medium (or receiver) to send to.
    dest_host: String,
    dest_port: u16,

    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_ms: u64,

    /// Give up after this many retransmissions of one frame.
    #[arg(long)]
    max_retransmissions: Option<u32>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LogTarget::Stderr);

    let remote = resolve(&args.dest_host, args.dest_port)
        .await
        .context("failed to resolve destination")?;
    let link = connect_link(Some(args.local_port), remote)
        .await
        .context("failed to set up sender socket")?;
    info!("sending from port {} to {}", args.local_port, remote);

    let config = SenderConfig {
        retransmit_timeout: Duration::from_millis(args.timeout_ms),
        max_retransmissions: args.max_retransmissions,
    };
    let mut shutdown = shutdown_on_signal();
    let mut session = SenderSession::new();

    let completion = run_sender(
        &mut session,
        tokio::io::stdin(),
        &link,
        &config,
        &mut shutdown,
    )
    .await
    .context("sender failed")?;

    let stats = session.stats();
    info!(
        chunks = stats.chunks,
        transmissions = stats.transmissions,
        retransmissions = stats.retransmissions,
        "sender statistics"
    );
    report_completion("sender", completion);

    if completion == Completion::Cancelled {
        // A pending stdin read sits on a blocking thread and would hold up
        // runtime shutdown.
        std::process::exit(0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_two_second_timeout() {
        let args = Args::try_parse_from(["abp-sender", "9000", "localhost", "9001"]).unwrap();
        assert_eq!(args.local_port, 9000);
        assert_eq!(args.dest_host, "localhost");
        assert_eq!(args.timeout_ms, 2000);
        assert_eq!(args.max_retransmissions, None);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = Args::try_parse_from([
            "abp-sender", "9000", "localhost", "9001", "--timeout-ms", "0",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
