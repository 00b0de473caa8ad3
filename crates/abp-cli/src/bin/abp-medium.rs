use abp_cli::{LogTarget, init_logging, report_completion, shutdown_on_signal};
use abp_core::transport::{connect_link, resolve};
use abp_core::{LossProbability, Medium, MediumConfig, run_medium};
use anyhow::Context;
use clap::Parser;
use tracing::info;

/// Relay datagrams between sender and receiver, dropping each with a fixed
/// probability.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Port the sender sends to.
    local_port: u16,
    sender_host: String,
    sender_port: u16,
    receiver_host: String,
    receiver_port: u16,
    /// Drop probability in [0, 1], applied to both directions.
    loss_rate: LossProbability,

    /// Seed the loss decisions for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LogTarget::Stdout);

    let sender = resolve(&args.sender_host, args.sender_port)
        .await
        .context("failed to resolve sender")?;
    let receiver = resolve(&args.receiver_host, args.receiver_port)
        .await
        .context("failed to resolve receiver")?;

    let toward_sender = connect_link(Some(args.local_port), sender)
        .await
        .context("failed to set up sender-side socket")?;
    let toward_receiver = connect_link(None, receiver)
        .await
        .context("failed to set up receiver-side socket")?;
    info!(
        "relaying {} <-> {} with loss rate {}",
        sender, receiver, args.loss_rate
    );

    let mut medium = Medium::from_config(&MediumConfig {
        loss: args.loss_rate,
        seed: args.seed,
    });
    let mut shutdown = shutdown_on_signal();
    let completion = run_medium(&mut medium, &toward_sender, &toward_receiver, &mut shutdown)
        .await
        .context("medium failed")?;

    let stats = medium.stats();
    info!(
        "S->R transmitted={} lost={}, R->S transmitted={} lost={}",
        stats.sender_to_receiver.transmitted,
        stats.sender_to_receiver.lost,
        stats.receiver_to_sender.transmitted,
        stats.receiver_to_sender.lost
    );
    report_completion("medium", completion);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_arguments() {
        let args = Args::try_parse_from([
            "abp-medium", "9001", "localhost", "9000", "::1", "9002", "0.25", "--seed", "3",
        ])
        .unwrap();
        assert_eq!(args.local_port, 9001);
        assert_eq!(args.receiver_host, "::1");
        assert_eq!(args.loss_rate.get(), 0.25);
        assert_eq!(args.seed, Some(3));
    }

    #[test]
    fn loss_rate_outside_unit_interval_is_rejected() {
        let err = Args::try_parse_from([
            "abp-medium", "9001", "localhost", "9000", "localhost", "9002", "1.5",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
