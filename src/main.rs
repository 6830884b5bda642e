use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use logplayer::oro::DEFAULT_PORT;
use logplayer::{ConsoleReporter, Pacing, ReplayConfig, Replayer, TcpConnector, TimestampPolicy};
use tokio::sync::watch;
use tracing::Level;

#[derive(Parser)]
#[command(name = "logplayer")]
#[command(about = "Replay an oro-server request log with its original timing and concurrency")]
#[command(version)]
struct Args {
    /// Log file to replay
    log: PathBuf,

    /// Server host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// How workers wait for a request's offset
    #[arg(long, value_enum, default_value_t = Pacing::Sleep)]
    pacing: Pacing,

    /// Connection timeout in milliseconds
    #[arg(long, default_value = "5000")]
    connect_timeout_ms: u64,

    /// Abort on a malformed timestamp instead of skipping the line
    #[arg(long)]
    strict_timestamps: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only print the final summary
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let connector = TcpConnector::new(&args.host, args.port)
        .with_connect_timeout(Duration::from_millis(args.connect_timeout_ms));
    let config = ReplayConfig {
        pacing: args.pacing,
        timestamp_policy: if args.strict_timestamps {
            TimestampPolicy::Strict
        } else {
            TimestampPolicy::Skip
        },
    };
    let mut replayer = Replayer::new(connector, config);

    let timeline = replayer.load(&args.log).map_err(|e| anyhow::anyhow!("{}: {}", args.log.display(), e))?;
    if timeline.is_empty() {
        println!("No request found in {}; nothing to replay.", args.log.display());
        return Ok(());
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing in-flight requests");
            let _ = cancel_tx.send(true);
        }
    });

    replayer
        .run(timeline, ConsoleReporter::new(args.quiet), cancel_rx)
        .await;

    Ok(())
}
