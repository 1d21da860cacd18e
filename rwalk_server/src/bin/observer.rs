//! Headless observer: connects to a running server and logs its stream.
//!
//! Optionally sends a MODE change or STOP first. Per-step traffic is logged
//! at DEBUG; everything else at INFO.

use clap::Parser;
use futures::{SinkExt, StreamExt};
use rwalk_wire::{FrameCodec, Message, SimMode};
use std::path::PathBuf;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// STATS frames grow with the world. This covers the largest world a
/// server accepts (`MAX_WORLD_CELLS`).
const OBSERVER_MAX_PAYLOAD: usize = 64 << 20;

/// Headless rwalk protocol client
#[derive(Parser, Debug)]
#[command(name = "rwalk-observer")]
#[command(about = "Connect to an rwalk server and log what it streams", long_about = None)]
struct Args {
    /// Server socket path
    #[arg(short, long, default_value = "/tmp/rwalk.sock")]
    sock: PathBuf,

    /// Switch the server's pacing mode on connect (interactive or summary)
    #[arg(short, long)]
    mode: Option<SimMode>,

    /// Ask the server to shut down after connecting
    #[arg(long)]
    stop: bool,

    /// Disconnect once the server reports SUMMARY mode
    #[arg(long)]
    until_summary: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Default)]
struct Tally {
    frames: u64,
    steps: u64,
    trials: u64,
    stats: u64,
}

async fn observe(args: Args) -> Result<Tally, rwalk_wire::WireError> {
    let stream = UnixStream::connect(&args.sock).await?;
    let mut framed = Framed::new(stream, FrameCodec::with_max_payload(OBSERVER_MAX_PAYLOAD));
    info!(sock = %args.sock.display(), "Connected");

    if let Some(mode) = args.mode {
        framed.send(Message::Mode(mode)).await?;
        info!(%mode, "Requested mode change");
    }
    if args.stop {
        framed.send(Message::Stop).await?;
        info!("Requested stop");
    }

    let mut tally = Tally::default();
    while let Some(frame) = framed.next().await {
        tally.frames += 1;
        match frame? {
            Message::Welcome(w) => info!(
                world = %format!("{}x{}", w.world_w, w.world_h),
                mode = %w.mode,
                replications = w.replications,
                max_steps = w.max_steps,
                delay_ms = w.step_delay_ms,
                "WELCOME"
            ),
            Message::Step(s) => {
                tally.steps += 1;
                if s.step_index == 0 {
                    tally.trials += 1;
                }
                debug!(x = s.x, y = s.y, step = s.step_index, "STEP");
            }
            Message::Progress(p) => info!(
                "Replication {}/{}",
                p.current_replication, p.total_replications
            ),
            Message::Mode(mode) => {
                info!(%mode, "MODE");
                if args.until_summary && mode == SimMode::Summary {
                    break;
                }
            }
            Message::Stats(grid) => {
                tally.stats += 1;
                let reached = grid.prob.iter().filter(|&&p| p > 0.0).count();
                let best = grid.prob.iter().copied().fold(0.0f32, f32::max);
                info!(reached, best = %format!("{best:.3}"), "STATS");
            }
            Message::Obstacles(grid) => {
                let blocked = grid.cells.iter().filter(|&&c| c != 0).count();
                info!(blocked, "OBSTACLES");
            }
            Message::Error(text) => error!("Server error: {text}"),
            Message::Stop => debug!("Ignoring STOP from server"),
        }
    }

    Ok(tally)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let fallback = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    match observe(args).await {
        Ok(tally) => info!(
            frames = tally.frames,
            steps = tally.steps,
            trials = tally.trials,
            stats = tally.stats,
            "Disconnected"
        ),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rwalk_core::MAX_WORLD_CELLS;
    use rwalk_wire::{StatsGrid, DEFAULT_MAX_PAYLOAD};

    fn stats(world_w: u32, world_h: u32) -> Message {
        let cells = (world_w * world_h) as usize;
        Message::Stats(StatsGrid {
            world_w,
            world_h,
            prob: vec![0.0; cells],
            avg_steps: vec![0.0; cells],
        })
    }

    #[test]
    fn test_largest_world_fits_observer_ceiling() {
        assert_eq!(MAX_WORLD_CELLS, 2048 * 2048);
        assert!(stats(2048, 2048).payload_len() <= OBSERVER_MAX_PAYLOAD);
    }

    #[test]
    fn test_default_ceiling_world_limit() {
        assert!(stats(362, 362).payload_len() <= DEFAULT_MAX_PAYLOAD);
        assert!(stats(363, 363).payload_len() > DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn test_args_parse_mode() {
        let args = Args::try_parse_from(["rwalk-observer", "--mode", "summary", "--stop"]).unwrap();
        assert_eq!(args.mode, Some(SimMode::Summary));
        assert!(args.stop);
    }
}
