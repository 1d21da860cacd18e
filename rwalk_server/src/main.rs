//! rwalk simulation server CLI
//!
//! Validates the run configuration, builds the obstacle map, binds the Unix
//! socket and serves observers until the run is stopped and every client
//! has left.

use clap::Parser;
use rwalk_core::{
    ConfigError, ObstacleMap, ObstacleMode, ResultsFile, RunConfig, StatsAggregator,
};
use rwalk_server::{Hub, Server, ServerError, ThreadSleep, WalkEngine, DEFAULT_CLIENT_QUEUE};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Exhaustive random-walk simulation server
#[derive(Parser, Debug)]
#[command(name = "rwalk-server")]
#[command(about = "Run a toroidal random-walk simulation and stream it over a Unix socket", long_about = None)]
struct Args {
    /// Unix socket path to listen on
    #[arg(short, long, default_value = "/tmp/rwalk.sock")]
    sock: PathBuf,

    /// JSON run configuration; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// World width in cells (> 2) [default: 101]
    #[arg(long)]
    world_w: Option<u32>,

    /// World height in cells (> 2) [default: 101]
    #[arg(long)]
    world_h: Option<u32>,

    /// Pause between steps in interactive mode, milliseconds [default: 10]
    #[arg(short, long)]
    delay_ms: Option<u32>,

    /// Number of replications [default: 5]
    #[arg(short, long)]
    replications: Option<u32>,

    /// Move budget per trial [default: 100]
    #[arg(short = 'k', long)]
    max_steps: Option<u32>,

    /// Probability of moving up [default: 0.25]
    #[arg(long, allow_negative_numbers = true)]
    p_up: Option<f32>,

    /// Probability of moving down [default: 0.25]
    #[arg(long, allow_negative_numbers = true)]
    p_down: Option<f32>,

    /// Probability of moving left [default: 0.25]
    #[arg(long, allow_negative_numbers = true)]
    p_left: Option<f32>,

    /// Probability of moving right [default: 0.25]
    #[arg(long, allow_negative_numbers = true)]
    p_right: Option<f32>,

    /// Obstacle source: none, random or file [default: none]
    #[arg(long)]
    obstacles: Option<ObstacleMode>,

    /// Obstacle density for random mode, 0 to 0.8 [default: 0.2]
    #[arg(long)]
    obstacle_density: Option<f32>,

    /// Obstacle generator seed (0 = random from time)
    #[arg(long)]
    obstacle_seed: Option<u32>,

    /// Obstacle coordinate file (implies --obstacles file)
    #[arg(long)]
    obstacle_file: Option<PathBuf>,

    /// Step-direction seed (0 = random from time)
    #[arg(long)]
    walk_seed: Option<u64>,

    /// Results file written when the run ends
    #[arg(short, long, default_value = "replication_results.csv")]
    output: PathBuf,

    /// Resume statistics from a previous results file
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Outbound queue length per client, in frames
    #[arg(long, default_value_t = DEFAULT_CLIENT_QUEUE)]
    client_queue: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// JSON file (or defaults) with every explicitly passed flag applied.
    fn run_config(&self) -> Result<RunConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load_json(path)?,
            None => RunConfig::default(),
        };

        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field { config.$field = value; })*
            };
        }
        apply!(world_w, world_h, replications, max_steps, p_up, p_down, p_left, p_right);
        apply!(obstacle_density, obstacle_seed, walk_seed);

        if let Some(delay) = self.delay_ms {
            config.step_delay_ms = delay;
        }
        if let Some(path) = &self.obstacle_file {
            config.obstacle_file = Some(path.clone());
            config.obstacle_mode = ObstacleMode::File;
        }
        if let Some(mode) = self.obstacles {
            config.obstacle_mode = mode;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }
}

fn build_obstacles(config: &RunConfig) -> Result<ObstacleMap, ServerError> {
    let (w, h) = (config.world_w, config.world_h);
    let map = match config.obstacle_mode {
        ObstacleMode::None => ObstacleMap::empty(w, h),
        ObstacleMode::Random => {
            ObstacleMap::generate_random(w, h, config.obstacle_density, config.obstacle_seed)?
        }
        ObstacleMode::File => {
            let path = config
                .obstacle_file
                .as_deref()
                .ok_or(ConfigError::MissingObstacleFile)?;
            ObstacleMap::load_from_file(path, w, h)?
        }
    };
    if !map.is_empty() {
        info!(
            mode = %config.obstacle_mode,
            obstacles = map.obstacle_count(),
            "Obstacle map ready"
        );
    }
    Ok(map)
}

fn load_resume(args: &Args, config: &RunConfig) -> Result<StatsAggregator, ServerError> {
    let Some(path) = &args.resume else {
        return Ok(StatsAggregator::new(config.world_w, config.world_h));
    };

    let previous = ResultsFile::load(path).map_err(ServerError::Resume)?;
    let header = &previous.header;
    if header.world_w != config.world_w || header.world_h != config.world_h {
        return Err(ConfigError::ResumeMismatch {
            file_w: header.world_w,
            file_h: header.world_h,
            world_w: config.world_w,
            world_h: config.world_h,
        }
        .into());
    }

    info!(
        path = %path.display(),
        base_replications = header.total_replications,
        cells = previous.rows.len(),
        "Resuming statistics"
    );
    Ok(StatsAggregator::from_results(
        config.world_w,
        config.world_h,
        &previous,
    ))
}

/// Resolves on Ctrl-C or SIGTERM.
async fn termination_signal() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("SIGTERM handler unavailable: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

async fn run(args: Args) -> Result<(), ServerError> {
    // Nothing is opened or bound until the whole configuration checks out.
    let mut config = args.run_config()?;
    config.resolve_seeds();
    let obstacles = build_obstacles(&config)?;
    let aggregator = load_resume(&args, &config)?;

    info!(
        world = %format!("{}x{}", config.world_w, config.world_h),
        replications = config.replications,
        max_steps = config.max_steps,
        delay_ms = config.step_delay_ms,
        walk_seed = config.walk_seed,
        obstacle_seed = config.obstacle_seed,
        "Run configured"
    );

    let hub = Arc::new(Hub::new(config, obstacles).with_client_queue(args.client_queue));
    let engine = WalkEngine::new(hub.clone(), ThreadSleep)
        .with_aggregator(aggregator)
        .with_results(args.output.clone(), args.sock.display().to_string());

    let server = Server::bind(&args.sock, hub, engine)?;
    println!("SERVER READY: {}", args.sock.display());

    match server.run(termination_signal()).await? {
        Some(summary) => info!(
            completed = summary.replications_completed,
            total = summary.total_replications,
            trials = summary.trials,
            successes = summary.successes,
            "Server stopped"
        ),
        None => info!("Server stopped before any client connected"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args).await {
        error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}
