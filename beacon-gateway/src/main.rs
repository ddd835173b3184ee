//! beacon-gateway: Relay BLE beacon captures to the cloud.
//!
//! Supports:
//! - Replaying frame lines from a file or stdin through the dedup pipeline
//! - Inspecting how frame lines classify
//! - Writing a starter config file

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use beacon_core::config::{self, Config};
use beacon_core::{
    parse_frame, Clock, Credentials, LocationFix, ParsedFrame, RawFrame, SharedLocation,
    SignalStrength, SystemClock,
};
use beacon_gateway::capture::{parse_frame_line, FrameReader};
use beacon_gateway::{HttpTransport, Pipeline, PipelineConfig, StdoutTransport, Transport};

#[derive(Parser)]
#[command(
    name = "beacon-gateway",
    version,
    about = "BLE beacon relay: dedup window and batched publishing"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file (default: ~/.beacon-gateway/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed frame lines through the pipeline and publish detections
    Run(RunArgs),

    /// Parse and classify frame lines without publishing
    Inspect {
        /// Frame file (`hex[;rssi[;address]]` per line), or - for stdin
        #[arg(default_value = "-")]
        file: PathBuf,
    },

    /// Write a config file with the given identity
    Init {
        /// Gateway ID
        #[arg(long)]
        gateway_id: String,

        /// Owner ID
        #[arg(long)]
        owner_id: Option<String>,

        /// Ingest endpoint URL
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Frame file (`hex[;rssi[;address]]` per line), or - for stdin
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Gateway ID (overrides config)
    #[arg(long, env = "BEACON_GATEWAY_ID")]
    gateway_id: Option<String>,

    /// Owner ID (overrides config)
    #[arg(long, env = "BEACON_OWNER_ID")]
    owner_id: Option<String>,

    /// Ingest endpoint URL (overrides config)
    #[arg(long, env = "BEACON_ENDPOINT")]
    endpoint: Option<String>,

    /// Access token (overrides config)
    #[arg(long, env = "BEACON_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print envelopes to stdout instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Fixed gateway latitude
    #[arg(long, requires = "longitude", allow_hyphen_values = true)]
    latitude: Option<f64>,

    /// Fixed gateway longitude
    #[arg(long, requires = "latitude", allow_hyphen_values = true)]
    longitude: Option<f64>,

    /// Idle heartbeat interval in milliseconds (overrides config)
    #[arg(long)]
    heartbeat_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(config::config_file);

    match cli.command {
        Commands::Run(args) => cmd_run(config::load_config_from(&config_path), args).await,
        Commands::Inspect { file } => cmd_inspect(&file),
        Commands::Init {
            gateway_id,
            owner_id,
            endpoint,
        } => cmd_init(&config_path, gateway_id, owner_id, endpoint),
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(config: Config, args: RunArgs) {
    let gateway_id = args.gateway_id.unwrap_or(config.gateway.id);
    let owner_id = args.owner_id.or(config.gateway.owner_id);
    let token = args.token.or(config.transport.token);
    let endpoint = args.endpoint.or(config.transport.endpoint);

    let (transport, credentials): (Arc<dyn Transport>, Credentials) = if args.dry_run {
        (
            Arc::new(StdoutTransport::new()),
            Credentials::new(
                gateway_id,
                token.unwrap_or_default(),
                owner_id.unwrap_or_else(|| "local".into()),
            ),
        )
    } else {
        let (Some(endpoint), Some(token), Some(owner_id)) = (endpoint, token, owner_id) else {
            error!("endpoint, token, and owner ID are required (or pass --dry-run)");
            std::process::exit(1);
        };
        (
            Arc::new(HttpTransport::new(&endpoint)),
            Credentials::new(gateway_id, token, owner_id),
        )
    };

    let location = match (args.latitude, args.longitude) {
        (Some(lat), Some(lon)) => SharedLocation::with_fix(LocationFix::new(lat, lon)),
        _ => SharedLocation::new(),
    };

    let mut window = config.window;
    if args.heartbeat_ms.is_some() {
        window.heartbeat_ms = args.heartbeat_ms.filter(|ms| *ms > 0);
    }
    let pipeline_config = PipelineConfig::from(&window);
    // Long enough for the last admission to expire and its batch to go out.
    let drain = Duration::from_millis(pipeline_config.window_ms) + pipeline_config.tick_period * 3;

    let reader = match open_async(&args.file).await {
        Ok(r) => r,
        Err(e) => {
            error!(file = %args.file.display(), error = %e, "cannot open input");
            std::process::exit(1);
        }
    };

    let clock = Arc::new(SystemClock);
    let pipeline = Pipeline::start(
        pipeline_config,
        credentials,
        transport,
        Arc::new(location),
        clock.clone(),
    );
    let handle = pipeline.handle();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut lines = reader.lines();
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                interrupted = true;
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(raw) = parse_frame_line(&line, clock.now_ms()) {
                        handle.submit_wait(&raw).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "input read failed");
                    break;
                }
            },
        }
    }

    if !interrupted {
        info!(drain_ms = drain.as_millis() as u64, "input finished; draining window");
        tokio::select! {
            _ = &mut ctrl_c => info!("interrupted"),
            _ = tokio::time::sleep(drain) => {}
        }
    }

    let report = pipeline.shutdown().await;
    eprintln!();
    eprintln!(
        "{} frames queued, {} control, {} rejected, {} dropped",
        report.ingress.queued,
        report.ingress.control,
        report.ingress.rejected,
        report.ingress.dropped
    );
    eprintln!(
        "{} detections, {} duplicates, last sequence {}",
        report.window.evicted, report.window.duplicates, report.last_sequence
    );
}

async fn open_async(path: &Path) -> io::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if path.to_str() == Some("-") {
        Ok(Box::new(BufReader::new(tokio::io::stdin())))
    } else {
        let f = tokio::fs::File::open(path).await?;
        Ok(Box::new(BufReader::new(f)))
    }
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

fn cmd_inspect(file: &Path) {
    let now = SystemClock.now_ms();
    let frames: Vec<RawFrame> = if file.to_str() == Some("-") {
        io::stdin()
            .lock()
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| parse_frame_line(&line, now))
            .collect()
    } else {
        FrameReader::new(file).read_all(now).unwrap_or_else(|e| {
            error!(file = %file.display(), error = %e, "cannot read frames");
            std::process::exit(1);
        })
    };

    let mut table = Table::new();
    table.set_header(vec![
        "#", "Kind", "Group", "Type", "Key", "RSSI", "Signal", "Device",
    ]);

    let (mut data, mut control, mut rejected) = (0u64, 0u64, 0u64);
    for (i, raw) in frames.iter().enumerate() {
        let signal = SignalStrength::from_rssi(raw.signal_level);
        let row = match parse_frame(raw) {
            ParsedFrame::Data(f) => {
                data += 1;
                vec![
                    Cell::new(i + 1),
                    Cell::new("data"),
                    Cell::new(format!("{:06X}", f.group_id)),
                    Cell::new(format!("{:02X}", f.message_type)),
                    Cell::new(format!("{:08X}", f.dedup_key)),
                    Cell::new(raw.signal_level),
                    Cell::new(signal),
                    Cell::new(&raw.device_address),
                ]
            }
            ParsedFrame::Control(c) => {
                control += 1;
                vec![
                    Cell::new(i + 1),
                    Cell::new(c.kind.name()),
                    Cell::new(format!("{:06X}", c.group_id)),
                    Cell::new(format!("{:02X}", c.message_type)),
                    Cell::new("-"),
                    Cell::new(raw.signal_level),
                    Cell::new(signal),
                    Cell::new(&raw.device_address),
                ]
            }
            ParsedFrame::Rejected(e) => {
                rejected += 1;
                vec![
                    Cell::new(i + 1),
                    Cell::new("rejected"),
                    Cell::new(e),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new(raw.signal_level),
                    Cell::new(signal),
                    Cell::new(&raw.device_address),
                ]
            }
        };
        table.add_row(row);
    }

    if !frames.is_empty() {
        println!("{table}");
    }
    println!();
    println!("  Frames:    {}", frames.len());
    println!("  Data:      {data}");
    println!("  Control:   {control}");
    println!("  Rejected:  {rejected}");
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn cmd_init(path: &Path, gateway_id: String, owner_id: Option<String>, endpoint: Option<String>) {
    let mut config = config::load_config_from(path);
    config.gateway.id = gateway_id;
    if owner_id.is_some() {
        config.gateway.owner_id = owner_id;
    }
    if endpoint.is_some() {
        config.transport.endpoint = endpoint;
    }

    if let Err(e) = config::save_config_to(&config, path) {
        error!(path = %path.display(), error = %e, "cannot write config");
        std::process::exit(1);
    }
    println!("Wrote {}", path.display());
}
