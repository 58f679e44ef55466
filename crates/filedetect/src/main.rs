//! filedetect command-line driver
//!
//! - `scan`: submit a file or directory tree to the detection service and
//!   print one line per result plus a summary
//! - `init-config`: write a default config file to edit

mod report;
mod scan;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use filedetect_logging::{init_logging, LogConfig};
use filedetect_protocol::defaults::{
    ACCESS_KEY_ID_ENV, ACCESS_KEY_SECRET_ENV, DEFAULT_DETECT_TIMEOUT_MS,
};
use filedetect_protocol::paths::default_config_path;
use filedetect_scheduler::{Detector, DetectorConfig, ScanTimeout};
use report::{OutputFormat, Reporter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "filedetect", about = "Scan files against a remote detection service")]
struct Cli {
    /// Mirror logs on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.filedetect/config.toml when present)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a file, or every file under a directory
    Scan(ScanArgs),

    /// Write a config file with default settings
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args, Debug)]
struct ScanArgs {
    /// File or directory to scan
    path: PathBuf,

    /// Per-file time budget in milliseconds; negative waits forever
    #[arg(
        short = 't',
        long,
        default_value_t = DEFAULT_DETECT_TIMEOUT_MS,
        allow_negative_numbers = true
    )]
    timeout_ms: i64,

    /// Scan one file at a time
    #[arg(long)]
    sync: bool,

    /// Number of scan workers
    #[arg(long)]
    workers: Option<usize>,

    /// Maximum admitted scans in flight
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Service endpoint host or URL
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long, env = ACCESS_KEY_ID_ENV)]
    access_key_id: Option<String>,

    #[arg(long, env = ACCESS_KEY_SECRET_ENV, hide_env_values = true)]
    access_key_secret: Option<String>,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "filedetect",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:?}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Scan(args) => {
            let config = load_config(cli.config.as_deref())?;
            run_scan(config, args)
        }
        Commands::InitConfig { force } => {
            let path = cli.config.unwrap_or_else(default_config_path);
            init_config(&path, force)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<DetectorConfig> {
    match path {
        Some(path) => DetectorConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => {
            let path = default_config_path();
            if path.exists() {
                DetectorConfig::load(&path)
                    .with_context(|| format!("Failed to load config: {}", path.display()))
            } else {
                Ok(DetectorConfig::default())
            }
        }
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Config already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    DetectorConfig::default()
        .save(path)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Command-line values win over the config file.
fn apply_overrides(config: &mut DetectorConfig, args: &ScanArgs) {
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(capacity) = args.queue_capacity {
        config.queue_capacity = capacity;
    }
    if let Some(endpoint) = &args.endpoint {
        config.client.endpoint = endpoint.clone();
    }
    if let Some(id) = &args.access_key_id {
        config.client.access_key_id = id.clone();
    }
    if let Some(secret) = &args.access_key_secret {
        config.client.access_key_secret = secret.clone();
    }
}

fn run_scan(mut config: DetectorConfig, args: ScanArgs) -> Result<()> {
    apply_overrides(&mut config, &args);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("filedetect")
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async move {
        let detector = Detector::connect(config).context("Failed to create detector")?;
        detector.init().context("Failed to start detector")?;

        let outcome = drive_scan(&detector, &args).await;
        detector.shutdown().await;
        outcome
    })
}

async fn drive_scan(detector: &Detector, args: &ScanArgs) -> Result<()> {
    let format = if args.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let timeout = ScanTimeout::from_millis(args.timeout_ms);
    let files = scan::collect_files(&args.path);
    info!(
        "Scanning {} files under {} (timeout {}, sync {})",
        files.len(),
        args.path.display(),
        timeout,
        args.sync
    );

    let mut reporter = Reporter::new(format, std::io::stdout());
    reporter.start(&args.path, args.timeout_ms, args.sync)?;

    let started = Instant::now();
    let reporter = if args.sync {
        scan::scan_sync(detector, &files, timeout, reporter).await?
    } else {
        scan::scan_async(detector, &files, timeout, reporter).await?
    };
    let summary = reporter.finish(started.elapsed())?;
    info!(
        "Scan finished: {} files, {} failed, {} white, {} black",
        summary.total(),
        summary.fail_count,
        summary.white_count,
        summary.black_count
    );
    Ok(())
}
