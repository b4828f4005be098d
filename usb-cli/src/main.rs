//! `dj-usb`: manage DJ USB replicas from the command line.

mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use bridge_desktop::FileLoggerSink;
use clap::{Parser, Subcommand};
use core_async::sync::CancellationToken;
use core_async::time::{timeout, Duration};
use core_runtime::config::CoreConfig;
use core_runtime::logging::{init_logging, parse_level, LogFormat, LoggingConfig};
use core_service::{
    AccessToken, CacheRetention, ReplicaLayout, ReplicaService, SyncConfig, SyncResult,
    DEFAULT_SERVER_URL,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dj-usb")]
#[command(about = "Keep USB drives in sync with the DJ song catalog")]
#[command(version)]
struct Args {
    /// Catalog server URL
    #[arg(long, env = "DJ_USB_SERVER", default_value = DEFAULT_SERVER_URL, global = true)]
    server: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Log format (compact, pretty, json)
    #[arg(long, default_value = "compact", global = true)]
    log_format: String,

    /// Songs downloaded at once (1 to 4)
    #[arg(long, default_value_t = 2, global = true)]
    concurrency: usize,

    /// Re-download songs that are missing or have the wrong size
    #[arg(long, global = true)]
    verify: bool,

    /// Keep downloaded copies in the replica cache, up to this many MB
    #[arg(long, global = true)]
    keep_cache_mb: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prepare a drive and run a first sync
    Init {
        path: PathBuf,
        /// Only create the layout
        #[arg(long)]
        no_sync: bool,
    },
    /// Bring a replica up to date with the catalog
    Sync { path: PathBuf },
    /// Show the songs on a replica
    Status {
        path: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Record that a song was played
    Play { path: PathBuf, filename: String },
    /// Empty the replica's download cache
    ClearCache { path: PathBuf },
    /// List the songs the catalog offers
    Catalog,
    /// Upload an MP3 to the catalog
    Upload {
        file: PathBuf,
        /// Access token; one is requested when omitted
        #[arg(long, env = "DJ_USB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

impl Commands {
    fn replica_root(&self) -> Option<&Path> {
        match self {
            Commands::Init { path, .. }
            | Commands::Sync { path }
            | Commands::Status { path, .. }
            | Commands::Play { path, .. }
            | Commands::ClearCache { path } => Some(path.as_path()),
            Commands::Catalog | Commands::Upload { .. } => None,
        }
    }
}

#[core_async::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(args: &Args) -> Result<()> {
    let level = parse_level(&args.log_level)?;
    let format: LogFormat = args.log_format.parse()?;
    let mut config = LoggingConfig::default()
        .with_level(level)
        .with_format(format)
        .with_target(false);
    if let Some(path) = log_file(&args.command) {
        config = config.with_logger_sink(Arc::new(FileLoggerSink::new(path)));
    }
    init_logging(config)?;
    Ok(())
}

/// The replica's `sync.log`. Never creates `.dj-app` on a path that is not a
/// replica yet, except for `init`.
fn log_file(command: &Commands) -> Option<PathBuf> {
    let layout = ReplicaLayout::new(command.replica_root()?);
    (matches!(command, Commands::Init { .. }) || layout.app_dir().is_dir())
        .then(|| layout.log_path())
}

fn sync_config(args: &Args) -> SyncConfig {
    SyncConfig {
        max_concurrent_downloads: args.concurrency,
        verify_sizes: args.verify,
        cache_retention: match args.keep_cache_mb {
            Some(mb) => CacheRetention::Keep {
                max_bytes: mb.saturating_mul(1024 * 1024),
            },
            None => CacheRetention::Discard,
        },
        ..SyncConfig::default()
    }
}

fn build_service(args: &Args) -> Result<ReplicaService> {
    let mut builder = CoreConfig::builder().server_url(args.server.trim_end_matches('/'));
    if let Some(root) = args.command.replica_root() {
        builder = builder.replica_root(root);
    }
    let config = builder.build().context("invalid configuration")?;
    Ok(ReplicaService::new(config, sync_config(args))?)
}

async fn run(args: Args) -> Result<ExitCode> {
    setup_logging(&args)?;
    let service = build_service(&args)?;

    match args.command {
        Commands::Init { no_sync, .. } => {
            let report = service.init().await?;
            if !report.removable {
                println!(
                    "Warning: {} does not look like a removable drive",
                    report.root.display()
                );
            }
            println!(
                "Initialized {} ({} songs in manifest)",
                report.root.display(),
                report.songs
            );
            if no_sync {
                return Ok(ExitCode::SUCCESS);
            }
            sync(&service).await
        }
        Commands::Sync { .. } => sync(&service).await,
        Commands::Status { json, .. } => {
            let status = service.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", output::status_report(&status));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Play { filename, .. } => {
            let path = service.mark_played(&filename).await?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::ClearCache { .. } => {
            let cleared = service.clear_cache().await?;
            println!(
                "Cleared {} files ({})",
                cleared.files,
                output::format_size(cleared.bytes)
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Catalog => {
            let songs = service.list_catalog().await?;
            for song in &songs {
                let size = song.size.map(output::format_size).unwrap_or_default();
                match (&song.artist, &song.title) {
                    (Some(artist), Some(title)) => {
                        println!("{}  {} - {}  {}", song.filename, artist, title, size)
                    }
                    _ => println!("{}  {}", song.filename, size),
                }
            }
            println!("{} songs", songs.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Upload { file, token } => {
            let receipt = service
                .upload(&file, token.map(AccessToken::new))
                .await
                .with_context(|| format!("upload of {} failed", file.display()))?;
            println!("{}", output::upload_summary(&receipt));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run one cycle, printing progress, with Ctrl-C mapped to cancellation.
async fn sync(service: &ReplicaService) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        core_async::spawn(async move {
            if core_async::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing the current song");
                eprintln!("Interrupted, finishing the current song...");
                cancel.cancel();
            }
        })
    };

    let mut events = service.event_bus().subscribe();
    let printer = core_async::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Some(line) = output::progress_line(&event) {
                println!("{}", line);
            }
            if output::is_terminal(&event) {
                break;
            }
        }
    });

    let outcome = service.sync(&cancel).await;
    interrupt.abort();
    if timeout(Duration::from_secs(1), printer).await.is_err() {
        info!("Progress printer did not drain");
    }

    let result: SyncResult = outcome?;
    println!("{}", output::sync_summary(&result));
    Ok(if result.cancelled {
        ExitCode::from(130)
    } else if result.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_keep_cache_size_saturates() {
        let args = parse(&["dj-usb", "--keep-cache-mb", "18446744073709551615", "sync", "/media/usb"]);
        assert_eq!(
            sync_config(&args).cache_retention,
            CacheRetention::Keep { max_bytes: u64::MAX }
        );

        let args = parse(&["dj-usb", "--keep-cache-mb", "2", "sync", "/media/usb"]);
        assert_eq!(
            sync_config(&args).cache_retention,
            CacheRetention::Keep {
                max_bytes: 2 * 1024 * 1024
            }
        );
        assert_eq!(
            sync_config(&parse(&["dj-usb", "sync", "/media/usb"])).cache_retention,
            CacheRetention::Discard
        );
    }

    #[test]
    fn test_log_file_follows_replica_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let layout = ReplicaLayout::new(dir.path());

        assert_eq!(
            log_file(&parse(&["dj-usb", "init", root]).command),
            Some(layout.log_path())
        );
        // Not a replica yet.
        assert_eq!(log_file(&parse(&["dj-usb", "sync", root]).command), None);
        assert_eq!(log_file(&parse(&["dj-usb", "catalog"]).command), None);

        std::fs::create_dir_all(layout.app_dir()).unwrap();
        assert_eq!(
            log_file(&parse(&["dj-usb", "status", root]).command),
            Some(layout.log_path())
        );
    }
}
