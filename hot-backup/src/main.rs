//! hot-backup - Main entry point
//!
//! Backs a directory up to S3 as one compressed tar snapshot, or restores a
//! snapshot by its date.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hot_backup::daemon::shutdown;
use hot_backup::{utils, BackupError, Codec, Config, Executor, PipelineSettings, S3Transport, SnapshotId};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// S3 domain [default: s3-eu-west-1.amazonaws.com]
    #[arg(long = "s3domain", env = "S3_DOMAIN")]
    s3_domain: Option<String>,

    /// S3 signing region [default: eu-west-1]
    #[arg(long, env = "S3_REGION")]
    region: Option<String>,

    /// Bucket to store snapshots in [default: com.ft.coco-neo4j-backup]
    #[arg(long, env = "S3_BUCKET")]
    bucket: Option<String>,

    /// Key prefix for snapshots [default: /backups/]
    #[arg(long, env = "S3_DIR")]
    base_dir: Option<String>,

    /// AWS access key id
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    aws_access_key_id: Option<String>,

    /// AWS secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    aws_secret_access_key: Option<String>,

    /// Local directory to back up, and default restore destination [default: /backup]
    #[arg(long, env = "BACKUP_DIR")]
    dir: Option<PathBuf>,

    /// Compression codec: snappy or zstd [default: snappy]
    #[arg(long, env = "BACKUP_COMPRESSION")]
    compression: Option<Codec>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Back up the local directory to a new snapshot
    Backup,

    /// Restore a snapshot
    Restore {
        /// Snapshot date, e.g. 2016-09-14T17-03-59
        #[arg(value_name = "DATE")]
        date: SnapshotId,

        /// Directory to restore into (defaults to --dir)
        #[arg(long, value_name = "DIR")]
        dest: Option<PathBuf>,
    },
}

impl Args {
    /// Layer flag and environment values over the file configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(domain) = &self.s3_domain {
            config.store.domain = domain.clone();
        }
        if let Some(region) = &self.region {
            config.store.region = region.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.store.bucket = bucket.clone();
        }
        if let Some(base_dir) = &self.base_dir {
            config.store.base_dir = base_dir.clone();
        }
        if let Some(key) = &self.aws_access_key_id {
            config.store.access_key = Some(key.clone());
        }
        if let Some(secret) = &self.aws_secret_access_key {
            config.store.secret_key = Some(secret.clone());
        }
        if let Some(dir) = &self.dir {
            config.backup.dir = dir.clone();
        }
        if let Some(codec) = self.compression {
            config.backup.compression = codec;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    args.apply(&mut config);
    Ok(config)
}

async fn run(command: Command, config: Config) -> Result<()> {
    tracing::info!("Starting hot-backup v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Configuration: {:?}", config);

    let transport = Arc::new(S3Transport::new(&config.store, Handle::current())?);
    let cancel_token = CancellationToken::new();
    let signal_listener = shutdown::cancel_on_signal(cancel_token.clone());
    let executor = Executor::with_cancel(
        transport,
        PipelineSettings::from_config(&config),
        cancel_token,
    );

    let result = match command {
        Command::Backup => executor.backup(config.backup.dir.clone()).await.map(|_| ()),
        Command::Restore { date, dest } => {
            let dest = dest.unwrap_or_else(|| config.backup.dir.clone());
            executor.restore(date, dest).await.map(|_| ())
        }
    };

    signal_listener.abort();
    Ok(result?)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hot-backup: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = utils::logger::init(&config.log.level) {
        eprintln!("hot-backup: failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<BackupError>() {
                Some(err) => tracing::error!("{} [{}]", err, err.kind()),
                None => tracing::error!("{:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}
