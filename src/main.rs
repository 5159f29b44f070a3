//! Simple Backup - Main entry point

use anyhow::Result;
use clap::Parser;
use simple_backup::compress::codec::TarZstdCodec;
use simple_backup::compress::BackupCompressor;
use simple_backup::config::Config;
use simple_backup::history::BackupHistory;
use simple_backup::scheduler::Scheduler;
use simple_backup::service::BackupService;
use simple_backup::storage::sftp::SftpClient;
use simple_backup::storage::BackupStorageService;
use simple_backup::{daemon, utils};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting simple-backup v{}", env!("CARGO_PKG_VERSION"));

    let history = Arc::new(BackupHistory::open(
        &config.history.ledger_file,
        &config.history.path_index_file,
    )?);

    let codec = Arc::new(TarZstdCodec::new(config.compression.level));
    let compressor = Arc::new(BackupCompressor::new(
        &config.backup,
        Arc::clone(&history),
        codec,
    )?);

    let client = Arc::new(SftpClient::new(&config.remote));
    let storage = Arc::new(BackupStorageService::new(
        client,
        &config.remote,
        config.compression.chunk_size,
    ));

    let service = BackupService::new(
        Arc::new(Scheduler::new()),
        history,
        compressor,
        storage,
        config.schedule.compress_time()?,
        Duration::from_secs(config.schedule.storage_interval_secs),
    );

    service.start()?;

    daemon::shutdown::wait_for_signal().await;

    service.stop();
    Ok(())
}
