//! Partwise - size-aware file uploader for S3-compatible object stores
//!
//! Thin CLI over the upload coordinator: loads configuration, uploads one
//! file, prints the resulting descriptor.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use partwise::{config::Config, store::s3::S3Store, UploadCoordinator, UploadRequest};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Upload a file to an S3-compatible object store
#[derive(Parser, Debug)]
#[command(name = "partwise")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Local file to upload
    file: PathBuf,

    /// Destination object key (defaults to the file name)
    #[arg(short, long)]
    key: Option<String>,

    /// Declared content type
    #[arg(long, default_value = "application/octet-stream")]
    content_type: String,

    /// Metadata entry as key=value (repeatable)
    #[arg(short, long = "metadata", value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("Invalid metadata entry '{}': expected key=value", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Partwise v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    let key = args.key.clone().unwrap_or_else(|| {
        args.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string())
    });

    let metadata = args
        .metadata
        .iter()
        .cloned()
        .map(|(k, v)| (k, Some(v)))
        .collect();

    let store = Arc::new(S3Store::new(config.s3.clone())?);
    let coordinator = UploadCoordinator::new(store, config.upload.clone());

    let request = UploadRequest::new(key, args.file, args.content_type).with_metadata(metadata);
    let descriptor = coordinator.upload_file(&request).await?;

    info!(
        key = %descriptor.key,
        name = %descriptor.name,
        size = descriptor.size,
        etag = %descriptor.etag,
        content_type = %descriptor.content_type,
        uploaded_at = %descriptor.uploaded_at,
        "Upload finished"
    );
    println!("{}\t{}\t{}", descriptor.key, descriptor.size, descriptor.etag);

    Ok(())
}
