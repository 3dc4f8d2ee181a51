//! Downloader settings for the CLI: JSON config file merged with flags.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chunkload_core::{DownloaderConfig, RequestOptions};

use crate::cli::Args;

/// Reads a JSON [`DownloaderConfig`]; absent fields keep their defaults.
pub fn load_config_file(path: &Path) -> Result<DownloaderConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: DownloaderConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    if let Err(e) = config.validate() {
        bail!("Invalid config file {}: {e}", path.display());
    }
    Ok(config)
}

/// Effective downloader config: file values, then explicit CLI flags on top.
pub fn resolve_config(args: &Args) -> Result<DownloaderConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => DownloaderConfig::default(),
    };
    if let Some(max_workers) = args.max_workers {
        config.max_workers = usize::from(max_workers);
    }
    if let Some(min_worker_size) = args.min_worker_size {
        config.min_bytes_per_worker = min_worker_size;
    }
    config.validate()?;
    Ok(config)
}

/// Transport options from `--header`, `--proxy` and `--timeout`.
pub fn request_options(args: &Args) -> Result<RequestOptions> {
    let mut options = RequestOptions::new();
    for (name, value) in &args.headers {
        options = options.with_header(name, value)?;
    }
    if let Some(proxy) = &args.proxy {
        options = options.with_proxy(proxy.clone());
    }
    if let Some(timeout) = args.timeout {
        options = options.with_timeout(Duration::from_secs(timeout));
    }
    options.validate()?;
    Ok(options)
}
