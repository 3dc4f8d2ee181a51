//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download files with parallel byte-range workers.
///
/// Each URL becomes one session; sessions run concurrently and each splits
/// its transfer across up to `--max-workers` range requests.
#[derive(Parser, Debug)]
#[command(name = "chunkload")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Directory to save files into (defaults to the current directory)
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum parallel range workers per file (1-256)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u16).range(1..=256))]
    pub max_workers: Option<u16>,

    /// Minimum bytes each worker should fetch
    #[arg(short = 'm', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub min_worker_size: Option<u64>,

    /// Proxy URL (http:// or https://)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=86_400))]
    pub timeout: Option<u64>,

    /// Extra request header, NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// JSON file with downloader defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print a JSON summary of every session instead of progress bars
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name is empty in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_single_url_parses_with_defaults() {
        let args = Args::try_parse_from(["chunkload", "https://example.com/a.bin"]).unwrap();
        assert_eq!(args.urls, vec!["https://example.com/a.bin"]);
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.json);
        assert!(args.max_workers.is_none());
        assert!(args.headers.is_empty());
    }

    #[test]
    fn test_cli_requires_at_least_one_url() {
        let err = Args::try_parse_from(["chunkload"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["chunkload", "-vv", "https://x.test/a"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_max_workers_bounds() {
        let args = Args::try_parse_from(["chunkload", "-w", "256", "https://x.test/a"]).unwrap();
        assert_eq!(args.max_workers, Some(256));

        for bad in ["0", "257"] {
            let err = Args::try_parse_from(["chunkload", "-w", bad, "https://x.test/a"]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_min_worker_size_zero_rejected() {
        let err = Args::try_parse_from(["chunkload", "-m", "0", "https://x.test/a"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_headers_are_repeatable() {
        let args = Args::try_parse_from([
            "chunkload",
            "-H",
            "Authorization: Bearer abc",
            "--header",
            "X-Trace:1",
            "https://x.test/a",
        ])
        .unwrap();
        assert_eq!(
            args.headers,
            vec![
                ("Authorization".to_string(), "Bearer abc".to_string()),
                ("X-Trace".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_cli_malformed_header_rejected() {
        let err = Args::try_parse_from(["chunkload", "-H", "no-colon", "https://x.test/a"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["chunkload", "--invalid-flag", "https://x.test/a"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
