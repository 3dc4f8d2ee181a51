//! Concurrent chunked HTTP downloading.
//!
//! A transfer runs leaf to root through these pieces:
//!
//! - [`probe`] discovers the resource size with a HEAD request
//! - [`plan`] partitions the size into contiguous [`ByteRange`]s
//! - [`ChunkFetcher`] runs one GET per range and yields offset-tagged [`Chunk`]s
//! - [`ChunkStream`] merges every worker's chunks into one stream
//! - [`Downloader`] owns the runtime and client, and runs sessions
//!
//! # Example
//!
//! ```no_run
//! use chunkload_core::download::{Downloader, DownloaderConfig, Sink, TransferRequest};
//! use std::path::PathBuf;
//!
//! # fn example() -> Result<(), chunkload_core::download::DownloadError> {
//! let downloader = Downloader::new(DownloaderConfig::default())?;
//! let session = downloader.start(
//!     TransferRequest::new("https://example.com/big.iso").with_max_workers(8),
//!     Sink::File(PathBuf::from("big.iso")),
//! )?;
//! let outcome = downloader.wait_blocking(&session);
//! println!("{outcome:?}");
//! downloader.close();
//! # Ok(())
//! # }
//! ```

mod aggregate;
mod client;
pub mod constants;
mod downloader;
mod error;
mod fetch;
pub mod filename;
mod options;
mod plan;
mod probe;
mod session;
mod sink;

pub use aggregate::ChunkStream;
pub use client::HttpClient;
pub use downloader::{BlockingChunks, Downloader, SaveReport};
pub use error::DownloadError;
pub use fetch::{Chunk, ChunkFetcher};
pub use options::{DownloaderConfig, RequestOptions, TransferRequest, parse_http_url};
pub use plan::{ByteRange, FetchPlan, plan, worker_count};
pub use probe::{ResourceSize, probe};
pub use session::{Progress, SessionHandle, SessionId, SessionOutcome, SessionState};
pub use sink::{ChunkWriter, MemorySink, Sink};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
