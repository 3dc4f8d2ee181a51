//! Chunkload Core Library
//!
//! A concurrent, chunked HTTP downloader. Given a URL it probes the resource
//! size, splits the transfer into parallel byte-range requests, and hands the
//! caller offset-tagged chunks while the transfer is still in flight.
//!
//! # Architecture
//!
//! - [`download`] - prober, scheduler, range workers, fan-in stream, sinks,
//!   sessions and the [`Downloader`] facade
//!
//! The `chunkload` binary is a thin consumer of this library.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use download::{
    ByteRange, Chunk, ChunkStream, ChunkWriter, DownloadError, Downloader, DownloaderConfig,
    MemorySink, Progress, RequestOptions, ResourceSize, SaveReport, SessionHandle, SessionOutcome,
    SessionState, Sink, TransferRequest,
};
