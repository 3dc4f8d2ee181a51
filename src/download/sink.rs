//! Destinations for downloaded chunks.
//!
//! Chunks arrive interleaved across workers, so every sink is written with
//! positioned writes at each chunk's offset. The set of sinks is closed:
//! a file path the downloader creates, an in-memory buffer, or a
//! caller-provided [`ChunkWriter`].

use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};
use url::Url;

use super::error::DownloadError;
use super::fetch::Chunk;
use super::filename::{default_filename, resolve_unique_path};

/// A destination that accepts bytes at arbitrary offsets.
#[async_trait]
pub trait ChunkWriter: Send {
    /// Writes `data` starting at absolute `offset`.
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()>;

    /// Called once after the last chunk of a successful transfer.
    async fn finish(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ChunkWriter for File {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        self.seek(SeekFrom::Start(offset)).await?;
        self.write_all(data).await
    }

    async fn finish(&mut self) -> std::io::Result<()> {
        self.flush().await?;
        self.sync_all().await
    }
}

/// Shared in-memory buffer. Clones see the same bytes.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the bytes written so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current buffer length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        let start = usize::try_from(offset).map_err(std::io::Error::other)?;
        let end = start + data.len();
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[start..end].copy_from_slice(data);
        Ok(())
    }
}

#[async_trait]
impl ChunkWriter for MemorySink {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        self.put(offset, data)
    }
}

/// Where a transfer's bytes go.
pub enum Sink {
    /// A file the downloader creates (truncating an existing one).
    File(PathBuf),
    /// An in-memory buffer the caller keeps a clone of.
    Memory(MemorySink),
    /// A caller-provided positioned writer.
    Writer(Box<dyn ChunkWriter>),
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Memory(sink) => f.debug_tuple("Memory").field(&sink.len()).finish(),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

impl Sink {
    /// A file in `dir` named after the URL's last path segment, with a numeric
    /// suffix if that name is taken.
    #[must_use]
    pub fn file_in_dir(dir: &Path, url: &Url) -> Self {
        Self::File(resolve_unique_path(dir, &default_filename(url), &HashSet::new()))
    }

    /// Like [`file_in_dir`](Self::file_in_dir), also skipping every path in
    /// `reserved`, and records the chosen path there.
    ///
    /// Files are only created once a session starts transferring, so callers
    /// starting several sessions into one directory must reserve names up front.
    #[must_use]
    pub fn reserve_file_in_dir(dir: &Path, url: &Url, reserved: &mut HashSet<PathBuf>) -> Self {
        let path = resolve_unique_path(dir, &default_filename(url), reserved);
        reserved.insert(path.clone());
        Self::File(path)
    }

    /// Human-readable target, used in session progress.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory(_) => "<memory>".to_string(),
            Self::Writer(_) => "<writer>".to_string(),
        }
    }

    /// Rejects a file target that cannot be created.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidTarget`] if the path is empty, is an
    /// existing directory, or its parent directory does not exist.
    pub fn validate(&self) -> Result<(), DownloadError> {
        let Self::File(path) = self else {
            return Ok(());
        };
        if path.as_os_str().is_empty() {
            return Err(DownloadError::invalid_target(path, "path is empty"));
        }
        if path.is_dir() {
            return Err(DownloadError::invalid_target(path, "path is a directory"));
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.is_dir()
        {
            return Err(DownloadError::invalid_target(
                path,
                "parent directory does not exist",
            ));
        }
        Ok(())
    }

    pub(crate) async fn open(self) -> Result<OpenSink, DownloadError> {
        match self {
            Self::File(path) => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .await
                    .map_err(|e| DownloadError::io(&path, e))?;
                debug!(path = %path.display(), "created target file");
                Ok(OpenSink {
                    label: path.clone(),
                    writer: Box::new(file),
                    created: Some(path),
                })
            }
            Self::Memory(sink) => Ok(OpenSink {
                label: PathBuf::from("<memory>"),
                writer: Box::new(sink),
                created: None,
            }),
            Self::Writer(writer) => Ok(OpenSink {
                label: PathBuf::from("<writer>"),
                writer,
                created: None,
            }),
        }
    }
}

/// A sink being written by one transfer.
pub(crate) struct OpenSink {
    label: PathBuf,
    writer: Box<dyn ChunkWriter>,
    created: Option<PathBuf>,
}

impl OpenSink {
    pub(crate) async fn write(&mut self, chunk: &Chunk) -> Result<(), DownloadError> {
        self.writer
            .write_at(chunk.offset, &chunk.data)
            .await
            .map_err(|e| DownloadError::io(&self.label, e))
    }

    pub(crate) async fn finish(&mut self) -> Result<Option<PathBuf>, DownloadError> {
        self.writer
            .finish()
            .await
            .map_err(|e| DownloadError::io(&self.label, e))?;
        Ok(self.created.clone())
    }

    /// Drops the writer and removes a file the downloader created.
    pub(crate) async fn discard(self) {
        let Self {
            writer, created, ..
        } = self;
        drop(writer);
        let Some(path) = created else {
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed partial file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial file"),
        }
    }
}
