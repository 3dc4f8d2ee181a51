//! The downloader facade.
//!
//! A [`Downloader`] owns (or borrows) a Tokio runtime and a pooled HTTP
//! client that outlive any single transfer. Callers on any thread use it
//! through async methods, `_blocking` twins, or long-lived sessions.
//!
//! Cancellation is a token tree: the facade's shutdown token is the parent of
//! every session token, each session token parents one [`ChunkStream`] token,
//! and each worker watches a child of that. Cancelling a session therefore
//! stops exactly its own workers; closing the facade stops everything.
//!
//! The `_blocking` methods park the calling thread until the work finishes on
//! the runtime. Do not call them from inside an async context.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::aggregate::ChunkStream;
use super::client::HttpClient;
use super::constants::{CLOSE_GRACE, FAN_IN_CAPACITY};
use super::error::DownloadError;
use super::fetch::Chunk;
use super::options::{DownloaderConfig, RequestOptions, TransferRequest, parse_http_url};
use super::plan::plan;
use super::probe::{ResourceSize, probe};
use super::session::{SessionHandle, SessionId, SessionOutcome, SessionShared, SessionState};
use super::sink::{MemorySink, OpenSink, Sink};

/// Summary of a completed `save`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub url: String,
    /// File written, for [`Sink::File`] targets.
    pub path: Option<PathBuf>,
    pub bytes: u64,
    pub total_size: ResourceSize,
    pub workers: usize,
}

struct Inner {
    client: HttpClient,
    config: DownloaderConfig,
    handle: Handle,
    sessions: DashMap<SessionId, SessionHandle>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

/// Concurrent chunked HTTP downloader.
///
/// # Example
///
/// ```no_run
/// use chunkload_core::{Downloader, DownloaderConfig, RequestOptions};
///
/// # fn example() -> Result<(), chunkload_core::DownloadError> {
/// let downloader = Downloader::new(DownloaderConfig::default())?;
/// let bytes = downloader.get_blocking("https://example.com/data.bin", &RequestOptions::default())?;
/// println!("{} bytes", bytes.len());
/// downloader.close();
/// # Ok(())
/// # }
/// ```
pub struct Downloader {
    inner: Arc<Inner>,
    runtime: Option<Runtime>,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.inner.config)
            .field("owns_runtime", &self.runtime.is_some())
            .field("sessions", &self.inner.sessions.len())
            .field("closed", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl Downloader {
    /// Creates a downloader with its own multi-threaded runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidOptions`] for a bad config,
    /// [`DownloadError::Runtime`] if the runtime cannot start and
    /// [`DownloadError::Client`] if the HTTP client cannot be built.
    pub fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        config.validate()?;
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name("chunkload-worker");
        if let Some(threads) = config.worker_threads {
            builder.worker_threads(threads);
        }
        let runtime = builder
            .build()
            .map_err(|source| DownloadError::Runtime { source })?;
        let handle = runtime.handle().clone();
        let mut downloader = Self::with_handle(handle, config)?;
        downloader.runtime = Some(runtime);
        Ok(downloader)
    }

    /// Creates a downloader that runs on a caller-owned runtime.
    ///
    /// [`close`](Self::close) then only cancels sessions; the runtime stays up.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new), minus the runtime error.
    pub fn with_handle(handle: Handle, config: DownloaderConfig) -> Result<Self, DownloadError> {
        config.validate()?;
        let client = HttpClient::from_config(&config)?;
        debug!(?config, "downloader created");
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                handle,
                sessions: DashMap::new(),
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
            runtime: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &DownloaderConfig {
        &self.inner.config
    }

    /// Handle of the runtime transfers run on.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Discovers the size of `url`.
    ///
    /// # Errors
    ///
    /// Precondition errors for a bad URL or options, transport errors from the
    /// HEAD request, and [`DownloadError::Closed`] after `close`.
    pub async fn probe(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<ResourceSize, DownloadError> {
        self.inner.probe(url, options).await
    }

    /// Blocking form of [`probe`](Self::probe).
    ///
    /// # Errors
    ///
    /// See [`probe`](Self::probe).
    pub fn probe_blocking(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<ResourceSize, DownloadError> {
        let inner = Arc::clone(&self.inner);
        let (url, options) = (url.to_string(), options.clone());
        self.run_blocking(async move { inner.probe(&url, &options).await })
    }

    /// Starts one transfer and returns its chunk stream.
    ///
    /// Probing happens before this returns, so transport failures of the probe
    /// surface here rather than as a stream item. No file is opened; writing
    /// the chunks is the caller's job.
    ///
    /// # Errors
    ///
    /// Precondition errors, probe transport errors, and
    /// [`DownloadError::Closed`].
    pub async fn download(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<ChunkStream, DownloadError> {
        self.download_transfer(&TransferRequest::new(url).with_options(options.clone()))
            .await
    }

    /// Like [`download`](Self::download) with per-transfer worker limits.
    ///
    /// # Errors
    ///
    /// See [`download`](Self::download).
    pub async fn download_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<ChunkStream, DownloadError> {
        self.inner.ensure_open()?;
        let token = self.inner.shutdown.child_token();
        self.inner.open_stream(request, &token).await
    }

    /// Blocking form of [`download`](Self::download): an iterator of chunks.
    ///
    /// # Errors
    ///
    /// See [`download`](Self::download).
    pub fn download_blocking(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<BlockingChunks, DownloadError> {
        let inner = Arc::clone(&self.inner);
        let request = TransferRequest::new(url).with_options(options.clone());
        let stream = self.run_blocking(async move {
            inner.ensure_open()?;
            let token = inner.shutdown.child_token();
            inner.open_stream(&request, &token).await
        })?;
        Ok(BlockingChunks::forward(&self.inner.handle, stream))
    }

    /// Downloads the whole resource into memory.
    ///
    /// # Errors
    ///
    /// Any error of [`download`](Self::download) or of the stream.
    pub async fn get(&self, url: &str, options: &RequestOptions) -> Result<Bytes, DownloadError> {
        self.inner.get(TransferRequest::new(url).with_options(options.clone())).await
    }

    /// Blocking form of [`get`](Self::get).
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub fn get_blocking(&self, url: &str, options: &RequestOptions) -> Result<Bytes, DownloadError> {
        let inner = Arc::clone(&self.inner);
        let request = TransferRequest::new(url).with_options(options.clone());
        self.run_blocking(async move { inner.get(request).await })
    }

    /// Downloads into `sink`. A file created for the transfer is removed if
    /// the transfer fails or is cancelled.
    ///
    /// # Errors
    ///
    /// [`DownloadError::InvalidTarget`] before any network call for an unusable
    /// file path, plus every error of [`download`](Self::download).
    pub async fn save(
        &self,
        url: &str,
        options: &RequestOptions,
        sink: Sink,
    ) -> Result<SaveReport, DownloadError> {
        self.save_transfer(TransferRequest::new(url).with_options(options.clone()), sink)
            .await
    }

    /// Like [`save`](Self::save) with per-transfer worker limits.
    ///
    /// # Errors
    ///
    /// See [`save`](Self::save).
    pub async fn save_transfer(
        &self,
        request: TransferRequest,
        sink: Sink,
    ) -> Result<SaveReport, DownloadError> {
        self.inner.save(request, sink).await
    }

    /// Blocking form of [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// See [`save`](Self::save).
    pub fn save_blocking(
        &self,
        url: &str,
        options: &RequestOptions,
        sink: Sink,
    ) -> Result<SaveReport, DownloadError> {
        let inner = Arc::clone(&self.inner);
        let request = TransferRequest::new(url).with_options(options.clone());
        self.run_blocking(async move { inner.save(request, sink).await })
    }

    /// Starts a session in the background and returns its handle at once.
    ///
    /// Validation of the request and the sink happens here, synchronously;
    /// everything else, including the probe, runs on the runtime and is
    /// reported through the handle.
    ///
    /// # Errors
    ///
    /// Precondition errors and [`DownloadError::Closed`].
    pub fn start(&self, request: TransferRequest, sink: Sink) -> Result<SessionHandle, DownloadError> {
        self.inner.ensure_open()?;
        request.validate(&self.inner.config)?;
        sink.validate()?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let destination = sink.describe();
        info!(session = id, url = %request.url, sink = %destination, "session started");
        let shared = Arc::new(SessionShared::new(
            id,
            request.url.clone(),
            destination,
            self.inner.shutdown.child_token(),
        ));
        let handle = SessionHandle::new(Arc::clone(&shared));
        self.inner.sessions.insert(id, handle.clone());

        let inner = Arc::clone(&self.inner);
        self.inner
            .handle
            .spawn(async move { inner.run_session(shared, request, sink).await });
        Ok(handle)
    }

    /// Cancels one session. Other sessions are unaffected; repeated calls and
    /// calls on ended sessions do nothing.
    pub fn cancel(&self, session: &SessionHandle) {
        session.cancel();
    }

    /// Cancels every live session.
    pub fn cancel_all(&self) {
        for entry in &self.inner.sessions {
            entry.value().cancel();
        }
    }

    /// Live sessions, oldest first. Sessions leave this list when they end.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionHandle> {
        let mut sessions: Vec<SessionHandle> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by_key(SessionHandle::id);
        sessions
    }

    /// Looks up a live session.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<SessionHandle> {
        self.inner.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Blocks until `session` ends.
    #[must_use]
    pub fn wait_blocking(&self, session: &SessionHandle) -> SessionOutcome {
        let session = session.clone();
        self.run_blocking(async move { Ok(session.wait().await) })
            .unwrap_or(SessionOutcome::Cancelled)
    }

    /// Cancels every session, waits briefly for them to clean up, then shuts
    /// down an owned runtime. With a borrowed runtime it only cancels.
    pub fn close(mut self) {
        let sessions = self.begin_close();
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        runtime.spawn(async move {
            await_sessions(sessions).await;
            let _ = done_tx.send(());
        });
        let _ = done_rx.blocking_recv();
        runtime.shutdown_timeout(CLOSE_GRACE);
        info!("downloader closed");
    }

    /// Async form of [`close`](Self::close) for callers inside a runtime.
    pub async fn close_async(mut self) {
        let sessions = self.begin_close();
        await_sessions(sessions).await;
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        info!("downloader closed");
    }

    fn begin_close(&self) -> Vec<SessionHandle> {
        let sessions = self.sessions();
        debug!(sessions = sessions.len(), "closing downloader");
        self.inner.shutdown.cancel();
        sessions
    }

    fn run_blocking<T, F>(&self, future: F) -> Result<T, DownloadError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, DownloadError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.inner.handle.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.blocking_recv().map_err(|_| DownloadError::Closed)?
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn await_sessions(sessions: Vec<SessionHandle>) {
    let all = futures_util::future::join_all(sessions.iter().map(SessionHandle::wait));
    if tokio::time::timeout(CLOSE_GRACE, all).await.is_err() {
        warn!("sessions still running after close grace period");
    }
}

impl Inner {
    fn ensure_open(&self) -> Result<(), DownloadError> {
        if self.shutdown.is_cancelled() {
            return Err(DownloadError::Closed);
        }
        Ok(())
    }

    #[instrument(skip(self, options), fields(url = %url))]
    async fn probe(&self, url: &str, options: &RequestOptions) -> Result<ResourceSize, DownloadError> {
        self.ensure_open()?;
        parse_http_url(url)?;
        options.validate()?;
        let client = self.client.for_options(options)?;
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(DownloadError::Closed),
            size = probe(&client, url, options) => size,
        }
    }

    /// Probe, plan and launch workers under `token`.
    #[instrument(skip(self, request, token), fields(url = %request.url))]
    async fn open_stream(
        &self,
        request: &TransferRequest,
        token: &CancellationToken,
    ) -> Result<ChunkStream, DownloadError> {
        request.validate(&self.config)?;
        let client = self.client.for_options(&request.options)?;

        let size = tokio::select! {
            biased;
            () = token.cancelled() => return Err(DownloadError::cancelled(&request.url)),
            size = probe(&client, &request.url, &request.options) => size?,
        };

        let (max_workers, min_bytes_per_worker) = request.limits(&self.config);
        let fetch_plan = plan(size.as_plan_len(), max_workers, min_bytes_per_worker);
        debug!(?size, workers = fetch_plan.worker_count(), "transfer planned");

        Ok(ChunkStream::spawn(
            &self.handle,
            client,
            request.url.clone(),
            request.options.clone(),
            &fetch_plan,
            size,
            self.config.read_chunk_size,
            token,
        ))
    }

    async fn get(&self, request: TransferRequest) -> Result<Bytes, DownloadError> {
        let memory = MemorySink::new();
        self.save(request, Sink::Memory(memory.clone())).await?;
        Ok(Bytes::from(memory.contents()))
    }

    async fn save(&self, request: TransferRequest, sink: Sink) -> Result<SaveReport, DownloadError> {
        self.ensure_open()?;
        request.validate(&self.config)?;
        sink.validate()?;
        let token = self.shutdown.child_token();
        self.transfer(&request, sink, &token, None).await
    }

    /// Streams one transfer into `sink`, updating `session` as bytes land.
    async fn transfer(
        &self,
        request: &TransferRequest,
        sink: Sink,
        token: &CancellationToken,
        session: Option<&SessionShared>,
    ) -> Result<SaveReport, DownloadError> {
        let mut stream = self.open_stream(request, token).await?;
        if let Some(session) = session {
            session.set_total(stream.total_size());
        }
        let mut open = sink.open().await?;

        let written = match pump(&mut stream, &mut open, session).await {
            Ok(()) => open.finish().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(path) => Ok(SaveReport {
                url: request.url.clone(),
                path,
                bytes: stream.delivered(),
                total_size: stream.total_size(),
                workers: stream.worker_count(),
            }),
            Err(e) => {
                stream.cancel();
                open.discard().await;
                Err(e)
            }
        }
    }

    async fn run_session(
        self: Arc<Self>,
        shared: Arc<SessionShared>,
        request: TransferRequest,
        sink: Sink,
    ) {
        let id = shared.id();
        shared.transition(SessionState::Running);
        let token = shared.cancel_token().clone();

        match self.transfer(&request, sink, &token, Some(&shared)).await {
            Ok(report) => {
                shared.transition(SessionState::Finished);
                info!(session = id, url = %request.url, bytes = report.bytes, "session finished");
            }
            Err(e) if e.is_cancelled() => {
                shared.transition(SessionState::Cancelled);
                info!(session = id, url = %request.url, "session cancelled");
            }
            Err(e) => {
                warn!(session = id, url = %request.url, error = %e, "session failed");
                shared.fail(e);
            }
        }
        self.sessions.remove(&id);
    }
}

async fn pump(
    stream: &mut ChunkStream,
    sink: &mut OpenSink,
    session: Option<&SessionShared>,
) -> Result<(), DownloadError> {
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        sink.write(&chunk).await?;
        if let Some(session) = session {
            session.add_downloaded(chunk.len());
        }
    }
    Ok(())
}

#[derive(Debug)]
enum Forwarded {
    Item(Result<Chunk, DownloadError>),
    End,
}

/// Blocking iterator over a transfer's chunks.
///
/// A runtime task forwards the [`ChunkStream`]; dropping the iterator stops
/// the transfer. If the runtime goes away before the stream ended, the last
/// item is [`DownloadError::Closed`] rather than a silent end.
#[derive(Debug)]
pub struct BlockingChunks {
    receiver: mpsc::Receiver<Forwarded>,
    cancel: CancellationToken,
    total_size: ResourceSize,
    worker_count: usize,
    done: bool,
}

impl BlockingChunks {
    fn forward(handle: &Handle, mut stream: ChunkStream) -> Self {
        let (sender, receiver) = mpsc::channel(FAN_IN_CAPACITY);
        let cancel = stream.cancellation_token().clone();
        let total_size = stream.total_size();
        let worker_count = stream.worker_count();
        handle.spawn(async move {
            loop {
                let item = tokio::select! {
                    () = sender.closed() => break,
                    item = stream.next() => item,
                };
                let event = item.map_or(Forwarded::End, Forwarded::Item);
                let end = matches!(event, Forwarded::End);
                if sender.send(event).await.is_err() || end {
                    break;
                }
            }
        });
        Self {
            receiver,
            cancel,
            total_size,
            worker_count,
            done: false,
        }
    }

    #[must_use]
    pub fn total_size(&self) -> ResourceSize {
        self.total_size
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Stops the transfer; the next item is [`DownloadError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Iterator for BlockingChunks {
    type Item = Result<Chunk, DownloadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.receiver.blocking_recv() {
            Some(Forwarded::Item(item)) => {
                self.done = item.is_err();
                Some(item)
            }
            Some(Forwarded::End) => {
                self.done = true;
                None
            }
            None => {
                self.done = true;
                Some(Err(DownloadError::Closed))
            }
        }
    }
}

impl Drop for BlockingChunks {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
