//! Fan-in of every worker's chunks into one consumer-facing stream.
//!
//! Each planned range runs as its own task on the downloader's runtime and
//! reports through a bounded channel: any number of `Chunk` events followed by
//! exactly one terminal `Done` or `Failed`. The stream ends once every worker
//! reported `Done`. The first `Failed` cancels the siblings and becomes the
//! stream's last item. Workers stopped by cancellation send nothing, so the
//! stream never waits on a terminal event that cannot arrive: it watches its
//! own token and the channel closing instead.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::HttpClient;
use super::constants::FAN_IN_CAPACITY;
use super::error::DownloadError;
use super::fetch::{Chunk, ChunkFetcher};
use super::options::RequestOptions;
use super::plan::{ByteRange, FetchPlan};
use super::probe::ResourceSize;

enum WorkerEvent {
    Chunk(Chunk),
    Done,
    Failed(DownloadError),
}

/// What every worker of one transfer shares.
struct WorkerContext {
    client: HttpClient,
    url: String,
    options: RequestOptions,
    chunk_size: usize,
}

/// Interleaved chunks of all workers of one transfer.
///
/// Chunks arrive in arrival order, not offset order; within one worker they
/// are strictly increasing and contiguous. The final item is `Err` when the
/// transfer failed or was cancelled. Dropping the stream cancels and aborts
/// every worker.
pub struct ChunkStream {
    url: String,
    receiver: mpsc::Receiver<WorkerEvent>,
    workers: JoinSet<()>,
    worker_count: usize,
    completed: usize,
    cancel: CancellationToken,
    total_size: ResourceSize,
    delivered: u64,
    finished: bool,
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("url", &self.url)
            .field("worker_count", &self.worker_count)
            .field("completed", &self.completed)
            .field("delivered", &self.delivered)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ChunkStream {
    /// Launches one worker per planned range on `handle`.
    ///
    /// The stream's token is a child of `parent`, so cancelling the session
    /// (or closing the downloader) stops these workers and only these.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        handle: &Handle,
        client: HttpClient,
        url: String,
        options: RequestOptions,
        plan: &FetchPlan,
        total_size: ResourceSize,
        chunk_size: usize,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (sender, receiver) = mpsc::channel(FAN_IN_CAPACITY);
        let context = Arc::new(WorkerContext {
            client,
            url: url.clone(),
            options,
            chunk_size,
        });

        let assignments: Vec<Option<ByteRange>> = match plan.ranges() {
            Some(ranges) => ranges.iter().copied().map(Some).collect(),
            None => vec![None],
        };
        let accept_full_body = plan.is_single_full_range();
        let worker_count = assignments.len();
        debug!(url = %url, workers = worker_count, ?total_size, "launching workers");

        let mut workers = JoinSet::new();
        for (index, range) in assignments.into_iter().enumerate() {
            workers.spawn_on(
                run_worker(
                    Arc::clone(&context),
                    index,
                    range,
                    accept_full_body,
                    sender.clone(),
                    cancel.child_token(),
                ),
                handle,
            );
        }
        drop(sender);

        Self {
            url,
            receiver,
            workers,
            worker_count,
            completed: 0,
            cancel,
            total_size,
            delivered: 0,
            finished: false,
        }
    }

    /// Number of workers the plan launched.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Size reported by the probe.
    #[must_use]
    pub fn total_size(&self) -> ResourceSize {
        self.total_size
    }

    /// Bytes yielded to the consumer so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Stops every worker; the next poll yields [`DownloadError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observed by this stream's workers.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn terminate(&mut self, error: DownloadError) -> Poll<Option<Result<Chunk, DownloadError>>> {
        self.finished = true;
        self.cancel.cancel();
        self.receiver.close();
        Poll::Ready(Some(Err(error)))
    }

    fn poll_panics(&mut self, cx: &mut Context<'_>) -> Option<DownloadError> {
        while let Poll::Ready(Some(joined)) = self.workers.poll_join_next(cx) {
            if let Err(e) = joined
                && e.is_panic()
            {
                warn!(url = %self.url, "worker task panicked");
                return Some(DownloadError::WorkerPanicked {
                    url: self.url.clone(),
                    range: None,
                });
            }
        }
        None
    }
}

impl Stream for ChunkStream {
    type Item = Result<Chunk, DownloadError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }
        if this.cancel.is_cancelled() {
            debug!(url = %this.url, delivered = this.delivered, "transfer cancelled");
            let error = DownloadError::cancelled(&this.url);
            return this.terminate(error);
        }

        loop {
            match this.receiver.poll_recv(cx) {
                Poll::Ready(Some(WorkerEvent::Chunk(chunk))) => {
                    this.delivered += chunk.len();
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Poll::Ready(Some(WorkerEvent::Done)) => {
                    this.completed += 1;
                    if this.completed == this.worker_count {
                        debug!(url = %this.url, bytes = this.delivered, "all workers drained");
                        this.finished = true;
                        return Poll::Ready(None);
                    }
                }
                Poll::Ready(Some(WorkerEvent::Failed(error))) => {
                    warn!(url = %this.url, error = %error, "worker failed; cancelling siblings");
                    return this.terminate(error);
                }
                Poll::Ready(None) => {
                    let error = if this.cancel.is_cancelled() {
                        DownloadError::cancelled(&this.url)
                    } else {
                        DownloadError::WorkerPanicked {
                            url: this.url.clone(),
                            range: None,
                        }
                    };
                    return this.terminate(error);
                }
                Poll::Pending => {
                    if let Some(error) = this.poll_panics(cx) {
                        return this.terminate(error);
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    context: Arc<WorkerContext>,
    index: usize,
    range: Option<ByteRange>,
    accept_full_body: bool,
    sender: mpsc::Sender<WorkerEvent>,
    token: CancellationToken,
) {
    debug!(url = %context.url, worker = index, ?range, "worker started");
    let outcome = tokio::select! {
        biased;
        () = token.cancelled() => {
            debug!(url = %context.url, worker = index, "worker stopped by cancellation");
            return;
        }
        outcome = fetch_range(&context, range, accept_full_body, &sender) => outcome,
    };

    let event = match outcome {
        Ok(true) => WorkerEvent::Done,
        Ok(false) => return,
        Err(error) => WorkerEvent::Failed(error),
    };
    debug!(url = %context.url, worker = index, ok = matches!(event, WorkerEvent::Done), "worker finished");
    // A closed receiver means the consumer is gone; nothing left to report to.
    let _ = sender.send(event).await;
}

/// Streams one range into the channel. `Ok(false)` means the consumer went away.
async fn fetch_range(
    context: &WorkerContext,
    range: Option<ByteRange>,
    accept_full_body: bool,
    sender: &mpsc::Sender<WorkerEvent>,
) -> Result<bool, DownloadError> {
    let mut fetcher = ChunkFetcher::open(
        &context.client,
        &context.url,
        range,
        &context.options,
        context.chunk_size,
        accept_full_body,
    )
    .await?;

    while let Some(chunk) = fetcher.next_chunk().await? {
        if sender.send(WorkerEvent::Chunk(chunk)).await.is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}
