//! Non-blocking wrappers around single backend operations.
//!
//! A [FetchTask] owns one spawned backend future. The request driver never
//! awaits it directly: the spawned task stores its outcome and pokes the
//! request's [EventSignal], the driver then calls into the owning processor
//! which [poll](FetchTask::poll)s the task and consumes the result.
//!
//! A [ChunkStreamTask] does the same for a blob data stream, forwarding
//! pieces as they arrive.

use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use seqgate_api::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

/// Wakes the loop driving one request.
#[derive(Debug, Clone, Default)]
pub struct EventSignal(Arc<Notify>);

impl EventSignal {
    /// Construct a new signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiter. If nobody waits right now the next wait returns
    /// immediately.
    pub fn notify(&self) {
        self.0.notify_one();
    }

    /// Wait for the next notification.
    pub async fn wait(&self) {
        self.0.notified().await
    }
}

/// Request cancellation flag, shareable with whoever may cancel.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    signal: EventSignal,
}

impl CancelHandle {
    /// Construct a new, not yet canceled, handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the request and wake its driver.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.signal.notify();
    }

    /// True once [CancelHandle::cancel] was called.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The event signal of the request this handle belongs to.
    pub fn signal(&self) -> &EventSignal {
        &self.signal
    }
}

/// Lifecycle of a [FetchTask].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Not started.
    Created,
    /// The backend operation is running.
    Waiting,
    /// A result is available, see [FetchTask::take_data].
    DataReady,
    /// The operation failed, see [FetchTask::take_error].
    Error,
    /// The result or error was consumed, or the task was canceled.
    Finished,
}

/// One outstanding backend operation.
#[derive(Debug)]
pub struct FetchTask<T: Send + 'static> {
    what: Arc<str>,
    state: FetchState,
    rx: Option<oneshot::Receiver<GwResult<T>>>,
    data: Option<T>,
    error: Option<GwError>,
    task: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Drop for FetchTask<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T: Send + 'static> FetchTask<T> {
    /// A task in the [FetchState::Created] state. `what` names the
    /// operation in errors and logs.
    pub fn new(what: impl std::fmt::Display) -> Self {
        Self {
            what: what.to_string().into_boxed_str().into(),
            state: FetchState::Created,
            rx: None,
            data: None,
            error: None,
            task: None,
        }
    }

    /// Construct and immediately [wait](FetchTask::wait).
    pub fn start<F>(
        what: impl std::fmt::Display,
        signal: &EventSignal,
        timeout: Duration,
        fut: F,
    ) -> Self
    where
        F: std::future::Future<Output = GwResult<T>> + Send + 'static,
    {
        let mut this = Self::new(what);
        this.wait(signal, timeout, fut);
        this
    }

    /// Spawn the backend operation. Fire and forget: completion or a
    /// timeout is reported through `signal`. Ignored unless the task is
    /// in the [FetchState::Created] state.
    pub fn wait<F>(&mut self, signal: &EventSignal, timeout: Duration, fut: F)
    where
        F: std::future::Future<Output = GwResult<T>> + Send + 'static,
    {
        if self.state != FetchState::Created {
            tracing::warn!(what = %self.what, "fetch task started twice");
            return;
        }

        let (tx, rx) = oneshot::channel();
        let signal = signal.clone();
        let what = self.what.clone();

        self.task = Some(tokio::spawn(async move {
            let res = match tokio::time::timeout(timeout, fut).await {
                Ok(res) => res,
                Err(_) => Err(GwError::backend_timeout(format!(
                    "{what} exceeded {}ms",
                    timeout.as_millis()
                ))),
            };
            // the receiver is gone if the task was canceled
            let _ = tx.send(res);
            signal.notify();
        }));
        self.rx = Some(rx);
        self.state = FetchState::Waiting;
    }

    /// Pick up the outcome if the operation has completed. Never blocks.
    pub fn poll(&mut self) -> FetchState {
        if self.state != FetchState::Waiting {
            return self.state;
        }

        let Some(rx) = self.rx.as_mut() else {
            return self.state;
        };

        match rx.try_recv() {
            Ok(Ok(data)) => {
                self.data = Some(data);
                self.state = FetchState::DataReady;
            }
            Ok(Err(err)) => {
                self.error = Some(err);
                self.state = FetchState::Error;
            }
            Err(oneshot::error::TryRecvError::Empty) => return self.state,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.error = Some(GwError::inconsistency(format!(
                    "{} driver dropped without a result",
                    self.what
                )));
                self.state = FetchState::Error;
            }
        }

        self.rx = None;
        self.task = None;
        self.state
    }

    /// Consume the result, moving to [FetchState::Finished].
    pub fn take_data(&mut self) -> Option<T> {
        let out = self.data.take();
        if out.is_some() {
            self.state = FetchState::Finished;
        }
        out
    }

    /// Consume the error, moving to [FetchState::Finished]. The error is
    /// cleared so it is reported exactly once.
    pub fn take_error(&mut self) -> Option<GwError> {
        let out = self.error.take();
        if out.is_some() {
            self.state = FetchState::Finished;
        }
        out
    }

    /// Abort the operation, dropping any result or error.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx = None;
        self.data = None;
        self.error = None;
        self.state = FetchState::Finished;
    }

    /// Current state, without polling.
    pub fn state(&self) -> FetchState {
        self.state
    }

    /// What this task fetches.
    pub fn what(&self) -> &str {
        &self.what
    }
}

enum StreamEvent {
    Chunk(BlobChunk),
    Failed(GwError),
    End,
}

/// How many pieces a [ChunkStreamTask] reads ahead of its consumer.
pub const STREAM_WINDOW: usize = 16;

/// A running blob data stream.
///
/// Pieces are forwarded as they arrive, in whatever order the backend
/// yields them. Waiting for the next piece is bounded by the operation
/// timeout. The backend is read at most [STREAM_WINDOW] pieces ahead of
/// the consumer, a consumer that stops polling stops the stream.
pub struct ChunkStreamTask {
    what: Arc<str>,
    rx: mpsc::Receiver<StreamEvent>,
    ready: VecDeque<BlobChunk>,
    error: Option<GwError>,
    ended: bool,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ChunkStreamTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStreamTask")
            .field("what", &self.what)
            .field("ready", &self.ready.len())
            .field("ended", &self.ended)
            .finish()
    }
}

impl Drop for ChunkStreamTask {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl ChunkStreamTask {
    /// Spawn a task draining `stream`.
    pub fn start(
        what: impl std::fmt::Display,
        signal: &EventSignal,
        timeout: Duration,
        mut stream: BoxStream<'static, GwResult<BlobChunk>>,
    ) -> Self {
        let what: Arc<str> = what.to_string().into_boxed_str().into();
        let (tx, rx) = mpsc::channel(STREAM_WINDOW);
        let signal = signal.clone();
        let what2 = what.clone();

        let task = tokio::spawn(async move {
            loop {
                let evt = match tokio::time::timeout(timeout, stream.next())
                    .await
                {
                    Ok(Some(Ok(chunk))) => StreamEvent::Chunk(chunk),
                    Ok(Some(Err(err))) => StreamEvent::Failed(err),
                    Ok(None) => StreamEvent::End,
                    Err(_) => StreamEvent::Failed(GwError::backend_timeout(
                        format!(
                            "{what2} stalled for {}ms",
                            timeout.as_millis()
                        ),
                    )),
                };
                let done = !matches!(evt, StreamEvent::Chunk(_));
                if tx.send(evt).await.is_err() {
                    return;
                }
                signal.notify();
                if done {
                    return;
                }
            }
        });

        Self {
            what,
            rx,
            ready: VecDeque::new(),
            error: None,
            ended: false,
            task: Some(task),
        }
    }

    /// Move what arrived so far into the ready queue, up to
    /// [STREAM_WINDOW] pieces. Never blocks.
    pub fn poll(&mut self) {
        if self.ended || self.error.is_some() {
            return;
        }
        while self.ready.len() < STREAM_WINDOW {
            match self.rx.try_recv() {
                Ok(StreamEvent::Chunk(chunk)) => self.ready.push_back(chunk),
                Ok(StreamEvent::Failed(err)) => {
                    self.error = Some(err);
                    self.task = None;
                    return;
                }
                Ok(StreamEvent::End) => {
                    self.ended = true;
                    self.task = None;
                    return;
                }
                Err(mpsc::error::TryRecvError::Empty) => return,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.error = Some(GwError::inconsistency(format!(
                        "{} stream driver dropped",
                        self.what
                    )));
                    self.task = None;
                    return;
                }
            }
        }
    }

    /// Take the next received piece.
    pub fn pop_chunk(&mut self) -> Option<BlobChunk> {
        self.ready.pop_front()
    }

    /// Consume the stream error, reported exactly once.
    pub fn take_error(&mut self) -> Option<GwError> {
        self.error.take()
    }

    /// True once the backend reported the end of the stream.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Abort the stream.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.ready.clear();
        self.error = None;
        self.ended = true;
    }

    /// What this stream fetches.
    pub fn what(&self) -> &str {
        &self.what
    }
}

/// Convenience for tests and fixtures: a piece of blob data.
pub fn chunk(chunk_no: u32, data: impl Into<Bytes>) -> BlobChunk {
    BlobChunk {
        chunk_no,
        data: data.into(),
    }
}
