//! Reply sinks that keep the reply in process.
//!
//! - [MemReplySink] records every chunk, for tests and one-shot callers.
//! - [ChannelReplySink] feeds a bounded tokio channel. A full channel
//!   backs up into a local queue, and once that queue reaches its window
//!   the sink reports itself not ready. A dropped receiver is a client
//!   disconnect.

use seqgate_api::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct MemReplyInner {
    chunks: Vec<ReplyChunk>,
    flushes: usize,
    finished: bool,
    disconnected: bool,
}

/// Records the reply. Clones share the same record, so a test keeps one
/// handle and gives the gateway a boxed clone.
#[derive(Debug, Clone, Default)]
pub struct MemReplySink(Arc<Mutex<MemReplyInner>>);

impl MemReplySink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// A boxed clone for the gateway.
    pub fn boxed(&self) -> DynReplySink {
        Box::new(self.clone())
    }

    /// Everything prepared so far.
    pub fn chunks(&self) -> Vec<ReplyChunk> {
        self.0.lock().unwrap().chunks.clone()
    }

    /// The completion status, once prepared.
    pub fn completion(&self) -> Option<u16> {
        self.0.lock().unwrap().chunks.iter().find_map(|c| match c {
            ReplyChunk::Completion { status } => Some(*status),
            _ => None,
        })
    }

    /// Number of flush calls.
    pub fn flush_count(&self) -> usize {
        self.0.lock().unwrap().flushes
    }

    /// Make every later flush fail as if the client went away.
    pub fn disconnect(&self) {
        self.0.lock().unwrap().disconnected = true;
    }
}

impl ReplySink for MemReplySink {
    fn prepare(&mut self, chunk: ReplyChunk) {
        let mut lock = self.0.lock().unwrap();
        if matches!(chunk, ReplyChunk::Completion { .. }) {
            lock.finished = true;
        }
        lock.chunks.push(chunk);
    }

    fn flush(&mut self) -> GwResult<()> {
        let mut lock = self.0.lock().unwrap();
        lock.flushes += 1;
        if lock.disconnected {
            return Err(GwError::other("client disconnected"));
        }
        Ok(())
    }

    fn is_output_ready(&self) -> bool {
        true
    }

    fn is_finished(&self) -> bool {
        self.0.lock().unwrap().finished
    }

    fn is_drained(&self) -> bool {
        true
    }

    fn writable(&self) -> BoxFut<'_, ()> {
        Box::pin(std::future::ready(()))
    }
}

/// Feeds reply chunks into a bounded channel.
#[derive(Debug)]
pub struct ChannelReplySink {
    tx: mpsc::Sender<ReplyChunk>,
    queue: VecDeque<ReplyChunk>,
    window: usize,
    finished: bool,
}

impl ChannelReplySink {
    /// A sink over a channel of `capacity` chunks that reports not ready
    /// once `window` chunks are waiting for channel space.
    pub fn new(
        capacity: usize,
        window: usize,
    ) -> (Self, mpsc::Receiver<ReplyChunk>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                queue: VecDeque::new(),
                window: window.max(1),
                finished: false,
            },
            rx,
        )
    }

    /// Chunks waiting for channel space.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl ReplySink for ChannelReplySink {
    fn prepare(&mut self, chunk: ReplyChunk) {
        if matches!(chunk, ReplyChunk::Completion { .. }) {
            self.finished = true;
        }
        self.queue.push_back(chunk);
    }

    fn flush(&mut self) -> GwResult<()> {
        while let Some(chunk) = self.queue.pop_front() {
            match self.tx.try_send(chunk) {
                Ok(()) => (),
                Err(mpsc::error::TrySendError::Full(chunk)) => {
                    self.queue.push_front(chunk);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.queue.clear();
                    return Err(GwError::other("client disconnected"));
                }
            }
        }
        Ok(())
    }

    fn is_output_ready(&self) -> bool {
        self.queue.len() < self.window
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    fn writable(&self) -> BoxFut<'_, ()> {
        Box::pin(async move {
            // a closed channel resolves at once, the next flush reports it
            if let Ok(permit) = self.tx.reserve().await {
                drop(permit);
            }
        })
    }
}
