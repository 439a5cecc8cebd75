//! A reply sink writing json lines to stdout.

use seqgate_api::*;
use std::collections::VecDeque;
use std::io::Write;

/// Writes every chunk of one request as a json line tagged with the
/// request number. Lines of concurrent requests interleave, lines of one
/// request keep their order.
#[derive(Debug)]
pub struct StdoutReplySink {
    request_no: u64,
    queue: VecDeque<ReplyChunk>,
    finished: bool,
}

impl StdoutReplySink {
    /// A sink for request `request_no`.
    pub fn new(request_no: u64) -> Self {
        Self {
            request_no,
            queue: VecDeque::new(),
            finished: false,
        }
    }

    /// Write a line that is not part of a reply, e.g. a parse failure.
    pub fn write_line(value: &serde_json::Value) -> GwResult<()> {
        let mut out = std::io::stdout().lock();
        serde_json::to_writer(&mut out, value)
            .map_err(|e| GwError::other_src("encode reply line", e))?;
        out.write_all(b"\n")
            .map_err(|e| GwError::other_src("stdout closed", e))
    }
}

impl ReplySink for StdoutReplySink {
    fn prepare(&mut self, chunk: ReplyChunk) {
        if matches!(chunk, ReplyChunk::Completion { .. }) {
            self.finished = true;
        }
        self.queue.push_back(chunk);
    }

    fn flush(&mut self) -> GwResult<()> {
        while let Some(chunk) = self.queue.pop_front() {
            Self::write_line(&serde_json::json!({
                "request": self.request_no,
                "chunk": chunk,
            }))?;
        }
        std::io::stdout()
            .flush()
            .map_err(|e| GwError::other_src("stdout closed", e))
    }

    fn is_output_ready(&self) -> bool {
        true
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    fn writable(&self) -> BoxFut<'_, ()> {
        Box::pin(std::future::ready(()))
    }
}
