//! State of one in-flight request, shared by the processors of its chain.

use crate::context::*;
use crate::coverage::CoverageSet;
use crate::fetch::{CancelHandle, EventSignal};
use seqgate_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Split history memo key: (sat, info key, split version).
pub type SplitKey = (i32, i32, i32);

/// Request state guarded by the request lock token.
#[derive(Debug, Default)]
pub struct SharedRequestState {
    /// Which items were answered by whom.
    pub coverage: CoverageSet,

    /// Split history looked up during this request.
    pub split_history: HashMap<SplitKey, SplitHistoryRecord>,

    /// The first processor that received plausible data.
    pub first_producer: Option<(Priority, String)>,
}

/// One in-flight request: the request itself, the gateway, the reply sink
/// and the cancellation / wake-up plumbing.
///
/// All output goes through [RequestContext::emit] so nothing reaches the
/// sink after cancellation.
pub struct RequestContext {
    request: Arc<Request>,
    gw: Arc<GatewayContext>,
    sink: DynReplySink,
    cancel: CancelHandle,
    shared: Arc<Mutex<SharedRequestState>>,
    output_stalled: bool,
    started_at: Instant,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.request)
            .field("canceled", &self.cancel.is_canceled())
            .finish()
    }
}

impl RequestContext {
    /// Construct a new request context.
    pub fn new(
        request: Arc<Request>,
        gw: Arc<GatewayContext>,
        sink: DynReplySink,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            request,
            gw,
            sink,
            cancel,
            shared: Arc::new(Mutex::new(SharedRequestState::default())),
            output_stalled: false,
            started_at: Instant::now(),
        }
    }

    /// The request.
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// The gateway.
    pub fn gw(&self) -> &Arc<GatewayContext> {
        &self.gw
    }

    /// Shortcut to the backend store.
    pub fn backend(&self) -> DynBackendStore {
        self.gw.backend().clone()
    }

    /// The event signal fetch tasks of this request notify.
    pub fn signal(&self) -> &EventSignal {
        self.cancel.signal()
    }

    /// The cancel handle of this request.
    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// True once the request was canceled.
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// Take the request lock token.
    pub fn lock(&self) -> MutexGuard<'_, SharedRequestState> {
        self.shared.lock().unwrap()
    }

    /// Deadline of one backend operation.
    pub fn op_timeout(&self) -> Duration {
        self.gw.backend_op_timeout()
    }

    /// The exclude cache resend window for this request.
    pub fn resend_timeout(&self) -> Duration {
        match self.request.options.resend_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.gw.exclude_cache().resend_timeout(),
        }
    }

    /// Time since the request started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Queue an output chunk. Dropped once the request is canceled.
    pub fn emit(&mut self, chunk: ReplyChunk) {
        if self.cancel.is_canceled() {
            return;
        }
        self.sink.prepare(chunk);
    }

    /// Queue a message.
    pub fn message(&mut self, severity: Severity, status: u16, text: String) {
        self.emit(ReplyChunk::Message {
            severity,
            status,
            text,
        });
    }

    /// Report an error from a processor stage as a reply message. Called
    /// once per error: the stage has already taken it from its fetch task.
    pub fn error_message(&mut self, processor: &str, err: &GwError) {
        let severity = match err {
            GwError::NotFound { .. } => Severity::Info,
            GwError::Inconsistency { .. } => Severity::Critical,
            _ => Severity::Error,
        };
        self.message(
            severity,
            err.status_code(),
            format!("{processor}: {err}"),
        );
    }

    /// Queue a trace message, if the client asked for tracing.
    pub fn trace(&mut self, processor: &str, text: impl std::fmt::Display) {
        tracing::trace!(processor, "{text}");
        if self.request.options.trace {
            let text = format!(
                "[{:.3}ms] {processor}: {text}",
                self.elapsed().as_secs_f64() * 1000.0
            );
            self.message(Severity::Trace, 200, text);
        }
    }

    /// Record that a processor received plausible data. The first such
    /// processor is remembered for diagnostics.
    pub fn signal_start_processing(&mut self, priority: Priority, name: &str) {
        let first = {
            let mut lock = self.lock();
            if lock.first_producer.is_none() {
                lock.first_producer = Some((priority, name.to_string()));
                true
            } else {
                false
            }
        };
        if first {
            self.trace(name, "first to receive data");
        }
    }

    /// True if the sink can take more output. A `false` answer is
    /// remembered, so the driver knows to wait for the sink.
    pub fn output_ready(&mut self) -> bool {
        let ready = self.sink.is_output_ready();
        if !ready {
            self.output_stalled = true;
        }
        ready
    }

    /// Clear and return the output stall flag.
    pub(crate) fn take_output_stalled(&mut self) -> bool {
        std::mem::take(&mut self.output_stalled)
    }

    /// The sink, for the driver.
    pub(crate) fn sink(&self) -> &DynReplySink {
        &self.sink
    }

    /// Push queued output towards the client. A failed flush means the
    /// client is gone, which cancels the request.
    pub fn flush(&mut self) {
        if let Err(err) = self.sink.flush() {
            if !self.cancel.is_canceled() {
                tracing::info!(?err, "client gone, canceling request");
                self.cancel.cancel();
            }
        }
    }

    /// Queue the completion and flush. Used by the driver only.
    pub(crate) fn finish(&mut self, status: u16) {
        if self.cancel.is_canceled() {
            return;
        }
        self.sink.prepare_completion(status);
        self.flush();
    }
}
