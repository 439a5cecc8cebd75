//! The processor capability interface.
//!
//! A processor answers one request. The dispatcher calls
//! [Processor::process] exactly once, then [Processor::process_event]
//! every time the request is woken (a fetch task completed, the reply sink
//! drained, or a poll interval elapsed) until [Processor::status] is
//! terminal. Processors are synchronous state machines: they start fetch
//! tasks and poll them, they never block.

use crate::context::GatewayContext;
use crate::factories::*;
use crate::request_ctx::RequestContext;
use seqgate_api::*;
use std::sync::Arc;

/// A request processor.
pub trait Processor: Send {
    /// Name for logs and trace messages.
    fn name(&self) -> &str;

    /// Position in the chain, lower is more authoritative.
    fn priority(&self) -> Priority;

    /// Begin work. Called exactly once.
    fn process(&mut self, ctx: &mut RequestContext);

    /// Continue work after a wake-up.
    fn process_event(&mut self, ctx: &mut RequestContext);

    /// Current status.
    fn status(&self) -> &ProcessorStatus;

    /// Abort all outstanding work. The status becomes
    /// [ProcessorStatus::Canceled] unless it already was terminal.
    fn cancel(&mut self, ctx: &mut RequestContext);
}

/// Creates processors for the requests it can serve.
pub trait ProcessorFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Name of the processors this factory creates.
    fn name(&self) -> &str;

    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &config::Config) -> GwResult<()> {
        let _ = config;
        Ok(())
    }

    /// True if a processor of this kind could serve the request.
    fn can_process(&self, request: &Request, gw: &GatewayContext) -> bool;

    /// Create a processor for the request.
    fn create(
        &self,
        request: &Request,
        priority: Priority,
        gw: &GatewayContext,
    ) -> AnyProcessor;
}

/// Trait object [ProcessorFactory].
pub type DynProcessorFactory = Arc<dyn ProcessorFactory>;

/// State every processor carries.
#[derive(Debug)]
pub struct ProcessorBase {
    name: Arc<str>,
    priority: Priority,
    status: ProcessorStatus,
}

impl ProcessorBase {
    /// A base in the in-progress state.
    pub fn new(name: &str, priority: Priority) -> Self {
        Self {
            name: name.into(),
            priority,
            status: ProcessorStatus::InProgress,
        }
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Status.
    pub fn status(&self) -> &ProcessorStatus {
        &self.status
    }

    /// True once terminal.
    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    /// Set a terminal status. The first terminal status sticks.
    pub fn finish(&mut self, ctx: &mut RequestContext, status: ProcessorStatus) {
        if self.status.is_terminal() {
            return;
        }
        tracing::debug!(processor = %self.name, %status, "processor done");
        ctx.trace(&self.name, format_args!("finished: {status}"));
        self.status = status;
    }

    /// Finish with an error: report it to the client, count it, log it.
    pub fn fail(&mut self, ctx: &mut RequestContext, err: GwError) {
        if err.is_not_found() {
            self.finish(ctx, ProcessorStatus::NotFound);
            return;
        }
        match &err {
            GwError::Inconsistency { .. } => {
                tracing::error!(processor = %self.name, ?err, "inconsistency")
            }
            GwError::Client { .. } => {
                tracing::debug!(processor = %self.name, ?err, "bad request")
            }
            _ => tracing::warn!(processor = %self.name, ?err, "failed"),
        }
        ctx.error_message(&self.name, &err);
        self.finish(ctx, ProcessorStatus::Error(err));
    }

    /// Mark canceled.
    pub fn cancel(&mut self) {
        if !self.status.is_terminal() {
            self.status = ProcessorStatus::Canceled;
        }
    }
}

macro_rules! any_processor {
    ($($(#[$m:meta])* $v:ident($t:ty),)*) => {
        /// Every processor kind the gateway ships.
        #[derive(Debug)]
        pub enum AnyProcessor {
            $($(#[$m])* $v($t),)*
        }

        $(impl From<$t> for AnyProcessor {
            fn from(p: $t) -> Self {
                Self::$v(p)
            }
        })*

        impl Processor for AnyProcessor {
            fn name(&self) -> &str {
                match self { $(Self::$v(p) => p.name(),)* }
            }

            fn priority(&self) -> Priority {
                match self { $(Self::$v(p) => p.priority(),)* }
            }

            fn process(&mut self, ctx: &mut RequestContext) {
                match self { $(Self::$v(p) => p.process(ctx),)* }
            }

            fn process_event(&mut self, ctx: &mut RequestContext) {
                match self { $(Self::$v(p) => p.process_event(ctx),)* }
            }

            fn status(&self) -> &ProcessorStatus {
                match self { $(Self::$v(p) => p.status(),)* }
            }

            fn cancel(&mut self, ctx: &mut RequestContext) {
                match self { $(Self::$v(p) => p.cancel(ctx),)* }
            }
        }
    };
}

any_processor! {
    /// Resolve requests.
    Resolve(ResolveProcessor),
    /// Get blob by seq id.
    GetBlob(GetBlobProcessor),
    /// Get blob by blob id.
    BlobByKey(BlobByKeyProcessor),
    /// Named annotations.
    Annot(AnnotProcessor),
    /// One chunk of a split blob.
    TseChunk(TseChunkProcessor),
    /// Accession history.
    History(HistoryProcessor),
    /// Identical protein groups.
    IpgResolve(IpgResolveProcessor),
}
