//! The resolve processor: seq id to canonical metadata.

use crate::context::GatewayContext;
use crate::coverage::CoverageItem;
use crate::processor::*;
use crate::request_ctx::RequestContext;
use crate::resolver::*;
use seqgate_api::*;
use std::sync::Arc;

const NAME: &str = "resolve";

/// Creates [ResolveProcessor]s.
#[derive(Debug)]
pub struct ResolveProcessorFactory {}

impl ResolveProcessorFactory {
    /// Construct a new ResolveProcessorFactory.
    pub fn create() -> DynProcessorFactory {
        Arc::new(Self {})
    }
}

impl ProcessorFactory for ResolveProcessorFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn can_process(&self, request: &Request, _gw: &GatewayContext) -> bool {
        matches!(request.kind, RequestKind::Resolve { .. })
    }

    fn create(
        &self,
        request: &Request,
        priority: Priority,
        _gw: &GatewayContext,
    ) -> AnyProcessor {
        ResolveProcessor::new(request, priority).into()
    }
}

/// Answers resolve requests with one bioseq info record.
#[derive(Debug)]
pub struct ResolveProcessor {
    base: ProcessorBase,
    resolver: Option<Resolver>,
    all_info: bool,
}

impl ResolveProcessor {
    fn new(request: &Request, priority: Priority) -> Self {
        let (resolver, all_info) = match &request.kind {
            RequestKind::Resolve { seq_id, all_info } => {
                (Some(Resolver::new(seq_id.clone(), false)), *all_info)
            }
            _ => (None, false),
        };
        Self {
            base: ProcessorBase::new(NAME, priority),
            resolver,
            all_info,
        }
    }

    fn on_events(&mut self, ctx: &mut RequestContext, events: Vec<ResolveEvent>) {
        for evt in events {
            match evt {
                ResolveEvent::GoodData => ctx
                    .signal_start_processing(self.base.priority(), NAME),
                ResolveEvent::Resolved(info) => self.on_resolved(ctx, info),
                ResolveEvent::Failed(err) => self.base.fail(ctx, err),
            }
        }
    }

    fn on_resolved(&mut self, ctx: &mut RequestContext, info: BioseqInfo) {
        let claim = ctx
            .lock()
            .coverage
            .register(CoverageItem::BioseqInfo, self.base.priority());
        if claim.should_emit() {
            let record = if self.all_info { info } else { trim(info) };
            ctx.emit(ReplyChunk::BioseqInfo { record });
        }
        self.base.finish(ctx, ProcessorStatus::Found);
    }
}

/// Keep only the identifying fields.
fn trim(info: BioseqInfo) -> BioseqInfo {
    BioseqInfo {
        name: None,
        length: 0,
        mol: 0,
        tax_id: 0,
        hash: 0,
        date_changed: 0,
        seq_ids: Vec::new(),
        ..info
    }
}

impl Processor for ResolveProcessor {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn priority(&self) -> Priority {
        self.base.priority()
    }

    fn process(&mut self, ctx: &mut RequestContext) {
        let Some(resolver) = self.resolver.as_mut() else {
            self.base.fail(
                ctx,
                GwError::inconsistency("resolve processor for a non-resolve request"),
            );
            return;
        };
        let events = resolver.start(ctx);
        self.on_events(ctx, events);
    }

    fn process_event(&mut self, ctx: &mut RequestContext) {
        if self.base.is_done() || ctx.is_canceled() {
            return;
        }
        if let Some(resolver) = self.resolver.as_mut() {
            let events = resolver.poll(ctx);
            self.on_events(ctx, events);
        }
    }

    fn status(&self) -> &ProcessorStatus {
        self.base.status()
    }

    fn cancel(&mut self, _ctx: &mut RequestContext) {
        if let Some(resolver) = self.resolver.as_mut() {
            resolver.cancel();
        }
        self.base.cancel();
    }
}
