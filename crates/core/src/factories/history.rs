//! The history processor: accession version history of a sequence.

use crate::context::GatewayContext;
use crate::fetch::*;
use crate::processor::*;
use crate::request_ctx::RequestContext;
use crate::resolver::*;
use seqgate_api::*;
use std::sync::Arc;

const NAME: &str = "history";

/// Creates [HistoryProcessor]s.
#[derive(Debug)]
pub struct HistoryProcessorFactory {}

impl HistoryProcessorFactory {
    /// Construct a new HistoryProcessorFactory.
    pub fn create() -> DynProcessorFactory {
        Arc::new(Self {})
    }
}

impl ProcessorFactory for HistoryProcessorFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn can_process(&self, request: &Request, _gw: &GatewayContext) -> bool {
        matches!(request.kind, RequestKind::GetHistory { .. })
    }

    fn create(
        &self,
        request: &Request,
        priority: Priority,
        _gw: &GatewayContext,
    ) -> AnyProcessor {
        let seq_id = match &request.kind {
            RequestKind::GetHistory { seq_id } => Some(seq_id.clone()),
            _ => None,
        };
        HistoryProcessor {
            base: ProcessorBase::new(NAME, priority),
            seq_id,
            stage: Stage::Idle,
        }
        .into()
    }
}

#[derive(Debug)]
enum Stage {
    Idle,
    Resolving(Resolver),
    Fetching(FetchTask<Vec<AccessionHistoryRecord>>),
}

/// Sends the accession history of a sequence, newest first.
#[derive(Debug)]
pub struct HistoryProcessor {
    base: ProcessorBase,
    seq_id: Option<SeqId>,
    stage: Stage,
}

impl HistoryProcessor {
    fn on_events(&mut self, ctx: &mut RequestContext, events: Vec<ResolveEvent>) {
        for evt in events {
            match evt {
                ResolveEvent::GoodData => ctx
                    .signal_start_processing(self.base.priority(), NAME),
                ResolveEvent::Resolved(info) => {
                    let backend = ctx.backend();
                    let (accession, seq_id_type) =
                        (info.accession.clone(), info.seq_id_type);
                    self.stage = Stage::Fetching(FetchTask::start(
                        format!("accession history {accession}"),
                        ctx.signal(),
                        ctx.op_timeout(),
                        async move {
                            backend
                                .fetch_accession_history(accession, seq_id_type)
                                .await
                        },
                    ));
                }
                ResolveEvent::Failed(err) => self.base.fail(ctx, err),
            }
        }
    }

    fn poll_fetch(&mut self, ctx: &mut RequestContext) {
        let Stage::Fetching(task) = &mut self.stage else {
            return;
        };
        match task.poll() {
            FetchState::DataReady => {
                let mut rows = task.take_data().unwrap_or_default();
                self.stage = Stage::Idle;
                if rows.is_empty() {
                    self.base.finish(ctx, ProcessorStatus::NotFound);
                    return;
                }
                rows.sort_by(|a, b| b.version.cmp(&a.version));
                for record in rows {
                    ctx.emit(ReplyChunk::AccessionHistory { record });
                }
                self.base.finish(ctx, ProcessorStatus::Found);
            }
            FetchState::Error => {
                let err = task.take_error().unwrap_or_else(|| {
                    GwError::inconsistency("history fetch lost its error")
                });
                self.stage = Stage::Idle;
                ctx.gw().note_backend_error(&err);
                self.base.fail(ctx, err);
            }
            _ => (),
        }
    }
}

impl Processor for HistoryProcessor {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn priority(&self) -> Priority {
        self.base.priority()
    }

    fn process(&mut self, ctx: &mut RequestContext) {
        let Some(seq_id) = self.seq_id.clone() else {
            self.base.fail(
                ctx,
                GwError::inconsistency("history processor for another request kind"),
            );
            return;
        };
        let mut resolver = Resolver::new(seq_id, false);
        let events = resolver.start(ctx);
        self.stage = Stage::Resolving(resolver);
        self.on_events(ctx, events);
    }

    fn process_event(&mut self, ctx: &mut RequestContext) {
        if self.base.is_done() || ctx.is_canceled() {
            return;
        }
        if let Stage::Resolving(resolver) = &mut self.stage {
            let events = resolver.poll(ctx);
            self.on_events(ctx, events);
            return;
        }
        self.poll_fetch(ctx);
    }

    fn status(&self) -> &ProcessorStatus {
        self.base.status()
    }

    fn cancel(&mut self, _ctx: &mut RequestContext) {
        match &mut self.stage {
            Stage::Resolving(r) => r.cancel(),
            Stage::Fetching(t) => t.cancel(),
            Stage::Idle => (),
        }
        self.stage = Stage::Idle;
        self.base.cancel();
    }
}
