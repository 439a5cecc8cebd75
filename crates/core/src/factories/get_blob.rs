//! The get-blob processor: resolve a seq id and send the blob holding it.
//!
//! What is sent depends on the requested [TseOption]:
//!
//! | option  | split blob                 | unsplit blob      |
//! |---------|----------------------------|-------------------|
//! | `None`  | properties                 | properties        |
//! | `Slim`  | split info                 | properties        |
//! | `Smart` | split info                 | whole blob        |
//! | `Whole` | split info and every chunk | whole blob        |
//! | `Orig`  | original blob              | whole blob        |

use crate::context::GatewayContext;
use crate::coverage::CoverageItem;
use crate::factories::blob_send::*;
use crate::processor::*;
use crate::request_ctx::RequestContext;
use crate::resolver::*;
use crate::split::data_chunk_blob_ids;
use seqgate_api::*;
use std::collections::VecDeque;
use std::sync::Arc;

const NAME: &str = "get-blob";

/// Creates [GetBlobProcessor]s.
#[derive(Debug)]
pub struct GetBlobProcessorFactory {}

impl GetBlobProcessorFactory {
    /// Construct a new GetBlobProcessorFactory.
    pub fn create() -> DynProcessorFactory {
        Arc::new(Self {})
    }
}

impl ProcessorFactory for GetBlobProcessorFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn can_process(&self, request: &Request, _gw: &GatewayContext) -> bool {
        matches!(request.kind, RequestKind::GetBlobById { .. })
    }

    fn create(
        &self,
        request: &Request,
        priority: Priority,
        _gw: &GatewayContext,
    ) -> AnyProcessor {
        GetBlobProcessor::new(request, priority).into()
    }
}

#[derive(Debug)]
enum Stage {
    Resolving(Resolver),
    MainProps(BlobSender),
    Sending {
        current: BlobSender,
        queue: VecDeque<BlobSender>,
    },
    Idle,
}

/// Sends the blob of a sequence.
#[derive(Debug)]
pub struct GetBlobProcessor {
    base: ProcessorBase,
    request: Option<(SeqId, TseOption, Option<SeqRange>)>,
    stage: Stage,
}

impl GetBlobProcessor {
    fn new(request: &Request, priority: Priority) -> Self {
        let request = match &request.kind {
            RequestKind::GetBlobById { seq_id, tse, range } => {
                Some((seq_id.clone(), *tse, *range))
            }
            _ => None,
        };
        Self {
            base: ProcessorBase::new(NAME, priority),
            request,
            stage: Stage::Idle,
        }
    }

    fn tse(&self) -> TseOption {
        self.request.as_ref().map(|r| r.1).unwrap_or_default()
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
        if !matches!(self.stage, Stage::Resolving(_)) {
            self.base.fail(
                ctx,
                GwError::inconsistency("resolved while not resolving"),
            );
            return;
        }

        let blob_id = info.blob_id;
        let claim = ctx
            .lock()
            .coverage
            .register(CoverageItem::BioseqInfo, self.base.priority());
        if claim.should_emit() {
            ctx.emit(ReplyChunk::BioseqInfo { record: info });
        }

        let keyspace = match ctx.gw().sat_map().keyspace(blob_id.sat) {
            Ok(ks) => ks,
            Err(err) => {
                self.base.fail(ctx, err);
                return;
            }
        };
        ctx.trace(NAME, format_args!("blob {blob_id} in {keyspace}"));
        self.stage = Stage::MainProps(BlobSender::new(
            NAME,
            blob_id,
            keyspace,
            None,
            SendMode::PropsOnly,
        ));
        self.drive(ctx);
    }

    /// Poll the current sender, moving on for as long as senders finish.
    fn drive(&mut self, ctx: &mut RequestContext) {
        loop {
            if self.base.is_done() {
                return;
            }
            let outcome = match &mut self.stage {
                Stage::MainProps(s) => s.poll(ctx),
                Stage::Sending { current, .. } => current.poll(ctx),
                Stage::Resolving(_) | Stage::Idle => return,
            };
            let Some(outcome) = outcome else {
                return;
            };
            match std::mem::replace(&mut self.stage, Stage::Idle) {
                Stage::MainProps(s) => self.on_main_props(ctx, s, outcome),
                Stage::Sending { current, queue } => {
                    self.on_sent(ctx, current, queue, outcome)
                }
                stage => self.stage = stage,
            }
        }
    }

    fn on_main_props(
        &mut self,
        ctx: &mut RequestContext,
        sender: BlobSender,
        outcome: BlobSendOutcome,
    ) {
        let props = match (outcome, sender.props()) {
            (BlobSendOutcome::PropsOnly, Some(props)) => props.clone(),
            (BlobSendOutcome::Failed(err), _) => {
                self.base.fail(ctx, err);
                return;
            }
            (BlobSendOutcome::NotFound, _) => {
                self.base.fail(
                    ctx,
                    GwError::not_found(format!("blob {}", sender.blob_id())),
                );
                return;
            }
            (other, _) => {
                self.base.fail(
                    ctx,
                    GwError::inconsistency(format!(
                        "unexpected props outcome {other:?}"
                    )),
                );
                return;
            }
        };

        let mut plan = VecDeque::new();
        let main_ks = match ctx.gw().sat_map().keyspace(props.blob_id.sat) {
            Ok(ks) => ks,
            Err(err) => {
                self.base.fail(ctx, err);
                return;
            }
        };

        match (self.tse(), props.id2_info) {
            (TseOption::None, _) | (TseOption::Slim, None) => (),
            (TseOption::Slim | TseOption::Smart | TseOption::Whole, Some(id2)) => {
                let ks = match ctx.gw().sat_map().keyspace(id2.sat) {
                    Ok(ks) => ks,
                    Err(err) => {
                        self.base.fail(ctx, err);
                        return;
                    }
                };
                ctx.trace(NAME, format_args!("blob is split: {id2}"));
                plan.push_back(BlobSender::new(
                    NAME,
                    BlobId::new(id2.sat, id2.info),
                    ks.clone(),
                    None,
                    SendMode::PropsAndData,
                ));
                if self.tse() == TseOption::Whole {
                    for (_, blob_id) in data_chunk_blob_ids(&id2) {
                        plan.push_back(BlobSender::new(
                            NAME,
                            blob_id,
                            ks.clone(),
                            None,
                            SendMode::PropsAndData,
                        ));
                    }
                }
            }
            (TseOption::Smart | TseOption::Whole | TseOption::Orig, None)
            | (TseOption::Orig, Some(_)) => {
                plan.push_back(BlobSender::with_props(NAME, props, main_ks));
            }
        }

        match plan.pop_front() {
            Some(current) => {
                self.stage = Stage::Sending {
                    current,
                    queue: plan,
                }
            }
            None => self.base.finish(ctx, ProcessorStatus::Found),
        }
    }

    fn on_sent(
        &mut self,
        ctx: &mut RequestContext,
        current: BlobSender,
        mut queue: VecDeque<BlobSender>,
        outcome: BlobSendOutcome,
    ) {
        match outcome {
            BlobSendOutcome::Sent
            | BlobSendOutcome::PropsOnly
            | BlobSendOutcome::Excluded => (),
            BlobSendOutcome::NotFound => {
                self.base.fail(
                    ctx,
                    GwError::backend(format!(
                        "blob {} is referenced but missing",
                        current.blob_id()
                    )),
                );
                return;
            }
            BlobSendOutcome::Failed(err) => {
                self.base.fail(ctx, err);
                return;
            }
        }
        match queue.pop_front() {
            Some(current) => self.stage = Stage::Sending { current, queue },
            None => self.base.finish(ctx, ProcessorStatus::Found),
        }
    }
}

impl Processor for GetBlobProcessor {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn priority(&self) -> Priority {
        self.base.priority()
    }

    fn process(&mut self, ctx: &mut RequestContext) {
        let Some((seq_id, _, range)) = self.request.clone() else {
            self.base.fail(
                ctx,
                GwError::inconsistency("get-blob processor for another request kind"),
            );
            return;
        };
        if let Some(range) = range {
            if let Err(err) = range.validate() {
                self.base.fail(ctx, err);
                return;
            }
        }

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
        self.drive(ctx);
    }

    fn status(&self) -> &ProcessorStatus {
        self.base.status()
    }

    fn cancel(&mut self, _ctx: &mut RequestContext) {
        match &mut self.stage {
            Stage::Resolving(r) => r.cancel(),
            Stage::MainProps(s) => s.cancel(),
            Stage::Sending { current, queue } => {
                current.cancel();
                queue.clear();
            }
            Stage::Idle => (),
        }
        self.stage = Stage::Idle;
        self.base.cancel();
    }
}
