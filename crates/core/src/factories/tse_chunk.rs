//! The tse-chunk processor: one chunk of a split blob.
//!
//! The request names the split layout (`id2_info`) and a chunk number. The
//! layout is checked against the split history of the object, which is
//! looked up once per request and memoised in the request context. Chunk
//! numbers outside the layout are rejected before any blob is touched.

use crate::context::GatewayContext;
use crate::factories::blob_send::*;
use crate::fetch::*;
use crate::processor::*;
use crate::request_ctx::{RequestContext, SplitKey};
use crate::split::*;
use seqgate_api::*;
use std::sync::Arc;

const NAME: &str = "tse-chunk";

/// Creates [TseChunkProcessor]s.
#[derive(Debug)]
pub struct TseChunkProcessorFactory {}

impl TseChunkProcessorFactory {
    /// Construct a new TseChunkProcessorFactory.
    pub fn create() -> DynProcessorFactory {
        Arc::new(Self {})
    }
}

impl ProcessorFactory for TseChunkProcessorFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn can_process(&self, request: &Request, _gw: &GatewayContext) -> bool {
        matches!(request.kind, RequestKind::GetBlobChunk { .. })
    }

    fn create(
        &self,
        request: &Request,
        priority: Priority,
        _gw: &GatewayContext,
    ) -> AnyProcessor {
        let target = match &request.kind {
            RequestKind::GetBlobChunk { id2_info, chunk_no } => {
                Some((id2_info.clone(), *chunk_no))
            }
            _ => None,
        };
        TseChunkProcessor {
            base: ProcessorBase::new(NAME, priority),
            target,
            stage: Stage::Idle,
        }
        .into()
    }
}

#[derive(Debug)]
enum Stage {
    Idle,
    History {
        id2: Id2Info,
        task: FetchTask<Vec<SplitHistoryRecord>>,
    },
    Sending(BlobSender),
}

/// Sends one chunk of a split blob.
#[derive(Debug)]
pub struct TseChunkProcessor {
    base: ProcessorBase,
    target: Option<(String, i32)>,
    stage: Stage,
}

fn split_key(id2: &Id2Info) -> SplitKey {
    (id2.sat, id2.info, id2.split_version)
}

impl TseChunkProcessor {
    fn chunk_no(&self) -> i32 {
        self.target.as_ref().map(|t| t.1).unwrap_or(INDEX_CHUNK)
    }

    fn start(&mut self, ctx: &mut RequestContext) -> GwResult<()> {
        let Some((id2_text, chunk_no)) = self.target.clone() else {
            return Err(GwError::inconsistency(
                "tse-chunk processor for another request kind",
            ));
        };
        let id2: Id2Info = id2_text.parse()?;
        validate_chunk_no(&id2, chunk_no)?;
        let keyspace = ctx.gw().sat_map().keyspace(id2.sat)?;

        let memo = ctx.lock().split_history.get(&split_key(&id2)).cloned();
        if let Some(record) = memo {
            ctx.trace(NAME, "split history from request memo");
            return self.on_history(ctx, id2, record);
        }

        let backend = ctx.backend();
        let (info, version) = (id2.info, id2.split_version);
        self.stage = Stage::History {
            id2,
            task: FetchTask::start(
                format!("split history {}.{info}.{version}", id2.sat),
                ctx.signal(),
                ctx.op_timeout(),
                async move {
                    backend
                        .fetch_split_history(keyspace, info, Some(version))
                        .await
                },
            ),
        };
        Ok(())
    }

    fn on_history(
        &mut self,
        ctx: &mut RequestContext,
        id2: Id2Info,
        record: SplitHistoryRecord,
    ) -> GwResult<()> {
        ctx.lock()
            .split_history
            .insert(split_key(&id2), record.clone());

        let layout = record.id2_info;
        if layout != id2 {
            ctx.trace(
                NAME,
                format_args!("split history layout {layout} overrides {id2}"),
            );
        }

        let chunk_no = self.chunk_no();
        let sat_key = chunk_sat_key(&layout, chunk_no)?;
        let keyspace = ctx.gw().sat_map().keyspace(layout.sat)?;
        let blob_id = BlobId::new(layout.sat, sat_key);
        ctx.trace(NAME, format_args!("chunk {chunk_no} is blob {blob_id}"));

        self.stage = Stage::Sending(BlobSender::new(
            NAME,
            blob_id,
            keyspace,
            None,
            SendMode::PropsAndData,
        ));
        self.drive(ctx);
        Ok(())
    }

    fn poll_history(&mut self, ctx: &mut RequestContext) -> GwResult<()> {
        let Stage::History { id2, task } = &mut self.stage else {
            return Ok(());
        };
        let id2 = *id2;
        match task.poll() {
            FetchState::DataReady => {
                let rows = task.take_data().unwrap_or_default();
                self.stage = Stage::Idle;
                let record = rows
                    .into_iter()
                    .find(|r| r.split_version == id2.split_version)
                    .ok_or_else(|| {
                        GwError::not_found(format!("split history of {id2}"))
                    })?;
                self.on_history(ctx, id2, record)
            }
            FetchState::Error => {
                let err = task.take_error().unwrap_or_else(|| {
                    GwError::inconsistency("split history fetch lost its error")
                });
                self.stage = Stage::Idle;
                ctx.gw().note_backend_error(&err);
                Err(err)
            }
            _ => Ok(()),
        }
    }

    fn drive(&mut self, ctx: &mut RequestContext) {
        let Stage::Sending(sender) = &mut self.stage else {
            return;
        };
        let Some(outcome) = sender.poll(ctx) else {
            return;
        };
        match outcome {
            BlobSendOutcome::Sent
            | BlobSendOutcome::PropsOnly
            | BlobSendOutcome::Excluded => {
                self.base.finish(ctx, ProcessorStatus::Found)
            }
            BlobSendOutcome::NotFound => {
                self.base.finish(ctx, ProcessorStatus::NotFound)
            }
            BlobSendOutcome::Failed(err) => self.base.fail(ctx, err),
        }
    }
}

impl Processor for TseChunkProcessor {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn priority(&self) -> Priority {
        self.base.priority()
    }

    fn process(&mut self, ctx: &mut RequestContext) {
        if let Err(err) = self.start(ctx) {
            self.base.fail(ctx, err);
        }
    }

    fn process_event(&mut self, ctx: &mut RequestContext) {
        if self.base.is_done() || ctx.is_canceled() {
            return;
        }
        if matches!(self.stage, Stage::History { .. }) {
            if let Err(err) = self.poll_history(ctx) {
                self.base.fail(ctx, err);
            }
            return;
        }
        self.drive(ctx);
    }

    fn status(&self) -> &ProcessorStatus {
        self.base.status()
    }

    fn cancel(&mut self, _ctx: &mut RequestContext) {
        match &mut self.stage {
            Stage::History { task, .. } => task.cancel(),
            Stage::Sending(sender) => sender.cancel(),
            Stage::Idle => (),
        }
        self.stage = Stage::Idle;
        self.base.cancel();
    }
}

#[cfg(test)]
mod test;
