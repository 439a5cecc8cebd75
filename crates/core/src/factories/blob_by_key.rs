//! The blob-by-key processor: send a blob addressed by its blob id.

use crate::context::GatewayContext;
use crate::factories::blob_send::*;
use crate::processor::*;
use crate::request_ctx::RequestContext;
use seqgate_api::*;
use std::sync::Arc;

const NAME: &str = "blob-by-key";

/// Creates [BlobByKeyProcessor]s.
#[derive(Debug)]
pub struct BlobByKeyProcessorFactory {}

impl BlobByKeyProcessorFactory {
    /// Construct a new BlobByKeyProcessorFactory.
    pub fn create() -> DynProcessorFactory {
        Arc::new(Self {})
    }
}

impl ProcessorFactory for BlobByKeyProcessorFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn can_process(&self, request: &Request, _gw: &GatewayContext) -> bool {
        matches!(request.kind, RequestKind::GetBlobByKey { .. })
    }

    fn create(
        &self,
        request: &Request,
        priority: Priority,
        _gw: &GatewayContext,
    ) -> AnyProcessor {
        let key = match &request.kind {
            RequestKind::GetBlobByKey {
                blob_id,
                last_modified,
            } => Some((*blob_id, *last_modified)),
            _ => None,
        };
        BlobByKeyProcessor {
            base: ProcessorBase::new(NAME, priority),
            key,
            sender: None,
        }
        .into()
    }
}

/// Sends the properties and data of one blob.
#[derive(Debug)]
pub struct BlobByKeyProcessor {
    base: ProcessorBase,
    key: Option<(BlobId, Option<i64>)>,
    sender: Option<BlobSender>,
}

impl BlobByKeyProcessor {
    fn drive(&mut self, ctx: &mut RequestContext) {
        let Some(outcome) = self.sender.as_mut().and_then(|s| s.poll(ctx))
        else {
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

impl Processor for BlobByKeyProcessor {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn priority(&self) -> Priority {
        self.base.priority()
    }

    fn process(&mut self, ctx: &mut RequestContext) {
        let Some((blob_id, last_modified)) = self.key else {
            self.base.fail(
                ctx,
                GwError::inconsistency("blob-by-key processor for another request kind"),
            );
            return;
        };
        let keyspace = match ctx.gw().sat_map().keyspace(blob_id.sat) {
            Ok(ks) => ks,
            Err(err) => {
                self.base.fail(ctx, err);
                return;
            }
        };
        self.sender = Some(BlobSender::new(
            NAME,
            blob_id,
            keyspace,
            last_modified,
            SendMode::PropsAndData,
        ));
        self.drive(ctx);
    }

    fn process_event(&mut self, ctx: &mut RequestContext) {
        if self.base.is_done() || ctx.is_canceled() {
            return;
        }
        self.drive(ctx);
    }

    fn status(&self) -> &ProcessorStatus {
        self.base.status()
    }

    fn cancel(&mut self, _ctx: &mut RequestContext) {
        if let Some(sender) = self.sender.as_mut() {
            sender.cancel();
        }
        self.base.cancel();
    }
}
