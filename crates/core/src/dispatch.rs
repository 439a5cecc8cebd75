//! The request dispatcher.
//!
//! Every request gets a chain of processors: one per registered factory
//! that can serve it, in registration order, the registration index being
//! the processor priority. The chain is a fallback chain, not a race. One
//! member is driven at a time:
//!
//! - single answer requests stop at the first member that finds something,
//! - annotation requests stop once every requested name is covered,
//! - otherwise the next member runs.
//!
//! After the chain the reply is finalized with the best status of the
//! members that ran.

use crate::context::{Counters, GatewayContext};
use crate::processor::*;
use crate::request_ctx::RequestContext;
use seqgate_api::*;
use std::sync::Arc;
use tracing::Instrument;

/// How a request ended.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// The completion status sent to the client, 499 if canceled.
    pub status: u16,

    /// True if the request was canceled. Nothing was sent after that.
    pub canceled: bool,

    /// The members that ran, with their final status.
    pub chain: Vec<(String, ProcessorStatus)>,
}

/// Builds and drives processor chains.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    factories: Arc<[DynProcessorFactory]>,
}

impl Dispatcher {
    /// A dispatcher over these factories, most authoritative first.
    pub fn new(factories: Vec<DynProcessorFactory>) -> Self {
        Self {
            factories: factories.into(),
        }
    }

    /// The registered factories.
    pub fn factories(&self) -> &[DynProcessorFactory] {
        &self.factories
    }

    /// The processors that would serve a request, in chain order.
    pub fn build_chain(
        &self,
        request: &Request,
        gw: &GatewayContext,
    ) -> Vec<AnyProcessor> {
        self.factories
            .iter()
            .enumerate()
            .filter(|(_, f)| f.can_process(request, gw))
            .map(|(idx, f)| f.create(request, idx as Priority, gw))
            .collect()
    }

    /// Run a request to completion.
    pub async fn dispatch(&self, ctx: &mut RequestContext) -> DispatchOutcome {
        let span = tracing::info_span!(
            "request",
            kind = ctx.request().kind.name(),
            client = ?ctx.request().options.client_id,
        );
        self.run(ctx).instrument(span).await
    }

    async fn run(&self, ctx: &mut RequestContext) -> DispatchOutcome {
        let request = ctx.request().clone();
        let mut chain = self.build_chain(&request, ctx.gw());
        tracing::debug!(
            chain = ?chain.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "dispatching",
        );

        if let RequestKind::GetAnnotations { names, .. } = &request.kind {
            ctx.lock().coverage.add_annot_names(names.iter().cloned());
        }

        if chain.is_empty() {
            let gw = ctx.gw().clone();
            ctx.message(
                Severity::Error,
                404,
                format!("no processor can serve {}", describe(&request)),
            );
            ctx.finish(404);
            drain(ctx).await;
            Counters::incr(&gw.counters().requests_not_found);
            tracing::info!("no processor");
            return DispatchOutcome {
                status: 404,
                canceled: ctx.is_canceled(),
                chain: Vec::new(),
            };
        }

        let mut ran = 0;
        for processor in chain.iter_mut() {
            if ctx.is_canceled() {
                break;
            }
            ran += 1;
            drive(processor, ctx).await;
            if ctx.is_canceled() {
                break;
            }
            if !processor.status().is_found() {
                continue;
            }
            if !request.kind.supports_partial_coverage()
                || ctx.lock().coverage.is_complete()
            {
                break;
            }
            ctx.trace(processor.name(), "coverage incomplete, advancing");
        }

        let outcome = finalize(ctx, &request, &chain[..ran]);
        drain(ctx).await;
        outcome
    }
}

/// Drive one chain member until it reaches a terminal status.
async fn drive(processor: &mut AnyProcessor, ctx: &mut RequestContext) {
    tracing::debug!(
        processor = processor.name(),
        priority = processor.priority(),
        "processor start",
    );
    processor.process(ctx);
    loop {
        ctx.flush();
        if ctx.is_canceled() {
            processor.cancel(ctx);
            return;
        }
        if processor.status().is_terminal() {
            return;
        }
        wait_event(ctx).await;
        if ctx.is_canceled() {
            continue;
        }
        ctx.flush();
        processor.process_event(ctx);
    }
}

/// Sleep until a fetch task or the client wakes the request, or the sink
/// a processor was waiting for drains. Never longer than the output poll
/// interval.
async fn wait_event(ctx: &mut RequestContext) {
    let stalled = ctx.take_output_stalled();
    let ctx: &RequestContext = ctx;
    if stalled && ctx.sink().is_output_ready() {
        return;
    }
    let signal = ctx.signal().clone();
    let wait = async {
        if stalled {
            tokio::select! {
                _ = signal.wait() => (),
                _ = ctx.sink().writable() => (),
            }
        } else {
            signal.wait().await
        }
    };
    if tokio::time::timeout(ctx.gw().output_poll_interval(), wait)
        .await
        .is_err()
    {
        tracing::trace!("poll interval elapsed");
    }
}

/// Flush until the sink passed the whole reply on. Gives up if the client
/// stops reading for longer than a backend operation timeout.
async fn drain(ctx: &mut RequestContext) {
    loop {
        ctx.flush();
        if ctx.is_canceled() || ctx.sink().is_drained() {
            return;
        }
        let limit = ctx.gw().backend_op_timeout();
        if tokio::time::timeout(limit, ctx.sink().writable())
            .await
            .is_err()
        {
            tracing::warn!("client stopped reading, reply truncated");
            return;
        }
    }
}

fn finalize(
    ctx: &mut RequestContext,
    request: &Request,
    ran: &[AnyProcessor],
) -> DispatchOutcome {
    let gw = ctx.gw().clone();
    let chain: Vec<(String, ProcessorStatus)> = ran
        .iter()
        .map(|p| (p.name().to_string(), p.status().clone()))
        .collect();

    if ctx.is_canceled() {
        Counters::incr(&gw.counters().requests_canceled);
        tracing::info!(elapsed = ?ctx.elapsed(), "request canceled");
        return DispatchOutcome {
            status: ProcessorStatus::Canceled.status_code(),
            canceled: true,
            chain,
        };
    }

    let best = ProcessorStatus::best(chain.iter().map(|(_, s)| s))
        .cloned()
        .unwrap_or(ProcessorStatus::NotFound);

    if request.kind.supports_partial_coverage() {
        let missing = ctx.lock().coverage.unprocessed_annot_names();
        for name in missing {
            ctx.emit(ReplyChunk::AnnotStatus { name, status: 404 });
        }
    }

    if matches!(best, ProcessorStatus::NotFound) {
        ctx.message(
            Severity::Warning,
            404,
            format!("{} not found", describe(request)),
        );
    }

    let status = best.status_code();
    ctx.finish(status);

    let counters = gw.counters();
    match best {
        ProcessorStatus::Found => Counters::incr(&counters.requests_found),
        ProcessorStatus::NotFound => {
            Counters::incr(&counters.requests_not_found)
        }
        _ => Counters::incr(&counters.requests_failed),
    }
    tracing::info!(status, elapsed = ?ctx.elapsed(), "request done");

    DispatchOutcome {
        status,
        canceled: false,
        chain,
    }
}

/// What a request asks for, for client messages.
fn describe(request: &Request) -> String {
    match &request.kind {
        RequestKind::Resolve { seq_id, .. }
        | RequestKind::GetBlobById { seq_id, .. }
        | RequestKind::GetHistory { seq_id } => format!("seq id {seq_id}"),
        RequestKind::GetAnnotations { seq_id, .. } => {
            format!("annotations of seq id {seq_id}")
        }
        RequestKind::GetBlobByKey { blob_id, .. } => format!("blob {blob_id}"),
        RequestKind::GetBlobChunk { id2_info, chunk_no } => {
            format!("chunk {chunk_no} of {id2_info}")
        }
        RequestKind::IpgResolve { .. } => "identical protein group".into(),
    }
}
