//! Helpers for the unit tests of this crate.

use crate::context::*;
use crate::exclude_cache::ExcludeCacheConfig;
use crate::factories::*;
use crate::fetch::CancelHandle;
use crate::processor::*;
use crate::request_ctx::RequestContext;
use seqgate_api::*;
use std::sync::Arc;
use std::time::Duration;

/// A gateway over a fresh in-memory store, short timeouts.
pub fn gateway(
    fixture: BackendFixture,
    cache: Option<LocalCacheSnapshot>,
) -> (Arc<GatewayContext>, Arc<MemBackendStore>) {
    let store = MemBackendStore::new(fixture);
    let config = GatewayConfig {
        backend_op_timeout_ms: 300,
        output_poll_interval_ms: 10,
        ..Default::default()
    };
    let cache = cache.map(|snapshot| {
        let cache: DynLocalCache = Arc::new(MemLocalCache::new(snapshot));
        cache
    });
    let gw = GatewayContext::new(
        config,
        ExcludeCacheConfig::default(),
        store.clone(),
        cache,
    );
    (Arc::new(gw), store)
}

/// A request context writing into a recording sink.
pub fn request_ctx(
    gw: &Arc<GatewayContext>,
    request: Request,
) -> (RequestContext, MemReplySink) {
    let sink = MemReplySink::new();
    let ctx = RequestContext::new(
        Arc::new(request),
        gw.clone(),
        sink.boxed(),
        CancelHandle::new(),
    );
    (ctx, sink)
}

/// Drive a lone processor to a terminal status.
pub async fn run(processor: &mut AnyProcessor, ctx: &mut RequestContext) {
    processor.process(ctx);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !processor.status().is_terminal() {
            let _ = tokio::time::timeout(
                Duration::from_millis(20),
                ctx.signal().wait(),
            )
            .await;
            processor.process_event(ctx);
        }
    })
    .await
    .unwrap();
}
