//! Gateway construction.

use crate::context::*;
use crate::dispatch::*;
use crate::exclude_cache::ExcludeCacheModConfig;
use crate::fetch::CancelHandle;
use crate::processor::DynProcessorFactory;
use crate::request_ctx::RequestContext;
use seqgate_api::config::Config;
use seqgate_api::*;
use std::sync::Arc;

/// The seqgate builder.
/// This contains both configuration and factory instances,
/// allowing construction of a [Gateway].
#[derive(Debug)]
pub struct Builder {
    /// The module configuration to be used when building modules.
    /// This can be loaded from disk or modified before building.
    pub config: Config,

    /// The [BackendStoreFactory] creating the backend store.
    pub backend: DynBackendStoreFactory,

    /// The [LocalCacheFactory] creating the local cache, if any.
    pub local_cache: Option<DynLocalCacheFactory>,

    /// Processor factories, most authoritative first. The position in
    /// this list is the priority of the processors created.
    pub processors: Vec<DynProcessorFactory>,
}

impl Builder {
    /// Construct a default config given the configured module factories.
    pub fn with_default_config(self) -> GwResult<Self> {
        {
            let Self {
                config,
                backend,
                local_cache,
                processors,
            } = &self;

            config.add_default_module_config::<GatewayModConfig>()?;
            config.add_default_module_config::<ExcludeCacheModConfig>()?;
            backend.default_config(config)?;
            if let Some(local_cache) = local_cache {
                local_cache.default_config(config)?;
            }
            for p in processors {
                p.default_config(config)?;
            }
        }

        Ok(self)
    }

    /// Generate the gateway. A local cache that fails to load is logged
    /// and left out, the gateway then answers from the backend only.
    pub async fn build(self) -> GwResult<Gateway> {
        let Self {
            config,
            backend,
            local_cache,
            processors,
        } = self;
        let config = Arc::new(config);

        let gw_config: GatewayModConfig = config.get_module_config()?;
        let exclude_config: ExcludeCacheModConfig =
            config.get_module_config()?;

        let backend = backend.create(config.clone()).await?;

        let local_cache = match local_cache {
            None => None,
            Some(factory) => match factory.create(config.clone()).await {
                Ok(cache) => Some(cache),
                Err(err) => {
                    tracing::error!(
                        ?err,
                        "local cache failed to load, continuing without it"
                    );
                    None
                }
            },
        };

        tracing::info!(
            processors = ?processors.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
            local_cache = local_cache.is_some(),
            "gateway built",
        );

        Ok(Gateway {
            gw: Arc::new(GatewayContext::new(
                gw_config.gateway,
                exclude_config.exclude_cache,
                backend,
                local_cache,
            )),
            dispatcher: Dispatcher::new(processors),
        })
    }
}

/// A running gateway.
#[derive(Debug, Clone)]
pub struct Gateway {
    gw: Arc<GatewayContext>,
    dispatcher: Dispatcher,
}

impl Gateway {
    /// Gateway wide state: config, backend, caches, counters.
    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.gw
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serve one request into `sink`.
    pub async fn handle(
        &self,
        request: Request,
        sink: DynReplySink,
    ) -> DispatchOutcome {
        self.handle_with_cancel(request, sink, CancelHandle::new())
            .await
    }

    /// Serve one request into `sink`. Canceling `cancel` stops the request,
    /// nothing more is sent afterwards.
    pub async fn handle_with_cancel(
        &self,
        request: Request,
        sink: DynReplySink,
        cancel: CancelHandle,
    ) -> DispatchOutcome {
        let mut ctx = RequestContext::new(
            Arc::new(request),
            self.gw.clone(),
            sink,
            cancel,
        );
        self.dispatcher.dispatch(&mut ctx).await
    }
}
