//! The named annotation processor.
//!
//! Several annotation processors may be registered, each with its own
//! keyspaces and name filter. They share the request's coverage set: each
//! only asks the backend for names nobody answered yet, and registers every
//! name before sending it, so a name found in several keyspaces or by
//! several processors is sent once.

use crate::context::GatewayContext;
use crate::coverage::CoverageItem;
use crate::fetch::*;
use crate::processor::*;
use crate::request_ctx::RequestContext;
use crate::resolver::*;
use seqgate_api::*;
use std::sync::Arc;

const NAME: &str = "annot";

/// Which annotation names a processor is responsible for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AnnotNameFilter {
    /// Every name.
    #[default]
    Any,
    /// Names starting with one of these prefixes.
    Prefixes(Vec<String>),
    /// Exactly these names.
    Names(Vec<String>),
}

impl AnnotNameFilter {
    /// True if the processor is responsible for `name`.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefixes(p) => p.iter().any(|p| name.starts_with(p.as_str())),
            Self::Names(n) => n.iter().any(|n| n == name),
        }
    }
}

/// Creates [AnnotProcessor]s.
#[derive(Debug)]
pub struct AnnotProcessorFactory {
    name: Arc<str>,
    keyspaces: Option<Vec<String>>,
    filter: AnnotNameFilter,
}

impl AnnotProcessorFactory {
    /// Construct the default factory: every name, in the keyspaces of the
    /// gateway configuration.
    pub fn create() -> DynProcessorFactory {
        Arc::new(Self {
            name: NAME.into(),
            keyspaces: None,
            filter: AnnotNameFilter::Any,
        })
    }

    /// Construct a factory with its own name, name filter and optionally
    /// its own keyspaces.
    pub fn create_with(
        name: &str,
        keyspaces: Option<Vec<String>>,
        filter: AnnotNameFilter,
    ) -> DynProcessorFactory {
        Arc::new(Self {
            name: name.into(),
            keyspaces,
            filter,
        })
    }

    fn requested_names<'a>(&self, request: &'a Request) -> Vec<&'a str> {
        match &request.kind {
            RequestKind::GetAnnotations { names, .. } => names
                .iter()
                .map(String::as_str)
                .filter(|n| self.filter.matches(n))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl ProcessorFactory for AnnotProcessorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_process(&self, request: &Request, _gw: &GatewayContext) -> bool {
        !self.requested_names(request).is_empty()
    }

    fn create(
        &self,
        request: &Request,
        priority: Priority,
        gw: &GatewayContext,
    ) -> AnyProcessor {
        let mut names: Vec<String> = self
            .requested_names(request)
            .into_iter()
            .map(String::from)
            .collect();
        names.sort();
        names.dedup();

        let keyspaces = self
            .keyspaces
            .as_ref()
            .unwrap_or(&gw.config().annot_keyspaces)
            .iter()
            .map(|k| k.as_str().into())
            .collect();

        let seq_id = match &request.kind {
            RequestKind::GetAnnotations { seq_id, .. } => Some(seq_id.clone()),
            _ => None,
        };

        AnnotProcessor {
            base: ProcessorBase::new(&self.name, priority),
            seq_id,
            names,
            keyspaces,
            stage: Stage::Idle,
            emitted: 0,
            first_error: None,
        }
        .into()
    }
}

#[derive(Debug)]
enum Stage {
    Idle,
    Resolving(Resolver),
    Fetching(Vec<FetchTask<Vec<NamedAnnotRecord>>>),
}

/// Sends named annotations.
#[derive(Debug)]
pub struct AnnotProcessor {
    base: ProcessorBase,
    seq_id: Option<SeqId>,
    names: Vec<String>,
    keyspaces: Vec<Arc<str>>,
    stage: Stage,
    emitted: usize,
    first_error: Option<GwError>,
}

impl AnnotProcessor {
    fn on_events(&mut self, ctx: &mut RequestContext, events: Vec<ResolveEvent>) {
        for evt in events {
            match evt {
                ResolveEvent::GoodData => ctx.signal_start_processing(
                    self.base.priority(),
                    self.base.name(),
                ),
                ResolveEvent::Resolved(info) => self.on_resolved(ctx, info),
                ResolveEvent::Failed(err) => self.base.fail(ctx, err),
            }
        }
    }

    fn on_resolved(&mut self, ctx: &mut RequestContext, info: BioseqInfo) {
        let priority = self.base.priority();
        let (claim, remaining) = {
            let mut lock = ctx.lock();
            let claim = lock.coverage.register(CoverageItem::BioseqInfo, priority);
            let unprocessed = lock.coverage.unprocessed_annot_names();
            let remaining: Vec<String> = self
                .names
                .iter()
                .filter(|n| unprocessed.contains(n))
                .cloned()
                .collect();
            (claim, remaining)
        };

        if claim.should_emit() {
            ctx.emit(ReplyChunk::BioseqInfo {
                record: info.clone(),
            });
        }

        if remaining.is_empty() {
            ctx.trace(self.base.name(), "every name answered already");
            self.base.finish(ctx, ProcessorStatus::NotFound);
            return;
        }
        if self.keyspaces.is_empty() {
            self.base.fail(
                ctx,
                GwError::other("no annotation keyspaces configured"),
            );
            return;
        }

        ctx.trace(
            self.base.name(),
            format_args!(
                "looking up {} names in {} keyspaces",
                remaining.len(),
                self.keyspaces.len()
            ),
        );

        let tasks = self
            .keyspaces
            .iter()
            .map(|ks| {
                let backend = ctx.backend();
                let ks = ks.clone();
                let accession = info.accession.clone();
                let names = remaining.clone();
                let (version, seq_id_type) = (info.version, info.seq_id_type);
                FetchTask::start(
                    format!("named annotations in {ks}"),
                    ctx.signal(),
                    ctx.op_timeout(),
                    async move {
                        backend
                            .fetch_named_annotations(
                                ks,
                                accession,
                                version,
                                seq_id_type,
                                names,
                            )
                            .await
                    },
                )
            })
            .collect();
        self.stage = Stage::Fetching(tasks);
    }

    fn poll_fetches(&mut self, ctx: &mut RequestContext) {
        let Stage::Fetching(tasks) = &mut self.stage else {
            return;
        };

        let priority = self.base.priority();
        let mut records = Vec::new();
        let mut errors = Vec::new();
        for task in tasks.iter_mut() {
            match task.poll() {
                FetchState::DataReady => {
                    records.extend(task.take_data().unwrap_or_default())
                }
                FetchState::Error => {
                    if let Some(err) = task.take_error() {
                        errors.push((task.what().to_string(), err));
                    }
                }
                _ => (),
            }
        }
        let all_done = tasks.iter().all(|t| t.state() == FetchState::Finished);

        for (what, err) in errors {
            ctx.gw().note_backend_error(&err);
            if !err.is_not_found() {
                tracing::warn!(
                    processor = self.base.name(),
                    %what,
                    ?err,
                    "annotation lookup failed"
                );
                ctx.error_message(self.base.name(), &err);
                self.first_error.get_or_insert(err);
            }
        }

        for record in records {
            if !self.names.contains(&record.annot_name) {
                continue;
            }
            let claim = ctx.lock().coverage.register(
                CoverageItem::NamedAnnot(record.annot_name.clone()),
                priority,
            );
            if claim.should_emit() {
                self.emitted += 1;
                ctx.emit(ReplyChunk::NamedAnnot { record });
            }
        }

        if all_done {
            let status = if self.emitted > 0 {
                ProcessorStatus::Found
            } else if let Some(err) = self.first_error.take() {
                ProcessorStatus::Error(err)
            } else {
                ProcessorStatus::NotFound
            };
            self.stage = Stage::Idle;
            self.base.finish(ctx, status);
        }
    }
}

impl Processor for AnnotProcessor {
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
                GwError::inconsistency("annotation processor for another request kind"),
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
        self.poll_fetches(ctx);
    }

    fn status(&self) -> &ProcessorStatus {
        self.base.status()
    }

    fn cancel(&mut self, _ctx: &mut RequestContext) {
        match &mut self.stage {
            Stage::Resolving(r) => r.cancel(),
            Stage::Fetching(tasks) => tasks.iter_mut().for_each(|t| t.cancel()),
            Stage::Idle => (),
        }
        self.stage = Stage::Idle;
        self.base.cancel();
    }
}
