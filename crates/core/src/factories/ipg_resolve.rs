//! The ipg-resolve processor: identical protein group lookup by a protein
//! and/or a nucleotide identifier.
//!
//! Identifiers are resolved one at a time, gi identifiers before the
//! others and the protein before the nucleotide:
//!
//! ```text
//! NoResolution -> ResolveGiFirst -> ResolveGiSecond
//!              -> ResolveNonGiFirst -> ResolveNonGiSecond -> Finished
//! ```
//!
//! On the first pass a versioned accession is used as given (normalized),
//! only gis and unversioned accessions are resolved. If the group lookup
//! then finds nothing and no accession was resolved, the machine goes back
//! to `ResolveNonGiFirst` resolving the raw accessions too, and looks up
//! once more.
//!
//! The retry keys on "no accession resolution yet", not on "a gi was
//! resolved". A pass that resolved nothing at all, two versioned
//! accessions say, used the raw values only, and a replaced accession
//! still reaches its group through the resolved one. A pass that already
//! resolved an accession has nothing left to learn and is final.
//!
//! A gi that cannot be resolved has no value for the lookup and is
//! dropped, the lookup runs on the remaining identifiers. Only when none
//! remain the result is not found without a lookup.

use crate::context::GatewayContext;
use crate::fetch::*;
use crate::processor::*;
use crate::request_ctx::RequestContext;
use crate::resolver::*;
use seqgate_api::*;
use std::sync::Arc;

const NAME: &str = "ipg-resolve";

/// Creates [IpgResolveProcessor]s.
#[derive(Debug)]
pub struct IpgResolveProcessorFactory {}

impl IpgResolveProcessorFactory {
    /// Construct a new IpgResolveProcessorFactory.
    pub fn create() -> DynProcessorFactory {
        Arc::new(Self {})
    }
}

impl ProcessorFactory for IpgResolveProcessorFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn can_process(&self, request: &Request, _gw: &GatewayContext) -> bool {
        matches!(
            &request.kind,
            RequestKind::IpgResolve { protein, nucleotide, ipg }
                if protein.is_some() || nucleotide.is_some() || ipg.is_some()
        )
    }

    fn create(
        &self,
        request: &Request,
        priority: Priority,
        _gw: &GatewayContext,
    ) -> AnyProcessor {
        IpgResolveProcessor::new(request, priority).into()
    }
}

/// Where the resolution of the sub identifiers stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    /// Nothing started.
    NoResolution,
    /// Resolving the protein, if it is a gi.
    ResolveGiFirst,
    /// Resolving the nucleotide, if it is a gi.
    ResolveGiSecond,
    /// Resolving the protein, if it is an accession needing it.
    ResolveNonGiFirst,
    /// Resolving the nucleotide, if it is an accession needing it.
    ResolveNonGiSecond,
    /// Everything resolved that needed it.
    Finished,
}

impl ResolutionState {
    fn next(self) -> Self {
        match self {
            Self::NoResolution => Self::ResolveGiFirst,
            Self::ResolveGiFirst => Self::ResolveGiSecond,
            Self::ResolveGiSecond => Self::ResolveNonGiFirst,
            Self::ResolveNonGiFirst => Self::ResolveNonGiSecond,
            Self::ResolveNonGiSecond | Self::Finished => Self::Finished,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Which {
    Protein,
    Nucleotide,
}

#[derive(Debug)]
struct SubId {
    raw: SeqId,
    resolved: Option<String>,
    attempted: bool,
}

impl SubId {
    fn new(raw: SeqId) -> Self {
        Self {
            raw,
            resolved: None,
            attempted: false,
        }
    }

    fn needs_resolution(&self, gi_stage: bool, force_non_gi: bool) -> bool {
        if self.attempted || self.resolved.is_some() {
            return false;
        }
        if gi_stage {
            self.raw.is_gi()
        } else {
            !self.raw.is_gi()
                && (force_non_gi || self.raw.parsed().version.is_none())
        }
    }

    /// The value used in the group lookup.
    fn query_value(&self) -> Option<String> {
        match &self.resolved {
            Some(r) => Some(r.clone()),
            None if self.raw.is_gi() => None,
            None => Some(normalize(&self.raw)),
        }
    }
}

/// `accession.version` of a raw identifier, without fasta decoration,
/// upper-cased.
pub fn normalize(seq_id: &SeqId) -> String {
    seq_id.versioned_accession().to_ascii_uppercase()
}

/// Identical protein group lookup.
#[derive(Debug)]
pub struct IpgResolveProcessor {
    base: ProcessorBase,
    valid: bool,
    protein: Option<SubId>,
    nucleotide: Option<SubId>,
    ipg: Option<i64>,
    state: ResolutionState,
    resolver: Option<(Which, Resolver)>,
    query: Option<FetchTask<Vec<IpgRecord>>>,
    non_gi_attempted: bool,
    force_non_gi: bool,
    retried: bool,
}

impl IpgResolveProcessor {
    fn new(request: &Request, priority: Priority) -> Self {
        let (valid, protein, nucleotide, ipg) = match &request.kind {
            RequestKind::IpgResolve {
                protein,
                nucleotide,
                ipg,
            } => (
                true,
                protein.clone().map(SubId::new),
                nucleotide.clone().map(SubId::new),
                *ipg,
            ),
            _ => (false, None, None, None),
        };
        Self {
            base: ProcessorBase::new(NAME, priority),
            valid,
            protein,
            nucleotide,
            ipg,
            state: ResolutionState::NoResolution,
            resolver: None,
            query: None,
            non_gi_attempted: false,
            force_non_gi: false,
            retried: false,
        }
    }

    /// Current resolution state.
    pub fn resolution_state(&self) -> ResolutionState {
        self.state
    }

    fn sub(&mut self, which: Which) -> Option<&mut SubId> {
        match which {
            Which::Protein => self.protein.as_mut(),
            Which::Nucleotide => self.nucleotide.as_mut(),
        }
    }

    /// Run the state machine until it waits for a resolution or the group
    /// lookup.
    fn advance(&mut self, ctx: &mut RequestContext) {
        loop {
            if self.base.is_done() || self.resolver.is_some() {
                return;
            }
            let (which, gi_stage) = match self.state {
                ResolutionState::NoResolution => {
                    self.state = self.state.next();
                    continue;
                }
                ResolutionState::ResolveGiFirst => (Which::Protein, true),
                ResolutionState::ResolveGiSecond => (Which::Nucleotide, true),
                ResolutionState::ResolveNonGiFirst => (Which::Protein, false),
                ResolutionState::ResolveNonGiSecond => {
                    (Which::Nucleotide, false)
                }
                ResolutionState::Finished => {
                    self.start_query(ctx);
                    return;
                }
            };

            let force = self.force_non_gi;
            let needs = self
                .sub(which)
                .map(|s| s.needs_resolution(gi_stage, force))
                .unwrap_or(false);
            if needs {
                self.start_resolve(ctx, which, gi_stage);
            } else {
                self.state = self.state.next();
            }
        }
    }

    fn start_resolve(
        &mut self,
        ctx: &mut RequestContext,
        which: Which,
        gi_stage: bool,
    ) {
        let Some(sub) = self.sub(which) else {
            return;
        };
        sub.attempted = true;
        let raw = sub.raw.clone();
        if !gi_stage {
            self.non_gi_attempted = true;
        }
        ctx.trace(NAME, format_args!("{:?}: resolving {raw}", self.state));

        let mut resolver = Resolver::new(raw, false);
        let events = resolver.start(ctx);
        self.resolver = Some((which, resolver));
        self.on_events(ctx, events);
    }

    fn on_events(&mut self, ctx: &mut RequestContext, events: Vec<ResolveEvent>) {
        for evt in events {
            match evt {
                ResolveEvent::GoodData => ctx
                    .signal_start_processing(self.base.priority(), NAME),
                ResolveEvent::Resolved(info) => self.on_resolved(ctx, info),
                ResolveEvent::Failed(err) => self.on_resolve_error(ctx, err),
            }
        }
    }

    fn on_resolved(&mut self, ctx: &mut RequestContext, info: BioseqInfo) {
        let which = match (self.resolver.take(), self.state) {
            (
                _,
                ResolutionState::NoResolution | ResolutionState::Finished,
            )
            | (None, _) => {
                self.base.fail(
                    ctx,
                    GwError::inconsistency(format!(
                        "resolution callback in state {:?}",
                        self.state
                    )),
                );
                return;
            }
            (Some((which, _)), _) => which,
        };

        let value = info.versioned_accession();
        ctx.trace(NAME, format_args!("{which:?} resolved to {value}"));
        if let Some(sub) = self.sub(which) {
            sub.resolved = Some(value);
        }
        self.state = self.state.next();
    }

    fn on_resolve_error(&mut self, ctx: &mut RequestContext, err: GwError) {
        let Some((which, _)) = self.resolver.take() else {
            self.base.fail(
                ctx,
                GwError::inconsistency("resolution error with none outstanding"),
            );
            return;
        };
        if !err.is_not_found() {
            self.base.fail(ctx, err);
            return;
        }
        let is_gi = self.sub(which).map(|s| s.raw.is_gi()).unwrap_or(false);
        if is_gi {
            // an unresolved gi has no query value, the lookup goes on with
            // whatever else the request names
            ctx.trace(NAME, format_args!("{which:?} gi not resolvable, dropped"));
        } else {
            ctx.trace(NAME, format_args!("{which:?} not resolvable, using as is"));
        }
        self.state = self.state.next();
    }

    fn start_query(&mut self, ctx: &mut RequestContext) {
        if self.query.is_some() {
            return;
        }
        let query = IpgQuery {
            protein: self.protein.as_ref().and_then(SubId::query_value),
            nucleotide: self.nucleotide.as_ref().and_then(SubId::query_value),
            ipg: self.ipg,
        };
        if query.protein.is_none()
            && query.nucleotide.is_none()
            && query.ipg.is_none()
        {
            self.base.finish(ctx, ProcessorStatus::NotFound);
            return;
        }
        ctx.trace(NAME, format_args!("group lookup {query:?}"));

        let backend = ctx.backend();
        self.query = Some(FetchTask::start(
            "ipg lookup",
            ctx.signal(),
            ctx.op_timeout(),
            async move { backend.fetch_ipg(query).await },
        ));
    }

    fn has_raw_non_gi(&self) -> bool {
        [self.protein.as_ref(), self.nucleotide.as_ref()]
            .into_iter()
            .flatten()
            .any(|s| !s.raw.is_gi() && s.resolved.is_none() && !s.attempted)
    }

    fn poll_query(&mut self, ctx: &mut RequestContext) {
        let Some(task) = self.query.as_mut() else {
            return;
        };
        match task.poll() {
            FetchState::DataReady => {
                let rows = task.take_data().unwrap_or_default();
                self.query = None;
                if !rows.is_empty() {
                    for record in rows {
                        ctx.emit(ReplyChunk::Ipg { record });
                    }
                    self.base.finish(ctx, ProcessorStatus::Found);
                    return;
                }
                if !self.retried && !self.non_gi_attempted && self.has_raw_non_gi()
                {
                    ctx.trace(NAME, "nothing found, resolving accessions too");
                    self.retried = true;
                    self.force_non_gi = true;
                    self.state = ResolutionState::ResolveNonGiFirst;
                    self.advance(ctx);
                    return;
                }
                self.base.finish(ctx, ProcessorStatus::NotFound);
            }
            FetchState::Error => {
                let err = task.take_error().unwrap_or_else(|| {
                    GwError::inconsistency("ipg lookup lost its error")
                });
                self.query = None;
                ctx.gw().note_backend_error(&err);
                self.base.fail(ctx, err);
            }
            _ => (),
        }
    }
}

impl Processor for IpgResolveProcessor {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn priority(&self) -> Priority {
        self.base.priority()
    }

    fn process(&mut self, ctx: &mut RequestContext) {
        if !self.valid {
            self.base.fail(
                ctx,
                GwError::inconsistency("ipg processor for another request kind"),
            );
            return;
        }
        self.advance(ctx);
    }

    fn process_event(&mut self, ctx: &mut RequestContext) {
        if self.base.is_done() || ctx.is_canceled() {
            return;
        }
        if let Some((_, resolver)) = self.resolver.as_mut() {
            let events = resolver.poll(ctx);
            if events.is_empty() {
                return;
            }
            self.on_events(ctx, events);
            self.advance(ctx);
            return;
        }
        self.poll_query(ctx);
    }

    fn status(&self) -> &ProcessorStatus {
        self.base.status()
    }

    fn cancel(&mut self, _ctx: &mut RequestContext) {
        if let Some((_, mut resolver)) = self.resolver.take() {
            resolver.cancel();
        }
        if let Some(mut task) = self.query.take() {
            task.cancel();
        }
        self.base.cancel();
    }
}
