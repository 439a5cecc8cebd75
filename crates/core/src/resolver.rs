//! Asynchronous resolution of a user supplied seq id to canonical metadata.
//!
//! The resolver is embedded in processors. It never blocks: [Resolver::start]
//! answers synchronously from the local cache when it can, otherwise it
//! starts backend fetch tasks and the owning processor calls
//! [Resolver::poll] whenever its request is woken. Both return the events
//! the processor has to react to.
//!
//! Lookup order:
//! - accession-like ids: primary bioseq info lookup by accession, version
//!   and type
//! - everything else, or a primary miss: secondary lookup (si2csi), then a
//!   bioseq info lookup of the canonical id it points to

use crate::context::Counters;
use crate::fetch::*;
use crate::request_ctx::RequestContext;
use seqgate_api::*;

/// What a resolver has to tell its processor.
#[derive(Debug)]
pub enum ResolveEvent {
    /// Plausible data arrived, the id exists. Sent at most once, before
    /// [ResolveEvent::Resolved].
    GoodData,
    /// Resolution succeeded.
    Resolved(BioseqInfo),
    /// Resolution failed. [GwError::NotFound] if the id is unknown.
    Failed(GwError),
}

enum Stage {
    Idle,
    Primary(FetchTask<Vec<BioseqInfo>>),
    Secondary(FetchTask<Vec<Si2Csi>>),
    Canonical(FetchTask<Vec<BioseqInfo>>),
    Done,
}

/// Resolution of one seq id.
pub struct Resolver {
    seq_id: SeqId,
    want_gi: bool,
    stage: Stage,
    good_data_sent: bool,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match &self.stage {
            Stage::Idle => "idle",
            Stage::Primary(_) => "primary",
            Stage::Secondary(_) => "secondary",
            Stage::Canonical(_) => "canonical",
            Stage::Done => "done",
        };
        f.debug_struct("Resolver")
            .field("seq_id", &self.seq_id)
            .field("stage", &stage)
            .finish()
    }
}

impl Resolver {
    /// A resolver for `seq_id`. With `want_gi`, records carrying a gi are
    /// preferred.
    pub fn new(seq_id: SeqId, want_gi: bool) -> Self {
        Self {
            seq_id,
            want_gi,
            stage: Stage::Idle,
            good_data_sent: false,
        }
    }

    /// The id being resolved.
    pub fn seq_id(&self) -> &SeqId {
        &self.seq_id
    }

    /// True while backend lookups are outstanding.
    pub fn is_in_progress(&self) -> bool {
        !matches!(self.stage, Stage::Idle | Stage::Done)
    }

    /// Start resolution.
    pub fn start(&mut self, ctx: &mut RequestContext) -> Vec<ResolveEvent> {
        if !matches!(self.stage, Stage::Idle) {
            return vec![ResolveEvent::Failed(GwError::inconsistency(
                format!("resolver for {} started twice", self.seq_id),
            ))];
        }

        let policy = ctx.request().options.cache_policy;
        if policy.use_cache() {
            if let Some(events) = self.from_cache(ctx) {
                self.stage = Stage::Done;
                return events;
            }
        }

        if !policy.use_db() {
            self.stage = Stage::Done;
            return vec![self.not_found()];
        }

        if self.seq_id.is_accession_like() {
            let query = BioseqInfoQuery::from_seq_id(&self.seq_id);
            self.stage = Stage::Primary(Self::fetch_bioseq(ctx, query));
        } else {
            self.start_secondary(ctx);
        }
        Vec::new()
    }

    /// Check outstanding lookups. Never blocks.
    pub fn poll(&mut self, ctx: &mut RequestContext) -> Vec<ResolveEvent> {
        match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Primary(mut task) => match task.poll() {
                FetchState::DataReady => {
                    let rows = task.take_data().unwrap_or_default();
                    if rows.is_empty() {
                        tracing::trace!(seq_id = %self.seq_id, "primary miss");
                        self.start_secondary(ctx);
                        Vec::new()
                    } else {
                        self.resolved(rows)
                    }
                }
                FetchState::Error => self.fail(ctx, task.take_error()),
                _ => {
                    self.stage = Stage::Primary(task);
                    Vec::new()
                }
            },
            Stage::Secondary(mut task) => match task.poll() {
                FetchState::DataReady => {
                    let rows = task.take_data().unwrap_or_default();
                    self.on_si2csi(ctx, rows)
                }
                FetchState::Error => self.fail(ctx, task.take_error()),
                _ => {
                    self.stage = Stage::Secondary(task);
                    Vec::new()
                }
            },
            Stage::Canonical(mut task) => match task.poll() {
                FetchState::DataReady => {
                    let rows = task.take_data().unwrap_or_default();
                    if rows.is_empty() {
                        vec![self.not_found()]
                    } else {
                        self.resolved(rows)
                    }
                }
                FetchState::Error => self.fail(ctx, task.take_error()),
                _ => {
                    self.stage = Stage::Canonical(task);
                    Vec::new()
                }
            },
            stage => {
                self.stage = stage;
                Vec::new()
            }
        }
    }

    /// Abort outstanding lookups. No further events are produced.
    pub fn cancel(&mut self) {
        match &mut self.stage {
            Stage::Primary(t) | Stage::Canonical(t) => t.cancel(),
            Stage::Secondary(t) => t.cancel(),
            Stage::Idle | Stage::Done => (),
        }
        self.stage = Stage::Done;
    }

    fn fetch_bioseq(
        ctx: &RequestContext,
        query: BioseqInfoQuery,
    ) -> FetchTask<Vec<BioseqInfo>> {
        let backend = ctx.backend();
        FetchTask::start(
            format!("bioseq info {}", query.accession),
            ctx.signal(),
            ctx.op_timeout(),
            async move { backend.fetch_bioseq_info(query).await },
        )
    }

    fn start_secondary(&mut self, ctx: &RequestContext) {
        let query = Si2CsiQuery::from_seq_id(&self.seq_id);
        let backend = ctx.backend();
        self.stage = Stage::Secondary(FetchTask::start(
            format!("si2csi {}", query.sec_seq_id),
            ctx.signal(),
            ctx.op_timeout(),
            async move { backend.fetch_si2csi(query).await },
        ));
    }

    fn on_si2csi(
        &mut self,
        ctx: &mut RequestContext,
        rows: Vec<Si2Csi>,
    ) -> Vec<ResolveEvent> {
        let Some(row) = rows.into_iter().max_by_key(|r| r.version) else {
            return vec![self.not_found()];
        };

        let mut events = Vec::new();
        self.good_data(&mut events);

        let query = self.canonical_query(&row);
        if ctx.request().options.cache_policy.use_cache() {
            if let Some(rows) = Self::cache_bioseq(ctx, &query) {
                events.extend(self.resolved(rows));
                return events;
            }
        }
        self.stage = Stage::Canonical(Self::fetch_bioseq(ctx, query));
        events
    }

    fn canonical_query(&self, row: &Si2Csi) -> BioseqInfoQuery {
        BioseqInfoQuery {
            accession: row.accession.clone(),
            version: Some(row.version),
            seq_id_type: Some(row.seq_id_type),
            gi: self.seq_id.gi(),
        }
    }

    fn from_cache(
        &mut self,
        ctx: &mut RequestContext,
    ) -> Option<Vec<ResolveEvent>> {
        let cache = ctx.gw().local_cache()?.clone();

        if self.seq_id.is_accession_like() {
            let query = BioseqInfoQuery::from_seq_id(&self.seq_id);
            if let Some(rows) = Self::cache_bioseq(ctx, &query) {
                return Some(self.resolved(rows));
            }
        }

        let query = Si2CsiQuery::from_seq_id(&self.seq_id);
        let rows = match cache.lookup_si2csi(&query) {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(?err, "local cache si2csi lookup failed");
                Vec::new()
            }
        };
        let counters = ctx.gw().counters();
        let row = match rows.into_iter().max_by_key(|r| r.version) {
            Some(row) => {
                Counters::incr(&counters.cache_hits);
                row
            }
            None => {
                Counters::incr(&counters.cache_misses);
                return None;
            }
        };

        let query = self.canonical_query(&row);
        let rows = Self::cache_bioseq(ctx, &query)?;
        Some(self.resolved(rows))
    }

    fn cache_bioseq(
        ctx: &RequestContext,
        query: &BioseqInfoQuery,
    ) -> Option<Vec<BioseqInfo>> {
        let cache = ctx.gw().local_cache()?;
        let counters = ctx.gw().counters();
        match cache.lookup_bioseq_info(query) {
            Ok(rows) if !rows.is_empty() => {
                Counters::incr(&counters.cache_hits);
                Some(rows)
            }
            Ok(_) => {
                Counters::incr(&counters.cache_misses);
                None
            }
            Err(err) => {
                tracing::warn!(?err, "local cache bioseq info lookup failed");
                Counters::incr(&counters.cache_misses);
                None
            }
        }
    }

    fn good_data(&mut self, events: &mut Vec<ResolveEvent>) {
        if !self.good_data_sent {
            self.good_data_sent = true;
            events.push(ResolveEvent::GoodData);
        }
    }

    fn resolved(&mut self, rows: Vec<BioseqInfo>) -> Vec<ResolveEvent> {
        self.stage = Stage::Done;
        let mut events = Vec::new();
        match select_bioseq(rows, self.want_gi) {
            Some(info) => {
                self.good_data(&mut events);
                events.push(ResolveEvent::Resolved(info));
            }
            None => events.push(self.not_found()),
        }
        events
    }

    fn fail(
        &mut self,
        ctx: &RequestContext,
        err: Option<GwError>,
    ) -> Vec<ResolveEvent> {
        self.stage = Stage::Done;
        let err = err.unwrap_or_else(|| {
            GwError::inconsistency("fetch task in error state without error")
        });
        if !err.is_not_found() {
            tracing::warn!(seq_id = %self.seq_id, ?err, "resolution failed");
            Counters::incr(&ctx.gw().counters().resolve_errors);
            ctx.gw().note_backend_error(&err);
        }
        vec![ResolveEvent::Failed(err)]
    }

    fn not_found(&self) -> ResolveEvent {
        ResolveEvent::Failed(GwError::not_found(format!(
            "seq id {}",
            self.seq_id
        )))
    }
}

/// Pick the best of several matching records: the highest version, and
/// among those, with `want_gi`, one carrying a gi.
pub fn select_bioseq(
    rows: Vec<BioseqInfo>,
    want_gi: bool,
) -> Option<BioseqInfo> {
    rows.into_iter()
        .max_by_key(|r| (r.version, want_gi && r.gi.is_some()))
}
