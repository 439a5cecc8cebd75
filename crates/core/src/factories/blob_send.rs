//! Sending one blob: properties, exclude cache check, ordered data.
//!
//! [BlobSender] is embedded by every processor that sends blobs. The
//! backend may yield the pieces of a blob in any order; they are held back
//! until every lower numbered piece went out, so the client sees ascending
//! `chunk_no`s followed by a single empty `last` piece.

use crate::context::Counters;
use crate::exclude_cache::{ExcludeBlobCache, ExcludeCheck};
use crate::fetch::*;
use crate::request_ctx::RequestContext;
use bytes::Bytes;
use seqgate_api::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Properties only.
    PropsOnly,
    /// Properties, then data.
    PropsAndData,
    /// Data only, the properties are known and were sent already.
    DataOnly,
}

/// How sending a blob ended.
#[derive(Debug, Clone)]
pub enum BlobSendOutcome {
    /// Properties (if requested) and all data were sent.
    Sent,
    /// Only properties were sent.
    PropsOnly,
    /// An exclude notice was sent instead of the data.
    Excluded,
    /// The blob does not exist.
    NotFound,
    /// Something failed. Nothing was reported to the client yet.
    Failed(GwError),
}

struct DataState {
    props: BlobProps,
    stream: ChunkStreamTask,
    pending: BTreeMap<u32, Bytes>,
    next: u32,
}

enum State {
    Init,
    Props(FetchTask<Option<BlobProps>>),
    Data(Box<DataState>),
    Done,
}

/// Sends one blob.
pub struct BlobSender {
    processor: Arc<str>,
    blob_id: BlobId,
    keyspace: Arc<str>,
    last_modified: Option<i64>,
    mode: SendMode,
    props: Option<BlobProps>,
    state: State,
    exclude: Option<(Arc<ExcludeBlobCache>, ClientId)>,
    outcome: Option<BlobSendOutcome>,
}

impl std::fmt::Debug for BlobSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobSender")
            .field("blob_id", &self.blob_id)
            .field("mode", &self.mode)
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl Drop for BlobSender {
    fn drop(&mut self) {
        self.release_exclude();
    }
}

impl BlobSender {
    /// Send blob `blob_id`, fetching its properties first.
    pub fn new(
        processor: &str,
        blob_id: BlobId,
        keyspace: Arc<str>,
        last_modified: Option<i64>,
        mode: SendMode,
    ) -> Self {
        Self {
            processor: processor.into(),
            blob_id,
            keyspace,
            last_modified,
            mode,
            props: None,
            state: State::Init,
            exclude: None,
            outcome: None,
        }
    }

    /// Send the data of a blob whose properties are already known.
    pub fn with_props(
        processor: &str,
        props: BlobProps,
        keyspace: Arc<str>,
    ) -> Self {
        let mut out = Self::new(
            processor,
            props.blob_id,
            keyspace,
            Some(props.last_modified),
            SendMode::DataOnly,
        );
        out.props = Some(props);
        out
    }

    /// The blob.
    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    /// The properties, once known.
    pub fn props(&self) -> Option<&BlobProps> {
        self.props.as_ref()
    }

    /// The outcome, once done.
    pub fn outcome(&self) -> Option<&BlobSendOutcome> {
        self.outcome.as_ref()
    }

    /// Make progress, beginning with the first call. Returns the outcome
    /// once done.
    pub fn poll(&mut self, ctx: &mut RequestContext) -> Option<BlobSendOutcome> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Init => match self.props.clone() {
                Some(props) => self.after_props(ctx, props),
                None => self.fetch_props(ctx),
            },
            State::Props(mut task) => match task.poll() {
                FetchState::DataReady => match task.take_data().flatten() {
                    Some(props) => {
                        self.props = Some(props.clone());
                        self.after_props(ctx, props);
                        if matches!(self.state, State::Data(_)) {
                            return self.poll(ctx);
                        }
                    }
                    None => self.done(ctx, BlobSendOutcome::NotFound),
                },
                FetchState::Error => {
                    let err = task.take_error().unwrap_or_else(|| {
                        GwError::inconsistency("props fetch lost its error")
                    });
                    ctx.gw().note_backend_error(&err);
                    self.done(ctx, BlobSendOutcome::Failed(err));
                }
                _ => self.state = State::Props(task),
            },
            State::Data(data) => self.pump(ctx, data),
            state => self.state = state,
        }
        self.outcome.clone()
    }

    /// Abort. An exclude cache registration is withdrawn.
    pub fn cancel(&mut self) {
        match &mut self.state {
            State::Props(task) => task.cancel(),
            State::Data(data) => data.stream.cancel(),
            State::Init | State::Done => (),
        }
        self.state = State::Done;
        self.release_exclude();
    }

    fn release_exclude(&mut self) {
        if let Some((cache, client)) = self.exclude.take() {
            cache.remove(&client, self.blob_id);
        }
    }

    fn fetch_props(&mut self, ctx: &mut RequestContext) {
        let policy = ctx.request().options.cache_policy;
        if policy.use_cache() {
            if let Some(cache) = ctx.gw().local_cache().cloned() {
                let found = cache
                    .lookup_blob_props(self.blob_id, self.last_modified)
                    .unwrap_or_else(|err| {
                        tracing::warn!(?err, "local cache blob props lookup failed");
                        None
                    });
                let counters = ctx.gw().counters();
                match found {
                    Some(props) => {
                        Counters::incr(&counters.cache_hits);
                        self.props = Some(props.clone());
                        self.after_props(ctx, props);
                        return;
                    }
                    None => Counters::incr(&counters.cache_misses),
                }
            }
        }

        if !policy.use_db() {
            self.done(ctx, BlobSendOutcome::NotFound);
            return;
        }

        let backend = ctx.backend();
        let keyspace = self.keyspace.clone();
        let sat_key = self.blob_id.sat_key;
        let last_modified = self.last_modified;
        self.state = State::Props(FetchTask::start(
            format!("blob props {}", self.blob_id),
            ctx.signal(),
            ctx.op_timeout(),
            async move {
                backend
                    .fetch_blob_props(keyspace, sat_key, last_modified)
                    .await
            },
        ));
    }

    fn after_props(&mut self, ctx: &mut RequestContext, props: BlobProps) {
        if self.mode != SendMode::DataOnly {
            ctx.emit(ReplyChunk::BlobProps {
                props: props.clone(),
            });
        }
        if self.mode == SendMode::PropsOnly {
            self.done(ctx, BlobSendOutcome::PropsOnly);
            return;
        }
        if props.withdrawn {
            ctx.message(
                Severity::Warning,
                410,
                format!("blob {} is withdrawn", self.blob_id),
            );
            self.done(ctx, BlobSendOutcome::PropsOnly);
            return;
        }

        if let Some(client) = ctx.request().options.client_id.clone() {
            if props.size > ctx.gw().config().small_blob_size {
                let cache = ctx.gw().exclude_cache().clone();
                let check = cache.check_and_add(
                    &client,
                    self.blob_id,
                    ctx.resend_timeout(),
                );
                let excluded = match check {
                    ExcludeCheck::Added => {
                        self.exclude = Some((cache, client));
                        None
                    }
                    ExcludeCheck::InProgress => {
                        Some((ExcludeReason::InProgress, None))
                    }
                    ExcludeCheck::SentRecently { ago } => Some((
                        ExcludeReason::SentRecently,
                        Some(ago.as_micros() as u64),
                    )),
                };
                if let Some((reason, sent_ago_us)) = excluded {
                    ctx.trace(
                        &self.processor,
                        format_args!("blob {} excluded: {reason:?}", self.blob_id),
                    );
                    ctx.emit(ReplyChunk::BlobExcluded {
                        blob_id: self.blob_id,
                        reason,
                        sent_ago_us,
                    });
                    self.done(ctx, BlobSendOutcome::Excluded);
                    return;
                }
            }
        }

        ctx.trace(
            &self.processor,
            format_args!("streaming blob {} ({} chunks)", self.blob_id, props.n_chunks),
        );
        let stream = ctx.backend().stream_blob_chunks(
            self.keyspace.clone(),
            self.blob_id.sat_key,
            props.last_modified,
        );
        self.state = State::Data(Box::new(DataState {
            stream: ChunkStreamTask::start(
                format!("blob data {}", self.blob_id),
                ctx.signal(),
                ctx.op_timeout(),
                stream,
            ),
            props,
            pending: BTreeMap::new(),
            next: 0,
        }));
    }

    fn pump(&mut self, ctx: &mut RequestContext, mut d: Box<DataState>) {
        // the next piece is here but the client is not reading, leave the
        // rest in the stream
        let stalled = d.pending.contains_key(&d.next) && !ctx.output_ready();
        if stalled {
            self.state = State::Data(d);
            return;
        }
        d.stream.poll();

        while let Some(c) = d.stream.pop_chunk() {
            if c.chunk_no >= d.props.n_chunks
                || c.chunk_no < d.next
                || d.pending.contains_key(&c.chunk_no)
            {
                d.stream.cancel();
                let err = GwError::backend(format!(
                    "blob {}: unexpected chunk {} of {}",
                    self.blob_id, c.chunk_no, d.props.n_chunks
                ));
                ctx.gw().note_backend_error(&err);
                self.done(ctx, BlobSendOutcome::Failed(err));
                return;
            }
            tracing::trace!(blob = %self.blob_id, chunk = c.chunk_no, "chunk arrived");
            d.pending.insert(c.chunk_no, c.data);
        }

        if let Some(err) = d.stream.take_error() {
            ctx.gw().note_backend_error(&err);
            self.done(ctx, BlobSendOutcome::Failed(err));
            return;
        }

        while d.pending.first_key_value().map(|(n, _)| *n) == Some(d.next) {
            if !ctx.output_ready() {
                self.state = State::Data(d);
                return;
            }
            if let Some(data) = d.pending.remove(&d.next) {
                ctx.emit(ReplyChunk::BlobData {
                    blob_id: self.blob_id,
                    chunk_no: d.next,
                    last: false,
                    data,
                });
                d.next += 1;
            }
        }

        if !d.stream.is_ended() {
            self.state = State::Data(d);
            return;
        }

        if d.next != d.props.n_chunks {
            let err = GwError::backend(format!(
                "blob {}: data ended after {} of {} chunks",
                self.blob_id, d.next, d.props.n_chunks
            ));
            ctx.gw().note_backend_error(&err);
            self.done(ctx, BlobSendOutcome::Failed(err));
            return;
        }

        ctx.emit(ReplyChunk::BlobData {
            blob_id: self.blob_id,
            chunk_no: d.next,
            last: true,
            data: Bytes::new(),
        });
        self.done(ctx, BlobSendOutcome::Sent);
    }

    fn done(&mut self, ctx: &mut RequestContext, outcome: BlobSendOutcome) {
        self.state = State::Done;
        let counters = ctx.gw().counters();
        match &outcome {
            BlobSendOutcome::Sent => {
                if let Some((cache, client)) = self.exclude.take() {
                    cache.set_completed(&client, self.blob_id);
                }
                Counters::incr(&counters.blobs_sent);
            }
            BlobSendOutcome::Excluded => {
                Counters::incr(&counters.blobs_excluded);
            }
            _ => self.release_exclude(),
        }
        tracing::debug!(blob = %self.blob_id, ?outcome, "blob send done");
        self.outcome = Some(outcome);
    }
}
