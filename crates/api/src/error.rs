//! Seqgate error types.

use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// The gateway error type, shared by every processor, the resolver and
/// the backend / cache traits.
///
/// This type is `Clone` so a fetch task can hand the same failure to
/// the stage that converts it into a reply message and keep it around
/// for logging.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GwError {
    /// The requested item does not exist. This is benign: it is not
    /// logged as an error and does not bump error counters.
    #[error("not found: {ctx}")]
    NotFound {
        /// What was looked for.
        ctx: Arc<str>,
    },

    /// The request itself is malformed (bad chunk number, bad range,
    /// unparsable id2 info, unknown satellite).
    #[error("bad request: {ctx}")]
    Client {
        /// What is wrong with the request.
        ctx: Arc<str>,
    },

    /// A backend operation did not complete within its deadline.
    #[error("backend timeout: {ctx}")]
    BackendTimeout {
        /// The operation that timed out.
        ctx: Arc<str>,
    },

    /// Any other backend failure.
    #[error("backend error: {ctx} (src: {src})")]
    Backend {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },

    /// Internal state machine inconsistency. This is a programming error.
    #[error("internal inconsistency: {ctx}")]
    Inconsistency {
        /// What invariant was violated.
        ctx: Arc<str>,
    },

    /// Generic gateway internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },
}

fn ctx_str<C: std::fmt::Display>(ctx: C) -> Arc<str> {
    ctx.to_string().into_boxed_str().into()
}

impl GwError {
    /// Construct a "not found" error.
    pub fn not_found<C: std::fmt::Display>(ctx: C) -> Self {
        Self::NotFound { ctx: ctx_str(ctx) }
    }

    /// Construct a "client" (bad request) error.
    pub fn client<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Client { ctx: ctx_str(ctx) }
    }

    /// Construct a "backend timeout" error.
    pub fn backend_timeout<C: std::fmt::Display>(ctx: C) -> Self {
        Self::BackendTimeout { ctx: ctx_str(ctx) }
    }

    /// Construct a "backend" error without a source.
    pub fn backend<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Backend {
            ctx: ctx_str(ctx),
            src: DynInnerError::default(),
        }
    }

    /// Construct a "backend" error with an inner source error.
    pub fn backend_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Backend {
            ctx: ctx_str(ctx),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "inconsistency" error.
    pub fn inconsistency<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Inconsistency { ctx: ctx_str(ctx) }
    }

    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx_str(ctx),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx_str(ctx),
            src: DynInnerError::default(),
        }
    }

    /// True for the benign not-found case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The http-like status code a client sees for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Client { .. } => 400,
            Self::BackendTimeout { .. } => 504,
            Self::Backend { .. } => 502,
            Self::Inconsistency { .. } | Self::Other { .. } => 500,
        }
    }
}

/// The gateway result type.
pub type GwResult<T> = Result<T, GwError>;
