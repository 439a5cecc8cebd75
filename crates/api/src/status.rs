//! Processor and reply statuses.

use crate::*;

/// Dispatch priority of a processor. Assigned from registration order:
/// lower values are tried first and are more authoritative.
pub type Priority = u32;

/// Where a processor stands.
#[derive(Debug, Clone, Default)]
pub enum ProcessorStatus {
    /// Still working.
    #[default]
    InProgress,
    /// Produced the requested data.
    Found,
    /// Looked, nothing there.
    NotFound,
    /// Failed.
    Error(GwError),
    /// Stopped because the request was canceled.
    Canceled,
}

impl ProcessorStatus {
    /// Anything but [ProcessorStatus::InProgress].
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// True for [ProcessorStatus::Found].
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found)
    }

    /// Success ranking, lower is better.
    fn rank(&self) -> u8 {
        match self {
            Self::Found => 0,
            Self::NotFound => 1,
            Self::Error(_) => 2,
            Self::Canceled => 3,
            Self::InProgress => 4,
        }
    }

    /// The http-like status code reported to the client.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Found => 200,
            Self::NotFound => 404,
            Self::Error(e) => e.status_code(),
            Self::Canceled => 499,
            Self::InProgress => 202,
        }
    }

    /// Pick the most successful of a set of statuses. On a tie the first
    /// one wins.
    pub fn best<'a, I>(statuses: I) -> Option<&'a ProcessorStatus>
    where
        I: IntoIterator<Item = &'a ProcessorStatus>,
    {
        statuses.into_iter().fold(None, |best, s| match best {
            Some(b) if b.rank() <= s.rank() => Some(b),
            _ => Some(s),
        })
    }
}

impl From<GwError> for ProcessorStatus {
    fn from(e: GwError) -> Self {
        if e.is_not_found() {
            Self::NotFound
        } else {
            Self::Error(e)
        }
    }
}

impl std::fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => f.write_str("in-progress"),
            Self::Found => f.write_str("found"),
            Self::NotFound => f.write_str("not-found"),
            Self::Error(e) => write!(f, "error ({e})"),
            Self::Canceled => f.write_str("canceled"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn best_status_prefers_success() {
        let list = [
            ProcessorStatus::Error(GwError::backend_timeout("t")),
            ProcessorStatus::NotFound,
            ProcessorStatus::Found,
            ProcessorStatus::Canceled,
        ];
        assert!(ProcessorStatus::best(&list).unwrap().is_found());

        let list = [
            ProcessorStatus::Error(GwError::backend_timeout("t")),
            ProcessorStatus::NotFound,
        ];
        assert_eq!(404, ProcessorStatus::best(&list).unwrap().status_code());

        let list = [
            ProcessorStatus::Error(GwError::backend_timeout("t")),
            ProcessorStatus::Error(GwError::backend("b")),
        ];
        assert_eq!(504, ProcessorStatus::best(&list).unwrap().status_code());

        let empty: [ProcessorStatus; 0] = [];
        assert!(ProcessorStatus::best(&empty).is_none());
    }

    #[test]
    fn not_found_error_converts_to_not_found_status() {
        let s: ProcessorStatus = GwError::not_found("x").into();
        assert!(matches!(s, ProcessorStatus::NotFound));
        let s: ProcessorStatus = GwError::client("x").into();
        assert_eq!(400, s.status_code());
    }
}
