//! Error taxonomy shared across the import pipeline.

use std::error::Error;

use thiserror::Error;

/// Primary error type returned by pipeline components.
///
/// Each variant maps to a fixed [`ErrorKind`] and carries its own retry
/// classification. Source fetchers and the origin uploader construct these
/// directly from structured context (HTTP status codes, io errors, timeouts)
/// wherever possible; substring matching against raw text is reserved for
/// classifying a child process's stderr, where no structured signal exists.
#[derive(Debug, Error)]
pub enum ClipforgeError {
    /// The source reference could not be parsed or addressed at all.
    #[error("invalid source reference: {detail}")]
    SourceInvalid {
        /// Human-readable detail about what was invalid.
        detail: String,
    },
    /// The source rejected access (403, oauth failure, etc).
    #[error("access to source was denied")]
    SourceDenied,
    /// The source does not exist (404, deleted file, unknown platform id).
    #[error("source was not found")]
    SourceNotFound,
    /// The source provider's quota was exhausted for this credential.
    #[error("source provider quota exceeded")]
    SourceQuota,
    /// The source is temporarily unreachable; worth retrying later.
    #[error("source temporarily unavailable")]
    SourceUnavailable {
        /// Underlying transport error, when one is available.
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },
    /// Every configured egress identity failed for a platform-id fetch.
    #[error("all egress identities failed")]
    EgressExhausted,
    /// The source payload exceeds the configured maximum file size.
    #[error("source exceeds maximum permitted size")]
    SizeExceeded {
        /// Configured maximum, in bytes.
        limit_bytes: u64,
        /// Observed size, when known ahead of the cap being hit.
        actual_bytes: Option<u64>,
    },
    /// The object origin responded with a 4xx/5xx status.
    #[error("origin rejected the request with status {status}")]
    OriginApiError {
        /// HTTP status code returned by the origin.
        status: u16,
    },
    /// A transport-level error occurred while talking to the origin.
    #[error("network error while talking to the origin")]
    OriginNetworkError {
        /// Underlying transport error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The downloader child process exceeded its hard timeout.
    #[error("downloader child process timed out")]
    ChildTimeout,
    /// The job was cancelled via an operator-initiated kill, not a pipeline failure.
    #[error("job was manually killed")]
    ManualKill,
    /// A failure classified as permanent and not worth retrying.
    #[error("permanent failure: {0}")]
    PermanentFailure(String),
    /// An infrastructure-level failure (database unreachable, decode error) from a store,
    /// recovery, or catalog-admin operation. Distinct from the per-job failure taxonomy above:
    /// this never becomes a job's `failure_reason`, it propagates to the caller of the trait
    /// method instead.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Fixed classification used for metrics and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`ClipforgeError::SourceInvalid`].
    SourceInvalid,
    /// See [`ClipforgeError::SourceDenied`].
    SourceDenied,
    /// See [`ClipforgeError::SourceNotFound`].
    SourceNotFound,
    /// See [`ClipforgeError::SourceQuota`].
    SourceQuota,
    /// See [`ClipforgeError::SourceUnavailable`].
    SourceUnavailable,
    /// See [`ClipforgeError::EgressExhausted`].
    EgressExhausted,
    /// See [`ClipforgeError::SizeExceeded`].
    SizeExceeded,
    /// See [`ClipforgeError::OriginApiError`].
    OriginApiError,
    /// See [`ClipforgeError::OriginNetworkError`].
    OriginNetworkError,
    /// See [`ClipforgeError::ChildTimeout`].
    ChildTimeout,
    /// See [`ClipforgeError::ManualKill`].
    ManualKill,
    /// See [`ClipforgeError::PermanentFailure`].
    PermanentFailure,
    /// See [`ClipforgeError::Internal`].
    Internal,
}

impl ClipforgeError {
    /// Fixed classification for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceInvalid { .. } => ErrorKind::SourceInvalid,
            Self::SourceDenied => ErrorKind::SourceDenied,
            Self::SourceNotFound => ErrorKind::SourceNotFound,
            Self::SourceQuota => ErrorKind::SourceQuota,
            Self::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            Self::EgressExhausted => ErrorKind::EgressExhausted,
            Self::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            Self::OriginApiError { .. } => ErrorKind::OriginApiError,
            Self::OriginNetworkError { .. } => ErrorKind::OriginNetworkError,
            Self::ChildTimeout => ErrorKind::ChildTimeout,
            Self::ManualKill => ErrorKind::ManualKill,
            Self::PermanentFailure(_) => ErrorKind::PermanentFailure,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Wrap an arbitrary infrastructure failure (store, recovery, catalog-admin) for propagation.
    #[must_use]
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    /// Whether the job store should re-arm the job for another attempt.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SourceQuota
                | ErrorKind::SourceUnavailable
                | ErrorKind::EgressExhausted
                | ErrorKind::OriginApiError
                | ErrorKind::OriginNetworkError
                | ErrorKind::ChildTimeout
        )
    }

    /// Whether a terminal failure should still notify the catalog.
    ///
    /// Manual kills are an operator action, not a pipeline failure, and must
    /// never be surfaced to the catalog as an import failure.
    #[must_use]
    pub const fn notifies_catalog_on_failure(&self) -> bool {
        !matches!(self.kind(), ErrorKind::ManualKill)
    }
}

/// Convenience alias for pipeline operation results.
pub type ClipforgeResult<T> = Result<T, ClipforgeError>;

/// Substring markers recognized in a downloader child process's stderr.
///
/// These are deliberately only consulted for the platform-id fetcher's child
/// process, which has no structured error channel. Every other fetcher and
/// the origin uploader classify from status codes and typed transport errors.
const PERMANENT_MARKERS: &[&str] = &[
    "file not found",
    "invalid url",
    "invalid youtube url",
    "file is not a video",
    "access denied",
    "unauthorized",
];

/// Classify a downloader child process's stderr output.
///
/// Returns `Some` when one of the known permanent-failure markers is present;
/// callers should fall back to a retryable [`ClipforgeError::SourceUnavailable`]
/// when this returns `None`, since an unrecognized failure is more likely
/// transient (network blip, rate limit) than a reason to give up.
#[must_use]
pub fn classify_child_stderr(stderr: &str) -> Option<ClipforgeError> {
    let lowered = stderr.to_lowercase();
    PERMANENT_MARKERS
        .iter()
        .find(|marker| lowered.contains(*marker))
        .map(|marker| ClipforgeError::PermanentFailure((*marker).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_taxonomy() {
        assert!(ClipforgeError::SourceQuota.retryable());
        assert!(ClipforgeError::EgressExhausted.retryable());
        assert!(ClipforgeError::ChildTimeout.retryable());
        assert!(!ClipforgeError::SourceDenied.retryable());
        assert!(!ClipforgeError::SourceNotFound.retryable());
        assert!(!ClipforgeError::ManualKill.retryable());
        assert!(!ClipforgeError::PermanentFailure("x".into()).retryable());
    }

    #[test]
    fn manual_kill_never_notifies_catalog() {
        assert!(!ClipforgeError::ManualKill.notifies_catalog_on_failure());
        assert!(ClipforgeError::SourceDenied.notifies_catalog_on_failure());
    }

    #[test]
    fn child_stderr_classification_matches_known_markers() {
        let err = classify_child_stderr("ERROR: File is not a video, skipping")
            .expect("expected permanent classification");
        assert_eq!(err.kind(), ErrorKind::PermanentFailure);

        assert!(classify_child_stderr("ERROR: HTTP Error 429: Too Many Requests").is_none());
    }
}
