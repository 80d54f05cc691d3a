use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;

/// How much of an upstream response body is kept in parse errors.
const EXCERPT_LEN: usize = 200;

/// One raced mirror's failure, kept for the aggregate error message.
#[derive(Debug)]
pub struct MirrorFailure {
    pub endpoint: String,
    pub reason: String,
}

impl std::fmt::Display for MirrorFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.reason)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("rate limited by upstream during {operation}")]
    RateLimited { operation: &'static str },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("failed to parse {what}: {reason} (response: {excerpt})")]
    Parse {
        what: &'static str,
        reason: String,
        excerpt: String,
    },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("conversion job failed: {reason}")]
    JobFailed { reason: String },

    #[error("timed out after {waited:?}: {operation}")]
    Timeout {
        operation: &'static str,
        waited: Duration,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("transcode failed ({reason}); raw audio saved as {}", salvaged.display())]
    Transcode { reason: String, salvaged: PathBuf },

    #[error("transcoder unavailable: {reason}")]
    TranscoderUnavailable { reason: String },

    #[error("all sources failed, last error: {last}")]
    SourceExhausted { last: String },

    #[error("all {} mirrors failed: {}", failures.len(), format_failures(failures))]
    MirrorsExhausted { failures: Vec<MirrorFailure> },
}

fn format_failures(failures: &[MirrorFailure]) -> String {
    failures
        .iter()
        .map(MirrorFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl FetchError {
    pub fn parse(what: &'static str, reason: impl Into<String>, body: &str) -> Self {
        Self::Parse {
            what,
            reason: reason.into(),
            excerpt: truncate(body, EXCERPT_LEN),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>, operation: &'static str) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn source_exhausted(last: impl Into<String>) -> Self {
        Self::SourceExhausted { last: last.into() }
    }

    /// True for upstream throttling, the only failure RetryableRequest retries.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::HttpStatus { status, .. } => *status == StatusCode::TOO_MANY_REQUESTS,
            _ => false,
        }
    }

    /// True when a higher layer may sensibly try another source for the
    /// same operation (region, mirror, or fallback endpoint).
    pub fn is_source_recoverable(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::HttpStatus { .. }
            | Self::Network { .. }
            | Self::JobFailed { .. }
            | Self::Timeout { .. }
            | Self::Parse { .. } => true,
            Self::NotFound { .. }
            | Self::Io { .. }
            | Self::Transcode { .. }
            | Self::TranscoderUnavailable { .. }
            | Self::SourceExhausted { .. }
            | Self::MirrorsExhausted { .. } => false,
        }
    }
}

/// Truncate a string for inclusion in error messages, marking the cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
