// Sequential fallback over an ordered list of candidate sources.
//
// Sources are tried one at a time: each attempt may itself be a slow
// multi-step operation (submit + poll), so racing them would waste
// upstream capacity.

use std::fmt::Display;
use std::future::Future;

use tracing::warn;

use crate::FetchError;

/// Try `operation` against each source in order, returning the first
/// success. When every source fails the error carries the most recent
/// failure. Failures that no alternative source can fix (local I/O,
/// transcode) end the chain immediately.
pub async fn try_in_order<S, F, Fut, T>(sources: &[S], mut operation: F) -> Result<T, FetchError>
where
    S: Display,
    F: FnMut(&S) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut last_error: Option<FetchError> = None;
    for source in sources {
        match operation(source).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_source_recoverable() => {
                warn!(source = %source, error = %err, "Source failed, trying next");
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(FetchError::source_exhausted(match last_error {
        Some(err) => err.to_string(),
        None => "no sources configured".to_string(),
    }))
}
