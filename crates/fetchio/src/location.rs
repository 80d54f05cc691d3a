use crate::poll::JobHandle;

/// Where a resolved track can be fetched from. Immutable once produced;
/// resolution never mutates a location it already handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A URL whose response body is the finished file.
    Direct(String),
    /// A server-side conversion job that must be polled to completion
    /// before any bytes exist.
    Job(JobHandle),
    /// A base64 manifest blob that resolves to one or more byte sources.
    EncodedManifest(String),
}
