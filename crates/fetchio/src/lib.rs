//! Resolution and retrieval engine: the reusable machinery for talking to
//! unreliable upstreams. Client-side rate budgets, rate-limit retry,
//! ordered source fallback, mirror racing, job polling, manifest
//! resolution, and segmented retrieval with an external transcode step.
//!
//! Backend-specific composition of these pieces lives in the `providers`
//! crate; nothing in here knows about any particular upstream.

pub mod config;
pub mod error;
pub mod fallback;
pub mod location;
pub mod manifest;
pub mod poll;
pub mod progress;
pub mod race;
pub mod rate_limit;
pub mod retrieve;
pub mod retry;
pub mod shape;
pub mod transcode;

pub use config::{ClientConfig, DEFAULT_USER_AGENT, create_client};
pub use error::{FetchError, MirrorFailure};
pub use location::Location;
pub use manifest::Manifest;
pub use poll::{CompletedJob, JobHandle, JobStatus, PollPolicy};
pub use progress::{ProgressTracker, RetrievalProgress};
pub use race::{RacePolicy, RaceWin};
pub use rate_limit::{RateLimiter, RatePolicy};
pub use retrieve::Retriever;
pub use retry::RetryPolicy;
pub use shape::Shape;
pub use transcode::{FfmpegTranscoder, Transcoder};
