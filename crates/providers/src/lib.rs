//! Backend-specific resolvers over the `fetchio` engine. Each provider
//! composes a different subset of the engine's recovery machinery:
//!
//! - amazon: rate-limited catalog lookup + region fallback + job polling
//! - qobuz: ISRC search + primary/fallback stream endpoints
//! - tidal: token fetch + mirror race + manifest-driven retrieval

pub mod amazon;
pub mod catalog;
pub mod provider;
pub mod qobuz;
pub mod tidal;
pub mod track;

pub use amazon::AmazonProvider;
pub use provider::{Provider, ProviderKind, create_provider};
pub use qobuz::QobuzProvider;
pub use tidal::TidalProvider;
pub use track::TrackRequest;
