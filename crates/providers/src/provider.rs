use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::watch;

use fetchio::{FetchError, Location, Manifest, RetrievalProgress, Retriever, manifest};

use crate::amazon::AmazonProvider;
use crate::qobuz::QobuzProvider;
use crate::tidal::TidalProvider;
use crate::track::TrackRequest;

/// A backend that can turn a track request into a playable location and
/// then into a file on disk.
#[async_trait]
pub trait Provider: Send {
    fn kind(&self) -> ProviderKind;

    /// Resolve the request to a retrievable location without downloading.
    async fn resolve(&mut self, request: &TrackRequest) -> Result<Location, FetchError>;

    /// Full flow: skip-if-exists, resolve, retrieve. Returns the path of
    /// the file on disk.
    async fn download(&mut self, request: &TrackRequest) -> Result<PathBuf, FetchError>;

    /// Watch byte counts and throughput while `download` runs.
    fn subscribe_progress(&self) -> watch::Receiver<RetrievalProgress>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Amazon,
    Qobuz,
    Tidal,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] =
        [ProviderKind::Amazon, ProviderKind::Qobuz, ProviderKind::Tidal];

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Amazon => "amazon",
            ProviderKind::Qobuz => "qobuz",
            ProviderKind::Tidal => "tidal",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amazon" => Ok(ProviderKind::Amazon),
            "qobuz" => Ok(ProviderKind::Qobuz),
            "tidal" => Ok(ProviderKind::Tidal),
            other => Err(format!(
                "unknown provider '{other}' (expected one of: amazon, qobuz, tidal)"
            )),
        }
    }
}

/// Construct a provider for `kind` over a shared HTTP client.
pub fn create_provider(kind: ProviderKind, client: Client) -> Box<dyn Provider> {
    match kind {
        ProviderKind::Amazon => Box::new(AmazonProvider::new(client)),
        ProviderKind::Qobuz => Box::new(QobuzProvider::new(client)),
        ProviderKind::Tidal => Box::new(TidalProvider::new(client)),
    }
}

/// Retrieve a fully resolved location to `target`. Providers drive any
/// job to completion during resolve, so a still-pending job here is a
/// resolver bug surfaced as an error rather than a panic.
pub(crate) async fn retrieve_location(
    retriever: &mut Retriever,
    location: &Location,
    target: &Path,
) -> Result<PathBuf, FetchError> {
    let manifest = match location {
        Location::Direct(url) => Manifest::Direct(url.clone()),
        Location::EncodedManifest(encoded) => manifest::resolve(encoded)?,
        Location::Job(handle) => {
            return Err(FetchError::JobFailed {
                reason: format!("job {} was not driven to completion", handle.id),
            });
        }
    };
    retriever.retrieve(&manifest, target).await
}
