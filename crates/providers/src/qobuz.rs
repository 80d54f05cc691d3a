// Two-endpoint backend: one catalog search by ISRC, then the primary and
// fallback stream endpoints tried in order. No throttling and no jobs;
// the stream endpoints answer with a direct URL or not at all.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::info;

use fetchio::{FetchError, Location, RetrievalProgress, Retriever, fallback};

use crate::provider::{Provider, ProviderKind, retrieve_location};
use crate::track::TrackRequest;

const SEARCH_API: &str = "https://www.qobuz.com/api.json/0.2/track/search";
const APP_ID: &str = "798273057";
const STREAM_ENDPOINTS: [&str; 2] = [
    "https://dab.yeet.su/api/stream",
    "https://dabmusic.xyz/api/stream",
];
/// Quality codes: 6 = FLAC 16-bit, 7 = FLAC 24-bit, 27 = Hi-Res.
const DEFAULT_QUALITY: &str = "6";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Debug, Deserialize)]
struct SearchTracks {
    #[serde(default)]
    items: Vec<CatalogTrack>,
}

#[derive(Debug, Deserialize)]
struct CatalogTrack {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    hires: bool,
    #[serde(default)]
    maximum_bit_depth: u32,
    #[serde(default)]
    maximum_sampling_rate: f64,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    url: String,
}

pub struct QobuzProvider {
    client: Client,
    endpoints: Vec<String>,
    retriever: Retriever,
}

impl QobuzProvider {
    pub fn new(client: Client) -> Self {
        Self {
            retriever: Retriever::new(client.clone()),
            client,
            endpoints: STREAM_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
        }
    }

    async fn search_by_isrc(&self, isrc: &str) -> Result<CatalogTrack, FetchError> {
        let url = format!("{SEARCH_API}?query={isrc}&limit=1&app_id={APP_ID}");
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::http_status(
                response.status(),
                url,
                "track search",
            ));
        }

        let body = response.text().await?;
        if body.is_empty() {
            return Err(FetchError::parse("search response", "empty body", &body));
        }
        let search: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::parse("search response", e.to_string(), &body))?;

        search
            .tracks
            .items
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::not_found(format!("track for ISRC {isrc}")))
    }

    async fn stream_url(
        &self,
        endpoint: &str,
        track_id: i64,
        quality: &str,
    ) -> Result<String, FetchError> {
        let url = stream_request_url(endpoint, track_id, quality);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::http_status(
                response.status(),
                url,
                "stream lookup",
            ));
        }

        let body = response.text().await?;
        let stream: StreamResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::parse("stream response", e.to_string(), &body))?;
        if stream.url.is_empty() {
            return Err(FetchError::parse(
                "stream response",
                "no download URL",
                &body,
            ));
        }
        Ok(stream.url)
    }
}

#[async_trait]
impl Provider for QobuzProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Qobuz
    }

    async fn resolve(&mut self, request: &TrackRequest) -> Result<Location, FetchError> {
        let Some(isrc) = request.isrc.as_deref() else {
            return Err(FetchError::not_found(format!(
                "ISRC for track {} (required for this backend)",
                request.track_id
            )));
        };

        let track = self.search_by_isrc(isrc).await?;
        if track.hires {
            info!(
                title = %track.title,
                bit_depth = track.maximum_bit_depth,
                sampling_khz = track.maximum_sampling_rate,
                "Found hi-res track"
            );
        } else {
            info!(title = %track.title, "Found track");
        }

        let quality = request.quality_or(DEFAULT_QUALITY);
        let quality = quality.as_str();
        let this = &*self;
        let url = fallback::try_in_order(&this.endpoints, |endpoint| {
            let endpoint = endpoint.clone();
            async move { this.stream_url(&endpoint, track.id, quality).await }
        })
        .await?;
        Ok(Location::Direct(url))
    }

    async fn download(&mut self, request: &TrackRequest) -> Result<PathBuf, FetchError> {
        if let Some(existing) = request.existing_output() {
            info!(path = %existing.display(), "File already exists, skipping");
            return Ok(existing);
        }
        tokio::fs::create_dir_all(&request.output_dir).await?;

        let location = self.resolve(request).await?;
        retrieve_location(&mut self.retriever, &location, &request.target_path()).await
    }

    fn subscribe_progress(&self) -> watch::Receiver<RetrievalProgress> {
        self.retriever.subscribe_progress()
    }
}

fn stream_request_url(endpoint: &str, track_id: i64, quality: &str) -> String {
    format!("{endpoint}?trackId={track_id}&quality={quality}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_carries_track_and_quality() {
        assert_eq!(
            stream_request_url("https://dab.yeet.su/api/stream", 12345, "27"),
            "https://dab.yeet.su/api/stream?trackId=12345&quality=27"
        );
    }

    #[test]
    fn search_response_parses_hires_metadata() {
        let raw = r#"{"query":"USSM12345678","tracks":{"limit":1,"offset":0,"total":1,"items":[
            {"id":52718836,"title":"Song","isrc":"USSM12345678","hires":true,
             "maximum_bit_depth":24,"maximum_sampling_rate":96.0}
        ]}}"#;
        let search: SearchResponse = serde_json::from_str(raw).unwrap();
        let track = &search.tracks.items[0];
        assert_eq!(track.id, 52718836);
        assert!(track.hires);
        assert_eq!(track.maximum_bit_depth, 24);
    }

    #[test]
    fn empty_item_list_parses_cleanly() {
        let raw = r#"{"tracks":{"items":[]}}"#;
        let search: SearchResponse = serde_json::from_str(raw).unwrap();
        assert!(search.tracks.items.is_empty());
    }

    #[test]
    fn stream_response_without_url_is_detectable() {
        let stream: StreamResponse = serde_json::from_str(r#"{"error":"no stream"}"#).unwrap();
        assert!(stream.url.is_empty());
    }
}
