// Mirror-raced manifest backend: one OAuth client-credentials token per
// session, a metadata lookup, then every configured mirror races to
// answer the same track request. Mirrors answer in one of two shapes
// depending on their API version; the winner's payload is either a
// direct URL or an encoded manifest for the segmented retriever.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::info;

use fetchio::race::{self, RacePolicy};
use fetchio::shape::{Shape, probe_json};
use fetchio::{FetchError, Location, RetrievalProgress, Retriever};

use crate::catalog;
use crate::provider::{Provider, ProviderKind, retrieve_location};
use crate::track::TrackRequest;

const PLATFORM: &str = "tidal";
const AUTH_URL: &str = "https://auth.tidal.com/v1/oauth2/token";
const TRACK_API: &str = "https://api.tidal.com/v1/tracks/";
const CLIENT_ID: &str = "6BDSRdpK9hqEBTgU";
const CLIENT_SECRET: &str = "xeuPmY7nbpZ9IIbLAcQ93shka1VNheUAqN6IcszjTG8=";
const DEFAULT_QUALITY: &str = "LOSSLESS";

const DEFAULT_MIRRORS: [&str; 8] = [
    "https://vogel.qqdl.site",
    "https://maus.qqdl.site",
    "https://hund.qqdl.site",
    "https://katze.qqdl.site",
    "https://wolf.qqdl.site",
    "https://tidal.kinoplus.online",
    "https://tidal-api.binimum.org",
    "https://triton.squid.wtf",
];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct TrackInfo {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(rename = "audioQuality", default)]
    audio_quality: String,
}

/// v2 mirror response: the manifest rides inside a data envelope.
#[derive(Debug, Deserialize)]
struct MirrorResponseV2 {
    #[serde(default)]
    data: MirrorDataV2,
}

#[derive(Debug, Default, Deserialize)]
struct MirrorDataV2 {
    #[serde(default)]
    manifest: String,
}

/// v1 mirror response: a bare array of direct-URL entries.
#[derive(Debug, Deserialize)]
struct MirrorEntryV1 {
    #[serde(rename = "OriginalTrackUrl", default)]
    original_track_url: String,
}

pub struct TidalProvider {
    client: Client,
    race: RacePolicy,
    mirrors: Vec<String>,
    retriever: Retriever,
}

impl TidalProvider {
    pub fn new(client: Client) -> Self {
        Self {
            retriever: Retriever::new(client.clone()),
            client,
            race: RacePolicy::default(),
            mirrors: DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// One token fetch per resolution; no refresh.
    async fn fetch_token(&self) -> Result<String, FetchError> {
        let response = self
            .client
            .post(AUTH_URL)
            .basic_auth(CLIENT_ID, Some(CLIENT_SECRET))
            .form(&[("client_id", CLIENT_ID), ("grant_type", "client_credentials")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::http_status(
                response.status(),
                AUTH_URL,
                "token fetch",
            ));
        }

        let body = response.text().await?;
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::parse("token response", e.to_string(), &body))?;
        Ok(token.access_token)
    }

    async fn track_info(&self, token: &str, track_id: i64) -> Result<TrackInfo, FetchError> {
        let url = format!("{TRACK_API}{track_id}?countryCode=US");
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::http_status(response.status(), url, "track info"));
        }

        let body = response.text().await?;
        let info: TrackInfo = serde_json::from_str(&body)
            .map_err(|e| FetchError::parse("track info", e.to_string(), &body))?;
        if info.id == 0 {
            return Err(FetchError::not_found(format!("track {track_id}")));
        }
        Ok(info)
    }
}

#[async_trait]
impl Provider for TidalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tidal
    }

    async fn resolve(&mut self, request: &TrackRequest) -> Result<Location, FetchError> {
        let page = catalog::platform_link(&self.client, &request.track_id, PLATFORM).await?;
        let track_id = track_id_from_url(&page)?;

        let token = self.fetch_token().await?;
        let info = self.track_info(&token, track_id).await?;
        info!(title = %info.title, quality = %info.audio_quality, "Found track");

        let quality = request.quality_or(DEFAULT_QUALITY);
        let client = self.client.clone();
        let win = race::race_all(&self.race, &self.mirrors, move |mirror| {
            let client = client.clone();
            let url = mirror_track_url(&mirror, info.id, &quality);
            async move {
                let response = client.get(&url).send().await?;
                if !response.status().is_success() {
                    return Err(FetchError::http_status(
                        response.status(),
                        url,
                        "mirror lookup",
                    ));
                }
                let body = response.bytes().await?;
                classify_mirror_response(&body)
            }
        })
        .await?;

        info!(mirror = %win.endpoint, losers = win.failures.len(), "Mirror race won");
        Ok(win.value)
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

/// Pull the numeric track id out of a `/track/{id}` page URL.
fn track_id_from_url(page: &str) -> Result<i64, FetchError> {
    let Some((_, rest)) = page.split_once("/track/") else {
        return Err(FetchError::parse(
            "track page URL",
            "no /track/ segment",
            page,
        ));
    };
    let id = rest.split('?').next().unwrap_or(rest).trim();
    id.parse::<i64>()
        .map_err(|e| FetchError::parse("track page URL", e.to_string(), page))
}

fn mirror_track_url(mirror: &str, track_id: i64, quality: &str) -> String {
    format!("{mirror}/track/?id={track_id}&quality={quality}")
}

/// Ordered shape probe over the two mirror API generations: v2 envelope
/// with a manifest first, else the v1 direct-URL array.
fn classify_mirror_response(body: &[u8]) -> Result<Location, FetchError> {
    let probed = probe_json::<MirrorResponseV2, Vec<MirrorEntryV1>>(body, |v2| {
        !v2.data.manifest.is_empty()
    })
    .map_err(|e| {
        FetchError::parse(
            "mirror response",
            e.to_string(),
            &String::from_utf8_lossy(body),
        )
    })?;

    match probed {
        Shape::First(v2) => Ok(Location::EncodedManifest(v2.data.manifest)),
        Shape::Second(entries) => entries
            .into_iter()
            .find(|entry| !entry.original_track_url.is_empty())
            .map(|entry| Location::Direct(entry.original_track_url))
            .ok_or_else(|| {
                FetchError::parse(
                    "mirror response",
                    "no download URL in response",
                    &String::from_utf8_lossy(body),
                )
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_id_extraction_handles_query_strings() {
        assert_eq!(
            track_id_from_url("https://listen.tidal.com/track/77646168?u").unwrap(),
            77646168
        );
        assert_eq!(
            track_id_from_url("https://tidal.com/browse/track/252103").unwrap(),
            252103
        );
    }

    #[test]
    fn non_track_urls_are_parse_errors() {
        assert!(track_id_from_url("https://tidal.com/browse/album/123").is_err());
        assert!(track_id_from_url("https://tidal.com/track/not-a-number").is_err());
    }

    #[test]
    fn mirror_url_carries_id_and_quality() {
        assert_eq!(
            mirror_track_url("https://vogel.qqdl.site", 77646168, "LOSSLESS"),
            "https://vogel.qqdl.site/track/?id=77646168&quality=LOSSLESS"
        );
    }

    #[test]
    fn v2_manifest_wins_the_probe() {
        let body = br#"{"version":"2.0","data":{"trackId":1,"manifest":"eyJ1cmxzIjpbXX0="}}"#;
        assert_eq!(
            classify_mirror_response(body).unwrap(),
            Location::EncodedManifest("eyJ1cmxzIjpbXX0=".to_string())
        );
    }

    #[test]
    fn v1_array_falls_through_to_direct() {
        let body = br#"[{"OriginalTrackUrl":"https://cdn.example/a.flac"}]"#;
        assert_eq!(
            classify_mirror_response(body).unwrap(),
            Location::Direct("https://cdn.example/a.flac".to_string())
        );
    }

    #[test]
    fn v1_array_without_urls_fails() {
        let body = br#"[{"OriginalTrackUrl":""}]"#;
        assert!(matches!(
            classify_mirror_response(body),
            Err(FetchError::Parse { .. })
        ));
    }

    #[test]
    fn unrecognized_shape_fails_with_excerpt() {
        let body = br#""nope""#;
        match classify_mirror_response(body) {
            Err(FetchError::Parse { excerpt, .. }) => assert!(excerpt.contains("nope")),
            other => panic!("expected Parse, got {other:?}"),
        }
    }
}
