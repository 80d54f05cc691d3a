// Job-polling backend: the store page is resolved through the throttled
// catalog API, then each region of the conversion service is tried in
// order. A region attempt is submit + poll; only a completed job yields a
// direct file URL.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};
use url::Url;

use fetchio::poll::{self, CompletedJob, JobHandle, JobStatus, PollPolicy};
use fetchio::rate_limit::{RateLimiter, RatePolicy};
use fetchio::{FetchError, Location, RetrievalProgress, Retriever, fallback, retry};

use crate::catalog;
use crate::provider::{Provider, ProviderKind, retrieve_location};
use crate::track::TrackRequest;

const PLATFORM: &str = "amazonMusic";
const TRACK_STORE_BASE: &str = "https://music.amazon.com/tracks/";
const SERVICE_DOMAIN: &str = "doubledouble.top";
const DEFAULT_REGIONS: [&str; 2] = ["us", "eu"];

/// Upstream quota for the catalog API: 9 calls per minute, 7 s apart.
fn catalog_rate_policy() -> RatePolicy {
    RatePolicy {
        max_calls_per_window: 9,
        window: std::time::Duration::from_secs(60),
        min_spacing: std::time::Duration::from_secs(7),
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: String,
    #[serde(rename = "friendlyStatus", default)]
    friendly_status: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    current: StatusCurrent,
}

#[derive(Debug, Default, Deserialize)]
struct StatusCurrent {
    #[serde(default)]
    name: String,
    #[serde(default)]
    artist: String,
}

pub struct AmazonProvider {
    client: Client,
    limiter: Mutex<RateLimiter>,
    retry: retry::RetryPolicy,
    poll: PollPolicy,
    regions: Vec<String>,
    retriever: Retriever,
}

impl AmazonProvider {
    pub fn new(client: Client) -> Self {
        Self {
            retriever: Retriever::new(client.clone()),
            client,
            limiter: Mutex::new(RateLimiter::new(catalog_rate_policy())),
            retry: retry::RetryPolicy::default(),
            poll: PollPolicy::default(),
            regions: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Catalog lookup under the rate budget, retried on throttling, with
    /// the store-page URL rewritten to its canonical track form.
    async fn lookup_store_page(&self, track_id: &str) -> Result<String, FetchError> {
        let client = &self.client;
        let limiter = &self.limiter;
        let link = retry::execute(&self.retry, |_| async move {
            limiter.lock().await.acquire().await;
            catalog::platform_link(client, track_id, PLATFORM).await
        })
        .await?;
        Ok(canonical_track_url(&link))
    }

    async fn submit_job(&self, base: &str, track_url: &str) -> Result<Location, FetchError> {
        let submit_url = format!("{base}/dl?url={}", urlencoding::encode(track_url));
        debug!(url = %submit_url, "Submitting conversion job");

        let response = self
            .client
            .get(&submit_url)
            .header(USER_AGENT, catalog::random_user_agent())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::http_status(
                response.status(),
                submit_url,
                "job submit",
            ));
        }

        let body = response.text().await?;
        submit_outcome(base, &body)
    }

    async fn check_status(&self, status_url: &str) -> Result<JobStatus, FetchError> {
        let response = self
            .client
            .get(status_url)
            .header(USER_AGENT, catalog::random_user_agent())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::http_status(
                response.status(),
                status_url,
                "job status",
            ));
        }

        let body = response.text().await?;
        let status: StatusResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::parse("job status", e.to_string(), &body))?;
        Ok(job_status(status))
    }

    /// One region attempt: submit, poll to a terminal state, absolutize
    /// the resulting file URL against the region base.
    async fn convert_in_region(
        &self,
        region: &str,
        track_url: &str,
    ) -> Result<CompletedJob, FetchError> {
        let base = region_base(region);
        info!(region, "Trying conversion region");

        let Location::Job(handle) = self.submit_job(&base, track_url).await? else {
            return Err(FetchError::JobFailed {
                reason: "job submission yielded no job handle".to_string(),
            });
        };
        info!(job_id = %handle.id, region, "Job accepted, polling");

        let mut job = poll::poll_until_terminal(
            &self.poll,
            || self.check_status(&handle.status_url),
            |text| debug!(status = text, "Job in progress"),
        )
        .await?;

        job.url = absolutize(&base, &job.url)?;
        Ok(job)
    }
}

#[async_trait]
impl Provider for AmazonProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Amazon
    }

    async fn resolve(&mut self, request: &TrackRequest) -> Result<Location, FetchError> {
        let track_url = self.lookup_store_page(&request.track_id).await?;
        info!(url = %track_url, "Resolved store page");
        let track_url = track_url.as_str();
        let this = &*self;
        fallback::try_in_order(&this.regions, |region| {
            let base = region_base(region);
            async move { this.submit_job(&base, track_url).await }
        })
        .await
    }

    async fn download(&mut self, request: &TrackRequest) -> Result<PathBuf, FetchError> {
        if let Some(existing) = request.existing_output() {
            info!(path = %existing.display(), "File already exists, skipping");
            return Ok(existing);
        }
        tokio::fs::create_dir_all(&request.output_dir).await?;

        let track_url = self.lookup_store_page(&request.track_id).await?;
        info!(url = %track_url, "Resolved store page");

        let this = &*self;
        let track_url = track_url.as_str();
        let job = fallback::try_in_order(&this.regions, |region| {
            let region = region.clone();
            async move { this.convert_in_region(&region, track_url).await }
        })
        .await?;
        info!(name = %job.name, artist = %job.artist, "Conversion finished");

        let location = Location::Direct(job.url);
        retrieve_location(&mut self.retriever, &location, &request.target_path()).await
    }

    fn subscribe_progress(&self) -> watch::Receiver<RetrievalProgress> {
        self.retriever.subscribe_progress()
    }
}

fn region_base(region: &str) -> String {
    format!("https://{region}.{SERVICE_DOMAIN}")
}

/// Store pages carrying a `trackAsin` query parameter are rewritten to
/// the canonical per-track URL the conversion service expects.
fn canonical_track_url(link: &str) -> String {
    let Some((_, rest)) = link.split_once("trackAsin=") else {
        return link.to_string();
    };
    let asin = rest.split('&').next().unwrap_or(rest);
    format!("{TRACK_STORE_BASE}{asin}?musicTerritory=US")
}

fn submit_outcome(base: &str, body: &str) -> Result<Location, FetchError> {
    let submit: SubmitResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::parse("job submit response", e.to_string(), body))?;
    if !submit.success || submit.id.is_empty() {
        return Err(FetchError::JobFailed {
            reason: "job submission rejected".to_string(),
        });
    }
    let status_url = format!("{base}/dl/{}", submit.id);
    Ok(Location::Job(JobHandle {
        id: submit.id,
        status_url,
    }))
}

fn job_status(status: StatusResponse) -> JobStatus {
    match status.status.as_str() {
        "done" => JobStatus::Done(CompletedJob {
            url: status.url,
            name: status.current.name,
            artist: status.current.artist,
        }),
        "error" => JobStatus::Error(status.friendly_status),
        _ => JobStatus::Processing(if status.friendly_status.is_empty() {
            status.status
        } else {
            status.friendly_status
        }),
    }
}

/// Job results come back as `./file`, `/file` or already-absolute URLs.
fn absolutize(base: &str, candidate: &str) -> Result<String, FetchError> {
    let base = Url::parse(base)
        .map_err(|e| FetchError::parse("region base URL", e.to_string(), base))?;
    let resolved = base
        .join(candidate)
        .map_err(|e| FetchError::parse("job result URL", e.to_string(), candidate))?;
    Ok(resolved.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asin_links_are_rewritten() {
        let link = "https://music.amazon.com/albums/B0ABC?trackAsin=B0XYZ123&do=play";
        assert_eq!(
            canonical_track_url(link),
            "https://music.amazon.com/tracks/B0XYZ123?musicTerritory=US"
        );
    }

    #[test]
    fn links_without_asin_pass_through() {
        let link = "https://music.amazon.com/tracks/B0XYZ123";
        assert_eq!(canonical_track_url(link), link);
    }

    #[test]
    fn relative_job_urls_resolve_against_region_base() {
        let base = "https://us.doubledouble.top";
        assert_eq!(
            absolutize(base, "./files/a.flac").unwrap(),
            "https://us.doubledouble.top/files/a.flac"
        );
        assert_eq!(
            absolutize(base, "/files/a.flac").unwrap(),
            "https://us.doubledouble.top/files/a.flac"
        );
        assert_eq!(
            absolutize(base, "https://cdn.example/a.flac").unwrap(),
            "https://cdn.example/a.flac"
        );
    }

    #[test]
    fn accepted_submission_yields_job_handle() {
        let location =
            submit_outcome("https://eu.doubledouble.top", r#"{"success":true,"id":"j42"}"#)
                .unwrap();
        assert_eq!(
            location,
            Location::Job(JobHandle {
                id: "j42".to_string(),
                status_url: "https://eu.doubledouble.top/dl/j42".to_string(),
            })
        );
    }

    #[test]
    fn rejected_submission_is_job_failed() {
        let result = submit_outcome("https://us.doubledouble.top", r#"{"success":false}"#);
        assert!(matches!(result, Err(FetchError::JobFailed { .. })));
    }

    #[test]
    fn done_status_carries_payload() {
        let status: StatusResponse = serde_json::from_str(
            r#"{"status":"done","url":"./out.flac","current":{"name":"Song","artist":"Artist"}}"#,
        )
        .unwrap();
        match job_status(status) {
            JobStatus::Done(job) => {
                assert_eq!(job.url, "./out.flac");
                assert_eq!(job.name, "Song");
                assert_eq!(job.artist, "Artist");
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn processing_prefers_friendly_text() {
        let status: StatusResponse =
            serde_json::from_str(r#"{"status":"working","friendlyStatus":"Converting"}"#).unwrap();
        assert_eq!(
            job_status(status),
            JobStatus::Processing("Converting".to_string())
        );

        let bare: StatusResponse = serde_json::from_str(r#"{"status":"queued"}"#).unwrap();
        assert_eq!(job_status(bare), JobStatus::Processing("queued".to_string()));
    }

    #[test]
    fn error_status_keeps_upstream_reason() {
        let status: StatusResponse =
            serde_json::from_str(r#"{"status":"error","friendlyStatus":"Region busy"}"#).unwrap();
        assert_eq!(job_status(status), JobStatus::Error("Region busy".to_string()));
    }
}
