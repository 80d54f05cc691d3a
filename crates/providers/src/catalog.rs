// Catalog-link lookup against the song.link aggregation API: one
// reference track id in, the platform-specific page URL out. This
// endpoint fingerprints clients aggressively, so each request carries a
// freshly randomized desktop user-agent.

use rand::RngExt;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use tracing::debug;

use fetchio::FetchError;

const LOOKUP_API: &str = "https://api.song.link/v1-alpha.1/links";
const TRACK_PAGE_BASE: &str = "https://open.spotify.com/track/";

#[derive(Debug, serde::Deserialize)]
struct LinksResponse {
    #[serde(rename = "linksByPlatform", default)]
    links_by_platform: std::collections::HashMap<String, PlatformEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct PlatformEntry {
    #[serde(default)]
    url: String,
}

/// A plausible desktop browser user-agent, different on every call.
pub fn random_user_agent() -> String {
    let mut rng = rand::rng();
    format!(
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_{}_{}) AppleWebKit/{}.{} (KHTML, like Gecko) Chrome/{}.0.{}.{} Safari/{}.{}",
        rng.random_range(11..15),
        rng.random_range(4..9),
        rng.random_range(530..537),
        rng.random_range(30..37),
        rng.random_range(80..105),
        rng.random_range(3000..4500),
        rng.random_range(60..125),
        rng.random_range(530..537),
        rng.random_range(30..36),
    )
}

pub(crate) fn lookup_url(track_id: &str) -> String {
    let track_page = format!("{TRACK_PAGE_BASE}{track_id}");
    format!("{LOOKUP_API}?url={}", urlencoding::encode(&track_page))
}

/// Resolve the platform-specific page URL for a reference track id.
///
/// A missing or empty platform entry is `NotFound`; HTTP 429 surfaces as
/// `RateLimited` so the caller's retry layer can see it.
pub async fn platform_link(
    client: &Client,
    track_id: &str,
    platform: &str,
) -> Result<String, FetchError> {
    let url = lookup_url(track_id);
    debug!(track_id, platform, "Looking up catalog link");

    let response = client
        .get(&url)
        .header(USER_AGENT, random_user_agent())
        .send()
        .await?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited {
            operation: "catalog lookup",
        });
    }
    if !status.is_success() {
        return Err(FetchError::http_status(status, url, "catalog lookup"));
    }

    let body = response.text().await?;
    if body.is_empty() {
        return Err(FetchError::parse("catalog response", "empty body", &body));
    }

    let links: LinksResponse = serde_json::from_str(&body)
        .map_err(|e| FetchError::parse("catalog response", e.to_string(), &body))?;

    match links.links_by_platform.get(platform) {
        Some(entry) if !entry.url.is_empty() => Ok(entry.url.clone()),
        _ => Err(FetchError::not_found(format!(
            "{platform} link for track {track_id}"
        ))),
    }
}
