// Manifest resolution: a base64 transport blob decodes to either a BTS
// document (JSON, direct URL list) or a DASH-style segment-template
// document (XML). Some mirrors emit XML that is not well formed, so the
// structured parse is backed by a best-effort regex extraction of the same
// fields.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::FetchError;

/// Concrete byte sources for one logical media file, derived once from an
/// encoded manifest and read-only afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    /// One direct resource.
    Direct(String),
    /// An initialization segment plus position-dependent media segments
    /// that must be concatenated in order.
    Segmented {
        init_url: String,
        segment_urls: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
struct BtsManifest {
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    #[serde(default)]
    codecs: String,
    #[serde(default)]
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Mpd {
    #[serde(rename = "Period")]
    period: MpdPeriod,
}

#[derive(Debug, Deserialize)]
struct MpdPeriod {
    #[serde(rename = "AdaptationSet")]
    adaptation_set: MpdAdaptationSet,
}

#[derive(Debug, Deserialize)]
struct MpdAdaptationSet {
    #[serde(rename = "Representation")]
    representation: MpdRepresentation,
}

#[derive(Debug, Deserialize)]
struct MpdRepresentation {
    #[serde(rename = "SegmentTemplate")]
    segment_template: MpdSegmentTemplate,
}

#[derive(Debug, Deserialize)]
struct MpdSegmentTemplate {
    #[serde(rename = "@initialization", default)]
    initialization: String,
    #[serde(rename = "@media", default)]
    media: String,
    #[serde(rename = "SegmentTimeline", default)]
    timeline: Option<MpdSegmentTimeline>,
}

#[derive(Debug, Default, Deserialize)]
struct MpdSegmentTimeline {
    #[serde(rename = "S", default)]
    entries: Vec<MpdTimelineEntry>,
}

#[derive(Debug, Deserialize)]
struct MpdTimelineEntry {
    #[serde(rename = "@r", default)]
    repeat: u64,
}

static INIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"initialization="([^"]+)""#).expect("static regex"));
static MEDIA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"media="([^"]+)""#).expect("static regex"));
static TIMELINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<S d="\d+"(?: r="(\d+)")?"#).expect("static regex"));

/// Decode an encoded manifest into concrete byte sources.
///
/// Pure and idempotent: the same blob always yields the same `Manifest`.
pub fn resolve(encoded: &str) -> Result<Manifest, FetchError> {
    let raw = BASE64
        .decode(encoded.trim())
        .map_err(|e| FetchError::parse("manifest", format!("invalid base64: {e}"), encoded))?;
    let text = String::from_utf8(raw)
        .map_err(|e| FetchError::parse("manifest", format!("not UTF-8: {e}"), encoded))?;

    if text.trim_start().starts_with('{') {
        resolve_bts(&text)
    } else {
        resolve_segmented(&text)
    }
}

fn resolve_bts(text: &str) -> Result<Manifest, FetchError> {
    let bts: BtsManifest = serde_json::from_str(text)
        .map_err(|e| FetchError::parse("BTS manifest", e.to_string(), text))?;

    let Some(url) = bts.urls.first() else {
        return Err(FetchError::parse(
            "BTS manifest",
            "no URLs in manifest",
            text,
        ));
    };

    debug!(mime_type = %bts.mime_type, codecs = %bts.codecs, "Manifest: BTS format");
    Ok(Manifest::Direct(url.clone()))
}

fn resolve_segmented(text: &str) -> Result<Manifest, FetchError> {
    debug!("Manifest: segment-template format");

    let parsed: Option<MpdSegmentTemplate> = quick_xml::de::from_str::<Mpd>(text)
        .ok()
        .map(|mpd| mpd.period.adaptation_set.representation.segment_template);

    let (mut init_url, mut media_template, mut segment_count) = match parsed {
        Some(template) => {
            let count = template
                .timeline
                .as_ref()
                .map(|t| t.entries.iter().map(|e| e.repeat + 1).sum())
                .unwrap_or(0);
            (template.initialization, template.media, count)
        }
        None => (String::new(), String::new(), 0),
    };

    // Best-effort fallback for mirrors that serve documents the structured
    // parser rejects or that leave these fields in unexpected places.
    if init_url.is_empty() || media_template.is_empty() {
        if let Some(m) = INIT_RE.captures(text) {
            init_url = m[1].to_string();
        }
        if let Some(m) = MEDIA_RE.captures(text) {
            media_template = m[1].to_string();
        }
    }
    if segment_count == 0 {
        segment_count = TIMELINE_RE
            .captures_iter(text)
            .map(|c| {
                c.get(1)
                    .and_then(|r| r.as_str().parse::<u64>().ok())
                    .unwrap_or(0)
                    + 1
            })
            .sum();
    }

    if init_url.is_empty() {
        return Err(FetchError::parse(
            "segmented manifest",
            "no initialization URL found",
            text,
        ));
    }
    if media_template.is_empty() {
        return Err(FetchError::parse(
            "segmented manifest",
            "no media template found",
            text,
        ));
    }

    // XML entity form survives the regex path (and a double pass is a
    // no-op after structured unescaping).
    let init_url = init_url.replace("&amp;", "&");
    let media_template = media_template.replace("&amp;", "&");

    let segment_urls = expand_template(&media_template, segment_count);
    Ok(Manifest::Segmented {
        init_url,
        segment_urls,
    })
}

/// Substitute the 1-based segment index into the template's numeric
/// placeholder for each of `count` segments.
fn expand_template(template: &str, count: u64) -> Vec<String> {
    (1..=count)
        .map(|i| template.replace("$Number$", &i.to_string()))
        .collect()
}
