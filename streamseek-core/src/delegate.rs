use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::DelegateSection;
use crate::error::{ExtractorError, ExtractorResult};
use crate::pattern::{looks_like_media_url, push_unique};

#[derive(Debug, Deserialize)]
struct InfoDict {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    formats: Vec<FormatEntry>,
}

#[derive(Debug, Deserialize)]
struct FormatEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ext: Option<String>,
}

/// Adapter over the external site-aware metadata tool (yt-dlp). The tool
/// either resolves a page into direct format URLs or it does not; absence
/// of the binary, an unsupported site, a nonzero exit and a timeout are all
/// ordinary "found nothing" outcomes for the orchestrator.
#[derive(Debug, Clone)]
pub struct MetadataDelegate {
    binary: String,
    timeout: Duration,
    available: bool,
}

impl MetadataDelegate {
    /// Probes the tool once at construction; an unavailable tool makes
    /// `resolve` return empty immediately instead of failing per call.
    pub async fn detect(config: &DelegateSection) -> Self {
        let available = Command::new(&config.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);
        if available {
            info!(binary = %config.binary, "metadata delegate available");
        } else {
            warn!(binary = %config.binary, "metadata delegate not found, strategy will be skipped");
        }
        Self {
            binary: config.binary.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            available,
        }
    }

    /// Build an adapter that reports the tool as unavailable. Used when the
    /// environment is known not to carry it, and by tests.
    pub fn unavailable(config: &DelegateSection) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            available: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub async fn resolve(&self, url: &str) -> ExtractorResult<Vec<String>> {
        if !self.available {
            return Ok(Vec::new());
        }

        let mut command = Command::new(&self.binary);
        command
            .arg("-j")
            .arg("--no-warnings")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| ExtractorError::Timeout("metadata delegate resolution".into()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(url, stderr = %stderr.trim(), "delegate could not resolve site");
            return Err(ExtractorError::Delegate(
                stderr.lines().last().unwrap_or("resolution failed").to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_info_json(&stdout)
            .map_err(|err| ExtractorError::Delegate(format!("unparseable info dict: {err}")))
    }
}

/// Collects playable URLs from a yt-dlp style info dict: every format's
/// direct URL, plus the top-level "best" URL when it is distinct from the
/// format list. Delegate-reported order, deduplicated.
fn parse_info_json(raw: &str) -> Result<Vec<String>, serde_json::Error> {
    let info: InfoDict = serde_json::from_str(raw.trim())?;
    let mut urls = Vec::new();
    for format in &info.formats {
        let Some(url) = &format.url else { continue };
        let ext_matches = matches!(format.ext.as_deref(), Some("mp4" | "m3u8" | "webm" | "mpd"));
        if ext_matches || looks_like_media_url(url) {
            push_unique(&mut urls, url.clone());
        }
    }
    if let Some(url) = &info.url {
        push_unique(&mut urls, url.clone());
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_FIXTURE: &str = r#"{
        "id": "abc123",
        "title": "sample",
        "url": "https://cdn.example.com/best/master.m3u8?sig=top",
        "formats": [
            {"format_id": "hls-720", "ext": "m3u8",
             "url": "https://cdn.example.com/hls/720.m3u8"},
            {"format_id": "http-480", "ext": "mp4",
             "url": "https://cdn.example.com/progressive/480.mp4"},
            {"format_id": "storyboard", "ext": "mhtml",
             "url": "https://cdn.example.com/sb/storyboard.mhtml"},
            {"format_id": "dup", "ext": "mp4",
             "url": "https://cdn.example.com/progressive/480.mp4"}
        ]
    }"#;

    #[test]
    fn parses_formats_and_top_level_url() {
        let urls = parse_info_json(INFO_FIXTURE).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example.com/hls/720.m3u8".to_string(),
                "https://cdn.example.com/progressive/480.mp4".to_string(),
                "https://cdn.example.com/best/master.m3u8?sig=top".to_string(),
            ]
        );
    }

    #[test]
    fn empty_formats_yield_empty_list() {
        let urls = parse_info_json(r#"{"id": "x", "formats": []}"#).unwrap();
        assert!(urls.is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_info_json("not json").is_err());
    }

    #[tokio::test]
    async fn unavailable_delegate_resolves_to_empty() {
        let delegate = MetadataDelegate::unavailable(&DelegateSection::default());
        let urls = delegate.resolve("https://example.com/watch").await.unwrap();
        assert!(urls.is_empty());
    }
}
