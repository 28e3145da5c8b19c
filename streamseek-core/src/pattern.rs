use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use url::Url;

/// File extensions and URL markers that identify a direct media resource.
/// Matching is case-insensitive on the marker but the matched URL keeps its
/// original casing.
pub const MEDIA_MARKERS: &[&str] = &[".mp4", ".m3u8", ".mpd", ".webm", ".ts"];

const MANIFEST_MARKERS: &[&str] = &[".m3u8", ".mpd"];

/// MIME types that declare a streaming-media response regardless of URL shape.
const MEDIA_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "application/dash+xml",
    "video/mp2t",
];

/// Recognizes media-resource URLs inside arbitrary text: raw HTML, inline
/// scripts, JSON blobs and captured network bodies. Pure text matching, no
/// network access.
#[derive(Debug, Clone)]
pub struct MediaPatterns {
    url_regex: Arc<Regex>,
}

impl Default for MediaPatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaPatterns {
    pub fn new() -> Self {
        // Absolute http(s)/blob URLs, also tolerating JSON-escaped slashes
        // ("https:\/\/cdn\/a.m3u8") as emitted by many player configs.
        let url_regex = Regex::new(r#"(?:https?:(?:\\/\\/|//)|blob:)[^\s"'<>]+"#)
            .unwrap_or_else(|err| unreachable!("static regex must compile: {err}"));
        Self {
            url_regex: Arc::new(url_regex),
        }
    }

    /// Scans a text blob and returns every media-looking absolute URL in
    /// first-occurrence order, deduplicated by exact string.
    pub fn find_in_text(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for capture in self.url_regex.find_iter(text) {
            let raw = capture.as_str().trim_end_matches(['.', ',', ')', ';', '\\']);
            let candidate = raw.replace("\\/", "/");
            if !looks_like_media_url(&candidate) {
                continue;
            }
            if seen.insert(candidate.clone()) {
                found.push(candidate);
            }
        }
        found
    }
}

/// True when the URL carries one of the configured media markers or uses
/// the `blob:` scheme. Extension comparison is case-insensitive.
pub fn looks_like_media_url(url: &str) -> bool {
    if url.starts_with("blob:") {
        return true;
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return false;
    }
    let lower = url.to_lowercase();
    let path_end = lower.find(['?', '#']).unwrap_or(lower.len());
    let path = &lower[..path_end];
    MEDIA_MARKERS.iter().any(|marker| {
        if MANIFEST_MARKERS.contains(marker) {
            // Playlist formats may carry segment paths after the marker.
            lower.contains(marker)
        } else {
            path.ends_with(marker)
        }
    })
}

/// True for segmented-playlist manifests (HLS/DASH) as opposed to
/// progressive files.
pub fn is_manifest_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    MANIFEST_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Checks a declared response content-type against the streaming-media MIME
/// set plus the generic `video/*` / `audio/*` families.
pub fn is_media_content_type(content_type: &str) -> bool {
    let lower = content_type.to_lowercase();
    let essence = lower.split(';').next().unwrap_or("").trim();
    if essence.starts_with("video/") || essence.starts_with("audio/") {
        return true;
    }
    MEDIA_CONTENT_TYPES.iter().any(|mime| essence == *mime)
}

/// Resolves a possibly-relative reference found during DOM extraction
/// against the page base. Unresolvable references are discarded, never
/// returned unresolved.
pub fn resolve_candidate(base: &Url, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("blob:") {
        return Some(trimmed.to_string());
    }
    let resolved = base.join(trimmed).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// Orders captured URLs for presentation: manifest formats (HLS/DASH)
/// first, then progressive files, preserving first-observed order inside
/// each group.
pub fn rank_media_urls(urls: Vec<String>) -> Vec<String> {
    let (manifests, progressive): (Vec<_>, Vec<_>) =
        urls.into_iter().partition(|url| is_manifest_url(url));
    let mut ranked = manifests;
    ranked.extend(progressive);
    ranked
}

/// Appends `url` to `into` unless an identical string is already present.
/// Keeps list order equal to discovery order.
pub fn push_unique(into: &mut Vec<String>, url: String) {
    if !into.iter().any(|existing| existing == &url) {
        into.push(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_media_urls_in_inline_script() {
        let patterns = MediaPatterns::new();
        let html = r#"
            <script>
              var player = { "file": "https://cdn.example.com/stream.m3u8" };
              var poster = "https://cdn.example.com/poster.jpg";
              load("https://cdn.example.com/clip.MP4?token=abc");
            </script>
        "#;
        let found = patterns.find_in_text(html);
        assert_eq!(
            found,
            vec![
                "https://cdn.example.com/stream.m3u8".to_string(),
                "https://cdn.example.com/clip.MP4?token=abc".to_string(),
            ]
        );
    }

    #[test]
    fn unescapes_json_embedded_urls() {
        let patterns = MediaPatterns::new();
        let body = r#"{"url":"https:\/\/cdn.example.com\/index.m3u8"}"#;
        assert_eq!(
            patterns.find_in_text(body),
            vec!["https://cdn.example.com/index.m3u8".to_string()]
        );
    }

    #[test]
    fn rejects_non_media_extensions() {
        let patterns = MediaPatterns::new();
        let text = "https://example.com/page.html https://example.com/app.js";
        assert!(patterns.find_in_text(text).is_empty());
    }

    #[test]
    fn deduplicates_repeated_matches() {
        let patterns = MediaPatterns::new();
        let text = "https://a.com/v.mp4 then again https://a.com/v.mp4";
        assert_eq!(patterns.find_in_text(text).len(), 1);
    }

    #[test]
    fn extension_match_is_case_insensitive_but_preserves_casing() {
        assert!(looks_like_media_url("https://a.com/Video.WEBM"));
        let patterns = MediaPatterns::new();
        assert_eq!(
            patterns.find_in_text("https://a.com/Video.WEBM"),
            vec!["https://a.com/Video.WEBM".to_string()]
        );
    }

    #[test]
    fn blob_scheme_counts_as_media() {
        assert!(looks_like_media_url(
            "blob:https://example.com/8a7b0c3e-1f2d"
        ));
    }

    #[test]
    fn segment_query_does_not_make_progressive_file() {
        assert!(!looks_like_media_url("https://a.com/page?next=.mp4.html"));
        assert!(looks_like_media_url("https://a.com/v.mp4?expires=99"));
    }

    #[test]
    fn resolves_relative_sources_against_base() {
        let base = Url::parse("https://example.com/watch/42").unwrap();
        assert_eq!(
            resolve_candidate(&base, "/media/video.mp4").as_deref(),
            Some("https://example.com/media/video.mp4")
        );
        assert_eq!(resolve_candidate(&base, "javascript:void(0)"), None);
        assert_eq!(resolve_candidate(&base, ""), None);
    }

    #[test]
    fn content_type_detection() {
        assert!(is_media_content_type("application/vnd.apple.mpegURL"));
        assert!(is_media_content_type("video/mp4; codecs=avc1"));
        assert!(is_media_content_type("audio/mpeg"));
        assert!(!is_media_content_type("text/html; charset=utf-8"));
    }

    #[test]
    fn manifests_rank_before_progressive() {
        let ranked = rank_media_urls(vec![
            "https://a.com/v.mp4".into(),
            "https://a.com/index.m3u8".into(),
            "https://a.com/w.webm".into(),
            "https://a.com/d.mpd".into(),
        ]);
        assert_eq!(
            ranked,
            vec![
                "https://a.com/index.m3u8".to_string(),
                "https://a.com/d.mpd".to_string(),
                "https://a.com/v.mp4".to_string(),
                "https://a.com/w.webm".to_string(),
            ]
        );
    }
}
