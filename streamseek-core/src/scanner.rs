use std::time::Duration;

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::config::ScannerSection;
use crate::error::{ExtractorError, ExtractorResult};
use crate::pattern::{looks_like_media_url, push_unique, resolve_candidate, MediaPatterns};

/// Fetches a page over plain HTTP and extracts directly embedded media
/// URLs: DOM-declared sources first (document order), then pattern matches
/// over the raw HTML for URLs buried in inline scripts.
#[derive(Debug, Clone)]
pub struct StaticScanner {
    client: reqwest::Client,
    patterns: MediaPatterns,
    dom_probe: Selector,
}

impl StaticScanner {
    pub fn new(config: &ScannerSection) -> ExtractorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;
        let dom_probe = Selector::parse(DOM_PROBE_SELECTOR)
            .unwrap_or_else(|err| unreachable!("static selector must parse: {err}"));
        Ok(Self {
            client,
            patterns: MediaPatterns::new(),
            dom_probe,
        })
    }

    pub async fn scan(&self, url: &str) -> ExtractorResult<Vec<String>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractorError::HttpStatus(status.as_u16()));
        }
        // Redirects may have moved us; resolve relative refs against the
        // final URL, not the requested one.
        let final_url = response.url().clone();
        let body = response.text().await?;
        debug!(url, bytes = body.len(), "static scan fetched page");
        Ok(self.extract_from_html(&body, &final_url))
    }

    /// Pure extraction over an HTML document; carries all the scan logic so
    /// it is testable without network access. One traversal over the whole
    /// document, so hits from different tag types keep document order.
    pub fn extract_from_html(&self, html: &str, base: &Url) -> Vec<String> {
        let mut found = Vec::new();
        let document = Html::parse_document(html);

        for element in document.select(&self.dom_probe) {
            for &attribute in probe_attributes(element.value().name()) {
                if let Some(raw) = element.value().attr(attribute) {
                    if let Some(resolved) = resolve_candidate(base, raw) {
                        if looks_like_media_url(&resolved) {
                            push_unique(&mut found, resolved);
                        }
                    }
                }
            }
        }

        for url in self.patterns.find_in_text(html) {
            push_unique(&mut found, url);
        }
        found
    }
}

/// One combined probe; `scraper` walks the tree once, so matches surface in
/// document order rather than selector order.
const DOM_PROBE_SELECTOR: &str = r#"video, source, iframe, meta[property="og:video"], meta[property="og:video:url"], meta[property="og:video:secure_url"]"#;

fn probe_attributes(tag: &str) -> &'static [&'static str] {
    match tag {
        "video" | "source" => &["src", "data-src"],
        "iframe" => &["src"],
        "meta" => &["content"],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerSection;

    fn scanner() -> StaticScanner {
        StaticScanner::new(&ScannerSection::default()).unwrap()
    }

    fn base() -> Url {
        Url::parse("https://example.com/watch/42").unwrap()
    }

    #[test]
    fn extracts_video_and_source_tags_in_document_order() {
        let html = r#"
            <html><body>
              <video src="https://cdn.example.com/a.mp4"></video>
              <video><source src="/media/b.webm"></video>
            </body></html>
        "#;
        let found = scanner().extract_from_html(html, &base());
        assert_eq!(
            found,
            vec![
                "https://cdn.example.com/a.mp4".to_string(),
                "https://example.com/media/b.webm".to_string(),
            ]
        );
    }

    #[test]
    fn dom_hits_come_before_inline_script_matches() {
        let html = r#"
            <html><head>
              <script>var cfg = {"file": "https://cdn.example.com/hidden.m3u8"};</script>
            </head><body>
              <video src="https://cdn.example.com/visible.mp4"></video>
            </body></html>
        "#;
        let found = scanner().extract_from_html(html, &base());
        assert_eq!(
            found,
            vec![
                "https://cdn.example.com/visible.mp4".to_string(),
                "https://cdn.example.com/hidden.m3u8".to_string(),
            ]
        );
    }

    #[test]
    fn hits_across_tag_types_keep_document_order() {
        let html = r#"
            <html><body>
              <iframe src="https://embed.example.com/first.mp4"></iframe>
              <video src="https://cdn.example.com/second.mp4"></video>
              <iframe src="https://embed.example.com/third.m3u8"></iframe>
            </body></html>
        "#;
        let found = scanner().extract_from_html(html, &base());
        assert_eq!(
            found,
            vec![
                "https://embed.example.com/first.mp4".to_string(),
                "https://cdn.example.com/second.mp4".to_string(),
                "https://embed.example.com/third.m3u8".to_string(),
            ]
        );
    }

    #[test]
    fn reads_og_video_meta_tags() {
        let html = r#"
            <html><head>
              <meta property="og:video" content="https://cdn.example.com/og.mp4">
              <meta property="og:video:secure_url" content="https://cdn.example.com/og.mp4">
            </head></html>
        "#;
        let found = scanner().extract_from_html(html, &base());
        assert_eq!(found, vec!["https://cdn.example.com/og.mp4".to_string()]);
    }

    #[test]
    fn data_src_lazy_sources_resolve_against_base() {
        let html = r#"<video data-src="lazy/clip.mp4"></video>"#;
        let found = scanner().extract_from_html(html, &base());
        assert_eq!(
            found,
            vec!["https://example.com/watch/lazy/clip.mp4".to_string()]
        );
    }

    #[test]
    fn non_media_iframes_are_ignored() {
        let html = r#"<iframe src="https://ads.example.com/frame.html"></iframe>"#;
        assert!(scanner().extract_from_html(html, &base()).is_empty());
    }
}
