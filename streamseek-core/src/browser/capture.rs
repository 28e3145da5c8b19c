use std::sync::{Arc, Mutex};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use futures::StreamExt;
use serde::Deserialize;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::config::{BrowserSection, CaptureSection};
use crate::pattern::{
    is_media_content_type, looks_like_media_url, push_unique, rank_media_urls, resolve_candidate,
    MediaPatterns,
};
use crate::progress::ProgressSink;

use super::automation::{BrowserAutomation, BrowserContext};
use super::error::{BrowserError, BrowserResult};

/// Per-run overrides for a capture pass.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub window: Duration,
    pub click_markers: Vec<String>,
}

/// One observed network exchange, kept only for the lifetime of a single
/// capture invocation. Body snippets are truncated inside the page before
/// the host ever sees them.
#[derive(Debug, Clone, Deserialize)]
pub struct CapturedNetworkEvent {
    pub url: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DomMediaPayload {
    current: Option<String>,
    sources: Vec<DomSource>,
}

#[derive(Debug, Deserialize)]
struct DomSource {
    url: String,
}

/// Drives one headless-browser session against a page and collects every
/// media-looking URL observed during a bounded capture window: host-side
/// network responses, the in-page instrumentation buffer, DOM sources,
/// player APIs and the final rendered HTML. Any single step failing
/// degrades to "that step found nothing"; the session is always torn down.
pub struct MediaCapture {
    config: Arc<CaptureSection>,
    navigation_timeout: Duration,
    patterns: MediaPatterns,
}

impl MediaCapture {
    pub fn new(config: CaptureSection, browser: &BrowserSection) -> Self {
        Self {
            config: Arc::new(config),
            navigation_timeout: Duration::from_secs(browser.navigation_timeout_seconds),
            patterns: MediaPatterns::new(),
        }
    }

    pub fn default_options(&self) -> CaptureOptions {
        CaptureOptions {
            window: Duration::from_secs(self.config.window_seconds),
            click_markers: self.config.click_markers.clone(),
        }
    }

    /// Runs the full capture algorithm against `url`. Returns the
    /// de-duplicated union of everything observed, manifest URLs ranked
    /// before progressive files, otherwise in first-observed order.
    pub async fn capture(
        &self,
        automation: &BrowserAutomation,
        url: &str,
        options: &CaptureOptions,
        progress: &ProgressSink,
    ) -> BrowserResult<Vec<String>> {
        let context = automation.new_context().await?;
        let collected: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let outcome = self
            .run_capture(&context, url, options, Arc::clone(&collected), progress)
            .await;
        // Teardown happens on every path, including step failures above.
        context.close().await;
        if let Err(err) = outcome {
            warn!(url, error = %err, "capture degraded, returning partial results");
        }

        let urls = collected
            .lock()
            .map_err(|_| BrowserError::Unexpected("capture collector poisoned".into()))?
            .clone();
        Ok(rank_media_urls(urls))
    }

    async fn run_capture(
        &self,
        context: &BrowserContext,
        url: &str,
        options: &CaptureOptions,
        collected: Arc<Mutex<Vec<String>>>,
        progress: &ProgressSink,
    ) -> BrowserResult<()> {
        let observer = self.spawn_response_observer(context, Arc::clone(&collected)).await?;

        // Navigation timeout is non-fatal: whatever the page managed to
        // render still feeds the remaining steps.
        match timeout(self.navigation_timeout, context.goto(url)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                progress
                    .emit(format!("navigation failed, continuing with partial page: {err}"))
                    .await;
            }
            Err(_) => {
                progress
                    .emit("navigation timed out, continuing with partial page")
                    .await;
            }
        }

        let base = Url::parse(url).ok();
        if let Err(err) = self.collect_dom_sources(context, base.as_ref(), &collected).await {
            debug!(error = %err, "dom source collection failed");
        }
        if let Err(err) = self.click_heuristics(context, &options.click_markers).await {
            debug!(error = %err, "click heuristics failed");
        }
        if let Err(err) = self.probe_player_apis(context, base.as_ref(), &collected).await {
            debug!(error = %err, "player api probe failed");
        }

        self.drain_capture_window(context, options.window, &collected)
            .await;

        if let Err(err) = self.scan_rendered_html(context, &collected).await {
            debug!(error = %err, "rendered html pass failed");
        }

        observer.abort();
        Ok(())
    }

    /// Host-side CDP observer: records every response whose URL matches the
    /// media patterns or whose declared MIME type is a streaming type,
    /// independent of the in-page buffer.
    async fn spawn_response_observer(
        &self,
        context: &BrowserContext,
        collected: Arc<Mutex<Vec<String>>>,
    ) -> BrowserResult<tokio::task::JoinHandle<()>> {
        let mut responses = context
            .page()
            .event_listener::<EventResponseReceived>()
            .await?;
        Ok(tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let response_url = event.response.url.clone();
                let mime = event.response.mime_type.clone();
                if looks_like_media_url(&response_url) || is_media_content_type(&mime) {
                    debug!(url = %response_url, mime = %mime, "media response observed");
                    if let Ok(mut guard) = collected.lock() {
                        push_unique(&mut guard, response_url);
                    }
                }
            }
        }))
    }

    async fn collect_dom_sources(
        &self,
        context: &BrowserContext,
        base: Option<&Url>,
        collected: &Arc<Mutex<Vec<String>>>,
    ) -> BrowserResult<()> {
        let payload: DomMediaPayload = context
            .page()
            .evaluate(DOM_MEDIA_SCRIPT)
            .await?
            .into_value()
            .map_err(|err| BrowserError::Unexpected(format!("dom payload decode: {err}")))?;

        let mut raw = Vec::new();
        if let Some(current) = payload.current {
            raw.push(current);
        }
        raw.extend(payload.sources.into_iter().map(|source| source.url));

        let mut guard = collected
            .lock()
            .map_err(|_| BrowserError::Unexpected("capture collector poisoned".into()))?;
        for candidate in raw {
            let resolved = match base {
                Some(base) => resolve_candidate(base, &candidate),
                None => Some(candidate),
            };
            if let Some(url) = resolved {
                if looks_like_media_url(&url) {
                    push_unique(&mut guard, url);
                }
            }
        }
        Ok(())
    }

    /// Tags visible elements whose text or attributes carry one of the
    /// marker words, then clicks each tagged element. A failed click is
    /// tolerated; with no marker hit at all, one generic player-container
    /// click is attempted instead.
    async fn click_heuristics(
        &self,
        context: &BrowserContext,
        markers: &[String],
    ) -> BrowserResult<()> {
        let script = format!(
            r#"(() => {{
    const markers = {markers};
    let idx = 0;
    const tagged = [];
    document.querySelectorAll('button, a, div, span, [role="button"]').forEach(node => {{
        const rect = node.getBoundingClientRect();
        if (rect.width === 0 || rect.height === 0) return;
        const haystack = ((node.innerText || '') + ' ' +
            (node.getAttribute('aria-label') || '') + ' ' +
            (node.getAttribute('title') || '') + ' ' +
            (node.className || '')).toLowerCase();
        if (markers.some(marker => haystack.includes(marker))) {{
            node.setAttribute('data-ss-click', String(idx));
            tagged.push(idx);
            idx += 1;
        }}
    }});
    return tagged.length;
}})()"#,
            markers = serde_json::to_string(
                &markers.iter().map(|m| m.to_lowercase()).collect::<Vec<_>>()
            )
            .map_err(|err| BrowserError::Unexpected(err.to_string()))?,
        );

        let tagged: u32 = context
            .page()
            .evaluate(script.as_str())
            .await?
            .into_value()
            .map_err(|err| BrowserError::Unexpected(format!("click tagging decode: {err}")))?;

        let click_timeout = Duration::from_millis(self.config.click_timeout_ms);
        if tagged == 0 {
            for selector in &self.config.player_selectors {
                if let Ok(element) = context.page().find_element(selector.clone()).await {
                    match timeout(click_timeout, element.click()).await {
                        Ok(Ok(_)) => {
                            debug!(selector = %selector, "clicked player container");
                            break;
                        }
                        Ok(Err(err)) => debug!(selector = %selector, error = %err, "container click failed"),
                        Err(_) => debug!(selector = %selector, "container click timed out"),
                    }
                }
            }
            return Ok(());
        }

        for index in 0..tagged {
            let selector = format!("[data-ss-click='{index}']");
            let element = match context.page().find_element(selector.as_str()).await {
                Ok(element) => element,
                Err(_) => continue,
            };
            match timeout(click_timeout, element.click()).await {
                Ok(Ok(_)) => {
                    debug!(index, "clicked marker element");
                    sleep(Duration::from_millis(400)).await;
                }
                Ok(Err(err)) => debug!(index, error = %err, "marker click failed"),
                Err(_) => debug!(index, "marker click timed out"),
            }
        }
        Ok(())
    }

    /// Probes a short allow-list of well-known in-page player API shapes.
    /// Absent APIs are an ordinary outcome, not an error.
    async fn probe_player_apis(
        &self,
        context: &BrowserContext,
        base: Option<&Url>,
        collected: &Arc<Mutex<Vec<String>>>,
    ) -> BrowserResult<()> {
        let urls: Vec<String> = context
            .page()
            .evaluate(PLAYER_API_SCRIPT)
            .await?
            .into_value()
            .map_err(|err| BrowserError::Unexpected(format!("player api decode: {err}")))?;

        let mut guard = collected
            .lock()
            .map_err(|_| BrowserError::Unexpected("capture collector poisoned".into()))?;
        for candidate in urls {
            let resolved = match base {
                Some(base) => resolve_candidate(base, &candidate),
                None => Some(candidate),
            };
            if let Some(url) = resolved {
                if looks_like_media_url(&url) {
                    push_unique(&mut guard, url);
                }
            }
        }
        Ok(())
    }

    /// Waits out the capture window in short polling intervals, draining
    /// newly appended in-page instrumentation entries on each tick and
    /// pattern-matching both URLs and body snippets.
    async fn drain_capture_window(
        &self,
        context: &BrowserContext,
        window: Duration,
        collected: &Arc<Mutex<Vec<String>>>,
    ) {
        let deadline = Instant::now() + window;
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(100));
        let mut cursor = 0usize;

        loop {
            let script = format!(
                "(() => (window.__ssCapturedRequests || []).slice({cursor}))()"
            );
            match context.page().evaluate(script.as_str()).await {
                Ok(value) => match value.into_value::<Vec<CapturedNetworkEvent>>() {
                    Ok(entries) => {
                        cursor += entries.len();
                        self.absorb_entries(entries, collected);
                    }
                    Err(err) => debug!(error = %err, "capture buffer decode failed"),
                },
                Err(err) => debug!(error = %err, "capture buffer read failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(interval.min(deadline - now)).await;
        }
    }

    fn absorb_entries(
        &self,
        entries: Vec<CapturedNetworkEvent>,
        collected: &Arc<Mutex<Vec<String>>>,
    ) {
        let Ok(mut guard) = collected.lock() else {
            return;
        };
        for entry in entries {
            if looks_like_media_url(&entry.url) {
                push_unique(&mut guard, entry.url.clone());
            }
            // Body snippets often carry JSON-escaped manifest URLs.
            if let Some(body) = &entry.body {
                for url in self.patterns.find_in_text(body) {
                    push_unique(&mut guard, url);
                }
            }
        }
    }

    /// Last pass over the rendered document: catches URLs injected into
    /// the DOM by script but never fetched during the window.
    async fn scan_rendered_html(
        &self,
        context: &BrowserContext,
        collected: &Arc<Mutex<Vec<String>>>,
    ) -> BrowserResult<()> {
        let html = context.page().content().await?;
        let mut guard = collected
            .lock()
            .map_err(|_| BrowserError::Unexpected("capture collector poisoned".into()))?;
        for url in self.patterns.find_in_text(&html) {
            push_unique(&mut guard, url);
        }
        Ok(())
    }
}

const DOM_MEDIA_SCRIPT: &str = r#"
(() => {
    const sources = [];
    document.querySelectorAll('video').forEach(video => {
        if (video.currentSrc) sources.push({ url: video.currentSrc });
        if (video.src) sources.push({ url: video.src });
        if (video.dataset && video.dataset.src) sources.push({ url: video.dataset.src });
        video.querySelectorAll('source').forEach(src => {
            const url = src.src || (src.dataset ? src.dataset.src : '');
            if (url) sources.push({ url });
        });
    });
    const first = document.querySelector('video');
    return { current: first ? (first.currentSrc || null) : null, sources };
})()
"#;

const PLAYER_API_SCRIPT: &str = r#"
(() => {
    const urls = [];
    try {
        if (typeof jwplayer === 'function') {
            const playlist = jwplayer().getPlaylist() || [];
            playlist.forEach(item => {
                if (item.file) urls.push(item.file);
                (item.sources || []).forEach(source => {
                    if (source.file) urls.push(source.file);
                });
            });
        }
    } catch (_) {}
    try {
        if (typeof videojs !== 'undefined' && videojs.getAllPlayers) {
            videojs.getAllPlayers().forEach(player => {
                const src = player.currentSrc && player.currentSrc();
                if (src) urls.push(src);
            });
        }
    } catch (_) {}
    try {
        if (window.playerConfig && window.playerConfig.file) {
            urls.push(window.playerConfig.file);
        }
    } catch (_) {}
    return urls;
})()
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> MediaCapture {
        MediaCapture::new(CaptureSection::default(), &BrowserSection::default())
    }

    #[test]
    fn absorb_matches_urls_and_body_snippets() {
        let capture = capture();
        let collected = Arc::new(Mutex::new(Vec::new()));
        capture.absorb_entries(
            vec![
                CapturedNetworkEvent {
                    url: "https://cdn.example.com/master.m3u8".into(),
                    kind: Some("fetch".into()),
                    body: None,
                },
                CapturedNetworkEvent {
                    url: "https://api.example.com/player".into(),
                    kind: Some("xhr".into()),
                    body: Some(r#"{"file":"https:\/\/cdn.example.com\/v.mp4"}"#.into()),
                },
            ],
            &collected,
        );
        let urls = collected.lock().unwrap().clone();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example.com/master.m3u8".to_string(),
                "https://cdn.example.com/v.mp4".to_string(),
            ]
        );
    }

    #[test]
    fn absorb_never_duplicates() {
        let capture = capture();
        let collected = Arc::new(Mutex::new(vec![
            "https://cdn.example.com/master.m3u8".to_string()
        ]));
        capture.absorb_entries(
            vec![CapturedNetworkEvent {
                url: "https://cdn.example.com/master.m3u8".into(),
                kind: None,
                body: None,
            }],
            &collected,
        );
        assert_eq!(collected.lock().unwrap().len(), 1);
    }

    #[test]
    fn default_options_follow_config() {
        let options = capture().default_options();
        assert_eq!(options.window, Duration::from_secs(10));
        assert!(options.click_markers.contains(&"baixar".to_string()));
    }
}
