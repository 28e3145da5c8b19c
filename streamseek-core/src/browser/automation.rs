use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::{seq::SliceRandom, Rng};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{BrowserSection, CaptureSection};

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
}

/// Launches ephemeral headless Chromium instances configured for media
/// capture: realistic desktop user agent, jittered viewport, autoplay
/// allowed, sandbox relaxed for containerized hosts.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<BrowserSection>,
    capture: Arc<CaptureSection>,
}

impl BrowserLauncher {
    pub fn new(config: BrowserSection, capture: CaptureSection) -> Self {
        Self {
            config: Arc::new(config),
            capture: Arc::new(capture),
        }
    }

    pub fn config(&self) -> &BrowserSection {
        &self.config
    }

    pub async fn launch(&self) -> BrowserResult<BrowserAutomation> {
        let viewport = self.select_viewport();
        let user_agent = self.select_user_agent();
        let chromium_config = self.build_chromium_config(&viewport, &user_agent)?;
        info!(
            ua = %user_agent,
            width = viewport.width,
            height = viewport.height,
            "launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(BrowserAutomation {
            browser,
            handler_task: Some(handler_task),
            capture: Arc::clone(&self.capture),
            viewport,
            user_agent,
        })
    }

    fn select_viewport(&self) -> ViewportSpec {
        let mut rng = rand::thread_rng();
        let base = self
            .config
            .resolutions
            .choose(&mut rng)
            .copied()
            .unwrap_or([1366, 768]);
        let jitter = self.config.jitter_pixels as i32;
        let (width, height) = if jitter > 0 {
            (
                (base[0] as i32 + rng.gen_range(-jitter..=jitter)).clamp(640, 2560) as u32,
                (base[1] as i32 + rng.gen_range(-jitter..=jitter)).clamp(480, 1600) as u32,
            )
        } else {
            (base[0], base[1])
        };
        ViewportSpec { width, height }
    }

    fn select_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        self.config
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| {
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/124.0.0.0 Safari/537.36"
                    .to_string()
            })
    }

    fn build_chromium_config(
        &self,
        viewport: &ViewportSpec,
        user_agent: &str,
    ) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder()
            .viewport(ChromiumViewport {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: viewport.width >= viewport.height,
                has_touch: false,
            })
            .request_timeout(Duration::from_secs(self.config.request_timeout_seconds));

        if !self.config.executable_path.is_empty() {
            builder = builder.chrome_executable(&self.config.executable_path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            format!("--user-agent={user_agent}"),
            format!("--window-size={},{}", viewport.width, viewport.height),
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
            "--disable-background-timer-throttling".to_string(),
        ];
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if self.config.mute_audio {
            args.push("--mute-audio".into());
        }
        if !self.config.autoplay_policy.is_empty() {
            args.push(format!("--autoplay-policy={}", self.config.autoplay_policy));
        }
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

/// One live Chromium instance. Pages created through `new_context` carry
/// the network instrumentation hook; `shutdown` must run on every path so
/// no browser process outlives its extraction run.
#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    capture: Arc<CaptureSection>,
    viewport: ViewportSpec,
    user_agent: String,
}

impl BrowserAutomation {
    pub fn viewport(&self) -> &ViewportSpec {
        &self.viewport
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub async fn new_context(&self) -> BrowserResult<BrowserContext> {
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        self.configure_page(&page).await?;
        Ok(BrowserContext {
            page,
            user_agent: self.user_agent.clone(),
        })
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            handle.abort();
            let _ = handle.await;
        }
        Ok(())
    }

    async fn configure_page(&self, page: &Page) -> BrowserResult<()> {
        let params = SetUserAgentOverrideParams::builder()
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;

        let hook = network_hook_script(self.capture.body_snippet_bytes);
        page.evaluate_on_new_document(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(hook)
                .build()
                .map_err(BrowserError::Configuration)?,
        )
        .await?;
        Ok(())
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserAutomation dropped without explicit shutdown");
                handle.abort();
            }
        }
    }
}

#[derive(Debug)]
pub struct BrowserContext {
    page: Page,
    user_agent: String,
}

impl BrowserContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    pub async fn close(self) {
        if let Err(err) = self.page.close().await {
            debug!(error = %err, "page close reported error");
        }
    }
}

/// Builds the pre-navigation instrumentation script. It wraps the three
/// network-initiating primitives page JavaScript can reach (fetch, XHR,
/// WebSocket.send) and appends every observed URL, plus a truncated body
/// snippet where one is cheaply readable, to `window.__ssCapturedRequests`.
/// The host drains that buffer during the capture window.
fn network_hook_script(snippet_bytes: usize) -> String {
    format!(
        r#"
(() => {{
    const LIMIT = {snippet_bytes};
    const bucket = [];
    const push = (url, kind, body) => {{
        try {{
            bucket.push({{
                url: String(url || ''),
                kind,
                body: body ? String(body).slice(0, LIMIT) : null,
            }});
        }} catch (_) {{}}
    }};
    Object.defineProperty(window, '__ssCapturedRequests', {{
        value: bucket,
        writable: false,
        configurable: false,
    }});

    const originalFetch = window.fetch;
    window.fetch = async (...args) => {{
        const response = await originalFetch(...args);
        try {{
            const request = args[0];
            const url = typeof request === 'string' ? request : request.url;
            let body = null;
            try {{
                const type = response.headers.get('content-type') || '';
                if (type.includes('json') || type.includes('mpegurl') || type.includes('text')) {{
                    body = await response.clone().text();
                }}
            }} catch (_) {{}}
            push(url, 'fetch', body);
        }} catch (_) {{}}
        return response;
    }};

    const OriginalXHR = window.XMLHttpRequest;
    window.XMLHttpRequest = function() {{
        const xhr = new OriginalXHR();
        let url = '';
        const open = xhr.open;
        xhr.open = function(m, u) {{
            url = u || '';
            return open.apply(xhr, arguments);
        }};
        xhr.addEventListener('loadend', function() {{
            let body = null;
            try {{
                if (!xhr.responseType || xhr.responseType === 'text') {{
                    body = xhr.responseText;
                }}
            }} catch (_) {{}}
            push(url, 'xhr', body);
        }});
        return xhr;
    }};

    const originalSend = window.WebSocket && window.WebSocket.prototype.send;
    if (originalSend) {{
        window.WebSocket.prototype.send = function(data) {{
            try {{
                push(this.url, 'websocket', typeof data === 'string' ? data : null);
            }} catch (_) {{}}
            return originalSend.call(this, data);
        }};
    }}
}})();
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_script_embeds_snippet_limit() {
        let script = network_hook_script(4096);
        assert!(script.contains("const LIMIT = 4096;"));
        assert!(script.contains("__ssCapturedRequests"));
        assert!(script.contains("WebSocket.prototype.send"));
    }

    #[test]
    fn viewport_respects_bounds() {
        let launcher = BrowserLauncher::new(BrowserSection::default(), CaptureSection::default());
        for _ in 0..20 {
            let viewport = launcher.select_viewport();
            assert!((640..=2560).contains(&viewport.width));
            assert!((480..=1600).contains(&viewport.height));
        }
    }
}
