use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::browser::{BrowserLauncher, MediaCapture};
use crate::delegate::MetadataDelegate;
use crate::error::ExtractorResult;
use crate::orchestrator::{ExtractionOptions, ExtractionTarget};
use crate::pattern::MediaPatterns;
use crate::progress::ProgressSink;
use crate::scanner::StaticScanner;

/// Fixed identity of one extraction technique, in the order the ladder
/// runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    Static,
    MetadataDelegate,
    BrowserCapture,
    FallbackRegex,
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StrategyName::Static => "static",
            StrategyName::MetadataDelegate => "metadata_delegate",
            StrategyName::BrowserCapture => "browser_capture",
            StrategyName::FallbackRegex => "fallback_regex",
        };
        f.write_str(label)
    }
}

/// What one strategy produced: the URLs it found (possibly none) and an
/// error note when it degraded. Errors never propagate past this point.
#[derive(Debug, Clone, Default)]
pub struct StrategyOutcome {
    pub urls: Vec<String>,
    pub error: Option<String>,
}

impl StrategyOutcome {
    pub fn found(urls: Vec<String>) -> Self {
        Self { urls, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            urls: Vec::new(),
            error: Some(error.into()),
        }
    }

    fn from_result(result: ExtractorResult<Vec<String>>) -> Self {
        match result {
            Ok(urls) => Self::found(urls),
            Err(err) => Self::failed(err.to_string()),
        }
    }
}

/// One self-contained technique for discovering media URLs from a page.
/// The orchestrator iterates an ordered list of these polymorphically;
/// "strategy unavailable in this environment" is an ordinary empty outcome.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> StrategyName;

    async fn attempt(
        &self,
        target: &ExtractionTarget,
        options: &ExtractionOptions,
        progress: &ProgressSink,
    ) -> StrategyOutcome;
}

/// Static HTML fetch + DOM/regex extraction. Cheapest rung of the ladder.
pub struct StaticScanStrategy {
    scanner: StaticScanner,
}

impl StaticScanStrategy {
    pub fn new(scanner: StaticScanner) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl Strategy for StaticScanStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::Static
    }

    async fn attempt(
        &self,
        target: &ExtractionTarget,
        _options: &ExtractionOptions,
        _progress: &ProgressSink,
    ) -> StrategyOutcome {
        StrategyOutcome::from_result(self.scanner.scan(&target.url).await)
    }
}

/// Site-aware resolution through the external metadata tool.
pub struct DelegateStrategy {
    delegate: MetadataDelegate,
}

impl DelegateStrategy {
    pub fn new(delegate: MetadataDelegate) -> Self {
        Self { delegate }
    }
}

#[async_trait]
impl Strategy for DelegateStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::MetadataDelegate
    }

    async fn attempt(
        &self,
        target: &ExtractionTarget,
        _options: &ExtractionOptions,
        _progress: &ProgressSink,
    ) -> StrategyOutcome {
        if !self.delegate.is_available() {
            debug!("metadata delegate unavailable, skipping");
            return StrategyOutcome::default();
        }
        StrategyOutcome::from_result(self.delegate.resolve(&target.url).await)
    }
}

/// The heavy rung: a fresh ephemeral headless-browser session per attempt.
pub struct BrowserCaptureStrategy {
    launcher: BrowserLauncher,
    capture: MediaCapture,
}

impl BrowserCaptureStrategy {
    pub fn new(launcher: BrowserLauncher, capture: MediaCapture) -> Self {
        Self { launcher, capture }
    }
}

#[async_trait]
impl Strategy for BrowserCaptureStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::BrowserCapture
    }

    async fn attempt(
        &self,
        target: &ExtractionTarget,
        options: &ExtractionOptions,
        progress: &ProgressSink,
    ) -> StrategyOutcome {
        let automation = match self.launcher.launch().await {
            Ok(automation) => automation,
            Err(err) => {
                warn!(error = %err, "browser launch failed");
                return StrategyOutcome::failed(format!("browser launch failed: {err}"));
            }
        };

        let mut capture_options = self.capture.default_options();
        capture_options.window = Duration::from_secs(options.capture_window_seconds);
        if !options.click_markers.is_empty() {
            capture_options.click_markers = options.click_markers.clone();
        }

        let outcome = self
            .capture
            .capture(&automation, &target.url, &capture_options, progress)
            .await;

        // The session never outlives the attempt, success or not.
        if let Err(err) = automation.shutdown().await {
            warn!(error = %err, "browser shutdown reported error");
        }

        StrategyOutcome::from_result(outcome.map_err(Into::into))
    }
}

/// Last resort: re-fetch the raw HTML and pattern-match it, with none of
/// the DOM awareness of the static scan. Catches pages the earlier rungs
/// errored out on transiently.
pub struct FallbackRegexStrategy {
    client: reqwest::Client,
    patterns: MediaPatterns,
}

impl FallbackRegexStrategy {
    pub fn new(config: &crate::config::ScannerSection) -> ExtractorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            patterns: MediaPatterns::new(),
        })
    }

    async fn fetch_and_match(&self, url: &str) -> ExtractorResult<Vec<String>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(crate::error::ExtractorError::HttpStatus(status.as_u16()));
        }
        let body = response.text().await?;
        Ok(self.patterns.find_in_text(&body))
    }
}

#[async_trait]
impl Strategy for FallbackRegexStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::FallbackRegex
    }

    async fn attempt(
        &self,
        target: &ExtractionTarget,
        _options: &ExtractionOptions,
        _progress: &ProgressSink,
    ) -> StrategyOutcome {
        StrategyOutcome::from_result(self.fetch_and_match(&target.url).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&StrategyName::MetadataDelegate).unwrap(),
            r#""metadata_delegate""#
        );
        assert_eq!(StrategyName::BrowserCapture.to_string(), "browser_capture");
    }

    #[tokio::test]
    async fn unavailable_delegate_strategy_yields_empty_without_error() {
        let delegate =
            MetadataDelegate::unavailable(&crate::config::DelegateSection::default());
        let strategy = DelegateStrategy::new(delegate);
        let target = ExtractionTarget::url("https://example.com/watch");
        let outcome = strategy
            .attempt(
                &target,
                &ExtractionOptions::default(),
                &ProgressSink::disabled(),
            )
            .await;
        assert!(outcome.urls.is_empty());
        assert!(outcome.error.is_none());
    }
}
