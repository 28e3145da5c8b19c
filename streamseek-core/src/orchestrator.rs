use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use url::Url;

use crate::browser::{BrowserLauncher, MediaCapture};
use crate::config::ExtractorConfig;
use crate::delegate::MetadataDelegate;
use crate::error::{ExtractorError, ExtractorResult};
use crate::pattern::push_unique;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::scanner::StaticScanner;
use crate::search::SearchProvider;
use crate::strategy::{
    BrowserCaptureStrategy, DelegateStrategy, FallbackRegexStrategy, StaticScanStrategy, Strategy,
    StrategyName,
};

/// Input of one extraction run: a page URL, or a free-text query the
/// search collaborator turns into candidate page URLs first. Immutable for
/// the lifetime of the run.
#[derive(Debug, Clone)]
pub struct ExtractionTarget {
    pub url: String,
    pub query: Option<String>,
}

impl ExtractionTarget {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: None,
        }
    }

    pub fn query(query: impl Into<String>) -> Self {
        Self {
            url: String::new(),
            query: Some(query.into()),
        }
    }
}

/// Caller-tunable knobs for one run.
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    /// Run every strategy and union the results instead of stopping at the
    /// first success.
    pub exhaustive: bool,
    /// Browser capture engine wait budget.
    pub capture_window_seconds: u64,
    /// Override for the click-heuristic marker words; empty keeps the
    /// configured default list.
    pub click_markers: Vec<String>,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            exhaustive: false,
            capture_window_seconds: 10,
            click_markers: Vec::new(),
        }
    }
}

/// How the final link list was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Static,
    MetadataDelegate,
    BrowserCapture,
    FallbackRegex,
    /// Exhaustive mode with more than one contributing strategy.
    Combined,
    None,
}

impl From<StrategyName> for ExtractionMethod {
    fn from(name: StrategyName) -> Self {
        match name {
            StrategyName::Static => ExtractionMethod::Static,
            StrategyName::MetadataDelegate => ExtractionMethod::MetadataDelegate,
            StrategyName::BrowserCapture => ExtractionMethod::BrowserCapture,
            StrategyName::FallbackRegex => ExtractionMethod::FallbackRegex,
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExtractionMethod::Static => "static",
            ExtractionMethod::MetadataDelegate => "metadata_delegate",
            ExtractionMethod::BrowserCapture => "browser_capture",
            ExtractionMethod::FallbackRegex => "fallback_regex",
            ExtractionMethod::Combined => "combined",
            ExtractionMethod::None => "none",
        };
        f.write_str(label)
    }
}

/// Outcome of one strategy invocation, kept for diagnostics. Never mutated
/// after the strategy completes.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub strategy: StrategyName,
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal value of a run. `method` is `none` exactly when `links` is
/// empty; `attempts` lists every strategy tried, in ladder order.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub method: ExtractionMethod,
    pub links: Vec<String>,
    pub attempts: Vec<AttemptRecord>,
}

/// Item of the streaming interface: progress lines while the run works,
/// then exactly one terminal item.
#[derive(Debug)]
pub enum ExtractionUpdate {
    Progress(ProgressEvent),
    Done(ExtractionResult),
    /// Input validation failed before any strategy ran; the only hard
    /// failure a caller ever sees.
    Failed(String),
}

/// Runs the ordered ladder of extraction strategies against a target with
/// stop-on-success semantics, aggregating per-strategy attempt records and
/// emitting progress throughout. Strategies and the optional search
/// collaborator are injected, so tests substitute fakes freely and an
/// absent capability is an ordinary runtime condition.
pub struct Orchestrator {
    strategies: Vec<Box<dyn Strategy>>,
    search: Option<Arc<dyn SearchProvider>>,
    max_search_candidates: usize,
}

impl Orchestrator {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self {
            strategies,
            search: None,
            max_search_candidates: 5,
        }
    }

    pub fn with_search(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(provider);
        self
    }

    pub fn with_max_search_candidates(mut self, max: usize) -> Self {
        self.max_search_candidates = max.max(1);
        self
    }

    /// Builds the standard ladder (static scan, metadata delegate, browser
    /// capture, fallback regex) from configuration, probing the delegate's
    /// availability once.
    pub async fn from_config(config: &ExtractorConfig) -> ExtractorResult<Self> {
        let scanner = StaticScanner::new(&config.scanner)?;
        let delegate = MetadataDelegate::detect(&config.delegate).await;
        let launcher = BrowserLauncher::new(config.browser.clone(), config.capture.clone());
        let capture = MediaCapture::new(config.capture.clone(), &config.browser);
        let fallback = FallbackRegexStrategy::new(&config.scanner)?;

        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(StaticScanStrategy::new(scanner)),
            Box::new(DelegateStrategy::new(delegate)),
            Box::new(BrowserCaptureStrategy::new(launcher, capture)),
            Box::new(fallback),
        ];
        Ok(Self::new(strategies).with_max_search_candidates(config.orchestrator.max_search_candidates))
    }

    /// Synchronous entry point: runs the whole ladder and returns the
    /// terminal result. Only a malformed target is a hard failure; every
    /// strategy-level problem surfaces as an attempt record error note.
    pub async fn extract(
        &self,
        target: &ExtractionTarget,
        options: &ExtractionOptions,
    ) -> ExtractorResult<ExtractionResult> {
        self.extract_with_sink(target, options, &ProgressSink::disabled())
            .await
    }

    /// Streaming entry point: progress events in work order, terminated by
    /// exactly one `Done` (or `Failed` for a malformed target). Dropping
    /// the stream stops event delivery but in-flight browser sessions are
    /// still torn down by their owning strategy.
    pub fn extract_streaming(
        self: Arc<Self>,
        target: ExtractionTarget,
        options: ExtractionOptions,
    ) -> ReceiverStream<ExtractionUpdate> {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            let (sink, mut progress_rx) = ProgressSink::channel(64);
            let forward_tx = tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(event) = progress_rx.recv().await {
                    if forward_tx
                        .send(ExtractionUpdate::Progress(event))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });

            let outcome = self.extract_with_sink(&target, &options, &sink).await;
            drop(sink);
            let _ = forwarder.await;

            let terminal = match outcome {
                Ok(result) => ExtractionUpdate::Done(result),
                Err(err) => ExtractionUpdate::Failed(err.to_string()),
            };
            let _ = tx.send(terminal).await;
        });
        ReceiverStream::new(rx)
    }

    pub async fn extract_with_sink(
        &self,
        target: &ExtractionTarget,
        options: &ExtractionOptions,
        progress: &ProgressSink,
    ) -> ExtractorResult<ExtractionResult> {
        let candidates = self.candidate_urls(target, progress).await?;

        let mut attempts = Vec::new();
        for (index, candidate) in candidates.iter().enumerate() {
            if candidates.len() > 1 {
                progress
                    .emit(format!(
                        "trying candidate {} of {}: {candidate}",
                        index + 1,
                        candidates.len()
                    ))
                    .await;
            }
            let candidate_target = ExtractionTarget {
                url: candidate.clone(),
                query: target.query.clone(),
            };
            let (candidate_attempts, result) = self
                .run_ladder(&candidate_target, options, progress)
                .await;
            attempts.extend(candidate_attempts);
            if let Some((method, links)) = result {
                progress
                    .emit(format!("found {} links via {method}", links.len()))
                    .await;
                return Ok(ExtractionResult {
                    method,
                    links,
                    attempts,
                });
            }
        }

        progress.emit("no links found by any strategy").await;
        Ok(ExtractionResult {
            method: ExtractionMethod::None,
            links: Vec::new(),
            attempts,
        })
    }

    /// Validates the target and expands a query into candidate page URLs
    /// through the search collaborator.
    async fn candidate_urls(
        &self,
        target: &ExtractionTarget,
        progress: &ProgressSink,
    ) -> ExtractorResult<Vec<String>> {
        if !target.url.is_empty() {
            Url::parse(&target.url)
                .map_err(|err| ExtractorError::InvalidTarget(format!("{}: {err}", target.url)))?;
            return Ok(vec![target.url.clone()]);
        }

        let Some(query) = target.query.as_deref().filter(|q| !q.trim().is_empty()) else {
            return Err(ExtractorError::InvalidTarget(
                "provide a url or a query".into(),
            ));
        };
        let Some(provider) = &self.search else {
            return Err(ExtractorError::InvalidTarget(
                "query given but no search provider is configured".into(),
            ));
        };

        progress.emit(format!("searching for: {query}")).await;
        let candidates = provider
            .search(query, self.max_search_candidates)
            .await
            .map_err(|err| {
                warn!(error = %err, "search provider failed");
                ExtractorError::Search(err.to_string())
            })?;
        progress
            .emit(format!("search returned {} candidate pages", candidates.len()))
            .await;
        if candidates.is_empty() {
            return Err(ExtractorError::InvalidTarget(format!(
                "search found no candidate pages for: {query}"
            )));
        }
        Ok(candidates)
    }

    /// Runs the fixed strategy order against one page URL. Returns the
    /// attempt records plus, when links were found, the reported method and
    /// final link list.
    async fn run_ladder(
        &self,
        target: &ExtractionTarget,
        options: &ExtractionOptions,
        progress: &ProgressSink,
    ) -> (
        Vec<AttemptRecord>,
        Option<(ExtractionMethod, Vec<String>)>,
    ) {
        let mut attempts = Vec::with_capacity(self.strategies.len());
        let mut union: Vec<String> = Vec::new();
        let mut contributors: Vec<StrategyName> = Vec::new();

        for strategy in &self.strategies {
            let name = strategy.name();
            progress.emit(format!("attempting {name}")).await;
            let outcome = strategy.attempt(target, options, progress).await;

            if let Some(error) = &outcome.error {
                progress.emit(format!("{name} failed: {error}")).await;
            } else if outcome.urls.is_empty() {
                progress.emit(format!("no links via {name}")).await;
            } else {
                progress
                    .emit(format!("found {} links via {name}", outcome.urls.len()))
                    .await;
            }

            let found = !outcome.urls.is_empty();
            if found {
                contributors.push(name);
                for url in &outcome.urls {
                    push_unique(&mut union, url.clone());
                }
            }
            attempts.push(AttemptRecord {
                strategy: name,
                urls: outcome.urls,
                error: outcome.error,
            });

            if found && !options.exhaustive {
                info!(strategy = %name, links = union.len(), url = %target.url, "extraction succeeded");
                return (attempts, Some((name.into(), union)));
            }
        }

        match contributors.len() {
            0 => (attempts, None),
            1 => {
                let method = contributors[0].into();
                (attempts, Some((method, union)))
            }
            _ => (attempts, Some((ExtractionMethod::Combined, union))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExtractionMethod::BrowserCapture).unwrap(),
            r#""browser_capture""#
        );
        assert_eq!(ExtractionMethod::Combined.to_string(), "combined");
        assert_eq!(ExtractionMethod::None.to_string(), "none");
    }

    #[test]
    fn default_options_match_documented_defaults() {
        let options = ExtractionOptions::default();
        assert!(!options.exhaustive);
        assert_eq!(options.capture_window_seconds, 10);
        assert!(options.click_markers.is_empty());
    }
}
