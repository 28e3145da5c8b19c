use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Top-level configuration for an extraction service instance. Every
/// section defaults on its own, so an absent or partial TOML file still
/// yields a runnable configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ExtractorConfig {
    pub scanner: ScannerSection,
    pub delegate: DelegateSection,
    pub browser: BrowserSection,
    pub capture: CaptureSection,
    pub orchestrator: OrchestratorSection,
    pub search: SearchSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerSection {
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            timeout_seconds: 12,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DelegateSection {
    pub binary: String,
    pub timeout_seconds: u64,
}

impl Default for DelegateSection {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    /// Empty string lets chromiumoxide locate the system Chromium.
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub mute_audio: bool,
    pub autoplay_policy: String,
    pub user_agents: Vec<String>,
    pub resolutions: Vec<[u32; 2]>,
    pub jitter_pixels: u32,
    pub navigation_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: String::new(),
            headless: true,
            sandbox: false,
            disable_gpu: true,
            mute_audio: true,
            autoplay_policy: "no-user-gesture-required".to_string(),
            user_agents: vec![
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                    .to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/605.1.15 \
                 (KHTML, like Gecko) Version/16.4 Safari/605.1.15"
                    .to_string(),
            ],
            resolutions: vec![[1366, 768], [1536, 864], [1920, 1080]],
            jitter_pixels: 12,
            navigation_timeout_seconds: 25,
            request_timeout_seconds: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    pub window_seconds: u64,
    pub poll_interval_ms: u64,
    pub click_timeout_ms: u64,
    /// Captured response bodies are truncated to this many bytes inside the
    /// page before the host reads them back.
    pub body_snippet_bytes: usize,
    /// Case-insensitive marker words for the click heuristics; the default
    /// mixes English and Portuguese, matching the pages the service was
    /// built against.
    pub click_markers: Vec<String>,
    /// Selectors tried when no marker-word element exists on the page.
    pub player_selectors: Vec<String>,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            window_seconds: 10,
            poll_interval_ms: 500,
            click_timeout_ms: 3000,
            body_snippet_bytes: 4096,
            click_markers: vec![
                "play".to_string(),
                "watch".to_string(),
                "download".to_string(),
                "baixar".to_string(),
                "assistir".to_string(),
                "reproduzir".to_string(),
            ],
            player_selectors: vec![
                "video".to_string(),
                ".video-player".to_string(),
                ".player".to_string(),
                "#player".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub exhaustive: bool,
    /// Upper bound on candidate page URLs tried for a query-derived run.
    pub max_search_candidates: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            exhaustive: false,
            max_search_candidates: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub language: String,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            api_key_env: "SERP_API_KEY".to_string(),
            timeout_seconds: 8,
            language: "pt".to_string(),
        }
    }
}

pub fn load_extractor_config<P: AsRef<Path>>(path: P) -> Result<ExtractorConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/extractor.toml");
        let config = load_extractor_config(path).expect("fixture config should parse");
        assert_eq!(config.scanner.timeout_seconds, 12);
        assert_eq!(config.delegate.binary, "yt-dlp");
        assert!(config.browser.user_agents.len() >= 2);
        assert!(config.capture.click_markers.contains(&"baixar".to_string()));
        assert!(!config.orchestrator.exhaustive);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: ExtractorConfig =
            toml::from_str("[capture]\nwindow_seconds = 20\n").expect("partial config");
        assert_eq!(config.capture.window_seconds, 20);
        assert_eq!(config.capture.poll_interval_ms, 500);
        assert_eq!(config.scanner.timeout_seconds, 12);
    }
}
