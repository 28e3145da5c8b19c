use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::SearchSection;
use crate::error::{ExtractorError, ExtractorResult};

/// External collaborator that turns a free-text query into candidate page
/// URLs the extraction ladder is then run over. Injected as a capability:
/// a deployment without a configured provider simply rejects query-only
/// targets.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> ExtractorResult<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct SerpResponse {
    #[serde(default)]
    organic_results: Vec<SerpResult>,
}

#[derive(Debug, Deserialize)]
struct SerpResult {
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// SerpAPI-backed provider (the JSON search endpoint the service has
/// always used).
#[derive(Debug, Clone)]
pub struct SerpApiSearch {
    client: reqwest::Client,
    api_key: String,
    language: String,
}

impl SerpApiSearch {
    /// Reads the API key from the configured environment variable;
    /// returns `None` when it is unset, which downgrades query-derived
    /// extraction rather than failing at startup.
    pub fn from_env(config: &SearchSection) -> ExtractorResult<Option<Self>> {
        let Ok(api_key) = std::env::var(&config.api_key_env) else {
            debug!(env = %config.api_key_env, "search api key not set, provider disabled");
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Some(Self {
            client,
            api_key,
            language: config.language.clone(),
        }))
    }
}

#[async_trait]
impl SearchProvider for SerpApiSearch {
    async fn search(&self, query: &str, max_results: usize) -> ExtractorResult<Vec<String>> {
        let response = self
            .client
            .get("https://serpapi.com/search.json")
            .query(&[
                ("q", query),
                ("hl", self.language.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractorError::Search(format!(
                "search endpoint returned status {status}"
            )));
        }
        let parsed: SerpResponse = response.json().await?;
        let urls = parsed
            .organic_results
            .into_iter()
            .filter_map(|result| result.link.or(result.url))
            .take(max_results)
            .collect();
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serp_payload_yields_links_in_order() {
        let payload = r#"{
            "organic_results": [
                {"link": "https://a.example.com/watch"},
                {"url": "https://b.example.com/video"},
                {"position": 3}
            ]
        }"#;
        let parsed: SerpResponse = serde_json::from_str(payload).unwrap();
        let urls: Vec<String> = parsed
            .organic_results
            .into_iter()
            .filter_map(|result| result.link.or(result.url))
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://a.example.com/watch".to_string(),
                "https://b.example.com/video".to_string(),
            ]
        );
    }
}
