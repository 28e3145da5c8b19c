use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use streamseek_core::delegate::MetadataDelegate;
use streamseek_core::search::SerpApiSearch;
use streamseek_core::{
    load_extractor_config, ExtractionOptions, ExtractionResult, ExtractionTarget,
    ExtractionUpdate, ExtractorConfig, Orchestrator,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] streamseek_core::ConfigError),
    #[error("extraction error: {0}")]
    Extractor(#[from] streamseek_core::ExtractorError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("extraction run failed: {0}")]
    RunFailed(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Media link extraction control interface", long_about = None)]
pub struct Cli {
    /// Path to extractor.toml; defaults are used when the file is absent
    #[arg(long, default_value = "configs/extractor.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the extraction ladder against a page URL or a search query
    Extract(ExtractArgs),
    /// Verify the environment: config, delegate tool, browser
    Health,
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Target page URL
    #[arg(long, conflicts_with = "query")]
    pub url: Option<String>,
    /// Free-text query resolved to candidate pages via the search provider
    #[arg(long)]
    pub query: Option<String>,
    /// Run every strategy and union the results
    #[arg(long)]
    pub exhaustive: bool,
    /// Browser capture window in seconds
    #[arg(long, default_value_t = 10)]
    pub window: u64,
    /// Extra click-heuristic marker word (repeatable)
    #[arg(long = "marker")]
    pub markers: Vec<String>,
    /// Print progress lines while the run works
    #[arg(long)]
    pub stream: bool,
}

pub fn run(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = if cli.config.exists() {
        load_extractor_config(&cli.config)?
    } else {
        ExtractorConfig::default()
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        match &cli.command {
            Commands::Extract(args) => extract(&config, args, cli.format).await,
            Commands::Health => health(&config, &cli.config, cli.format).await,
        }
    })
}

async fn extract(config: &ExtractorConfig, args: &ExtractArgs, format: OutputFormat) -> Result<()> {
    let target = match (&args.url, &args.query) {
        (Some(url), _) => ExtractionTarget::url(url.clone()),
        (None, Some(query)) => ExtractionTarget::query(query.clone()),
        (None, None) => {
            return Err(AppError::RunFailed("provide --url or --query".into()));
        }
    };
    let options = ExtractionOptions {
        exhaustive: args.exhaustive || config.orchestrator.exhaustive,
        capture_window_seconds: args.window,
        click_markers: args.markers.clone(),
    };

    let mut orchestrator = Orchestrator::from_config(config).await?;
    if let Some(provider) = SerpApiSearch::from_env(&config.search)? {
        orchestrator = orchestrator.with_search(Arc::new(provider));
    }

    if args.stream {
        let orchestrator = Arc::new(orchestrator);
        let mut updates = orchestrator.extract_streaming(target, options);
        while let Some(update) = updates.next().await {
            match update {
                ExtractionUpdate::Progress(event) => {
                    println!("[{}] {}", event.timestamp.format("%H:%M:%S"), event.message);
                }
                ExtractionUpdate::Done(result) => {
                    render_result(&result, format)?;
                }
                ExtractionUpdate::Failed(reason) => {
                    return Err(AppError::RunFailed(reason));
                }
            }
        }
        Ok(())
    } else {
        let result = orchestrator.extract(&target, &options).await?;
        render_result(&result, format)
    }
}

fn render_result(result: &ExtractionResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Text => {
            println!("method: {}", result.method);
            if result.links.is_empty() {
                println!("no links found");
            } else {
                for link in &result.links {
                    println!("  {link}");
                }
            }
            for attempt in &result.attempts {
                let note = attempt
                    .error
                    .as_deref()
                    .map(|err| format!(" ({err})"))
                    .unwrap_or_default();
                println!(
                    "attempt {}: {} links{note}",
                    attempt.strategy,
                    attempt.urls.len()
                );
            }
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthEntry {
    name: String,
    ok: bool,
    detail: String,
}

async fn health(config: &ExtractorConfig, config_path: &Path, format: OutputFormat) -> Result<()> {
    let mut entries = Vec::new();

    entries.push(HealthEntry {
        name: "config".into(),
        ok: config_path.exists(),
        detail: if config_path.exists() {
            config_path.display().to_string()
        } else {
            format!("{} absent, using defaults", config_path.display())
        },
    });

    let delegate = MetadataDelegate::detect(&config.delegate).await;
    entries.push(HealthEntry {
        name: "metadata delegate".into(),
        ok: delegate.is_available(),
        detail: if delegate.is_available() {
            config.delegate.binary.clone()
        } else {
            format!("{} not found on PATH", config.delegate.binary)
        },
    });

    let browser_detail = if config.browser.executable_path.is_empty() {
        ("auto-detect".to_string(), true)
    } else {
        let path = PathBuf::from(&config.browser.executable_path);
        (config.browser.executable_path.clone(), path.exists())
    };
    entries.push(HealthEntry {
        name: "browser executable".into(),
        ok: browser_detail.1,
        detail: browser_detail.0,
    });

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => {
            for entry in &entries {
                let status = if entry.ok { "OK" } else { "WARN" };
                println!("[{status}] {}: {}", entry.name, entry.detail);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn url_and_query_conflict() {
        let result = Cli::try_parse_from([
            "streamseekctl",
            "extract",
            "--url",
            "https://example.com",
            "--query",
            "something",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn extract_args_parse_markers() {
        let cli = Cli::try_parse_from([
            "streamseekctl",
            "extract",
            "--url",
            "https://example.com/watch",
            "--marker",
            "play",
            "--marker",
            "baixar",
            "--window",
            "15",
        ])
        .unwrap();
        let Commands::Extract(args) = cli.command else {
            panic!("expected extract command");
        };
        assert_eq!(args.markers, vec!["play".to_string(), "baixar".to_string()]);
        assert_eq!(args.window, 15);
        assert!(!args.exhaustive);
    }
}
