pub mod browser;
pub mod config;
pub mod delegate;
pub mod error;
pub mod orchestrator;
pub mod pattern;
pub mod progress;
pub mod scanner;
pub mod search;
pub mod strategy;

pub use config::{load_extractor_config, ExtractorConfig};
pub use error::{ConfigError, ExtractorError, ExtractorResult, Result};
pub use orchestrator::{
    AttemptRecord, ExtractionMethod, ExtractionOptions, ExtractionResult, ExtractionTarget,
    ExtractionUpdate, Orchestrator,
};
pub use progress::{ProgressEvent, ProgressSink};
pub use strategy::{Strategy, StrategyName, StrategyOutcome};
