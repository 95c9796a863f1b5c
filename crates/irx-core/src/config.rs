//! IRX Configuration Management
//!
//! Handles configuration from environment variables and TOML files,
//! with defaults matching the reference behavior of each strategy.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Strategy hyperparameters
    pub extractor: ExtractorConfig,

    /// Vote aggregation
    pub voting: VotingConfig,

    /// Batch extraction
    pub batch: BatchConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(epochs) = parse_env::<usize>("IRX_NER_EPOCHS")? {
            config.extractor.ner.epochs = epochs;
        }
        if let Some(seed) = parse_env::<u64>("IRX_SEED")? {
            config.extractor.set_seed(seed);
        }
        if let Some(normalize) = parse_env::<bool>("IRX_NORMALIZE_VOTES")? {
            config.voting.normalize_values = normalize;
        }
        if let Some(parallel) = parse_env::<bool>("IRX_BATCH_PARALLEL")? {
            config.batch.parallel = parallel;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.logging.json_format = format.eq_ignore_ascii_case("json");
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let defaults = Self::default();

        // Only override if env values differ from defaults
        if env_config.extractor.ner.epochs != defaults.extractor.ner.epochs {
            self.extractor.ner.epochs = env_config.extractor.ner.epochs;
        }
        if env_config.extractor.ner.seed != defaults.extractor.ner.seed {
            self.extractor.set_seed(env_config.extractor.ner.seed);
        }
        if env_config.voting.normalize_values != defaults.voting.normalize_values {
            self.voting.normalize_values = env_config.voting.normalize_values;
        }
        if env_config.batch.parallel != defaults.batch.parallel {
            self.batch.parallel = env_config.batch.parallel;
        }
        if env_config.logging.level != defaults.logging.level {
            self.logging.level = env_config.logging.level;
        }
        if env_config.logging.json_format {
            self.logging.json_format = true;
        }

        Ok(self)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Hyperparameters for every bundled strategy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExtractorConfig {
    pub ner: NerConfig,
    pub hybrid: HybridConfig,
    pub template: TemplateConfig,
    pub advanced: AdvancedConfig,
}

impl ExtractorConfig {
    /// Use one seed for every randomized learner
    pub fn set_seed(&mut self, seed: u64) {
        self.ner.seed = seed;
        self.template.forest.seed = seed;
        self.advanced.forest.seed = seed;
    }
}

/// TF-IDF vectorizer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TfidfConfig {
    /// Keep only the most frequent terms (None keeps all)
    pub max_features: Option<usize>,

    /// Smallest n-gram length
    pub ngram_min: usize,

    /// Largest n-gram length
    pub ngram_max: usize,
}

impl TfidfConfig {
    pub fn new(max_features: usize, ngram_min: usize, ngram_max: usize) -> Self {
        Self {
            max_features: Some(max_features),
            ngram_min,
            ngram_max,
        }
    }
}

impl Default for TfidfConfig {
    fn default() -> Self {
        Self {
            max_features: None,
            ngram_min: 1,
            ngram_max: 1,
        }
    }
}

/// Random forest settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Number of trees
    pub n_estimators: usize,

    /// Maximum tree depth (None grows until leaves are pure)
    pub max_depth: Option<usize>,

    /// Minimum samples required to split a node
    pub min_samples_split: usize,

    /// RNG seed for bootstrap and feature sampling
    pub seed: u64,
}

impl ForestConfig {
    pub fn with_trees(n_estimators: usize) -> Self {
        Self {
            n_estimators,
            ..Self::default()
        }
    }
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

/// Entity-model strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NerConfig {
    /// Passes over the training data
    pub epochs: usize,

    /// Seed for per-pass shuffling
    pub seed: u64,

    /// Log progress every N passes
    pub log_every: usize,
}

impl Default for NerConfig {
    fn default() -> Self {
        Self {
            epochs: 30,
            seed: 42,
            log_every: 10,
        }
    }
}

/// Rule + classifier strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub tfidf: TfidfConfig,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            tfidf: TfidfConfig::new(500, 1, 1),
        }
    }
}

/// Template + classifier strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Maximum characters kept from a template capture
    pub max_capture_chars: usize,

    pub tfidf: TfidfConfig,

    pub forest: ForestConfig,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            max_capture_chars: 200,
            tfidf: TfidfConfig::new(300, 1, 2),
            forest: ForestConfig::with_trees(50),
        }
    }
}

/// Feature + classifier ensemble strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub tfidf: TfidfConfig,

    pub forest: ForestConfig,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            tfidf: TfidfConfig::new(100, 1, 2),
            forest: ForestConfig::with_trees(100),
        }
    }
}

/// Vote aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    /// Group values that differ only in case or whitespace
    pub normalize_values: bool,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            normalize_values: true,
        }
    }
}

/// Batch extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Extract rows on the rayon thread pool
    pub parallel: bool,

    /// Characters of input kept in each row's preview
    pub preview_chars: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            preview_chars: 100,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl From<ConfigError> for crate::IrxError {
    fn from(e: ConfigError) -> Self {
        crate::IrxError::ConfigError(e.to_string())
    }
}
