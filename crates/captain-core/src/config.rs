// Configuration loading and parsing (captain.toml, credentials.toml).

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::model::Factor;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

/// Engine settings file, under `config/` and `defaults/`.
pub const CONFIG_FILE: &str = "captain.toml";

/// Tolerance for the weights-sum-to-one check.
pub const WEIGHT_SUM_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Scoring weights
// ---------------------------------------------------------------------------

/// Factor weights as data. Factors missing from the table weigh 0.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ScoringWeights(BTreeMap<Factor, f64>);

impl ScoringWeights {
    pub fn new(weights: impl IntoIterator<Item = (Factor, f64)>) -> Self {
        Self(weights.into_iter().collect())
    }

    pub fn get(&self, factor: Factor) -> f64 {
        self.0.get(&factor).copied().unwrap_or(0.0)
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Factor, f64)> + '_ {
        self.0.iter().map(|(f, w)| (*f, *w))
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::new([
            (Factor::Form, 0.35),
            (Factor::Fixture, 0.25),
            (Factor::Points, 0.20),
            (Factor::Availability, 0.10),
            (Factor::Differential, 0.10),
        ])
    }
}

/// What to do with a player whose record is missing a required field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteDataPolicy {
    /// Drop the player and record the exclusion.
    #[default]
    Exclude,
    /// Fail the whole request.
    Abort,
}

// ---------------------------------------------------------------------------
// Assembled config
// ---------------------------------------------------------------------------

/// Everything the recommendation pipeline reads. Passed explicitly into the
/// orchestrator; there is no global instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub scoring_weights: ScoringWeights,
    pub top_k_candidates: usize,
    pub allow_unavailable_fallback: bool,
    pub incomplete_data: IncompleteDataPolicy,
    /// Maximum characters of serialized candidate context.
    pub context_size_budget: usize,
    pub model: String,
    pub model_timeout: Duration,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub fuzzy_match_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scoring_weights: ScoringWeights::default(),
            top_k_candidates: 8,
            allow_unavailable_fallback: false,
            incomplete_data: IncompleteDataPolicy::Exclude,
            context_size_budget: 6000,
            model: "claude-sonnet-4-5-20250929".to_string(),
            model_timeout: Duration::from_secs(30),
            max_retries: 2,
            max_tokens: 1500,
            fuzzy_match_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// captain.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire captain.toml file.
#[derive(Debug, Clone, Deserialize)]
struct CaptainFile {
    scoring: ScoringSection,
    context: ContextSection,
    llm: LlmSection,
    parser: ParserSection,
}

#[derive(Debug, Clone, Deserialize)]
struct ScoringSection {
    top_k_candidates: usize,
    #[serde(default)]
    allow_unavailable_fallback: bool,
    #[serde(default)]
    incomplete_data: IncompleteDataPolicy,
    weights: ScoringWeights,
}

#[derive(Debug, Clone, Deserialize)]
struct ContextSection {
    size_budget: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmSection {
    model: String,
    timeout_secs: u64,
    max_retries: u32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ParserSection {
    fuzzy_match_threshold: f64,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub anthropic_api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/captain.toml` and
/// (optionally) `config/credentials.toml`, relative to `base_dir`.
///
/// Does not copy defaults; `load_config()` does that first.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- captain.toml (required) ---
    let captain_path = config_dir.join(CONFIG_FILE);
    let captain_text = read_file(&captain_path)?;
    let file: CaptainFile =
        toml::from_str(&captain_text).map_err(|e| ConfigError::ParseError {
            path: captain_path.clone(),
            source: e,
        })?;

    let engine = EngineConfig {
        scoring_weights: file.scoring.weights,
        top_k_candidates: file.scoring.top_k_candidates,
        allow_unavailable_fallback: file.scoring.allow_unavailable_fallback,
        incomplete_data: file.scoring.incomplete_data,
        context_size_budget: file.context.size_budget,
        model: file.llm.model,
        model_timeout: Duration::from_secs(file.llm.timeout_secs),
        max_retries: file.llm.max_retries,
        max_tokens: file.llm.max_tokens,
        fuzzy_match_threshold: file.parser.fuzzy_match_threshold,
    };

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    validate(&engine)?;

    Ok(Config {
        engine,
        credentials,
    })
}

/// Seed `config/captain.toml` from `defaults/` when it is missing.
/// Returns the path written, if any. Credentials are never seeded.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }
    let source = base_dir.join("defaults").join(CONFIG_FILE);
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no config/{CONFIG_FILE} or defaults/{CONFIG_FILE} in {}",
                base_dir.display()
            ),
        });
    }

    let copy_err = |e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("failed to seed {}: {e}", target.display()),
    };
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(copy_err)?;
    }
    std::fs::copy(&source, &target).map_err(copy_err)?;
    debug!(path = %target.display(), "seeded config from defaults");
    Ok(Some(target))
}

/// Resolve the directory holding `config/` and `defaults/`.
///
/// The working directory wins when it has either; otherwise the platform
/// config directory (e.g. `~/.config/captain`) is used.
pub fn config_base_dir() -> Result<PathBuf, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    if cwd.join("config").is_dir() || cwd.join("defaults").is_dir() {
        return Ok(cwd);
    }
    directories::ProjectDirs::from("", "", "captain")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(ConfigError::FileNotFound {
            path: cwd.join("config"),
        })
}

/// Convenience wrapper: resolves the base directory, copies defaults, loads.
pub fn load_config() -> Result<Config, ConfigError> {
    let base = config_base_dir()?;
    ensure_config_file(&base)?;
    load_config_from(&base)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check the engine settings. Also called by the orchestrator for configs
/// built in code.
pub fn validate(engine: &EngineConfig) -> Result<(), ConfigError> {
    for (factor, weight) in engine.scoring_weights.iter() {
        if !weight.is_finite() || weight < 0.0 {
            return Err(ConfigError::ValidationError {
                field: format!("scoring.weights.{factor}"),
                message: format!("must be a non-negative number, got {weight}"),
            });
        }
    }

    let sum = engine.scoring_weights.sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
        return Err(ConfigError::ValidationError {
            field: "scoring.weights".into(),
            message: format!("must sum to 1.0, got {sum}"),
        });
    }

    if engine.top_k_candidates < 3 {
        return Err(ConfigError::ValidationError {
            field: "scoring.top_k_candidates".into(),
            message: format!("must be at least 3, got {}", engine.top_k_candidates),
        });
    }

    if engine.context_size_budget == 0 {
        return Err(ConfigError::ValidationError {
            field: "context.size_budget".into(),
            message: "must be greater than 0".into(),
        });
    }

    if engine.model.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "llm.model".into(),
            message: "must not be empty".into(),
        });
    }

    if engine.model_timeout.is_zero() {
        return Err(ConfigError::ValidationError {
            field: "llm.timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    let threshold = engine.fuzzy_match_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::ValidationError {
            field: "parser.fuzzy_match_threshold".into(),
            message: format!("must be between 0.0 and 1.0 inclusive, got {threshold}"),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
