//! Configuration management for Lectern
//!
//! Every numeric knob of the routing engine lives here: signal weights,
//! decision thresholds, penalties, fusion constants and session bounds.
//! Configuration is validated once, at load or construction time; nothing
//! downstream re-checks it.

use crate::error::{LecternError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub weights: WeightsConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub penalties: PenaltiesConfig,
    #[serde(default)]
    pub fusion: FusionSettings,
    #[serde(default)]
    pub signal: SignalSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Raw signal weights as configured; see [`WeightsConfig::normalize`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsConfig {
    pub similarity: f64,
    pub structure: f64,
    pub keyword: f64,
    pub pin: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            similarity: 0.55,
            structure: 0.20,
            keyword: 0.175,
            pin: 0.075,
        }
    }
}

/// Signal weights rescaled so they sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedWeights {
    pub similarity: f64,
    pub structure: f64,
    pub keyword: f64,
    pub pin: f64,
}

impl NormalizedWeights {
    pub fn sum(&self) -> f64 {
        self.similarity + self.structure + self.keyword + self.pin
    }
}

impl WeightsConfig {
    /// Validate and rescale the weights to sum to 1.0
    ///
    /// Fails when any weight is negative or non-finite, or when the total is
    /// not strictly positive.
    pub fn normalize(&self) -> Result<NormalizedWeights> {
        let raw = [
            ("weights.similarity", self.similarity),
            ("weights.structure", self.structure),
            ("weights.keyword", self.keyword),
            ("weights.pin", self.pin),
        ];

        let mut errors = Vec::new();
        for (path, value) in raw {
            if !value.is_finite() || value < 0.0 {
                errors.push(crate::error::ValidationError::new(
                    path,
                    format!("Weight must be a finite value >= 0, got {}", value),
                ));
            }
        }
        if !errors.is_empty() {
            return Err(LecternError::ConfigValidation { errors });
        }

        let total: f64 = raw.iter().map(|(_, v)| v).sum();
        if total <= 0.0 {
            return Err(LecternError::invalid(
                "weights",
                "Total weight must be greater than 0",
            ));
        }

        Ok(NormalizedWeights {
            similarity: self.similarity / total,
            structure: self.structure / total,
            keyword: self.keyword / total,
            pin: self.pin / total,
        })
    }
}

/// Decision thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThresholdsConfig {
    pub high: f64,
    pub low: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            high: 0.55,
            low: 0.35,
        }
    }
}

/// Penalty and bonus magnitudes applied to the confidence score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PenaltiesConfig {
    /// Subtracted when the probe context is weak
    pub weak: f64,
    /// Extra subtraction when the context is weak while filters are active
    pub weak_focus: f64,
    /// Absolute continuity bonus for a pinned session whose last turn retrieved
    pub pin_increment: f64,
}

impl Default for PenaltiesConfig {
    fn default() -> Self {
        Self {
            weak: 0.15,
            weak_focus: 0.05,
            pin_increment: 0.025,
        }
    }
}

/// Reciprocal-rank fusion and reranking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionSettings {
    pub rrf_k: f64,
    pub exact_weight: f64,
    pub lexical_weight: f64,
    pub vector_weight: f64,
    /// Characters of document text handed to the reranker
    pub rerank_text_chars: usize,
    /// Per-call budget for any backend (lexical, vector, rerank)
    pub source_timeout_ms: u64,
    /// Passages returned by the final retrieval of a turn
    pub final_k: usize,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            exact_weight: 2.0,
            lexical_weight: 1.0,
            vector_weight: 1.0,
            rerank_text_chars: 1000,
            source_timeout_ms: 4000,
            final_k: 6,
        }
    }
}

/// Probe and confidence signal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSettings {
    /// Probe breadth when two or more filter fields are set
    pub probe_k_focused: usize,
    pub probe_k_default: usize,
    /// How many probe hits are compared against the query
    pub similarity_top_n: usize,
    pub similarity_text_chars: usize,
    /// Below this many hits the context is weak
    pub min_hits: usize,
    /// Below this similarity the context is weak
    pub min_similarity: f64,
    /// Domain keyword / symbol patterns (regex, matched on normalized text)
    pub domain_keywords: Vec<String>,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            probe_k_focused: 5,
            probe_k_default: 8,
            similarity_top_n: 6,
            similarity_text_chars: 700,
            min_hits: 3,
            min_similarity: 0.25,
            domain_keywords: default_domain_keywords(),
        }
    }
}

fn default_domain_keywords() -> Vec<String> {
    [
        r"\b(theorem|lemma|corollary|axiom|definition|formula)s?\b",
        r"\b(derivative|integral|limit|series|function|equation|matrix|vector)s?\b",
        r"\b(chapter|paragraph|section|unit)\s+\d+",
        r"[=<>^√∫∑∏≤≥≠∞∂]",
        r"\b[a-z]\s*\(\s*[a-z]\s*\)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Session bounds and follow-up heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    pub max_history: usize,
    /// Minimum token-sort similarity (0-100) against the last question
    pub follow_up_threshold: f64,
    /// Longest query (in tokens) still treated as a short continuation
    pub continuation_max_tokens: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_history: 5,
            follow_up_threshold: 65.0,
            continuation_max_tokens: 8,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weak_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_history: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LecternError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| LecternError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(high) = overrides.threshold_high {
            self.thresholds.high = high;
        }
        if let Some(low) = overrides.threshold_low {
            self.thresholds.low = low;
        }
        if let Some(weak) = overrides.weak_penalty {
            self.penalties.weak = weak;
        }
        if let Some(max_history) = overrides.max_history {
            self.session.max_history = max_history;
        }
        tracing::debug!("Applied profile '{}'", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LECTERN_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("LECTERN_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        let slot: &mut f64 = match path {
            "THRESHOLDS__HIGH" => &mut self.thresholds.high,
            "THRESHOLDS__LOW" => &mut self.thresholds.low,
            "PENALTIES__WEAK" => &mut self.penalties.weak,
            "PENALTIES__WEAK_FOCUS" => &mut self.penalties.weak_focus,
            "PENALTIES__PIN_INCREMENT" => &mut self.penalties.pin_increment,
            "WEIGHTS__SIMILARITY" => &mut self.weights.similarity,
            "WEIGHTS__STRUCTURE" => &mut self.weights.structure,
            "WEIGHTS__KEYWORD" => &mut self.weights.keyword,
            "WEIGHTS__PIN" => &mut self.weights.pin,
            "FUSION__RRF_K" => &mut self.fusion.rrf_k,
            "SESSION__MAX_HISTORY" => {
                self.session.max_history =
                    value.parse().map_err(|_| LecternError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
                return Ok(());
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
                return Ok(());
            }
        };

        *slot = value.parse().map_err(|_| LecternError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}' as number", value),
        })?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| LecternError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("lectern").join("config.toml"))
    }
}

fn default_profiles() -> HashMap<String, ProfileOverrides> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "strict".to_string(),
        ProfileOverrides {
            threshold_high: Some(0.65),
            threshold_low: Some(0.45),
            ..Default::default()
        },
    );
    profiles
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
            },
            weights: WeightsConfig::default(),
            thresholds: ThresholdsConfig::default(),
            penalties: PenaltiesConfig::default(),
            fusion: FusionSettings::default(),
            signal: SignalSettings::default(),
            session: SessionSettings::default(),
            profiles: default_profiles(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_weights_normalize_to_one() {
        let weights = WeightsConfig::default().normalize().unwrap();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!((weights.pin - 0.075).abs() < 1e-9);
    }

    #[test]
    fn test_unnormalized_weights_are_rescaled() {
        let grid = [
            (1.0, 1.0, 1.0, 1.0),
            (10.0, 0.0, 0.0, 0.0),
            (0.3, 7.0, 0.01, 2.5),
            (1e-6, 1e-6, 0.0, 1e6),
        ];
        for (similarity, structure, keyword, pin) in grid {
            let w = WeightsConfig {
                similarity,
                structure,
                keyword,
                pin,
            }
            .normalize()
            .unwrap();
            assert!((w.sum() - 1.0).abs() < 1e-9);
            assert!(w.similarity >= 0.0 && w.structure >= 0.0);
            assert!(w.keyword >= 0.0 && w.pin >= 0.0);
        }
    }

    #[test]
    fn test_zero_total_weight_rejected() {
        let weights = WeightsConfig {
            similarity: 0.0,
            structure: 0.0,
            keyword: 0.0,
            pin: 0.0,
        };
        assert!(matches!(
            weights.normalize(),
            Err(LecternError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = WeightsConfig {
            similarity: 1.0,
            structure: -0.2,
            keyword: 0.0,
            pin: 0.0,
        };
        assert!(weights.normalize().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.thresholds.high = 0.6;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!((loaded.thresholds.high - 0.6).abs() < 1e-9);
        assert_eq!(loaded.session.max_history, 5);
    }

    #[test]
    fn test_missing_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = Config::load(&temp_dir.path().join("absent.toml"));
        assert!(matches!(result, Err(LecternError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[_meta]\nschema_version = \"1.0.0\"\n\n[thresholds]\nhigh = 0.7\nlow = 0.2\n",
        )
        .unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!((loaded.thresholds.low - 0.2).abs() < 1e-9);
        assert!((loaded.fusion.rrf_k - 60.0).abs() < 1e-9);
        assert!(loaded.profiles.contains_key("strict"));
    }

    #[test]
    fn test_apply_profile() {
        let mut config = Config::default();
        config.apply_profile("strict").unwrap();
        assert!((config.thresholds.high - 0.65).abs() < 1e-9);
        assert!(config.apply_profile("missing").is_err());
    }
}
