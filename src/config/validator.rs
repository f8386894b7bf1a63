use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{LecternError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_weights(config, &mut errors);
        Self::validate_thresholds(config, &mut errors);
        Self::validate_penalties(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_signal(config, &mut errors);
        Self::validate_session(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LecternError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_weights(config: &Config, errors: &mut Vec<ValidationError>) {
        if let Err(LecternError::ConfigValidation { errors: inner }) = config.weights.normalize()
        {
            errors.extend(inner);
        }
    }

    fn validate_thresholds(config: &Config, errors: &mut Vec<ValidationError>) {
        let t = &config.thresholds;
        for (path, value) in [("thresholds.high", t.high), ("thresholds.low", t.low)] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(ValidationError::new(
                    path,
                    format!("Threshold must be between 0.0 and 1.0, got {}", value),
                ));
            }
        }

        if t.low > t.high {
            errors.push(ValidationError::new(
                "thresholds",
                format!(
                    "Low threshold ({}) must not exceed high threshold ({})",
                    t.low, t.high
                ),
            ));
        }
    }

    fn validate_penalties(config: &Config, errors: &mut Vec<ValidationError>) {
        let p = &config.penalties;
        for (path, value) in [
            ("penalties.weak", p.weak),
            ("penalties.weak_focus", p.weak_focus),
            ("penalties.pin_increment", p.pin_increment),
        ] {
            if !value.is_finite() || value < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Penalty must be a finite value >= 0, got {}", value),
                ));
            }
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        let f = &config.fusion;
        if !f.rrf_k.is_finite() || f.rrf_k < 0.0 {
            errors.push(ValidationError::new(
                "fusion.rrf_k",
                format!("RRF constant must be >= 0, got {}", f.rrf_k),
            ));
        }

        for (path, value) in [
            ("fusion.exact_weight", f.exact_weight),
            ("fusion.lexical_weight", f.lexical_weight),
            ("fusion.vector_weight", f.vector_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Source weight must be >= 0, got {}", value),
                ));
            }
        }

        if f.final_k == 0 {
            errors.push(ValidationError::new(
                "fusion.final_k",
                "Final retrieval size must be greater than 0",
            ));
        }

        if f.source_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "fusion.source_timeout_ms",
                "Source timeout must be greater than 0",
            ));
        }
    }

    fn validate_signal(config: &Config, errors: &mut Vec<ValidationError>) {
        let s = &config.signal;
        if s.probe_k_focused == 0 || s.probe_k_default == 0 {
            errors.push(ValidationError::new(
                "signal.probe_k",
                "Probe breadth must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&s.min_similarity) {
            errors.push(ValidationError::new(
                "signal.min_similarity",
                format!(
                    "Minimum similarity must be between 0.0 and 1.0, got {}",
                    s.min_similarity
                ),
            ));
        }

        for pattern in &s.domain_keywords {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ValidationError::new(
                    "signal.domain_keywords",
                    format!("Invalid pattern '{}': {}", pattern, e),
                ));
            }
        }
    }

    fn validate_session(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.session.max_history == 0 {
            errors.push(ValidationError::new(
                "session.max_history",
                "History bound must be greater than 0",
            ));
        }

        if !(0.0..=100.0).contains(&config.session.follow_up_threshold) {
            errors.push(ValidationError::new(
                "session.follow_up_threshold",
                "Follow-up threshold must be between 0 and 100",
            ));
        }
    }
}
