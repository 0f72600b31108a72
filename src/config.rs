//! Solver and paging configuration, persisted as TOML.
//!
//! Every field has a default, so a config file only needs the options it
//! changes. `hlmrf config` prints the full default file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration: one table per solver plus the paging layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HlmrfConfig {
    pub admm: AdmmConfig,
    pub sgd: SgdConfig,
    pub streaming: StreamingConfig,
}

/// Consensus reasoner options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmmConfig {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Augmented Lagrangian penalty ρ.
    pub penalty: f32,
    /// Absolute tolerance for the primal and dual residuals.
    pub epsilon_abs: f32,
    /// Relative tolerance for the primal and dual residuals.
    pub epsilon_rel: f32,
    /// Emit a residual trace every this many iterations (0 disables).
    pub log_period: usize,
}

impl Default for AdmmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25_000,
            penalty: 1.0,
            epsilon_abs: 1e-5,
            epsilon_rel: 1e-3,
            log_period: 50,
        }
    }
}

/// Step size schedule of the stochastic reasoner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepSchedule {
    /// `η` every epoch.
    Constant,
    /// `η / (epoch + 1)^exponent`.
    InverseScale { exponent: f32 },
}

impl StepSchedule {
    /// Step size for a zero-based epoch.
    pub fn step(self, learning_rate: f32, epoch: usize) -> f32 {
        match self {
            StepSchedule::Constant => learning_rate,
            StepSchedule::InverseScale { exponent } => {
                learning_rate / ((epoch + 1) as f32).powf(exponent)
            }
        }
    }
}

/// Stochastic reasoner options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdConfig {
    pub max_epochs: usize,
    /// Base step size η.
    pub learning_rate: f32,
    /// Per-atom adaptive step sizes from accumulated squared gradients.
    pub adagrad: bool,
    /// Stop once the L2 norm of one epoch's updates falls below this.
    pub tolerance: f32,
    /// Shuffle term order each epoch (in-memory stores).
    pub shuffle_terms: bool,
    pub seed: u64,
    pub schedule: StepSchedule,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            max_epochs: 200,
            learning_rate: 1.0,
            adagrad: false,
            tolerance: 1e-5,
            shuffle_terms: true,
            seed: 4,
            schedule: StepSchedule::InverseScale { exponent: 1.0 },
        }
    }
}

/// Paging options of the streaming term store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Terms per page; also the capacity of the term pool.
    pub page_terms: usize,
    /// Optional byte budget per page body; a page is flushed at whichever
    /// budget is hit first.
    pub page_bytes: Option<usize>,
    /// Decoded pages kept resident between reads. 0 streams every page from
    /// disk on every sweep.
    pub cache_pages: usize,
    /// Permute term order within each loaded page.
    pub shuffle_page: bool,
    /// Visit pages in random order each sweep.
    pub randomize_page_access: bool,
    pub seed: u64,
    /// Directory for page files; a temporary directory when unset.
    pub page_dir: Option<PathBuf>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            page_terms: 10_000,
            page_bytes: None,
            cache_pages: 0,
            shuffle_page: true,
            randomize_page_access: true,
            seed: 4,
            page_dir: None,
        }
    }
}

impl StreamingConfig {
    /// Sequential, unshuffled replay: every sweep yields grounding order.
    pub fn sequential(page_terms: usize) -> Self {
        Self {
            page_terms,
            shuffle_page: false,
            randomize_page_access: false,
            ..Self::default()
        }
    }
}

impl HlmrfConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: "<memory>".into(),
            message: e.to_string(),
        })
    }

    /// Reject values no solver run can use.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });
        let positive = |v: f32| v.is_finite() && v > 0.0;

        if !positive(self.admm.penalty) {
            return invalid(format!("admm.penalty must be positive, got {}", self.admm.penalty));
        }
        if !(self.admm.epsilon_abs.is_finite() && self.admm.epsilon_abs >= 0.0)
            || !(self.admm.epsilon_rel.is_finite() && self.admm.epsilon_rel >= 0.0)
        {
            return invalid("admm tolerances must be finite and non-negative".into());
        }
        if !positive(self.sgd.learning_rate) {
            return invalid(format!(
                "sgd.learning_rate must be positive, got {}",
                self.sgd.learning_rate
            ));
        }
        if let StepSchedule::InverseScale { exponent } = self.sgd.schedule {
            if !(exponent.is_finite() && exponent >= 0.0) {
                return invalid(format!("sgd.schedule.exponent must be >= 0, got {exponent}"));
            }
        }
        if !(self.sgd.tolerance.is_finite() && self.sgd.tolerance >= 0.0) {
            return invalid("sgd.tolerance must be finite and non-negative".into());
        }
        if self.streaming.page_terms == 0 {
            return invalid("streaming.page_terms must be at least 1".into());
        }
        if self.streaming.page_bytes == Some(0) {
            return invalid("streaming.page_bytes must be positive when set".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = HlmrfConfig::default();
        let text = config.to_toml().unwrap();
        let back: HlmrfConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let text = r#"
            [admm]
            penalty = 2.5

            [sgd.schedule]
            kind = "constant"

            [streaming]
            page_terms = 64
            cache_pages = 2
        "#;
        let config: HlmrfConfig = toml::from_str(text).unwrap();
        assert_eq!(config.admm.penalty, 2.5);
        assert_eq!(config.admm.max_iterations, 25_000);
        assert_eq!(config.sgd.schedule, StepSchedule::Constant);
        assert_eq!(config.streaming.page_terms, 64);
        assert_eq!(config.streaming.cache_pages, 2);
        assert!(config.streaming.shuffle_page);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("hlmrf.toml");
        let mut config = HlmrfConfig::default();
        config.streaming.page_dir = Some(dir.path().join("pages"));
        config.sgd.adagrad = true;
        config.save(&path).unwrap();
        assert_eq!(HlmrfConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let mut config = HlmrfConfig::default();
        config.admm.penalty = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = HlmrfConfig::default();
        config.streaming.page_terms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = HlmrfConfig::load(Path::new("/nonexistent/hlmrf.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn inverse_scale_decays() {
        let schedule = StepSchedule::InverseScale { exponent: 1.0 };
        assert_eq!(schedule.step(1.0, 0), 1.0);
        assert_eq!(schedule.step(1.0, 1), 0.5);
        assert_eq!(StepSchedule::Constant.step(0.3, 9), 0.3);
    }
}
