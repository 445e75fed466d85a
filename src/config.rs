//! Allocator configuration
//!
//! Configuration can be built in code, loaded from TOML, and overlaid with
//! environment variables:
//!
//! ```toml
//! reserve_at_beginning = 8192
//! alignment = 4096
//! strategy = "heat-zone"
//! trace_path = "/tmp/ba.trace"
//!
//! [tuning]
//! padded_fit_alignment = 8192
//! hot_zone_threshold_percent = 90
//! ```

use crate::allocator::block::is_valid_alignment;
use crate::allocator::{AllocationStrategy, StrategyTuning};
use crate::error::{AllocatorError, Result};
use crate::trace::{self, Tracer, TRACE_PATH_ENV};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the padded-fit alignment
pub const PADDED_FIT_ALIGNMENT_ENV: &str = "BA_PADDED_FIT_ALIGNMENT";

/// Environment variable overriding the hot zone threshold (percent)
pub const HOT_ZONE_THRESHOLD_ENV: &str = "BA_HOT_ZONE_THRESHOLD";

/// Default block alignment (bytes)
pub const DEFAULT_ALIGNMENT: u64 = 4096;

/// Settings for constructing a [`BlockAllocator`](crate::BlockAllocator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Header bytes at the start of the file
    pub reserve_at_beginning: u64,

    /// Block offset alignment; a non-zero multiple of 512
    pub alignment: u64,

    /// Initial placement strategy
    pub strategy: AllocationStrategy,

    /// Trace file (tracing disabled when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_path: Option<PathBuf>,

    /// Padded-fit and heat-zone knobs (kept last: TOML tables follow values)
    pub tuning: StrategyTuning,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            reserve_at_beginning: 0,
            alignment: DEFAULT_ALIGNMENT,
            strategy: AllocationStrategy::default(),
            trace_path: None,
            tuning: StrategyTuning::default(),
        }
    }
}

impl AllocatorConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: AllocatorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading allocator configuration from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AllocatorError::Config(e.to_string()))
    }

    /// Validate the block alignment; tuning is checked when it is built
    pub fn validate(&self) -> Result<()> {
        if !is_valid_alignment(self.alignment) {
            return Err(AllocatorError::InvalidAlignment(self.alignment));
        }

        Ok(())
    }

    /// Apply `BA_TRACE_PATH`, `BA_PADDED_FIT_ALIGNMENT` and
    /// `BA_HOT_ZONE_THRESHOLD` from the process environment
    ///
    /// Malformed values are logged and ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup(TRACE_PATH_ENV).filter(|p| !p.is_empty()) {
            self.trace_path = Some(PathBuf::from(path));
        }

        if let Some(raw) = lookup(PADDED_FIT_ALIGNMENT_ENV).filter(|v| !v.is_empty()) {
            match raw.trim().parse::<u64>() {
                Ok(value) if value > 0 => {
                    self.tuning = self.tuning.with_padded_fit_alignment(value);
                    info!(
                        "Block allocator padded fit alignment set to {}",
                        self.tuning.padded_fit_alignment()
                    );
                }
                _ => warn!(
                    "{} is '{}', expected an integer > 0; keeping {}",
                    PADDED_FIT_ALIGNMENT_ENV, raw, self.tuning.padded_fit_alignment()
                ),
            }
        }

        if let Some(raw) = lookup(HOT_ZONE_THRESHOLD_ENV).filter(|v| !v.is_empty()) {
            let parsed = raw
                .trim()
                .parse::<u8>()
                .ok()
                .and_then(|percent| self.tuning.with_hot_zone_threshold_percent(percent).ok());
            match parsed {
                Some(tuning) => {
                    self.tuning = tuning;
                    info!(
                        "Block allocator hot zone threshold set to {}%",
                        tuning.hot_zone_threshold_percent()
                    );
                }
                None => warn!(
                    "{} is '{}', expected an integer 1 through 99; keeping {}",
                    HOT_ZONE_THRESHOLD_ENV, raw, self.tuning.hot_zone_threshold_percent()
                ),
            }
        }

        self
    }

    /// Tracer for `trace_path`, or a disabled one when unset
    ///
    /// An unwritable path is logged and yields a disabled tracer.
    pub fn tracer(&self) -> Tracer {
        match &self.trace_path {
            Some(path) => trace::tracer_for_path(path),
            None => Tracer::disabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AllocatorConfig::default();
        assert_eq!(config.alignment, 4096);
        assert_eq!(config.strategy, AllocationStrategy::FirstFit);
        assert_eq!(config.tuning.hot_zone_threshold_percent(), 85);
        assert_eq!(config.tuning.padded_fit_alignment(), 4096);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let config = AllocatorConfig::from_toml_str(
            r#"
            reserve_at_beginning = 8192
            alignment = 512
            strategy = "best-fit"
            trace_path = "/tmp/ba.trace"

            [tuning]
            hot_zone_threshold_percent = 70
            "#,
        )
        .unwrap();

        assert_eq!(config.reserve_at_beginning, 8192);
        assert_eq!(config.alignment, 512);
        assert_eq!(config.strategy, AllocationStrategy::BestFit);
        assert_eq!(config.tuning.hot_zone_threshold_percent(), 70);
        assert_eq!(config.tuning.padded_fit_alignment(), 4096);
        assert_eq!(config.trace_path, Some(PathBuf::from("/tmp/ba.trace")));
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(
            AllocatorConfig::from_toml_str("").unwrap(),
            AllocatorConfig::default()
        );
    }

    #[test]
    fn test_invalid_toml_values() {
        assert!(matches!(
            AllocatorConfig::from_toml_str("alignment = 1000"),
            Err(AllocatorError::InvalidAlignment(1000))
        ));
        assert!(matches!(
            AllocatorConfig::from_toml_str("strategy = \"worst-fit\""),
            Err(AllocatorError::TomlParse(_))
        ));
        assert!(matches!(
            AllocatorConfig::from_toml_str("[tuning]\nhot_zone_threshold_percent = 0"),
            Err(AllocatorError::TomlParse(_))
        ));
        assert!(matches!(
            AllocatorConfig::from_toml_str("[tuning]\nhot_zone_threshold_percent = 250"),
            Err(AllocatorError::TomlParse(_))
        ));
    }

    #[test]
    fn test_toml_tuning_matches_env_tuning() {
        let from_toml =
            AllocatorConfig::from_toml_str("[tuning]\npadded_fit_alignment = 5000").unwrap();
        assert_eq!(from_toml.tuning.padded_fit_alignment(), 8192);

        let from_env = AllocatorConfig::default()
            .with_overrides_from(lookup(&[(PADDED_FIT_ALIGNMENT_ENV, "5000")]));
        assert_eq!(from_toml, from_env);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AllocatorConfig {
            reserve_at_beginning: 4096,
            strategy: AllocationStrategy::PaddedFit,
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("strategy = \"padded-fit\""));
        assert_eq!(AllocatorConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allocator.toml");
        std::fs::write(&path, "alignment = 8192\n").unwrap();
        assert_eq!(AllocatorConfig::from_file(&path).unwrap().alignment, 8192);
        assert!(matches!(
            AllocatorConfig::from_file(dir.path().join("missing.toml")),
            Err(AllocatorError::Io(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let config = AllocatorConfig::default().with_overrides_from(lookup(&[
            (TRACE_PATH_ENV, "/var/tmp/ba.trace"),
            (PADDED_FIT_ALIGNMENT_ENV, "5000"),
            (HOT_ZONE_THRESHOLD_ENV, "60"),
        ]));
        assert_eq!(config.trace_path, Some(PathBuf::from("/var/tmp/ba.trace")));
        assert_eq!(config.tuning.padded_fit_alignment(), 8192);
        assert_eq!(config.tuning.hot_zone_threshold_percent(), 60);
    }

    #[test]
    fn test_bad_env_overrides_are_ignored() {
        let config = AllocatorConfig::default().with_overrides_from(lookup(&[
            (TRACE_PATH_ENV, ""),
            (PADDED_FIT_ALIGNMENT_ENV, "-3"),
            (HOT_ZONE_THRESHOLD_ENV, "150"),
        ]));
        assert_eq!(config, AllocatorConfig::default());
    }

    #[test]
    fn test_tracer_from_config() {
        assert!(!AllocatorConfig::default().tracer().is_enabled());

        let dir = tempfile::tempdir().unwrap();
        let config = AllocatorConfig {
            trace_path: Some(dir.path().join("ba.trace")),
            ..Default::default()
        };
        assert!(config.tracer().is_enabled());
    }
}
