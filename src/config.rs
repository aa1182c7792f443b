use crate::core::filter::{DEFAULT_TITLE_MAX_LEN, FilterConfig};
use crate::core::matcher::FUZZY_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store_path: PathBuf,
    pub analysis: AnalysisConfig,
    pub matching: MatchingConfig,
    pub schedule: ScheduleConfig,
    pub publish: PublishConfig,
    pub images: ImagesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// How many usable posts to sample before deriving thresholds.
    pub strictness: usize,
    pub depth_cap: usize,
    /// Search depth multiplier.
    pub speed: f64,
    pub title_max_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub fuzzy_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub output_dir: PathBuf,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub mirror_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("posts.csv"),
            analysis: AnalysisConfig::default(),
            matching: MatchingConfig::default(),
            schedule: ScheduleConfig::default(),
            publish: PublishConfig::default(),
            images: ImagesConfig::default(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            strictness: 100,
            depth_cap: 100,
            speed: 5.0,
            title_max_len: DEFAULT_TITLE_MAX_LEN,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: FUZZY_THRESHOLD,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30 * 60,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outbox"),
            tags: Vec::new(),
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            mirror_dir: PathBuf::from("images"),
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analysis.strictness == 0 {
            return Err(ConfigError::Invalid(
                "analysis.strictness must be greater than zero".to_string(),
            ));
        }
        if self.analysis.depth_cap == 0 {
            return Err(ConfigError::Invalid(
                "analysis.depth_cap must be greater than zero".to_string(),
            ));
        }
        if !(self.analysis.speed.is_finite() && self.analysis.speed > 0.0) {
            return Err(ConfigError::Invalid(
                "analysis.speed must be a positive number".to_string(),
            ));
        }
        Ok(())
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            depth_cap: self.analysis.depth_cap,
            sample_limit: self.analysis.strictness,
            title_max_len: self.analysis.title_max_len,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.schedule.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf.json");
        fs::write(
            &path,
            r#"{"store_path": "db/posts.csv", "analysis": {"strictness": 40}}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.store_path, PathBuf::from("db/posts.csv"));
        assert_eq!(config.analysis.strictness, 40);
        assert_eq!(config.analysis.speed, 5.0);
        assert_eq!(config.matching.fuzzy_threshold, 25);
        assert_eq!(config.filter_config().sample_limit, 40);
        assert_eq!(config.interval(), Duration::from_secs(1800));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::load_or_default(temp_dir.path().join("nope.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(matches!(
            AppConfig::load(temp_dir.path().join("nope.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf.json");

        fs::write(&path, r#"{"analysis": {"speed": 0}}"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
