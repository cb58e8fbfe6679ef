use crate::error::{Error, Result};
use crate::filter::LinkFilterConfig;
use crate::presets::NetworkKind;
use crate::shape::FilterScope;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

// Settings for a playground run, read from a JSON file. Every field has a default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkKind,
    pub data_dir: PathBuf,
    pub seed: u64,
    // Overrides the learning rate the network's preset starts with.
    pub learning_rate: Option<f64>,
    pub training: TrainingConfig,
    pub links: LinkFilterConfig,
    pub filter_scope: FilterScope,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            network: NetworkKind::default(),
            data_dir: PathBuf::from("data"),
            seed: 0,
            learning_rate: None,
            training: TrainingConfig::default(),
            links: LinkFilterConfig::default(),
            filter_scope: FilterScope::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub rounds: usize,
    pub batches_per_round: usize,
    pub batch_size: usize,
    pub test_size: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            rounds: 5,
            batches_per_round: 100,
            batch_size: 64,
            test_size: 1000,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let config: AppConfig = serde_json::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(learning_rate) = self.learning_rate {
            if !(learning_rate.is_finite() && learning_rate > 0.0) {
                return Err(Error::Config(format!(
                    "learning rate must be positive, got {learning_rate}"
                )));
            }
        }
        if self.training.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        if self.training.batches_per_round == 0 {
            return Err(Error::Config("a round needs at least one batch".to_string()));
        }
        if self.training.test_size == 0 {
            return Err(Error::Config("test size must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_fields_take_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "network": "temperature-control", "training": { "rounds": 2 } }"#)
                .unwrap();

        assert_eq!(config.network, NetworkKind::TemperatureControl);
        assert_eq!(config.training.rounds, 2);
        assert_eq!(config.training.batch_size, 64);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.links, LinkFilterConfig::default());
        assert_eq!(config.filter_scope, FilterScope::PerGap);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn link_filters_and_scope_are_read() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "links": { "kind": "neighbors", "layer": 1, "index": 3 },
                "filter_scope": "whole_network"
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.links,
            LinkFilterConfig::Neighbors {
                layer: 1,
                index: 3,
                far: true
            }
        );
        assert_eq!(config.filter_scope, FilterScope::WholeNetwork);
    }

    #[test]
    fn bad_settings_are_rejected() {
        let mut config = AppConfig {
            learning_rate: Some(-1.0),
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.learning_rate = Some(0.01);
        config.training.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.training.batch_size = 64;
        config.training.test_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn config_files_are_read_and_validated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        fs::write(&path, r#"{ "seed": 7, "learning_rate": 0.5 }"#).unwrap();
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.learning_rate, Some(0.5));

        fs::write(&path, r#"{ "training": { "batches_per_round": 0 } }"#).unwrap();
        assert!(matches!(AppConfig::from_file(&path), Err(Error::Config(_))));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::from_file(&path), Err(Error::Json(_))));
    }
}
