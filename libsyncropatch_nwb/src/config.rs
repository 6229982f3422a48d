use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;

/// Structure representing the conversion configuration. Contains pathing and write policy
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the raw instrument data, organised as <root>/<year>/<experiment>
    pub raw_data_path: PathBuf,
    /// Root under which rCell containers are written
    pub rcell_path: PathBuf,
    /// Replace containers which already exist
    pub overwrite: bool,
    /// Reload and validate every container at the end of a run
    pub validate: bool,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            raw_data_path: PathBuf::from("None"),
            rcell_path: PathBuf::from("None"),
            overwrite: false,
            validate: true,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Get the path to an experiment folder from its name.
    ///
    /// Experiment names start with a two digit year (e.g. 230512_001 was recorded in 2023)
    pub fn experiment_directory(&self, experiment: &str) -> Result<PathBuf, ConfigError> {
        let year = experiment
            .get(0..2)
            .filter(|yy| yy.chars().all(|c| c.is_ascii_digit()))
            .ok_or(ConfigError::BadExperimentName(experiment.to_string()))?;
        let exp_dir = self
            .raw_data_path
            .join(format!("20{year}"))
            .join(experiment);
        if exp_dir.exists() {
            Ok(exp_dir)
        } else {
            Err(ConfigError::BadFilePath(exp_dir))
        }
    }

    /// Get the directory under which rCells are written
    pub fn rcell_directory(&self) -> PathBuf {
        self.rcell_path.join("rcell")
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}
