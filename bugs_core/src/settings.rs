use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UnityEnvironmentError};
use crate::side_channel::{
    EngineConfigurationParameters, EnvironmentParametersChannel, LogSink, SharedSideChannel,
};

/// Construction settings for a World of Bugs environment.
///
/// Loadable from YAML; every field has a default so a config file only
/// needs the keys it changes. Side channels cannot be expressed in YAML
/// and are attached in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub file_name: Option<PathBuf>,
    #[serde(default)]
    pub worker_id: u16,
    #[serde(default)]
    pub base_port: Option<u16>,
    #[serde(default)]
    pub seed: Option<i32>,
    #[serde(default)]
    pub no_graphics: bool,
    /// Seconds to wait for Unity before giving up
    #[serde(default = "default_timeout_wait")]
    pub timeout_wait: u64,
    #[serde(default)]
    pub additional_args: Vec<String>,
    #[serde(skip)]
    pub side_channels: Vec<SharedSideChannel>,
    #[serde(default)]
    pub log_folder: Option<PathBuf>,
    #[serde(default = "default_display_size")]
    pub display_width: i32,
    #[serde(default = "default_display_size")]
    pub display_height: i32,
    #[serde(default = "default_quality_level")]
    pub quality_level: i32,
    #[serde(default = "default_time_scale")]
    pub time_scale: f32,
    #[serde(default = "default_debug")]
    pub debug: bool,
    /// Where the Unity log relay writes when `debug` is on
    #[serde(default)]
    pub log_sink: LogSink,
    /// Values for Academy.Instance.EnvironmentParameters; booleans and
    /// numeric strings are converted to floats
    #[serde(default)]
    pub environment_parameters: HashMap<String, serde_yaml::Value>,
    #[serde(default = "default_num_areas")]
    pub num_areas: i32,
}

fn default_timeout_wait() -> u64 {
    60
}

fn default_display_size() -> i32 {
    84
}

fn default_quality_level() -> i32 {
    3
}

fn default_time_scale() -> f32 {
    1.0
}

fn default_debug() -> bool {
    true
}

fn default_num_areas() -> i32 {
    1
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            file_name: None,
            worker_id: 0,
            base_port: None,
            seed: None,
            no_graphics: false,
            timeout_wait: default_timeout_wait(),
            additional_args: Vec::new(),
            side_channels: Vec::new(),
            log_folder: None,
            display_width: default_display_size(),
            display_height: default_display_size(),
            quality_level: default_quality_level(),
            time_scale: default_time_scale(),
            debug: default_debug(),
            log_sink: LogSink::default(),
            environment_parameters: HashMap::new(),
            num_areas: default_num_areas(),
        }
    }
}

impl EnvironmentConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|source| UnityEnvironmentError::ConfigIo {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml_str(&contents)
    }

    pub fn timeout_wait(&self) -> Duration {
        Duration::from_secs(self.timeout_wait)
    }

    /// Registers an environment parameters channel, queued with the
    /// configured `environment_parameters`, as a caller channel.
    ///
    /// The returned handle can queue more values before launch.
    pub fn attach_environment_parameters(&mut self) -> Arc<EnvironmentParametersChannel> {
        let channel = Arc::new(EnvironmentParametersChannel::new());
        channel.set_yaml_parameters(&self.environment_parameters);
        self.side_channels.push(channel.clone() as SharedSideChannel);
        channel
    }

    /// The engine settings this config forwards to Unity, unchanged.
    pub fn engine_parameters(&self) -> EngineConfigurationParameters {
        EngineConfigurationParameters {
            width: Some(self.display_width),
            height: Some(self.display_height),
            quality_level: Some(self.quality_level),
            time_scale: Some(self.time_scale),
            ..Default::default()
        }
    }
}
