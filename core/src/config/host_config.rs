//! Codec host configuration

use std::{
	fs,
	path::{Path, PathBuf},
};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::infra::extension::EngineInfo;

use super::default_data_dir;

pub const CONFIG_FILE_NAME: &str = "codec_host.json";

/// Main host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Logging level
	pub log_level: String,

	/// Chunked pipeline settings
	#[serde(default)]
	pub pipeline: PipelineConfig,

	/// Validation self-test settings
	#[serde(default)]
	pub validation: ValidationConfig,

	/// Module sources (paths or URLs) loaded at startup
	#[serde(default)]
	pub preload: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
	/// Input chunk size in bytes for streamed operations
	pub chunk_size: usize,

	/// Largest `chunk` message payload a context emits
	pub max_message_size: usize,

	/// Engine IDs streamed even though they don't export `is_streamable`
	pub stream_allow_list: Vec<String>,
}

impl PipelineConfig {
	pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

	/// Whether inputs for this engine may be split at arbitrary chunk boundaries.
	#[must_use]
	pub fn streams(&self, info: &EngineInfo) -> bool {
		info.streamable || self.stream_allow_list.iter().any(|id| *id == info.id)
	}
}

impl Default for PipelineConfig {
	fn default() -> Self {
		Self {
			chunk_size: Self::DEFAULT_CHUNK_SIZE,
			max_message_size: Self::DEFAULT_CHUNK_SIZE,
			stream_allow_list: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
	/// Whether new engines run the self-test at all
	pub enabled: bool,

	/// Refuse engines that fail the self-test unless loaded as trusted
	pub reject_on_failure: bool,
}

impl Default for ValidationConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			reject_on_failure: true,
		}
	}
}

impl HostConfig {
	/// Load configuration from the default location
	pub fn load() -> Result<Self> {
		let data_dir = default_data_dir()?;
		Self::load_from(&data_dir)
	}

	/// Load configuration from a specific data directory, creating a default one if missing
	pub fn load_from(data_dir: &Path) -> Result<Self> {
		let config_path = data_dir.join(CONFIG_FILE_NAME);

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)?;
			let mut config: Self = serde_json::from_str(&json)?;
			config.validate()?;

			if config.version < Self::target_version() {
				info!(
					"Upgrading config from v{} to v{}",
					config.version,
					Self::target_version()
				);
				config.version = Self::target_version();
				config.save()?;
			}

			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		}
	}

	/// Create default configuration with specific data directory
	#[must_use]
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::target_version(),
			data_dir,
			log_level: "info".to_string(),
			pipeline: PipelineConfig::default(),
			validation: ValidationConfig::default(),
			preload: Vec::new(),
		}
	}

	#[must_use]
	pub const fn target_version() -> u32 {
		1
	}

	pub fn validate(&self) -> Result<()> {
		if self.pipeline.chunk_size == 0 {
			bail!("pipeline.chunk_size must be greater than zero");
		}
		if self.pipeline.max_message_size == 0 {
			bail!("pipeline.max_message_size must be greater than zero");
		}
		Ok(())
	}

	/// Save configuration to disk
	pub fn save(&self) -> Result<()> {
		// Ensure directory exists
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join(CONFIG_FILE_NAME);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	/// Get the path for logs directory
	#[must_use]
	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}
}

impl Default for HostConfig {
	fn default() -> Self {
		let data_dir = default_data_dir().unwrap_or_else(|_| PathBuf::from("."));
		Self::default_with_dir(data_dir)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	#[test]
	fn creates_default_config_when_missing() {
		let dir = tempdir().unwrap();

		let config = HostConfig::load_from(dir.path()).unwrap();

		assert_eq!(config.pipeline.chunk_size, 64 * 1024);
		assert!(config.validation.enabled);
		assert!(config.validation.reject_on_failure);
		assert!(dir.path().join(CONFIG_FILE_NAME).exists());
	}

	#[test]
	fn round_trips_through_disk() {
		let dir = tempdir().unwrap();
		let mut config = HostConfig::default_with_dir(dir.path().to_path_buf());
		config.pipeline.chunk_size = 4096;
		config.pipeline.stream_allow_list = vec!["base64".to_string()];
		config.preload = vec!["engines/xor.wasm".to_string()];
		config.save().unwrap();

		assert_eq!(HostConfig::load_from(dir.path()).unwrap(), config);
	}

	#[test]
	fn missing_sections_use_defaults() {
		let dir = tempdir().unwrap();
		let json = serde_json::json!({
			"version": 1,
			"data_dir": dir.path(),
			"log_level": "debug",
			"pipeline": { "chunk_size": 1024 },
		});
		fs::write(dir.path().join(CONFIG_FILE_NAME), json.to_string()).unwrap();

		let config = HostConfig::load_from(dir.path()).unwrap();

		assert_eq!(config.pipeline.chunk_size, 1024);
		assert_eq!(config.pipeline.max_message_size, 64 * 1024);
		assert_eq!(config.validation, ValidationConfig::default());
		assert!(config.preload.is_empty());
	}

	#[test]
	fn rejects_zero_chunk_size() {
		let dir = tempdir().unwrap();
		let mut config = HostConfig::default_with_dir(dir.path().to_path_buf());
		config.pipeline.chunk_size = 0;
		config.save().unwrap();

		assert!(HostConfig::load_from(dir.path()).is_err());
	}

	#[test]
	fn allow_list_overrides_missing_streaming_export() {
		let info = EngineInfo {
			id: "legacy".to_string(),
			name: "Legacy".to_string(),
			description: String::new(),
			binary_safe: true,
			self_inverse: true,
			reversible: false,
			streamable: false,
		};
		let mut pipeline = PipelineConfig::default();
		assert!(!pipeline.streams(&info));

		pipeline.stream_allow_list.push("legacy".to_string());
		assert!(pipeline.streams(&info));
	}
}
