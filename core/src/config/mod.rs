//! Host configuration management

use std::{fs, path::PathBuf};

use anyhow::{anyhow, Result};

mod host_config;

pub use host_config::{HostConfig, PipelineConfig, ValidationConfig, CONFIG_FILE_NAME};

/// Platform-specific data directory resolution
pub fn default_data_dir() -> Result<PathBuf> {
	let dir = dirs::data_local_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("codec-host");

	// Create directory if it doesn't exist
	fs::create_dir_all(&dir)?;

	Ok(dir)
}
