//! Shared fixtures for the codec host integration tests
#![allow(dead_code)]

use std::path::PathBuf;

use rand::RngCore;
use sd_codec_host::{HostConfig, ModuleSource, PipelineConfig};

/// One of the WAT plugins under `tests/fixtures`.
pub fn fixture(name: &str) -> ModuleSource {
	ModuleSource::File(
		PathBuf::from(env!("CARGO_MANIFEST_DIR"))
			.join("tests")
			.join("fixtures")
			.join(format!("{name}.wat")),
	)
}

/// Default configuration that never touches the real data directory.
pub fn test_config() -> HostConfig {
	HostConfig::default_with_dir(std::env::temp_dir().join("sd-codec-host-tests"))
}

/// Per-call pipeline settings. Output message size is fixed when the context spawns.
pub fn chunked(chunk_size: usize) -> PipelineConfig {
	PipelineConfig {
		chunk_size,
		..PipelineConfig::default()
	}
}

pub fn random_bytes(len: usize) -> Vec<u8> {
	let mut bytes = vec![0; len];
	rand::thread_rng().fill_bytes(&mut bytes);
	bytes
}

/// What the `xor` and `picky` fixtures compute.
pub fn xor(input: &[u8]) -> Vec<u8> {
	input.iter().map(|byte| byte ^ 0x5A).collect()
}
