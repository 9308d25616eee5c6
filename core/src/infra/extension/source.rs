//! Where plugin module bytes come from.

use std::{fmt, path::PathBuf};

use tracing::debug;

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
	File(PathBuf),
	Url(String),
	Bytes { label: String, bytes: Vec<u8> },
}

impl ModuleSource {
	/// `http://` and `https://` locations are fetched, anything else is a file path.
	#[must_use]
	pub fn parse(location: &str) -> Self {
		if location.starts_with("http://") || location.starts_with("https://") {
			Self::Url(location.to_string())
		} else {
			Self::File(PathBuf::from(location))
		}
	}

	/// Short human readable name, used for context thread names and logs.
	#[must_use]
	pub fn label(&self) -> String {
		match self {
			Self::File(path) => path
				.file_stem()
				.map_or_else(|| path.display().to_string(), |stem| stem.to_string_lossy().into_owned()),
			Self::Url(url) => url
				.rsplit('/')
				.find(|segment| !segment.is_empty())
				.unwrap_or(url.as_str())
				.to_string(),
			Self::Bytes { label, .. } => label.clone(),
		}
	}

	pub async fn resolve(&self) -> Result<Vec<u8>, Error> {
		let bytes = match self {
			Self::File(path) => tokio::fs::read(path)
				.await
				.map_err(|source| Error::SourceRead {
					path: path.clone(),
					source,
				})?,
			Self::Url(url) => fetch(url).await.map_err(|source| Error::SourceFetch {
				url: url.clone(),
				source,
			})?,
			Self::Bytes { bytes, .. } => bytes.clone(),
		};

		debug!(source = %self, len = bytes.len(), "Resolved module bytes");

		Ok(bytes)
	}
}

async fn fetch(url: &str) -> Result<Vec<u8>, reqwest::Error> {
	let response = reqwest::get(url).await?.error_for_status()?;
	Ok(response.bytes().await?.to_vec())
}

impl fmt::Display for ModuleSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::File(path) => write!(f, "{}", path.display()),
			Self::Url(url) => f.write_str(url),
			Self::Bytes { label, bytes } => write!(f, "{label} ({} bytes)", bytes.len()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	#[test]
	fn parses_urls_and_paths() {
		assert_eq!(
			ModuleSource::parse("https://example.com/engines/rot13.wasm"),
			ModuleSource::Url("https://example.com/engines/rot13.wasm".to_string())
		);
		assert_eq!(
			ModuleSource::parse("engines/rot13.wasm"),
			ModuleSource::File(PathBuf::from("engines/rot13.wasm"))
		);
	}

	#[test]
	fn labels() {
		assert_eq!(ModuleSource::parse("/opt/engines/rot13.wasm").label(), "rot13");
		assert_eq!(
			ModuleSource::parse("https://example.com/engines/base64.wasm/").label(),
			"base64.wasm"
		);
		assert_eq!(
			ModuleSource::Bytes {
				label: "inline".to_string(),
				bytes: vec![0, 1],
			}
			.label(),
			"inline"
		);
	}

	#[tokio::test]
	async fn resolves_files() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("engine.wasm");
		std::fs::write(&path, b"\0asm").unwrap();

		let bytes = ModuleSource::File(path).resolve().await.unwrap();

		assert_eq!(bytes, b"\0asm");
	}

	#[tokio::test]
	async fn missing_file_is_a_source_error() {
		let dir = tempdir().unwrap();

		let err = ModuleSource::File(dir.path().join("nope.wasm"))
			.resolve()
			.await
			.unwrap_err();

		assert!(matches!(err, Error::SourceRead { .. }));
	}
}
