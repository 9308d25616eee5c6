use std::{io, path::PathBuf};

use thiserror::Error;

use crate::infra::extension::{AbiError, RequestId, ValidationStage};

#[derive(Debug, Error)]
pub enum Error {
	#[error("plugin is missing required export `{0}`")]
	MissingExport(String),
	#[error("plugin failed to allocate {size} bytes")]
	AllocationFailed { size: u32 },
	#[error("engine <id='{engine}'> failed validation at {stage}: {reason}")]
	ValidationFailed {
		engine: String,
		stage: ValidationStage,
		reason: String,
	},
	#[error("{0}")]
	Transport(String),
	#[error("engine not found: {0}")]
	EngineNotFound(String),

	#[error("engine <id='{0}'> does not support decoding")]
	DecodeUnsupported(String),
	#[error("request <id='{0}'> abandoned, its execution context was terminated")]
	Cancelled(RequestId),
	#[error("failed to compile plugin module: {0}")]
	Compile(String),
	#[error("failed to instantiate plugin module: {0}")]
	Instantiate(String),
	#[error("unexpected message from execution context: {0}")]
	Protocol(String),
	#[error("failed to spawn execution context thread")]
	ContextSpawn(#[source] io::Error),

	#[error("failed to read module <path='{}'>", .path.display())]
	SourceRead {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("failed to fetch module <url='{url}'>")]
	SourceFetch {
		url: String,
		#[source]
		source: reqwest::Error,
	},
}

impl Error {
	/// Maps a context-side failure raised while loading a module.
	pub(crate) fn from_load(err: AbiError) -> Self {
		match err {
			AbiError::MissingExport(name) => Self::MissingExport(name),
			AbiError::AllocationFailed { size } => Self::AllocationFailed { size },
			AbiError::Compile(message) => Self::Compile(message),
			AbiError::Instantiate(message) => Self::Instantiate(message),
			other => Self::Transport(other.to_string()),
		}
	}

	/// Maps a context-side failure raised while running a request.
	pub(crate) fn from_call(err: AbiError) -> Self {
		match err {
			AbiError::AllocationFailed { size } => Self::AllocationFailed { size },
			other => Self::Transport(other.to_string()),
		}
	}
}
