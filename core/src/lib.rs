//!
//! # Codec Host
//!
//! Hosts small codec plugins compiled to WebAssembly and runs them through a fixed export ABI.
//! Every plugin lives in its own isolated execution context; the host only exchanges messages
//! with it, streaming large inputs through bounded chunks.
//!
//! ## Basic example
//!
//! ```no_run
//! use sd_codec_host::{HostConfig, LoadOptions, ModuleSource, PluginRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sd_codec_host::Error> {
//!     let registry = PluginRegistry::new(&HostConfig::default());
//!
//!     let engine = registry
//!         .load(ModuleSource::parse("engines/base64.wasm"), LoadOptions::default())
//!         .await?;
//!
//!     let encoded = registry.encode(engine.id(), b"hello").await?;
//!     assert_eq!(registry.decode(engine.id(), &encoded).await?, b"hello");
//!
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod infra;

pub use config::{HostConfig, PipelineConfig, ValidationConfig};
pub use error::Error;
pub use infra::extension::{
	EngineDescriptor, EngineInfo, ExecutionContext, LoadOptions, ModuleSource, Operation,
	PluginRegistry, ValidationReport, ValidationStage,
};
