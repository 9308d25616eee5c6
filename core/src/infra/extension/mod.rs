//! WASM Codec Plugin System
//!
//! Codec plugins are small WebAssembly modules that turn bytes into bytes through a fixed
//! export table. Each plugin runs in its own execution context and only ever talks to the host
//! through messages, so untrusted code never touches host memory.
//!
//! ## Architecture
//!
//! Loading goes source -> context -> validation -> registry. Operations go registry ->
//! pipeline -> multiplexer -> context, and the pipeline joins the output chunks back together.
//!
//! ## Components
//!
//! - `abi`: linear-memory marshaling against the plugin's `alloc`/`free` exports
//! - `context`: isolated execution contexts and the engine descriptors that own them
//! - `multiplexer`: request ID correlation over a context's message channel
//! - `pipeline`: chunked, strictly ordered transforms over large inputs
//! - `validation`: self-test every new engine runs before it takes traffic
//! - `registry`: engine lookup and load/unload lifecycle
//! - `source`: module byte sources (files, URLs, in-memory)
//! - `types`: engine metadata and the host <-> context message protocol

mod abi;
mod context;
mod multiplexer;
mod pipeline;
mod registry;
mod source;
mod types;
mod validation;

pub use abi::{AbiError, REQUIRED_EXPORTS};
pub use context::{EngineDescriptor, ExecutionContext};
pub use multiplexer::{next_request_id, ResponseStream};
pub use pipeline::transform;
pub use registry::{LoadOptions, PluginRegistry};
pub use source::ModuleSource;
pub use types::{
	ContextMessage, EngineInfo, HostRequest, MessageKind, Operation, RequestId, RequestKind,
};
pub use validation::{validate, ValidationReport, ValidationStage, PROBE_BYTES, PROBE_TEXT};
