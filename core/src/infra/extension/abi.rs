//! Linear-memory ABI shared by every codec plugin
//!
//! A plugin is a WASM module with no imports that exports its linear memory plus a fixed
//! table of functions:
//!
//! | export            | signature                         |          |
//! |-------------------|-----------------------------------|----------|
//! | `alloc`           | `(size) -> ptr`, 0 on failure     | required |
//! | `free`            | `(ptr, size)`                     | required |
//! | `get_id`          | `(out_len_ptr) -> ptr`            | required |
//! | `get_name`        | `(out_len_ptr) -> ptr`            | optional |
//! | `get_desc`        | `(out_len_ptr) -> ptr`            | optional |
//! | `is_binary_safe`  | `() -> i32`                       | required |
//! | `is_self_inverse` | `() -> i32`                       | required |
//! | `is_reversible`   | `() -> i32`                       | required |
//! | `is_streamable`   | `() -> i32`                       | optional |
//! | `encode`          | `(ptr, len, out_len_ptr) -> ptr`  | required |
//! | `decode`          | `(ptr, len, out_len_ptr) -> ptr`  | required if reversible or self-inverse |
//!
//! Lengths travel through a 4 byte little-endian cell the host allocates in plugin memory.
//! Buffers returned by the plugin (strings and transform outputs) stay owned by the plugin,
//! this ABI has no way to give them back.

use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc,
};

use thiserror::Error;
use tracing::warn;
use wasmer::{
	imports, ExportError, Instance, Memory, Module, RuntimeError, Store, TypedFunction,
	WasmTypeList,
};

use super::types::{EngineInfo, Operation};

/// Exports every plugin must provide, checked before anything else runs.
pub const REQUIRED_EXPORTS: [&str; 8] = [
	"memory",
	"alloc",
	"free",
	"get_id",
	"is_binary_safe",
	"is_self_inverse",
	"is_reversible",
	"encode",
];

const LEN_CELL_SIZE: u32 = 4;

type StringExport = TypedFunction<u32, u32>;
type FlagExport = TypedFunction<(), i32>;
type TransformExport = TypedFunction<(u32, u32, u32), u32>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
	#[error("plugin is missing required export `{0}`")]
	MissingExport(String),
	#[error("plugin export `{name}` has an unexpected type: {reason}")]
	ExportType { name: String, reason: String },
	#[error("plugin failed to allocate {size} bytes")]
	AllocationFailed { size: u32 },
	#[error("out of bounds plugin memory access <offset={offset}, len={len}>")]
	MemoryAccess { offset: u32, len: u32 },
	#[error("plugin export `{0}` returned invalid UTF-8")]
	InvalidUtf8(String),
	#[error("plugin trapped in `{export}`: {message}")]
	Trap { export: String, message: String },
	#[error("failed to compile plugin module: {0}")]
	Compile(String),
	#[error("failed to instantiate plugin module: {0}")]
	Instantiate(String),
	#[error("plugin reported an empty engine id")]
	EmptyId,
	#[error("input of {0} bytes does not fit in 32-bit plugin memory")]
	InputTooLarge(usize),
	#[error("engine does not support decoding")]
	DecodeUnsupported,
	#[error("no plugin loaded in this execution context")]
	NotLoaded,
	#[error("a plugin is already loaded in this execution context")]
	AlreadyLoaded,
}

fn trap(export: &str, err: &RuntimeError) -> AbiError {
	AbiError::Trap {
		export: export.to_string(),
		message: err.message(),
	}
}

fn typed<Args, Rets>(
	instance: &Instance,
	store: &Store,
	name: &str,
) -> Result<TypedFunction<Args, Rets>, AbiError>
where
	Args: WasmTypeList,
	Rets: WasmTypeList,
{
	instance
		.exports
		.get_typed_function(store, name)
		.map_err(|err| match err {
			ExportError::Missing(_) => AbiError::MissingExport(name.to_string()),
			other => AbiError::ExportType {
				name: name.to_string(),
				reason: other.to_string(),
			},
		})
}

fn optional_typed<Args, Rets>(
	instance: &Instance,
	store: &Store,
	name: &str,
) -> Result<Option<TypedFunction<Args, Rets>>, AbiError>
where
	Args: WasmTypeList,
	Rets: WasmTypeList,
{
	if instance.exports.get_extern(name).is_none() {
		return Ok(None);
	}

	typed(instance, store, name).map(Some)
}

/// One instantiated plugin with its own store and linear memory.
///
/// Lives on the execution context thread, never shared with the host.
pub struct PluginInstance {
	store: Store,
	memory: Memory,
	alloc: TypedFunction<u32, u32>,
	free: TypedFunction<(u32, u32), ()>,
	encode: TransformExport,
	decode: Option<TransformExport>,
	allocations: Arc<AtomicU64>,
}

impl PluginInstance {
	/// Compiles and instantiates `module`, then reads the engine metadata.
	///
	/// Fails fast: nothing is returned unless every step succeeds.
	pub fn instantiate(
		module: &[u8],
		allocations: Arc<AtomicU64>,
	) -> Result<(Self, EngineInfo), AbiError> {
		let mut store = Store::default();

		let module =
			Module::new(&store, module).map_err(|err| AbiError::Compile(err.to_string()))?;

		// Plugins get no imports at all, so they can only touch their own memory
		let instance = Instance::new(&mut store, &module, &imports! {})
			.map_err(|err| AbiError::Instantiate(err.to_string()))?;

		if let Some(missing) = REQUIRED_EXPORTS
			.iter()
			.find(|name| instance.exports.get_extern(name).is_none())
		{
			return Err(AbiError::MissingExport((*missing).to_string()));
		}

		let memory = instance
			.exports
			.get_memory("memory")
			.map_err(|err| AbiError::ExportType {
				name: "memory".to_string(),
				reason: err.to_string(),
			})?
			.clone();

		let get_id: StringExport = typed(&instance, &store, "get_id")?;
		let get_name: Option<StringExport> = optional_typed(&instance, &store, "get_name")?;
		let get_desc: Option<StringExport> = optional_typed(&instance, &store, "get_desc")?;
		let is_binary_safe: FlagExport = typed(&instance, &store, "is_binary_safe")?;
		let is_self_inverse: FlagExport = typed(&instance, &store, "is_self_inverse")?;
		let is_reversible: FlagExport = typed(&instance, &store, "is_reversible")?;
		let is_streamable: Option<FlagExport> =
			optional_typed(&instance, &store, "is_streamable")?;

		let mut plugin = Self {
			alloc: typed(&instance, &store, "alloc")?,
			free: typed(&instance, &store, "free")?,
			encode: typed(&instance, &store, "encode")?,
			decode: optional_typed(&instance, &store, "decode")?,
			store,
			memory,
			allocations,
		};

		let id = plugin.read_string("get_id", &get_id)?;
		if id.trim().is_empty() {
			return Err(AbiError::EmptyId);
		}

		let name = match &get_name {
			Some(export) => plugin.read_string("get_name", export)?,
			None => String::new(),
		};
		let description = match &get_desc {
			Some(export) => plugin.read_string("get_desc", export)?,
			None => String::new(),
		};

		let info = EngineInfo {
			name: if name.is_empty() { id.clone() } else { name },
			id,
			description,
			binary_safe: plugin.read_flag("is_binary_safe", &is_binary_safe)?,
			self_inverse: plugin.read_flag("is_self_inverse", &is_self_inverse)?,
			reversible: plugin.read_flag("is_reversible", &is_reversible)?,
			streamable: match &is_streamable {
				Some(export) => plugin.read_flag("is_streamable", export)?,
				None => false,
			},
		};

		if info.can_decode() && plugin.decode.is_none() {
			return Err(AbiError::MissingExport("decode".to_string()));
		}

		Ok((plugin, info))
	}

	/// Runs `encode` or `decode` over `input` and copies the result out of plugin memory.
	pub fn transform(&mut self, operation: Operation, input: &[u8]) -> Result<Vec<u8>, AbiError> {
		let export = match operation {
			Operation::Encode => self.encode.clone(),
			Operation::Decode => self.decode.clone().ok_or(AbiError::DecodeUnsupported)?,
		};

		let len = u32::try_from(input.len()).map_err(|_| AbiError::InputTooLarge(input.len()))?;
		// Allocators may hand back 0 for a zero sized request, which reads as failure
		let size = len.max(1);

		let input_ptr = self.allocate(size)?;
		let res = self.transform_at(operation, &export, input_ptr, input, len);
		self.release(input_ptr, size);

		res
	}

	fn transform_at(
		&mut self,
		operation: Operation,
		export: &TransformExport,
		input_ptr: u32,
		input: &[u8],
		len: u32,
	) -> Result<Vec<u8>, AbiError> {
		self.write_bytes(input_ptr, input)?;

		let cell = self.allocate(LEN_CELL_SIZE)?;
		let res = self.invoke_transform(operation, export, input_ptr, len, cell);
		self.release(cell, LEN_CELL_SIZE);

		res
	}

	fn invoke_transform(
		&mut self,
		operation: Operation,
		export: &TransformExport,
		input_ptr: u32,
		len: u32,
		cell: u32,
	) -> Result<Vec<u8>, AbiError> {
		// A plugin that never writes the cell reads back as an empty result
		self.write_bytes(cell, &0_u32.to_le_bytes())?;

		let output_ptr = export
			.call(&mut self.store, input_ptr, len, cell)
			.map_err(|err| trap(operation.export_name(), &err))?;
		let output_len = self.read_len(cell)?;

		if output_ptr == 0 || output_len == 0 {
			return Ok(Vec::new());
		}

		// Copy out right away, later calls may grow and relocate linear memory
		self.read_bytes(output_ptr, output_len)
	}

	fn read_string(&mut self, export_name: &str, export: &StringExport) -> Result<String, AbiError> {
		let cell = self.allocate(LEN_CELL_SIZE)?;
		let res = self.read_string_with(export_name, export, cell);
		// Only the cell is ours to free, the string buffer is leaked by contract
		self.release(cell, LEN_CELL_SIZE);

		res
	}

	fn read_string_with(
		&mut self,
		export_name: &str,
		export: &StringExport,
		cell: u32,
	) -> Result<String, AbiError> {
		self.write_bytes(cell, &0_u32.to_le_bytes())?;

		let ptr = export
			.call(&mut self.store, cell)
			.map_err(|err| trap(export_name, &err))?;
		let len = self.read_len(cell)?;

		if ptr == 0 || len == 0 {
			return Ok(String::new());
		}

		String::from_utf8(self.read_bytes(ptr, len)?)
			.map_err(|_| AbiError::InvalidUtf8(export_name.to_string()))
	}

	fn read_flag(&mut self, export_name: &str, export: &FlagExport) -> Result<bool, AbiError> {
		export
			.call(&mut self.store)
			.map(|flag| flag != 0)
			.map_err(|err| trap(export_name, &err))
	}

	fn allocate(&mut self, size: u32) -> Result<u32, AbiError> {
		self.allocations.fetch_add(1, Ordering::Relaxed);

		match self.alloc.call(&mut self.store, size) {
			Ok(0) => Err(AbiError::AllocationFailed { size }),
			Ok(ptr) => Ok(ptr),
			Err(err) => Err(trap("alloc", &err)),
		}
	}

	fn release(&mut self, ptr: u32, size: u32) {
		if let Err(err) = self.free.call(&mut self.store, ptr, size) {
			warn!(ptr, size, "Plugin trapped while freeing a buffer: {}", err.message());
		}
	}

	fn read_len(&self, cell: u32) -> Result<u32, AbiError> {
		let mut bytes = [0_u8; LEN_CELL_SIZE as usize];
		self.memory
			.view(&self.store)
			.read(u64::from(cell), &mut bytes)
			.map_err(|_| AbiError::MemoryAccess {
				offset: cell,
				len: LEN_CELL_SIZE,
			})?;

		Ok(u32::from_le_bytes(bytes))
	}

	fn read_bytes(&self, offset: u32, len: u32) -> Result<Vec<u8>, AbiError> {
		let view = self.memory.view(&self.store);

		// The plugin picks `len`, check it against memory before allocating anything
		if u64::from(offset) + u64::from(len) > view.data_size() {
			return Err(AbiError::MemoryAccess { offset, len });
		}

		let mut bytes = vec![0; len as usize];
		view.read(u64::from(offset), &mut bytes)
			.map_err(|_| AbiError::MemoryAccess { offset, len })?;

		Ok(bytes)
	}

	fn write_bytes(&self, offset: u32, data: &[u8]) -> Result<(), AbiError> {
		self.memory
			.view(&self.store)
			.write(u64::from(offset), data)
			.map_err(|_| AbiError::MemoryAccess {
				offset,
				len: u32::try_from(data.len()).unwrap_or(u32::MAX),
			})
	}
}
