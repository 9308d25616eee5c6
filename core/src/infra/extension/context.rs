//! Isolated execution contexts
//!
//! Each context is a dedicated thread owning one wasmer store. The host never sees the store or
//! its memory; it only exchanges [`HostRequest`]s and [`ContextMessage`]s with the thread.

use std::{
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc,
	},
	thread,
};

use async_channel as chan;
use tracing::{debug, error, info, instrument, trace};

use crate::{config::PipelineConfig, Error};

use super::{
	abi::{AbiError, PluginInstance},
	multiplexer::{Multiplexer, ResponseStream},
	pipeline,
	types::{ContextMessage, EngineInfo, HostRequest, MessageKind, Operation, RequestKind},
};

#[derive(Debug)]
pub struct ExecutionContext {
	label: String,
	multiplexer: Multiplexer,
	allocations: Arc<AtomicU64>,
	terminated: AtomicBool,
}

impl ExecutionContext {
	/// Spawns the context thread. Needs a tokio runtime for the response router.
	pub fn spawn(label: impl Into<String>, max_message_size: usize) -> Result<Self, Error> {
		let label = label.into();
		let (requests_tx, requests_rx) = chan::unbounded();
		let (messages_tx, messages_rx) = chan::unbounded();
		let allocations = Arc::new(AtomicU64::new(0));

		thread::Builder::new()
			// Thread names can't hold NUL bytes
			.name(format!("codec-context:{}", label.replace('\0', "")))
			.spawn({
				let allocations = Arc::clone(&allocations);
				move || run_context(&requests_rx, &messages_tx, &allocations, max_message_size)
			})
			.map_err(Error::ContextSpawn)?;

		Ok(Self {
			label,
			multiplexer: Multiplexer::new(requests_tx, messages_rx),
			allocations,
			terminated: AtomicBool::new(false),
		})
	}

	/// Sends the module bytes and waits for the context to report the engine metadata.
	pub async fn load(&self, module: Vec<u8>) -> Result<EngineInfo, Error> {
		let mut responses = self.multiplexer.send(RequestKind::Load, module).await?;

		match responses.next().await? {
			MessageKind::Loaded(info) => Ok(info),
			MessageKind::Error(err) => Err(Error::from_load(err)),
			other => Err(Error::Protocol(format!(
				"expected `loaded` for request {}, got {other:?}",
				responses.id()
			))),
		}
	}

	pub async fn transform(
		&self,
		operation: Operation,
		chunk: Vec<u8>,
		is_last: bool,
		total_chunks: usize,
	) -> Result<ResponseStream, Error> {
		self.multiplexer
			.send(
				RequestKind::Transform {
					operation,
					is_last,
					total_chunks,
				},
				chunk,
			)
			.await
	}

	/// Tears the context down. Pending requests are abandoned and resolve to
	/// [`Error::Cancelled`]; a call already running on the thread finishes but its output is
	/// thrown away.
	pub fn terminate(&self) {
		if !self.terminated.swap(true, Ordering::AcqRel) {
			self.multiplexer.close();
			info!(context = %self.label, "Execution context terminated");
		}
	}

	#[must_use]
	pub fn is_terminated(&self) -> bool {
		self.terminated.load(Ordering::Acquire)
	}

	/// Total `alloc` calls the ABI layer made inside this context.
	#[must_use]
	pub fn allocations(&self) -> u64 {
		self.allocations.load(Ordering::Relaxed)
	}

	#[must_use]
	pub fn pending_requests(&self) -> usize {
		self.multiplexer.pending_count()
	}
}

impl Drop for ExecutionContext {
	fn drop(&mut self) {
		self.terminate();
	}
}

fn run_context(
	requests_rx: &chan::Receiver<HostRequest>,
	messages_tx: &chan::Sender<ContextMessage>,
	allocations: &Arc<AtomicU64>,
	max_message_size: usize,
) {
	let mut plugin = None;

	while let Ok(HostRequest { id, kind, payload }) = requests_rx.recv_blocking() {
		let replies = match kind {
			RequestKind::Load => vec![load_plugin(&mut plugin, &payload, allocations)],
			RequestKind::Transform {
				operation,
				is_last,
				total_chunks,
			} => {
				trace!(
					request_id = id,
					%operation,
					is_last,
					total_chunks,
					len = payload.len(),
					"Running transform"
				);
				run_transform(plugin.as_mut(), operation, &payload, max_message_size)
			}
		};

		for kind in replies {
			if messages_tx.send_blocking(ContextMessage { id, kind }).is_err() {
				debug!("Host hung up, execution context exiting");
				return;
			}
		}
	}

	debug!("Request channel closed, execution context exiting");
}

fn load_plugin(
	plugin: &mut Option<PluginInstance>,
	module: &[u8],
	allocations: &Arc<AtomicU64>,
) -> MessageKind {
	if plugin.is_some() {
		return MessageKind::Error(AbiError::AlreadyLoaded);
	}

	match PluginInstance::instantiate(module, Arc::clone(allocations)) {
		Ok((instance, info)) => {
			*plugin = Some(instance);
			MessageKind::Loaded(info)
		}
		Err(err) => {
			error!(%err, "Failed to load plugin");
			MessageKind::Error(err)
		}
	}
}

fn run_transform(
	plugin: Option<&mut PluginInstance>,
	operation: Operation,
	input: &[u8],
	max_message_size: usize,
) -> Vec<MessageKind> {
	let Some(plugin) = plugin else {
		return vec![MessageKind::Error(AbiError::NotLoaded)];
	};

	match plugin.transform(operation, input) {
		Ok(output) => output
			.chunks(max_message_size.max(1))
			.map(|chunk| MessageKind::Chunk(chunk.to_vec()))
			.chain([MessageKind::Result])
			.collect(),
		Err(err) => vec![MessageKind::Error(err)],
	}
}

/// A loaded engine: its load-time metadata plus the context that runs it.
#[derive(Debug)]
pub struct EngineDescriptor {
	info: EngineInfo,
	context: ExecutionContext,
}

impl EngineDescriptor {
	/// Loads `module` into a fresh execution context.
	///
	/// All or nothing: on any failure the context is torn down and no descriptor exists.
	#[instrument(skip(module, config), fields(module_len = module.len()), err)]
	pub async fn load(label: &str, module: Vec<u8>, config: &PipelineConfig) -> Result<Self, Error> {
		let context = ExecutionContext::spawn(label, config.max_message_size)?;
		let info = context.load(module).await?;

		info!(
			engine = %info.id,
			name = %info.name,
			binary_safe = info.binary_safe,
			self_inverse = info.self_inverse,
			reversible = info.reversible,
			streamable = info.streamable,
			"Loaded codec engine"
		);

		Ok(Self { info, context })
	}

	#[must_use]
	pub fn id(&self) -> &str {
		&self.info.id
	}

	#[must_use]
	pub const fn info(&self) -> &EngineInfo {
		&self.info
	}

	#[must_use]
	pub const fn context(&self) -> &ExecutionContext {
		&self.context
	}

	pub async fn encode(&self, input: &[u8], config: &PipelineConfig) -> Result<Vec<u8>, Error> {
		pipeline::transform(self, Operation::Encode, input, config).await
	}

	pub async fn decode(&self, input: &[u8], config: &PipelineConfig) -> Result<Vec<u8>, Error> {
		pipeline::transform(self, Operation::Decode, input, config).await
	}
}
