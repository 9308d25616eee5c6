//! Chunked transform pipeline
//!
//! Large inputs are cut into fixed-size chunks and sent strictly one after another to the same
//! context, so the order output chunks arrive in is the order they must be joined in. Engines
//! may answer a chunk with any number of output chunks, the mapping is never assumed 1:1.

use tracing::{debug, instrument};

use crate::{config::PipelineConfig, Error};

use super::{
	context::{EngineDescriptor, ExecutionContext},
	types::{MessageKind, Operation},
};

/// Runs `operation` over `input`, streaming it through the engine when it supports arbitrary
/// chunk boundaries and in a single request otherwise.
///
/// Any `error` reply aborts the whole operation and discards the output gathered so far.
#[instrument(
	skip(engine, input, config),
	fields(engine = %engine.id(), input_len = input.len()),
	err
)]
pub async fn transform(
	engine: &EngineDescriptor,
	operation: Operation,
	input: &[u8],
	config: &PipelineConfig,
) -> Result<Vec<u8>, Error> {
	let info = engine.info();

	if operation == Operation::Decode && !info.can_decode() {
		return Err(Error::DecodeUnsupported(info.id.clone()));
	}

	let chunk_size = config.chunk_size.max(1);
	let mut output = Vec::new();

	if input.len() <= chunk_size || !config.streams(info) {
		drive_chunk(engine.context(), operation, input, true, 1, &mut output).await?;
		return Ok(output.concat());
	}

	let total_chunks = input.len().div_ceil(chunk_size);
	debug!(total_chunks, chunk_size, "Streaming input");

	for (index, chunk) in input.chunks(chunk_size).enumerate() {
		let is_last = index + 1 == total_chunks;
		drive_chunk(
			engine.context(),
			operation,
			chunk,
			is_last,
			total_chunks,
			&mut output,
		)
		.await?;
	}

	Ok(output.concat())
}

/// Sends one chunk and collects its whole response sequence before returning.
async fn drive_chunk(
	context: &ExecutionContext,
	operation: Operation,
	chunk: &[u8],
	is_last: bool,
	total_chunks: usize,
	output: &mut Vec<Vec<u8>>,
) -> Result<(), Error> {
	let mut responses = context
		.transform(operation, chunk.to_vec(), is_last, total_chunks)
		.await?;

	loop {
		match responses.next().await? {
			MessageKind::Chunk(bytes) => output.push(bytes),
			MessageKind::Result => return Ok(()),
			MessageKind::Error(err) => return Err(Error::from_call(err)),
			MessageKind::Loaded(_) => {
				return Err(Error::Protocol(format!(
					"unexpected `loaded` reply to request {}",
					responses.id()
				)))
			}
		}
	}
}
