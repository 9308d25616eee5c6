//! Shared types for codec engines and the host <-> context message protocol.

use std::fmt;

use serde::Serialize;

use super::abi::AbiError;

/// Correlation key for one request sent into an execution context.
pub type RequestId = u64;

/// Static metadata read from a plugin once, at load time.
///
/// The capability flags are a snapshot: they are never re-queried per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
	pub id: String,
	pub name: String,
	pub description: String,
	pub binary_safe: bool,
	pub self_inverse: bool,
	pub reversible: bool,
	/// Whether encode/decode accept arbitrary chunk boundaries.
	pub streamable: bool,
}

impl EngineInfo {
	/// Engines that are reversible or self-inverse must export `decode`.
	#[must_use]
	pub const fn can_decode(&self) -> bool {
		self.reversible || self.self_inverse
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
	Encode,
	Decode,
}

impl Operation {
	#[must_use]
	pub const fn export_name(self) -> &'static str {
		match self {
			Self::Encode => "encode",
			Self::Decode => "decode",
		}
	}
}

impl fmt::Display for Operation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.export_name())
	}
}

/// Host -> context message.
#[derive(Debug)]
pub struct HostRequest {
	pub id: RequestId,
	pub kind: RequestKind,
	pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
	/// Payload holds the module bytes.
	Load,
	/// Payload holds one input chunk.
	Transform {
		operation: Operation,
		is_last: bool,
		total_chunks: usize,
	},
}

/// Context -> host message.
#[derive(Debug, Clone)]
pub struct ContextMessage {
	pub id: RequestId,
	pub kind: MessageKind,
}

#[derive(Debug, Clone)]
pub enum MessageKind {
	Loaded(EngineInfo),
	Chunk(Vec<u8>),
	Result,
	Error(AbiError),
}

impl MessageKind {
	/// A terminal message ends the response sequence for its request.
	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		!matches!(self, Self::Chunk(_))
	}
}
