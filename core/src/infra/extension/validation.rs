//! Self-test run against every freshly loaded engine before it takes traffic.

use std::fmt;

use tracing::{debug, instrument};

use crate::{config::PipelineConfig, Error};

use super::{context::EngineDescriptor, pipeline, types::Operation};

pub const PROBE_TEXT: &str = "StarBrickVII_VALIDATION_123";

/// NUL, control and high-bit bytes mixed with plain ASCII.
pub const PROBE_BYTES: [u8; 16] = [
	0x00, 0x01, 0x02, 0x03, 0x7F, 0x80, 0xFF, 0x00, 0x0A, 0x0D, 0x20, 0x41, 0x5A, 0x61, 0x7A, 0x00,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStage {
	Encode,
	Decode,
	SelfInverse,
	BinaryRoundTrip,
}

impl fmt::Display for ValidationStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Encode => "encode",
			Self::Decode => "decode",
			Self::SelfInverse => "self-inverse",
			Self::BinaryRoundTrip => "binary round trip",
		})
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
	/// Stages that ran and passed, in order.
	pub passed: Vec<ValidationStage>,
}

/// Checks that an engine lives up to the capabilities it reported.
///
/// Every stage is a hard gate. Failures of any kind, including errors reported by the context,
/// come back as [`Error::ValidationFailed`].
#[instrument(skip(engine, config), fields(engine = %engine.id()))]
pub async fn validate(
	engine: &EngineDescriptor,
	config: &PipelineConfig,
) -> Result<ValidationReport, Error> {
	let info = engine.info();
	let fail = |stage, reason: String| Error::ValidationFailed {
		engine: info.id.clone(),
		stage,
		reason,
	};
	let run = |operation, input: Vec<u8>, stage| async move {
		pipeline::transform(engine, operation, &input, config)
			.await
			.map_err(|err| fail(stage, err.to_string()))
	};

	let mut report = ValidationReport::default();
	let probe = PROBE_TEXT.as_bytes();

	let encoded = run(Operation::Encode, probe.to_vec(), ValidationStage::Encode).await?;
	if encoded.is_empty() {
		return Err(fail(ValidationStage::Encode, "encode produced no output".into()));
	}
	report.passed.push(ValidationStage::Encode);

	if info.reversible {
		let decoded = run(Operation::Decode, encoded.clone(), ValidationStage::Decode).await?;
		if decoded != probe {
			return Err(fail(
				ValidationStage::Decode,
				format!(
					"decode returned {:?}, expected {PROBE_TEXT:?}",
					String::from_utf8_lossy(&decoded)
				),
			));
		}
		report.passed.push(ValidationStage::Decode);
	}

	if info.self_inverse {
		let twice = run(Operation::Encode, encoded, ValidationStage::SelfInverse).await?;
		if twice.is_empty() {
			return Err(fail(
				ValidationStage::SelfInverse,
				"second encode produced no output".into(),
			));
		}
		if twice != probe {
			return Err(fail(
				ValidationStage::SelfInverse,
				"encoding twice did not return the probe".into(),
			));
		}
		report.passed.push(ValidationStage::SelfInverse);
	}

	if info.binary_safe {
		let stage = ValidationStage::BinaryRoundTrip;

		let encoded = run(Operation::Encode, PROBE_BYTES.to_vec(), stage).await?;
		if encoded.is_empty() {
			return Err(fail(stage, "encode produced no output".into()));
		}

		if info.can_decode() {
			let decoded = run(Operation::Decode, encoded, stage).await?;
			if decoded.len() != PROBE_BYTES.len() {
				return Err(fail(
					stage,
					format!(
						"round trip returned {} bytes, expected {}",
						decoded.len(),
						PROBE_BYTES.len()
					),
				));
			}
			if let Some(offset) = decoded.iter().zip(PROBE_BYTES).position(|(a, b)| *a != b) {
				return Err(fail(stage, format!("round trip differs at byte {offset}")));
			}
		}
		report.passed.push(stage);
	}

	debug!(passed = ?report.passed, "Engine passed validation");

	Ok(report)
}
