mod helpers;

use helpers::{fixture, test_config};
use sd_codec_host::{
	infra::extension::{validate, PROBE_BYTES, PROBE_TEXT},
	Error, LoadOptions, ModuleSource, PluginRegistry, ValidationStage,
};
use tracing_test::traced_test;

/// Rewrites every byte in place with `(byte + add) & mask`, then hands the input back.
const REWRITE: &str = r#"
	(func $rewrite (param $ptr i32) (param $len i32) (param $out i32) (param $add i32) (param $mask i32) (result i32)
		(local $i i32)
		(block $done
			(loop $next
				(br_if $done (i32.ge_u (local.get $i) (local.get $len)))
				(i32.store8
					(i32.add (local.get $ptr) (local.get $i))
					(i32.and
						(i32.add
							(i32.load8_u (i32.add (local.get $ptr) (local.get $i)))
							(local.get $add))
						(local.get $mask)))
				(local.set $i (i32.add (local.get $i) (i32.const 1)))
				(br $next)))
		(i32.store (local.get $out) (local.get $len))
		(local.get $ptr))
"#;

const IDENTITY: &str = "(call $rewrite (local.get $ptr) (local.get $len) (local.get $out) (i32.const 0) (i32.const 255))";
const INCREMENT: &str = "(call $rewrite (local.get $ptr) (local.get $len) (local.get $out) (i32.const 1) (i32.const 255))";
const STRIP_HIGH_BIT: &str = "(call $rewrite (local.get $ptr) (local.get $len) (local.get $out) (i32.const 0) (i32.const 127))";
const NOTHING: &str = "(i32.store (local.get $out) (i32.const 0)) (i32.const 0)";
const TRAP: &str = "unreachable";

#[derive(Default)]
struct Flags {
	binary_safe: bool,
	self_inverse: bool,
	reversible: bool,
}

/// Builds an in-memory engine from `encode` and `decode` function bodies.
fn inline_engine(id: &str, flags: &Flags, encode: &str, decode: Option<&str>) -> ModuleSource {
	let flag = |set: bool| i32::from(set);
	let decode = decode
		.map(|body| {
			format!(
				r#"(func (export "decode") (param $ptr i32) (param $len i32) (param $out i32) (result i32) {body})"#
			)
		})
		.unwrap_or_default();

	let wat = format!(
		r#"
		(module
			(memory (export "memory") 1)
			(global $heap (mut i32) (i32.const 1024))
			(data (i32.const 16) "{id}")
			(func (export "alloc") (param $size i32) (result i32)
				(local $ptr i32)
				(local.set $ptr (global.get $heap))
				(global.set $heap (i32.add (local.get $ptr) (i32.add (local.get $size) (i32.const 8))))
				(local.get $ptr))
			(func (export "free") (param i32 i32))
			(func (export "get_id") (param $out i32) (result i32)
				(i32.store (local.get $out) (i32.const {id_len}))
				(i32.const 16))
			(func (export "is_binary_safe") (result i32) (i32.const {binary_safe}))
			(func (export "is_self_inverse") (result i32) (i32.const {self_inverse}))
			(func (export "is_reversible") (result i32) (i32.const {reversible}))
			{REWRITE}
			(func (export "encode") (param $ptr i32) (param $len i32) (param $out i32) (result i32) {encode})
			{decode})
		"#,
		id_len = id.len(),
		binary_safe = flag(flags.binary_safe),
		self_inverse = flag(flags.self_inverse),
		reversible = flag(flags.reversible),
	);

	ModuleSource::Bytes {
		label: id.to_string(),
		bytes: wat.into_bytes(),
	}
}

/// Loads `source` and returns the stage and reason it was rejected with.
async fn rejection(source: ModuleSource) -> (ValidationStage, String) {
	let registry = PluginRegistry::new(&test_config());

	let err = registry
		.load(source, LoadOptions::default())
		.await
		.unwrap_err();
	assert!(registry.is_empty().await);

	match err {
		Error::ValidationFailed { stage, reason, .. } => (stage, reason),
		other => panic!("expected a validation failure, got {other:?}"),
	}
}

#[tokio::test]
async fn base64_encodes_and_decodes_the_probe() {
	let registry = PluginRegistry::new(&test_config());
	registry
		.load(fixture("base64"), LoadOptions::default())
		.await
		.unwrap();

	let encoded = registry
		.encode("base64", PROBE_TEXT.as_bytes())
		.await
		.unwrap();
	assert_eq!(encoded, b"U3RhckJyaWNrVklJX1ZBTElEQVRJT05fMTIz");

	let decoded = registry.decode("base64", &encoded).await.unwrap();
	assert_eq!(decoded, PROBE_TEXT.as_bytes());

	let encoded = registry.encode("base64", &PROBE_BYTES).await.unwrap();
	assert_eq!(registry.decode("base64", &encoded).await.unwrap(), PROBE_BYTES);

	registry.shutdown().await;
}

#[tokio::test]
async fn reports_the_stages_each_engine_ran() {
	let registry = PluginRegistry::new(&test_config());
	let base64 = registry
		.load(fixture("base64"), LoadOptions::default())
		.await
		.unwrap();
	let xor = registry
		.load(fixture("xor"), LoadOptions::default())
		.await
		.unwrap();
	let picky = registry
		.load(fixture("picky"), LoadOptions::default())
		.await
		.unwrap();

	let report = validate(&base64, registry.pipeline_config()).await.unwrap();
	assert_eq!(
		report.passed,
		[
			ValidationStage::Encode,
			ValidationStage::Decode,
			ValidationStage::BinaryRoundTrip
		]
	);

	let report = validate(&xor, registry.pipeline_config()).await.unwrap();
	assert_eq!(
		report.passed,
		[
			ValidationStage::Encode,
			ValidationStage::SelfInverse,
			ValidationStage::BinaryRoundTrip
		]
	);

	// Not binary safe, so the binary probe never runs
	let report = validate(&picky, registry.pipeline_config()).await.unwrap();
	assert_eq!(
		report.passed,
		[ValidationStage::Encode, ValidationStage::SelfInverse]
	);

	registry.shutdown().await;
}

#[tokio::test]
async fn broken_decoder_is_rejected() {
	let registry = PluginRegistry::new(&test_config());

	let err = registry
		.load(fixture("broken_decode"), LoadOptions::default())
		.await
		.unwrap_err();

	match err {
		Error::ValidationFailed { engine, stage, .. } => {
			assert_eq!(engine, "broken");
			assert_eq!(stage, ValidationStage::Decode);
		}
		other => panic!("expected a validation failure, got {other:?}"),
	}
	assert!(registry.is_empty().await);
}

#[tokio::test]
#[traced_test]
async fn trusted_load_keeps_a_failing_engine() {
	let registry = PluginRegistry::new(&test_config());

	let engine = registry
		.load(fixture("broken_decode"), LoadOptions { trusted: true })
		.await
		.unwrap();

	assert_eq!(engine.id(), "broken");
	assert!(registry.get("broken").await.is_some());
	assert!(logs_contain("Installing engine that failed validation"));

	registry.shutdown().await;
}

#[tokio::test]
async fn lenient_config_keeps_a_failing_engine() {
	let mut config = test_config();
	config.validation.reject_on_failure = false;
	let registry = PluginRegistry::new(&config);

	registry
		.load(fixture("broken_decode"), LoadOptions::default())
		.await
		.unwrap();

	assert_eq!(registry.len().await, 1);

	registry.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn disabled_validation_skips_the_self_test() {
	let mut config = test_config();
	config.validation.enabled = false;
	let registry = PluginRegistry::new(&config);

	let engine = registry
		.load(fixture("broken_decode"), LoadOptions::default())
		.await
		.unwrap();

	assert_eq!(engine.id(), "broken");
	assert!(!logs_contain("failed validation"));

	registry.shutdown().await;
}

#[tokio::test]
async fn empty_encode_output_is_rejected() {
	let (stage, reason) =
		rejection(inline_engine("silent", &Flags::default(), NOTHING, None)).await;

	assert_eq!(stage, ValidationStage::Encode);
	assert_eq!(reason, "encode produced no output");
}

#[tokio::test]
async fn self_inverse_mismatch_is_rejected() {
	let flags = Flags {
		self_inverse: true,
		..Flags::default()
	};

	let (stage, reason) =
		rejection(inline_engine("drift", &flags, INCREMENT, Some(INCREMENT))).await;

	assert_eq!(stage, ValidationStage::SelfInverse);
	assert_eq!(reason, "encoding twice did not return the probe");
}

#[tokio::test]
async fn lossy_binary_round_trip_is_rejected() {
	let flags = Flags {
		binary_safe: true,
		reversible: true,
		..Flags::default()
	};

	// ASCII survives, so only the binary stage notices
	let (stage, reason) =
		rejection(inline_engine("seven-bit", &flags, IDENTITY, Some(STRIP_HIGH_BIT))).await;

	assert_eq!(stage, ValidationStage::BinaryRoundTrip);
	assert_eq!(reason, "round trip differs at byte 5");
}

#[tokio::test]
async fn trap_during_validation_is_a_validation_failure() {
	let flags = Flags {
		reversible: true,
		..Flags::default()
	};

	let (stage, reason) =
		rejection(inline_engine("fragile", &flags, IDENTITY, Some(TRAP))).await;

	assert_eq!(stage, ValidationStage::Decode);
	assert!(reason.contains("trapped in `decode`"), "{reason}");
}

#[tokio::test]
async fn well_behaved_inline_engine_passes() {
	let flags = Flags {
		binary_safe: true,
		reversible: true,
		..Flags::default()
	};
	let registry = PluginRegistry::new(&test_config());

	let engine = registry
		.load(
			inline_engine("identity", &flags, IDENTITY, Some(IDENTITY)),
			LoadOptions::default(),
		)
		.await
		.unwrap();

	let report = validate(&engine, registry.pipeline_config()).await.unwrap();
	assert_eq!(
		report.passed,
		[
			ValidationStage::Encode,
			ValidationStage::Decode,
			ValidationStage::BinaryRoundTrip
		]
	);

	registry.shutdown().await;
}
