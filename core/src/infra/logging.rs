//! Tracing subscriber setup for binaries embedding the codec host.

use std::{fs, path::Path, sync::Once};

use anyhow::Result;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "codec-host.log";

/// Builds the default filter directive for a configured level, e.g. `sd_codec_host=info`.
#[must_use]
pub fn default_filter(level: &str) -> String {
	format!("warn,sd_codec_host={level},codec_host={level}")
}

/// Installs the global subscriber: stderr output plus, when `logs_dir` is given, a daily
/// rolling file. `RUST_LOG` takes precedence over `default_filter`.
///
/// Only the first call does anything.
pub fn init_logging(logs_dir: Option<&Path>, default_filter: &str) -> Result<()> {
	static INIT: Once = Once::new();
	let mut result = Ok(());

	INIT.call_once(|| {
		result = install(logs_dir, default_filter);
	});

	result
}

fn install(logs_dir: Option<&Path>, default_filter: &str) -> Result<()> {
	let file_layer = match logs_dir {
		Some(dir) => {
			fs::create_dir_all(dir)?;
			let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);

			Some(
				fmt::layer()
					.with_target(true)
					.with_thread_names(true)
					.with_ansi(false) // No ANSI colors in log files
					.with_writer(file_appender),
			)
		}
		None => None,
	};

	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
		.with(
			fmt::layer()
				.with_target(true)
				.with_thread_names(true)
				.with_writer(std::io::stderr),
		)
		.with(file_layer)
		.try_init()?;

	Ok(())
}
