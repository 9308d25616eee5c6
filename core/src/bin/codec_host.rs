use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use sd_codec_host::{
	config::default_data_dir,
	infra::logging::{default_filter, init_logging},
	HostConfig, LoadOptions, ModuleSource, Operation, PluginRegistry,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "codec-host", about = "Run sandboxed WASM codec plugins")]
struct Cli {
	/// Path to the codec host data directory
	#[arg(long, env = "CODEC_HOST_DATA_DIR")]
	data_dir: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Load modules, run their self-test and print their descriptors
	Inspect {
		/// Module paths or URLs
		#[arg(required = true)]
		modules: Vec<String>,

		/// Keep engines that fail validation
		#[arg(long)]
		trusted: bool,
	},
	/// Encode a file with an engine
	Encode(TransformArgs),
	/// Decode a file with an engine
	Decode(TransformArgs),
}

#[derive(clap::Args, Debug)]
struct TransformArgs {
	/// Module path or URL providing the engine
	#[arg(long)]
	module: String,

	/// Keep the engine even if it fails validation
	#[arg(long)]
	trusted: bool,

	/// Input file
	input: PathBuf,

	/// Output file, stdout when omitted
	#[arg(short, long)]
	output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
	let cli = Cli::parse();

	let data_dir = match cli.data_dir {
		Some(dir) => dir,
		None => default_data_dir()?,
	};
	let config = HostConfig::load_from(&data_dir)?;
	init_logging(Some(&config.logs_dir()), &default_filter(&config.log_level))?;

	let registry = PluginRegistry::new(&config);
	if !config.preload.is_empty() {
		let preloaded = registry
			.load_many(
				config.preload.iter().map(|location| ModuleSource::parse(location)),
				LoadOptions::default(),
			)
			.await;
		info!(
			loaded = preloaded.iter().filter(|(_, res)| res.is_ok()).count(),
			requested = preloaded.len(),
			"Preloaded engines"
		);
	}

	let exit_code = match cli.command {
		Command::Inspect { modules, trusted } => {
			inspect(&registry, modules, LoadOptions { trusted }).await?
		}
		Command::Encode(args) => run_transform(&registry, Operation::Encode, args).await?,
		Command::Decode(args) => run_transform(&registry, Operation::Decode, args).await?,
	};

	registry.shutdown().await;

	Ok(exit_code)
}

async fn inspect(
	registry: &PluginRegistry,
	modules: Vec<String>,
	options: LoadOptions,
) -> anyhow::Result<ExitCode> {
	let results = registry
		.load_many(modules.iter().map(|location| ModuleSource::parse(location)), options)
		.await;

	let mut failed = false;
	for (source, res) in results {
		match res {
			Ok(engine) => println!("{}", serde_json::to_string_pretty(engine.info())?),
			Err(err) => {
				failed = true;
				eprintln!("{source}: {err}");
			}
		}
	}

	Ok(if failed {
		ExitCode::FAILURE
	} else {
		ExitCode::SUCCESS
	})
}

async fn run_transform(
	registry: &PluginRegistry,
	operation: Operation,
	args: TransformArgs,
) -> anyhow::Result<ExitCode> {
	let engine = match registry
		.load(
			ModuleSource::parse(&args.module),
			LoadOptions {
				trusted: args.trusted,
			},
		)
		.await
	{
		Ok(engine) => engine,
		Err(err) => {
			eprintln!("{err}");
			return Ok(ExitCode::FAILURE);
		}
	};

	let input = tokio::fs::read(&args.input).await?;

	// Errors go out verbatim, the way the engine or host reported them
	let output = match registry.transform(engine.id(), operation, &input).await {
		Ok(output) => output,
		Err(err) => {
			eprintln!("{err}");
			return Ok(ExitCode::FAILURE);
		}
	};

	match &args.output {
		Some(path) => tokio::fs::write(path, &output).await?,
		None => {
			use std::io::Write;
			std::io::stdout().write_all(&output)?;
		}
	}
	eprintln!("{operation}: {} bytes -> {} bytes", input.len(), output.len());

	Ok(ExitCode::SUCCESS)
}
