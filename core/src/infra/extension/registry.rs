//! Process-scoped registry of loaded codec engines.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::{
	config::{HostConfig, PipelineConfig, ValidationConfig},
	Error,
};

use super::{
	context::EngineDescriptor,
	pipeline,
	source::ModuleSource,
	types::{EngineInfo, Operation},
	validation,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
	/// Install the engine even if it fails validation.
	pub trusted: bool,
}

/// Maps engine IDs to their descriptors and owns every execution context's lifecycle.
///
/// Iteration order is load order; reloading an ID keeps its position.
#[derive(Debug)]
pub struct PluginRegistry {
	pipeline: PipelineConfig,
	validation: ValidationConfig,
	engines: RwLock<Vec<Arc<EngineDescriptor>>>,
}

impl PluginRegistry {
	#[must_use]
	pub fn new(config: &HostConfig) -> Self {
		Self {
			pipeline: config.pipeline.clone(),
			validation: config.validation.clone(),
			engines: RwLock::default(),
		}
	}

	#[must_use]
	pub const fn pipeline_config(&self) -> &PipelineConfig {
		&self.pipeline
	}

	/// Resolves, loads, validates and installs one module.
	#[instrument(skip(self, source, options), fields(source = %source), err)]
	pub async fn load(
		&self,
		source: ModuleSource,
		options: LoadOptions,
	) -> Result<Arc<EngineDescriptor>, Error> {
		let module = source.resolve().await?;
		let engine = EngineDescriptor::load(&source.label(), module, &self.pipeline).await?;

		if self.validation.enabled {
			match validation::validate(&engine, &self.pipeline).await {
				Ok(_) => {}
				Err(err) if options.trusted || !self.validation.reject_on_failure => {
					warn!(engine = %engine.id(), %err, "Installing engine that failed validation");
				}
				Err(err) => {
					engine.context().terminate();
					return Err(err);
				}
			}
		}

		Ok(self.install(engine).await)
	}

	/// Loads every source in order. One failure never stops the rest of the batch.
	pub async fn load_many(
		&self,
		sources: impl IntoIterator<Item = ModuleSource>,
		options: LoadOptions,
	) -> Vec<(String, Result<Arc<EngineDescriptor>, Error>)> {
		let mut results = Vec::new();

		for source in sources {
			let label = source.to_string();
			let res = self.load(source, options).await;
			if let Err(err) = &res {
				warn!(source = %label, %err, "Failed to load engine");
			}
			results.push((label, res));
		}

		results
	}

	/// Installs an already loaded engine, replacing and terminating any engine with the same ID.
	pub async fn install(&self, engine: EngineDescriptor) -> Arc<EngineDescriptor> {
		let engine = Arc::new(engine);
		let mut engines = self.engines.write().await;

		if let Some(slot) = engines.iter_mut().find(|loaded| loaded.id() == engine.id()) {
			let previous = std::mem::replace(slot, Arc::clone(&engine));
			// Still under the write lock, so no lookup ever sees two contexts for this ID
			previous.context().terminate();
			info!(engine = %engine.id(), "Replaced previously loaded engine");
		} else {
			engines.push(Arc::clone(&engine));
			info!(engine = %engine.id(), "Registered engine");
		}

		engine
	}

	pub async fn unload(&self, id: &str) -> Result<(), Error> {
		let mut engines = self.engines.write().await;

		let position = engines
			.iter()
			.position(|engine| engine.id() == id)
			.ok_or_else(|| Error::EngineNotFound(id.to_string()))?;

		let engine = engines.remove(position);
		engine.context().terminate();
		info!(engine = %id, "Unloaded engine");

		Ok(())
	}

	/// Exact lookup by engine ID.
	pub async fn get(&self, id: &str) -> Option<Arc<EngineDescriptor>> {
		self.engines
			.read()
			.await
			.iter()
			.find(|engine| engine.id() == id)
			.cloned()
	}

	/// Case-insensitive lookup by display name.
	pub async fn find_by_name(&self, name: &str) -> Option<Arc<EngineDescriptor>> {
		self.engines
			.read()
			.await
			.iter()
			.find(|engine| engine.info().name.eq_ignore_ascii_case(name))
			.cloned()
	}

	/// 1-based lookup in the current iteration order. Positions shift on unload.
	pub async fn get_by_position(&self, position: usize) -> Option<Arc<EngineDescriptor>> {
		let index = position.checked_sub(1)?;
		self.engines.read().await.get(index).cloned()
	}

	/// Tries `selector` as an ID, then as a name, then as a 1-based position.
	pub async fn resolve(&self, selector: &str) -> Result<Arc<EngineDescriptor>, Error> {
		if let Some(engine) = self.get(selector).await {
			return Ok(engine);
		}

		if let Some(engine) = self.find_by_name(selector).await {
			return Ok(engine);
		}

		if let Ok(position) = selector.parse::<usize>() {
			if let Some(engine) = self.get_by_position(position).await {
				return Ok(engine);
			}
		}

		Err(Error::EngineNotFound(selector.to_string()))
	}

	pub async fn list(&self) -> Vec<EngineInfo> {
		self.engines
			.read()
			.await
			.iter()
			.map(|engine| engine.info().clone())
			.collect()
	}

	pub async fn len(&self) -> usize {
		self.engines.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.engines.read().await.is_empty()
	}

	pub async fn encode(&self, id: &str, input: &[u8]) -> Result<Vec<u8>, Error> {
		self.transform(id, Operation::Encode, input).await
	}

	pub async fn decode(&self, id: &str, input: &[u8]) -> Result<Vec<u8>, Error> {
		self.transform(id, Operation::Decode, input).await
	}

	/// Runs an operation against the engine registered under `id`.
	///
	/// Unknown IDs fail before anything reaches an execution context.
	pub async fn transform(
		&self,
		id: &str,
		operation: Operation,
		input: &[u8],
	) -> Result<Vec<u8>, Error> {
		let engine = self
			.get(id)
			.await
			.ok_or_else(|| Error::EngineNotFound(id.to_string()))?;

		pipeline::transform(&engine, operation, input, &self.pipeline).await
	}

	/// Terminates every live execution context and empties the registry.
	pub async fn shutdown(&self) {
		let engines = std::mem::take(&mut *self.engines.write().await);

		for engine in &engines {
			engine.context().terminate();
		}

		info!(count = engines.len(), "Plugin registry shut down");
	}
}
