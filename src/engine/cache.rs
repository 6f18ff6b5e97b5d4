//! Keyed cache of loaded engines.
//!
//! Engines are expensive to build (weights download, deserialization, device
//! transfer), so each `(WeightsIdentity, Device)` pair is loaded at most once
//! per process. Entries are never evicted.
//!
//! Whether an entry came from full (unsafe) deserialization is remembered and
//! re-checked against every request: an entry loaded unsafely is only handed
//! out to callers that opted in, even though it is already in memory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::engine::{
    DeserializeMode, Device, EngineBackend, EngineKey, InferenceEngine, SerializedWeights,
    WeightsIdentity,
};
use crate::error::EngineError;

/// A loaded engine and how its weights were obtained.
#[derive(Clone)]
pub struct CachedEngine {
    pub engine: Arc<dyn InferenceEngine>,
    pub loaded_unsafely: bool,
}

impl std::fmt::Debug for CachedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedEngine")
            .field("engine", &"<engine>")
            .field("loaded_unsafely", &self.loaded_unsafely)
            .finish()
    }
}

/// Get-or-load cache for inference engines.
pub struct EngineCache {
    backend: Arc<dyn EngineBackend>,
    entries: Mutex<HashMap<EngineKey, CachedEngine>>,
}

impl EngineCache {
    pub fn new(backend: Arc<dyn EngineBackend>) -> Self {
        Self {
            backend,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn EngineBackend> {
        &self.backend
    }

    /// Number of loaded engines.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the engine for `(identity, device)`, loading it on first use.
    ///
    /// The second element is true when the engine was built from full
    /// deserialization. The whole lookup-or-load sequence holds the cache
    /// lock, so concurrent misses on one key load once and share the result.
    pub fn get(
        &self,
        identity: &WeightsIdentity,
        device: Device,
        allow_unsafe: bool,
    ) -> Result<(Arc<dyn InferenceEngine>, bool), EngineError> {
        let key = EngineKey {
            identity: identity.clone(),
            device,
        };

        let mut entries = self.lock();
        if let Some(cached) = entries.get(&key) {
            if cached.loaded_unsafely && !allow_unsafe {
                return Err(EngineError::UnsafeLoadRejected);
            }
            return Ok((Arc::clone(&cached.engine), cached.loaded_unsafely));
        }

        let (weights, loaded_unsafely) = self.obtain_weights(identity, allow_unsafe)?;

        let mut engine = self.backend.create_engine();
        engine.load_weights(weights)?;
        engine.eval();
        engine.to(device)?;
        let engine: Arc<dyn InferenceEngine> = Arc::from(engine);

        entries.insert(
            key,
            CachedEngine {
                engine: Arc::clone(&engine),
                loaded_unsafely,
            },
        );
        tracing::info!(weights = %identity, device = %device, "Engine loaded");

        Ok((engine, loaded_unsafely))
    }

    fn obtain_weights(
        &self,
        identity: &WeightsIdentity,
        allow_unsafe: bool,
    ) -> Result<(SerializedWeights, bool), EngineError> {
        match identity {
            WeightsIdentity::Default => {
                tracing::info!("Fetching default model weights");
                Ok((self.backend.fetch_default_weights()?, false))
            }
            WeightsIdentity::Checkpoint(path) => self.deserialize_checkpoint(path, allow_unsafe),
        }
    }

    fn deserialize_checkpoint(
        &self,
        path: &Path,
        allow_unsafe: bool,
    ) -> Result<(SerializedWeights, bool), EngineError> {
        tracing::info!(checkpoint = %path.display(), "Loading checkpoint");

        match self.backend.deserialize(path, DeserializeMode::Restricted) {
            Ok(weights) => Ok((weights, false)),
            Err(EngineError::Deserialization { reason, .. }) => {
                if !allow_unsafe {
                    return Err(EngineError::DeserializationRejected {
                        path: path.to_path_buf(),
                        reason,
                    });
                }
                tracing::warn!(
                    checkpoint = %path.display(),
                    "Loading checkpoint with unsafe deserialization. Only enable this for trusted files."
                );
                let weights = self.backend.deserialize(path, DeserializeMode::Full)?;
                Ok((weights, true))
            }
            Err(e) => Err(e),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EngineKey, CachedEngine>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
