//! Compilation caches shared between execution actors.
//!
//! A [`CompilationCache`] holds compiled modules keyed by the content hash
//! of their source. It only ever grows. A [`ModCacher`] maps an endpoint to
//! its cache; publishing or rolling back a deployment deletes the entry so
//! the next activation starts from a fresh cache.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;
use wasmtime::Engine;

use wasmfn_common::{RuntimeError, content_hash};

use crate::CompiledModule;

/// Append-only store of compiled modules, keyed by source hash.
#[derive(Debug, Default)]
pub struct CompilationCache {
    modules: DashMap<String, CompiledModule>,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the compiled form of `source`, compiling it on a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if `source` has to be compiled and compilation fails.
    /// Failed compilations are not cached.
    pub fn get_or_compile(
        &self,
        engine: &Engine,
        source: &[u8],
    ) -> Result<CompiledModule, RuntimeError> {
        let hash = content_hash(source);
        if let Some(module) = self.modules.get(&hash) {
            debug!(content_hash = %hash, "Compilation cache hit");
            return Ok(module.clone());
        }

        let module = CompiledModule::from_source(engine, source)?;
        // A concurrent compile of the same source may have won; keep the first.
        let module = self.modules.entry(hash).or_insert(module).clone();
        Ok(module)
    }

    /// Returns `true` if a module compiled from `source` is cached.
    pub fn contains(&self, source: &[u8]) -> bool {
        self.modules.contains_key(&content_hash(source))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Mapping from an endpoint to its compilation cache.
///
/// Implementations must be safe for concurrent use by many actors. A miss
/// is not an error: callers create an empty cache and `put` it.
pub trait ModCacher: Send + Sync {
    fn put(&self, key: Uuid, cache: Arc<CompilationCache>);

    fn get(&self, key: Uuid) -> Option<Arc<CompilationCache>>;

    /// Return the cache for `key`, registering an empty one on a miss.
    ///
    /// Lookup and insert happen atomically. A cache handed out here is never
    /// written back, so a `delete` that lands afterwards stays in effect.
    fn get_or_insert(&self, key: Uuid) -> Arc<CompilationCache>;

    fn delete(&self, key: Uuid);
}

/// In-process [`ModCacher`].
#[derive(Debug, Default)]
pub struct DefaultModCache {
    caches: DashMap<Uuid, Arc<CompilationCache>>,
}

impl DefaultModCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

impl ModCacher for DefaultModCache {
    fn put(&self, key: Uuid, cache: Arc<CompilationCache>) {
        self.caches.insert(key, cache);
    }

    fn get(&self, key: Uuid) -> Option<Arc<CompilationCache>> {
        self.caches.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    fn get_or_insert(&self, key: Uuid) -> Arc<CompilationCache> {
        Arc::clone(
            self.caches
                .entry(key)
                .or_insert_with(|| {
                    debug!(key = %key, "Compilation cache entry created");
                    Arc::new(CompilationCache::new())
                })
                .value(),
        )
    }

    fn delete(&self, key: Uuid) {
        if self.caches.remove(&key).is_some() {
            debug!(key = %key, "Compilation cache entry deleted");
        }
    }
}
