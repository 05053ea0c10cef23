//! Shared application state.
//!
//! This module provides [`AppState`], which wires the engine, the actor
//! layer and the correlation proxy together and is shared by all handlers.

use std::sync::Arc;

use uuid::Uuid;

use wasmfn_actors::{LocalCluster, ManagerPid, RuntimeDeps, RuntimeManager};
use wasmfn_common::{Endpoint, MetricStore, RuntimeConfig, RuntimeError, Store};
use wasmfn_core::{
    DefaultModCache, EpochTicker, InterpreterImages, ModCacher, PublishError, SandboxExecutor,
    WasmEngine, publish_deployment, rollback_deployment,
};

use crate::error::IngressError;
use crate::proxy::{ProxyHandle, WasmProxy};
use crate::request::Target;

/// Default limit for forwarded request bodies.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn Store>,
    cache: Arc<dyn ModCacher>,
    manager: ManagerPid,
    proxy: ProxyHandle,
    max_body_bytes: usize,
    /// Keeps epoch interruption running for as long as the state lives.
    _ticker: Option<Arc<EpochTicker>>,
}

impl AppState {
    /// Build the engine, actor layer and proxy on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created or a configured
    /// interpreter image cannot be read.
    pub fn new(
        config: &RuntimeConfig,
        store: Arc<dyn Store>,
        metrics: Arc<dyn MetricStore>,
    ) -> Result<Self, RuntimeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let ticker = engine.start_epoch_ticker().map(Arc::new);
        let executor = Arc::new(SandboxExecutor::new(engine, config.execution.clone())?);
        let interpreters = InterpreterImages::from_config(&config.sandbox)?;
        let cache: Arc<dyn ModCacher> = Arc::new(DefaultModCache::new());

        let deps = RuntimeDeps {
            store: Arc::clone(&store),
            metrics,
            cache: Arc::clone(&cache),
            executor,
            interpreters,
            keep_alive: config.actors.keep_alive(),
        };
        let manager = RuntimeManager::spawn(Arc::new(LocalCluster::new(deps)));
        let proxy = WasmProxy::spawn(
            manager.clone(),
            config.actors.activation_timeout(),
            config.actors.request_timeout(),
        );

        Ok(Self {
            store,
            cache,
            manager,
            proxy,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            _ticker: ticker,
        })
    }

    /// Limit forwarded request bodies to `bytes`.
    #[must_use]
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn ModCacher> {
        &self.cache
    }

    pub fn manager(&self) -> &ManagerPid {
        &self.manager
    }

    pub fn proxy(&self) -> &ProxyHandle {
        &self.proxy
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Resolve a request target to its endpoint and deployment.
    ///
    /// Live requests use the endpoint's active deployment. Previews use the
    /// given deployment with its owning endpoint's environment and runtime.
    ///
    /// # Errors
    ///
    /// Returns a not-found [`IngressError`] for unknown IDs or an endpoint
    /// without an active deployment.
    pub fn resolve(&self, target: Target) -> Result<(Endpoint, Uuid), IngressError> {
        match target {
            Target::Live { endpoint_id } => {
                let endpoint = self.store.get_endpoint(endpoint_id)?;
                let deployment_id = endpoint
                    .active_deployment_id
                    .ok_or(IngressError::NoActiveDeployment { id: endpoint_id })?;
                Ok((endpoint, deployment_id))
            }
            Target::Preview { deployment_id } => {
                let deployment = self.store.get_deployment(deployment_id)?;
                let endpoint = self.store.get_endpoint(deployment.endpoint_id)?;
                Ok((endpoint, deployment_id))
            }
        }
    }

    /// Make `deployment_id` live on its endpoint.
    ///
    /// # Errors
    ///
    /// See [`publish_deployment`].
    pub fn publish(&self, deployment_id: Uuid) -> Result<Endpoint, PublishError> {
        publish_deployment(self.store.as_ref(), self.cache.as_ref(), deployment_id)
    }

    /// Return `endpoint_id` to its previously published deployment.
    ///
    /// # Errors
    ///
    /// See [`rollback_deployment`].
    pub fn rollback(&self, endpoint_id: Uuid) -> Result<Endpoint, PublishError> {
        rollback_deployment(self.store.as_ref(), self.cache.as_ref(), endpoint_id)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use wasmfn_common::{Deployment, MemoryMetricStore, MemoryStore, RuntimeKind};

    fn state() -> AppState {
        let mut config = RuntimeConfig::default();
        config.engine.pooling_allocator = false;
        AppState::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryMetricStore::new()),
        )
        .unwrap()
    }

    fn seed(state: &AppState) -> (Endpoint, Deployment) {
        let endpoint = Endpoint::new("fn", RuntimeKind::Go, HashMap::new());
        state.store().create_endpoint(endpoint.clone()).unwrap();
        let deployment = Deployment::new(endpoint.id, b"(module)".to_vec());
        state.store().create_deployment(deployment.clone()).unwrap();
        (endpoint, deployment)
    }

    #[tokio::test]
    async fn test_resolve_preview_before_publish() {
        let state = state();
        let (endpoint, deployment) = seed(&state);

        let (resolved, id) = state
            .resolve(Target::Preview {
                deployment_id: deployment.id,
            })
            .unwrap();
        assert_eq!(resolved.id, endpoint.id);
        assert_eq!(id, deployment.id);

        let err = state
            .resolve(Target::Live {
                endpoint_id: endpoint.id,
            })
            .unwrap_err();
        assert!(matches!(err, IngressError::NoActiveDeployment { .. }));
    }

    #[tokio::test]
    async fn test_resolve_live_after_publish() {
        let state = state();
        let (endpoint, deployment) = seed(&state);
        state.publish(deployment.id).unwrap();

        let (_, id) = state
            .resolve(Target::Live {
                endpoint_id: endpoint.id,
            })
            .unwrap();
        assert_eq!(id, deployment.id);
    }

    #[tokio::test]
    async fn test_resolve_unknown_ids() {
        let state = state();
        let id = Uuid::new_v4();

        assert!(
            state
                .resolve(Target::Live { endpoint_id: id })
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            state
                .resolve(Target::Preview { deployment_id: id })
                .unwrap_err()
                .is_not_found()
        );
    }
}
