//! Publishing and rolling back deployments.
//!
//! Both operations change which deployment an endpoint points to and delete
//! the endpoint's compilation cache entry, so the next activation compiles
//! against a fresh cache.

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use wasmfn_common::{Endpoint, Store, StorageError, UpdateEndpointParams};

use crate::cache::ModCacher;

/// Errors from [`publish_deployment`] and [`rollback_deployment`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The deployment is already the endpoint's active deployment.
    #[error("deployment ({deployment_id}) is already active")]
    AlreadyActive { deployment_id: Uuid },

    /// The endpoint has no earlier deployment to return to.
    #[error("endpoint ({endpoint_id}) has no previous deployment")]
    NothingToRollBack { endpoint_id: Uuid },
}

/// Make `deployment_id` the active deployment of its endpoint.
///
/// # Errors
///
/// Returns an error if the deployment or its endpoint does not exist, or if
/// the deployment is already active.
pub fn publish_deployment(
    store: &dyn Store,
    cache: &dyn ModCacher,
    deployment_id: Uuid,
) -> Result<Endpoint, PublishError> {
    let deployment = store.get_deployment(deployment_id)?;
    let endpoint = store.get_endpoint(deployment.endpoint_id)?;

    if endpoint.active_deployment_id == Some(deployment_id) {
        return Err(PublishError::AlreadyActive { deployment_id });
    }

    let mut history = endpoint.deployment_history;
    history.push(deployment_id);

    let endpoint = store.update_endpoint(
        endpoint.id,
        UpdateEndpointParams {
            active_deployment_id: Some(deployment_id),
            deployment_history: Some(history),
            environment: None,
        },
    )?;
    cache.delete(endpoint.id);

    info!(
        endpoint_id = %endpoint.id,
        deployment_id = %deployment_id,
        "Deployment published"
    );
    Ok(endpoint)
}

/// Return an endpoint to the deployment published before its active one.
///
/// # Errors
///
/// Returns an error if the endpoint does not exist or has fewer than two
/// published deployments.
pub fn rollback_deployment(
    store: &dyn Store,
    cache: &dyn ModCacher,
    endpoint_id: Uuid,
) -> Result<Endpoint, PublishError> {
    let endpoint = store.get_endpoint(endpoint_id)?;

    let mut history = endpoint.deployment_history;
    let previous = match history.len() {
        0 | 1 => return Err(PublishError::NothingToRollBack { endpoint_id }),
        len => history[len - 2],
    };
    history.pop();

    let endpoint = store.update_endpoint(
        endpoint_id,
        UpdateEndpointParams {
            active_deployment_id: Some(previous),
            deployment_history: Some(history),
            environment: None,
        },
    )?;
    cache.delete(endpoint_id);

    info!(
        endpoint_id = %endpoint_id,
        deployment_id = %previous,
        "Deployment rolled back"
    );
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::cache::{CompilationCache, DefaultModCache};
    use wasmfn_common::{Deployment, MemoryStore, RuntimeKind};

    fn setup() -> (MemoryStore, DefaultModCache, Uuid) {
        let store = MemoryStore::new();
        let endpoint = Endpoint::new("fn", RuntimeKind::Go, HashMap::new());
        let id = endpoint.id;
        store.create_endpoint(endpoint).unwrap();
        (store, DefaultModCache::new(), id)
    }

    fn deploy(store: &MemoryStore, endpoint_id: Uuid) -> Uuid {
        let deployment = Deployment::new(endpoint_id, b"(module)".to_vec());
        let id = deployment.id;
        store.create_deployment(deployment).unwrap();
        id
    }

    #[test]
    fn test_publish_sets_active_and_history() {
        let (store, cache, endpoint_id) = setup();
        let d1 = deploy(&store, endpoint_id);
        let d2 = deploy(&store, endpoint_id);

        publish_deployment(&store, &cache, d1).unwrap();
        let endpoint = publish_deployment(&store, &cache, d2).unwrap();

        assert_eq!(endpoint.active_deployment_id, Some(d2));
        assert_eq!(endpoint.deployment_history, vec![d1, d2]);
    }

    #[test]
    fn test_publish_invalidates_cache() {
        let (store, cache, endpoint_id) = setup();
        let d1 = deploy(&store, endpoint_id);

        cache.put(endpoint_id, Arc::new(CompilationCache::new()));
        publish_deployment(&store, &cache, d1).unwrap();

        assert!(cache.get(endpoint_id).is_none());
    }

    #[test]
    fn test_publish_active_rejected() {
        let (store, cache, endpoint_id) = setup();
        let d1 = deploy(&store, endpoint_id);

        publish_deployment(&store, &cache, d1).unwrap();
        assert_eq!(
            publish_deployment(&store, &cache, d1),
            Err(PublishError::AlreadyActive { deployment_id: d1 })
        );
    }

    #[test]
    fn test_publish_unknown_deployment() {
        let (store, cache, _) = setup();
        let id = Uuid::new_v4();

        assert_eq!(
            publish_deployment(&store, &cache, id),
            Err(PublishError::Storage(StorageError::DeploymentNotFound { id }))
        );
    }

    #[test]
    fn test_rollback() {
        let (store, cache, endpoint_id) = setup();
        let d1 = deploy(&store, endpoint_id);
        let d2 = deploy(&store, endpoint_id);
        publish_deployment(&store, &cache, d1).unwrap();
        publish_deployment(&store, &cache, d2).unwrap();
        cache.put(endpoint_id, Arc::new(CompilationCache::new()));

        let endpoint = rollback_deployment(&store, &cache, endpoint_id).unwrap();

        assert_eq!(endpoint.active_deployment_id, Some(d1));
        assert_eq!(endpoint.deployment_history, vec![d1]);
        assert!(cache.get(endpoint_id).is_none());

        assert_eq!(
            rollback_deployment(&store, &cache, endpoint_id),
            Err(PublishError::NothingToRollBack { endpoint_id })
        );
    }
}
