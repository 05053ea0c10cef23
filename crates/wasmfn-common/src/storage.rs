//! Storage and metrics collaborators.
//!
//! Persistent backends live outside this workspace. The in-memory
//! implementations here back the binary and the test suites.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::StorageError;
use crate::types::{Deployment, Endpoint, RequestMetric};

/// Fields of an endpoint that may change after creation.
#[derive(Debug, Clone, Default)]
pub struct UpdateEndpointParams {
    pub active_deployment_id: Option<Uuid>,
    pub deployment_history: Option<Vec<Uuid>>,
    pub environment: Option<HashMap<String, String>>,
}

/// Endpoint and deployment storage.
pub trait Store: Send + Sync {
    /// Insert a new endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn create_endpoint(&self, endpoint: Endpoint) -> Result<(), StorageError>;

    /// Fetch an endpoint by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EndpointNotFound`] for an unknown id.
    fn get_endpoint(&self, id: Uuid) -> Result<Endpoint, StorageError>;

    /// Apply `params` to an endpoint and return the updated record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EndpointNotFound`] for an unknown id.
    fn update_endpoint(
        &self,
        id: Uuid,
        params: UpdateEndpointParams,
    ) -> Result<Endpoint, StorageError>;

    /// Insert a new deployment.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EndpointNotFound`] if the owning endpoint
    /// does not exist.
    fn create_deployment(&self, deployment: Deployment) -> Result<(), StorageError>;

    /// Fetch a deployment by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DeploymentNotFound`] for an unknown id.
    fn get_deployment(&self, id: Uuid) -> Result<Arc<Deployment>, StorageError>;
}

/// Sink for request completion records. Best effort.
pub trait MetricStore: Send + Sync {
    /// Record a completed request.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn create_request_metric(&self, metric: RequestMetric) -> Result<(), StorageError>;
}

/// In-memory [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    endpoints: RwLock<HashMap<Uuid, Endpoint>>,
    deployments: RwLock<HashMap<Uuid, Arc<Deployment>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().len()
    }
}

impl Store for MemoryStore {
    fn create_endpoint(&self, endpoint: Endpoint) -> Result<(), StorageError> {
        tracing::debug!(endpoint_id = %endpoint.id, name = %endpoint.name, "Creating endpoint");
        self.endpoints.write().insert(endpoint.id, endpoint);
        Ok(())
    }

    fn get_endpoint(&self, id: Uuid) -> Result<Endpoint, StorageError> {
        self.endpoints
            .read()
            .get(&id)
            .cloned()
            .ok_or(StorageError::EndpointNotFound { id })
    }

    fn update_endpoint(
        &self,
        id: Uuid,
        params: UpdateEndpointParams,
    ) -> Result<Endpoint, StorageError> {
        let mut endpoints = self.endpoints.write();
        let endpoint = endpoints
            .get_mut(&id)
            .ok_or(StorageError::EndpointNotFound { id })?;

        if let Some(active) = params.active_deployment_id {
            endpoint.active_deployment_id = Some(active);
        }
        if let Some(history) = params.deployment_history {
            endpoint.deployment_history = history;
        }
        if let Some(environment) = params.environment {
            endpoint.environment = environment;
        }

        Ok(endpoint.clone())
    }

    fn create_deployment(&self, deployment: Deployment) -> Result<(), StorageError> {
        if !self.endpoints.read().contains_key(&deployment.endpoint_id) {
            return Err(StorageError::EndpointNotFound {
                id: deployment.endpoint_id,
            });
        }

        tracing::debug!(
            deployment_id = %deployment.id,
            endpoint_id = %deployment.endpoint_id,
            hash = %deployment.hash,
            "Creating deployment"
        );
        self.deployments
            .write()
            .insert(deployment.id, Arc::new(deployment));
        Ok(())
    }

    fn get_deployment(&self, id: Uuid) -> Result<Arc<Deployment>, StorageError> {
        self.deployments
            .read()
            .get(&id)
            .cloned()
            .ok_or(StorageError::DeploymentNotFound { id })
    }
}

/// In-memory [`MetricStore`].
#[derive(Debug, Default)]
pub struct MemoryMetricStore {
    metrics: RwLock<Vec<RequestMetric>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All metrics recorded for an endpoint, in arrival order.
    pub fn request_metrics(&self, endpoint_id: Uuid) -> Vec<RequestMetric> {
        self.metrics
            .read()
            .iter()
            .filter(|m| m.endpoint_id == endpoint_id)
            .cloned()
            .collect()
    }

    /// Total number of recorded metrics.
    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }
}

impl MetricStore for MemoryMetricStore {
    fn create_request_metric(&self, metric: RequestMetric) -> Result<(), StorageError> {
        self.metrics.write().push(metric);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::types::RuntimeKind;

    fn endpoint() -> Endpoint {
        Endpoint::new("test", RuntimeKind::Go, HashMap::new())
    }

    #[test]
    fn test_endpoint_roundtrip() {
        let store = MemoryStore::new();
        let endpoint = endpoint();
        let id = endpoint.id;

        store.create_endpoint(endpoint.clone()).unwrap();

        assert_eq!(store.get_endpoint(id).unwrap(), endpoint);
        assert_eq!(store.endpoint_count(), 1);
    }

    #[test]
    fn test_get_unknown_endpoint() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        assert_eq!(
            store.get_endpoint(id),
            Err(StorageError::EndpointNotFound { id })
        );
    }

    #[test]
    fn test_update_endpoint_partial() {
        let store = MemoryStore::new();
        let mut endpoint = endpoint();
        endpoint
            .environment
            .insert("KEY".to_string(), "value".to_string());
        let id = endpoint.id;
        store.create_endpoint(endpoint).unwrap();

        let deployment_id = Uuid::new_v4();
        let updated = store
            .update_endpoint(
                id,
                UpdateEndpointParams {
                    active_deployment_id: Some(deployment_id),
                    deployment_history: Some(vec![deployment_id]),
                    environment: None,
                },
            )
            .unwrap();

        assert_eq!(updated.active_deployment_id, Some(deployment_id));
        assert_eq!(updated.deployment_history, vec![deployment_id]);
        // Untouched fields survive
        assert_eq!(updated.environment["KEY"], "value");
        assert_eq!(store.get_endpoint(id).unwrap(), updated);
    }

    #[test]
    fn test_deployment_requires_endpoint() {
        let store = MemoryStore::new();
        let deployment = Deployment::new(Uuid::new_v4(), b"\0asm".to_vec());

        assert!(matches!(
            store.create_deployment(deployment),
            Err(StorageError::EndpointNotFound { .. })
        ));
    }

    #[test]
    fn test_deployment_roundtrip() {
        let store = MemoryStore::new();
        let endpoint = endpoint();
        let endpoint_id = endpoint.id;
        store.create_endpoint(endpoint).unwrap();

        let deployment = Deployment::new(endpoint_id, b"\0asm".to_vec());
        let id = deployment.id;
        store.create_deployment(deployment).unwrap();

        let fetched = store.get_deployment(id).unwrap();
        assert_eq!(fetched.endpoint_id, endpoint_id);
        assert!(matches!(
            store.get_deployment(Uuid::new_v4()),
            Err(StorageError::DeploymentNotFound { .. })
        ));
    }

    #[test]
    fn test_metric_store_filters_by_endpoint() {
        let metrics = MemoryMetricStore::new();
        let endpoint_id = Uuid::new_v4();
        let now = Utc::now();

        for (i, owner) in [endpoint_id, Uuid::new_v4(), endpoint_id]
            .into_iter()
            .enumerate()
        {
            metrics
                .create_request_metric(RequestMetric {
                    id: format!("req-{i}"),
                    endpoint_id: owner,
                    deployment_id: Uuid::nil(),
                    request_url: "/".into(),
                    status_code: 200,
                    start_time: now,
                    end_time: now,
                    duration: Duration::ZERO,
                })
                .unwrap();
        }

        let recorded = metrics.request_metrics(endpoint_id);
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].id, "req-0");
        assert_eq!(recorded[1].id, "req-2");
        assert_eq!(metrics.len(), 3);
    }
}
