//! Thin typed surface over the Kubernetes API
//!
//! Wraps `kube::Api<T>` with the handful of verbs the orchestrator needs
//! and the 404/409 classification used by the retry loops.

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Typed read/update/create/delete/list surface for one resource kind in
/// one namespace.
#[derive(Clone)]
pub struct ResourceClient<T> {
    api: Api<T>,
}

impl<T> ResourceClient<T>
where
    T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
    T::DynamicType: Default,
{
    pub fn namespaced(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    pub async fn get(&self, name: &str) -> Result<T, kube::Error> {
        self.api.get(name).await
    }

    /// Get that maps 404 to `None`
    pub async fn get_opt(&self, name: &str) -> Result<Option<T>, kube::Error> {
        self.api.get_opt(name).await
    }

    pub async fn create(&self, obj: &T) -> Result<T, kube::Error> {
        self.api.create(&PostParams::default(), obj).await
    }

    /// Replace the object on the server. Callers follow the
    /// fetch-mutate-update-retry-on-conflict idiom; this never forces.
    pub async fn update(&self, obj: &T) -> Result<T, kube::Error> {
        self.api
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
    }

    /// Delete by name; absence counts as success. Returns whether the
    /// object existed.
    pub async fn delete(&self, name: &str) -> Result<bool, kube::Error> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn list_labeled(&self, selector: &str) -> Result<Vec<T>, kube::Error> {
        let list = self
            .api
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items)
    }

    pub async fn delete_collection_labeled(&self, selector: &str) -> Result<(), kube::Error> {
        self.api
            .delete_collection(
                &DeleteParams::default(),
                &ListParams::default().labels(selector),
            )
            .await?;
        Ok(())
    }
}

/// HTTP 404 from the API server
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// HTTP 409 optimistic-concurrency conflict
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

/// HTTP 409 with reason AlreadyExists (create racing another writer)
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

/// Whether an API error is worth retrying: conflicts, throttling, 5xx and
/// transport failures are; other 4xx are not.
pub fn is_retryable(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => {
            if (400..500).contains(&resp.code) {
                return resp.code == 409 || resp.code == 429;
            }
            true
        }
        _ => true,
    }
}
