//! Backup resource store
//!
//! Reads come from the watch-fed reflector cache shared by all workers;
//! writes go straight to the API server.

use std::sync::Arc;

use async_trait::async_trait;
use kube::{
    api::PostParams,
    runtime::reflector::{ObjectRef, Store},
    Api, Client, ResourceExt,
};
use tracing::debug;

use crate::crd::Backup;
use crate::error::{Error, Result};

/// Point lookups and full-object writes for Backup resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Look up a Backup in the local cache.
    ///
    /// The returned object is shared with other readers and must not be mutated.
    fn get(&self, namespace: &str, name: &str) -> Result<Arc<Backup>>;

    /// Replace the stored Backup with `backup`, returning what the server stored.
    ///
    /// Fails with [`Error::Conflict`] if the object changed since it was read.
    async fn update(&self, backup: &Backup) -> Result<Backup>;
}

/// [`ResourceStore`] backed by a kube-runtime reflector and the API server
#[derive(Clone)]
pub struct KubeResourceStore {
    cache: Store<Backup>,
    client: Client,
}

impl KubeResourceStore {
    pub fn new(cache: Store<Backup>, client: Client) -> Self {
        Self { cache, client }
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    fn get(&self, namespace: &str, name: &str) -> Result<Arc<Backup>> {
        self.cache
            .get(&ObjectRef::new(name).within(namespace))
            .ok_or_else(|| Error::BackupNotFound(format!("{}/{}", namespace, name)))
    }

    async fn update(&self, backup: &Backup) -> Result<Backup> {
        let name = backup.name_any();
        let namespace = backup
            .namespace()
            .ok_or_else(|| Error::config(format!("backup {} has no namespace", name)))?;
        let key = format!("{}/{}", namespace, name);
        let api: Api<Backup> = Api::namespaced(self.client.clone(), &namespace);
        let pp = PostParams::default();

        debug!(backup = %key, "Replacing backup");
        let mut stored = api
            .replace(&name, &pp, backup)
            .await
            .map_err(|e| map_write_error(e, &key))?;

        // Status is a subresource, so it is written against the fresh resourceVersion
        stored.status = backup.status.clone();
        let data = serde_json::to_vec(&stored)?;
        api.replace_status(&name, &pp, data)
            .await
            .map_err(|e| map_write_error(e, &key))
    }
}

fn map_write_error(err: kube::Error, key: &str) -> Error {
    match err {
        kube::Error::Api(api_err) if api_err.code == 409 => Error::Conflict(key.to_string()),
        kube::Error::Api(api_err) if api_err.code == 404 => Error::BackupNotFound(key.to_string()),
        other => Error::Kube(other),
    }
}
