//! Backup data production
//!
//! A [`Backupper`] enumerates cluster objects selected by a Backup and streams
//! them to a data sink, narrating progress to a log sink.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kube::{
    api::{DynamicObject, ListParams},
    core::TypeMeta,
    discovery::{verbs, ApiResource, Discovery, Scope},
    Api, Client, ResourceExt,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::collections::{IncludesExcludes, WILDCARD};
use crate::crd::Backup;
use crate::error::{Error, Result};
use crate::plugin::ItemAction;

/// Produces the contents of a backup
#[async_trait]
pub trait Backupper: Send + Sync {
    /// Write every selected object to `data`, running applicable `actions` on
    /// each one first. An error means the backup failed; `data` may already
    /// hold partial output.
    async fn backup(
        &self,
        backup: &Backup,
        data: &mut (dyn AsyncWrite + Send + Unpin),
        log: &mut (dyn AsyncWrite + Send + Unpin),
        actions: &[Arc<dyn ItemAction>],
    ) -> Result<()>;
}

/// Append a timestamped line to a backup log stream
pub async fn write_log_line(
    log: &mut (dyn AsyncWrite + Send + Unpin),
    message: &str,
) -> Result<()> {
    let line = format!("{} {}\n", Utc::now().to_rfc3339(), message);
    log.write_all(line.as_bytes()).await?;
    Ok(())
}

/// [`Backupper`] that reads objects from the Kubernetes API and writes them
/// as newline-delimited JSON
#[derive(Clone)]
pub struct KubeBackupper {
    client: Client,
}

impl KubeBackupper {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list_objects(
        &self,
        resource: &ApiResource,
        namespaced: bool,
        namespaces: &IncludesExcludes,
    ) -> Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), resource);
        let list = api.list(&ListParams::default()).await?;

        Ok(list
            .items
            .into_iter()
            .filter(|obj| match obj.namespace() {
                Some(ns) if namespaced => namespaces.should_include(&ns),
                _ => true,
            })
            .collect())
    }
}

#[async_trait]
impl Backupper for KubeBackupper {
    async fn backup(
        &self,
        backup: &Backup,
        data: &mut (dyn AsyncWrite + Send + Unpin),
        log: &mut (dyn AsyncWrite + Send + Unpin),
        actions: &[Arc<dyn ItemAction>],
    ) -> Result<()> {
        let spec = &backup.spec;
        let name = backup.name_any();
        let namespaces =
            IncludesExcludes::new(&spec.included_namespaces, &spec.excluded_namespaces);
        let resources = IncludesExcludes::new(&spec.included_resources, &spec.excluded_resources);
        let all_namespaces = spec.included_namespaces.is_empty()
            || spec.included_namespaces.iter().any(|ns| ns == WILDCARD);

        write_log_line(log, &format!("Starting backup {}", name)).await?;
        if spec.snapshot_volumes == Some(true) {
            write_log_line(
                log,
                "Volume snapshots requested but no block store is configured, skipping",
            )
            .await?;
        }

        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| Error::backupper(format!("API discovery failed: {}", e)))?;

        let mut total = 0usize;
        for group in discovery.groups() {
            for (resource, caps) in group.recommended_resources() {
                if !caps.supports_operation(verbs::LIST) {
                    continue;
                }

                let qualified = if resource.group.is_empty() {
                    resource.plural.clone()
                } else {
                    format!("{}.{}", resource.plural, resource.group)
                };
                if !resources.should_include_any(&[resource.plural.as_str(), qualified.as_str()]) {
                    continue;
                }

                let namespaced = matches!(caps.scope, Scope::Namespaced);
                // Cluster-scoped objects belong to no namespace and are only
                // captured by backups that span all of them
                if !namespaced && !all_namespaces {
                    continue;
                }

                let objects = self
                    .list_objects(&resource, namespaced, &namespaces)
                    .await
                    .map_err(|e| Error::backupper(format!("listing {}: {}", qualified, e)))?;
                debug!(resource = %qualified, count = objects.len(), "Backing up resource");
                write_log_line(log, &format!("Backing up {} {}", objects.len(), qualified)).await?;

                for mut obj in objects {
                    obj.types = Some(TypeMeta {
                        api_version: resource.api_version.clone(),
                        kind: resource.kind.clone(),
                    });
                    let namespace = obj.namespace();
                    let mut item = serde_json::to_value(&obj)?;

                    for action in actions {
                        let selector = action.applies_to();
                        if selector.matches(namespace.as_deref(), &qualified)
                            || selector.matches(namespace.as_deref(), &resource.plural)
                        {
                            item = action.execute(item, backup).await.map_err(|e| {
                                let action = action.name();
                                Error::backupper(format!("item action {} failed: {}", action, e))
                            })?;
                        }
                    }

                    let mut line = serde_json::to_vec(&item)?;
                    line.push(b'\n');
                    data.write_all(&line).await?;
                    total += 1;
                }
            }
        }

        data.flush().await?;
        write_log_line(log, &format!("Backup {} wrote {} items", name, total)).await?;
        info!(backup = %name, items = total, "Backup data written");
        Ok(())
    }
}
