//! Backup item action plugins
//!
//! Item actions are hooks run against every object the backupper writes.
//! The controller only sees them through [`PluginManager`], which hands out
//! a fresh set per backup and must be told when that backup is done with them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::collections::IncludesExcludes;
use crate::crd::Backup;
use crate::error::{Error, Result};

/// Which objects an item action wants to see
#[derive(Clone, Debug, Default)]
pub struct ResourceSelector {
    pub included_namespaces: Vec<String>,
    pub excluded_namespaces: Vec<String>,
    pub included_resources: Vec<String>,
    pub excluded_resources: Vec<String>,
}

impl ResourceSelector {
    /// Whether an object of `resource` in `namespace` (None for cluster-scoped)
    /// is selected
    pub fn matches(&self, namespace: Option<&str>, resource: &str) -> bool {
        let resources = IncludesExcludes::new(&self.included_resources, &self.excluded_resources);
        if !resources.should_include(resource) {
            return false;
        }
        match namespace {
            Some(ns) => {
                IncludesExcludes::new(&self.included_namespaces, &self.excluded_namespaces)
                    .should_include(ns)
            }
            None => true,
        }
    }
}

/// A hook that may rewrite an object before it is written to the backup
#[async_trait]
pub trait ItemAction: Send + Sync {
    fn name(&self) -> &str;

    fn applies_to(&self) -> ResourceSelector;

    /// Return the (possibly modified) object to store
    async fn execute(&self, item: Value, backup: &Backup) -> Result<Value>;
}

/// Per-backup acquisition and release of item actions.
///
/// Every successful or failed `get_backup_item_actions` call must be followed
/// by exactly one `close_backup_item_actions` for the same backup name.
#[async_trait]
pub trait PluginManager: Send + Sync {
    async fn get_backup_item_actions(&self, backup_name: &str)
        -> Result<Vec<Arc<dyn ItemAction>>>;

    async fn close_backup_item_actions(&self, backup_name: &str) -> Result<()>;
}

type ActionFactory = Arc<dyn Fn() -> Arc<dyn ItemAction> + Send + Sync>;

/// Plugin manager for actions compiled into the controller binary
#[derive(Default)]
pub struct InProcessPluginManager {
    factories: Vec<(String, ActionFactory)>,
    open: Mutex<HashMap<String, Vec<Arc<dyn ItemAction>>>>,
}

impl InProcessPluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action; a new instance is built for every backup
    pub fn register<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn ItemAction> + Send + Sync + 'static,
    {
        self.factories.push((name.into(), Arc::new(factory)));
        self
    }

    /// Number of backups currently holding actions
    pub fn open_count(&self) -> usize {
        self.open.lock().map(|open| open.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PluginManager for InProcessPluginManager {
    async fn get_backup_item_actions(
        &self,
        backup_name: &str,
    ) -> Result<Vec<Arc<dyn ItemAction>>> {
        let mut open = self
            .open
            .lock()
            .map_err(|_| Error::plugin("plugin registry lock poisoned"))?;

        if open.contains_key(backup_name) {
            return Err(Error::plugin(format!(
                "item actions for backup {} are already open",
                backup_name
            )));
        }

        let actions: Vec<Arc<dyn ItemAction>> =
            self.factories.iter().map(|(_, factory)| factory()).collect();
        debug!(backup = backup_name, count = actions.len(), "Opened backup item actions");
        open.insert(backup_name.to_string(), actions.clone());
        Ok(actions)
    }

    async fn close_backup_item_actions(&self, backup_name: &str) -> Result<()> {
        let mut open = self
            .open
            .lock()
            .map_err(|_| Error::plugin("plugin registry lock poisoned"))?;
        if open.remove(backup_name).is_some() {
            debug!(backup = backup_name, "Closed backup item actions");
        }
        Ok(())
    }
}

/// Drops server-populated metadata that cannot be restored onto another cluster
pub struct StripServerMetadataAction;

const SERVER_METADATA_FIELDS: &[&str] = &[
    "uid",
    "resourceVersion",
    "generation",
    "managedFields",
    "selfLink",
];

#[async_trait]
impl ItemAction for StripServerMetadataAction {
    fn name(&self) -> &str {
        "strip-server-metadata"
    }

    fn applies_to(&self) -> ResourceSelector {
        ResourceSelector::default()
    }

    async fn execute(&self, mut item: Value, _backup: &Backup) -> Result<Value> {
        if let Some(metadata) = item.get_mut("metadata").and_then(Value::as_object_mut) {
            for field in SERVER_METADATA_FIELDS {
                metadata.remove(*field);
            }
        }
        Ok(item)
    }
}
