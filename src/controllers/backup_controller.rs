//! Backup controller
//!
//! Watches Backup resources in the configured namespace and hands each
//! changed object's key to the backup reconciler.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Config as ControllerRuntimeConfig, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use crate::backupper::KubeBackupper;
use crate::config::ControllerConfig;
use crate::controllers::Context;
use crate::crd::Backup;
use crate::error::{Error, Result};
use crate::metrics;
use crate::plugin::PluginManager;
use crate::reconcilers::backup::BackupController;
use crate::store::KubeResourceStore;
use crate::upload::FilesystemUploader;

/// Run the Backup controller until shutdown
pub async fn run(client: Client, config: ControllerConfig, plugins: Arc<dyn PluginManager>) {
    let api: Api<Backup> = Api::namespaced(client.clone(), &config.namespace);

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("Backup CRD not installed: {}", e);
        return;
    }

    info!(
        namespace = %config.namespace,
        bucket = %config.bucket,
        allow_snapshots = config.allow_snapshots,
        workers = config.workers,
        "Starting Backup controller"
    );

    let controller = Controller::new(api, WatcherConfig::default())
        .with_config(ControllerRuntimeConfig::default().concurrency(config.workers));

    let cache = controller.store();
    let ready = cache.clone();
    tokio::spawn(async move {
        if ready.wait_until_ready().await.is_ok() {
            info!("Backup cache synced");
            metrics::set_ready(true);
        }
    });

    let backups = BackupController::new(
        Arc::new(KubeResourceStore::new(cache, client.clone())),
        Arc::new(KubeBackupper::new(client.clone())),
        Arc::new(FilesystemUploader::new(config.backup_root.clone())),
        plugins,
        config.bucket.clone(),
        config.allow_snapshots,
    );
    let context = Arc::new(Context::new(backups));

    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or_default(),
                        "Reconciled Backup"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS.with_label_values(&["Backup"]).inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<Backup>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["Backup"])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&["Backup"]).inc();

    let key = format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any());
    ctx.backups.process_backup(&key).await?;

    // Backups are processed once; later changes are picked up by the phase gate
    Ok(Action::await_change())
}

/// Error policy for the controller
fn error_policy(obj: Arc<Backup>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if !error.is_retryable() {
        warn!(name = %name, error = %error, "Dropping backup key that can never be processed");
        return Action::await_change();
    }

    if let Error::BackupNotFound(_) = error {
        // Deleted between the watch event and the lookup
        info!(name = %name, "Backup no longer exists, dropping");
        return Action::await_change();
    }

    error!(
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    let requeue_duration = match error {
        Error::Conflict(_) => Duration::from_secs(5),
        Error::Kube(_) => Duration::from_secs(30),
        _ => Duration::from_secs(60),
    };

    Action::requeue(requeue_duration)
}
