//! Backup runs around the migration
//!
//! A backup is taken on the source before anything is mutated and on the
//! target right after the application has been repointed.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::gcp::sqladmin::BackupRun;
use crate::gcp::GcpError;
use crate::manager::Manager;
use crate::resolved::GcpProject;
use crate::retry::{retry, retryable, terminal};

const BACKUP_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const BACKUP_INTERVAL: Duration = Duration::from_secs(5);
const OPERATION_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Google API error: {0}")]
    Gcp(#[from] GcpError),
}

pub type Result<T, E = BackupError> = std::result::Result<T, E>;

/// Trigger a backup run on `instance_name` and wait for it to finish.
///
/// A 409 means another operation is already in progress on the instance
/// and is retried within the envelope.
pub async fn create_backup(
    mgr: &Manager,
    cfg: &Config,
    project: &GcpProject,
    instance_name: &str,
) -> Result<()> {
    if cfg.development.skip_backup {
        warn!("skipping backup creation because of development mode setting");
        return Ok(());
    }

    info!(instance = %instance_name, "creating backup");

    let run = BackupRun {
        description: Some("Pre-migration backup".to_string()),
        status: None,
    };

    let op = retry(BACKUP_TIMEOUT, BACKUP_INTERVAL, || {
        let run = run.clone();
        async move {
            match mgr.sql_admin.insert_backup_run(&project.id, instance_name, &run).await {
                Ok(op) => Ok(op),
                Err(err) if err.is_conflict() => {
                    warn!(error = %err, "another operation is in progress, retrying");
                    Err(retryable(BackupError::from(err)))
                }
                Err(err) => Err(terminal(BackupError::from(err))),
            }
        }
    })
    .await?;

    mgr.sql_admin
        .wait_for_operation(&project.id, op, OPERATION_INTERVAL)
        .await?;

    info!("backup creation complete");
    Ok(())
}
