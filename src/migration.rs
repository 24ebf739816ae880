//! Migration-job lifecycle in the database-migration service
//!
//! The job is a continuous CDC stream between the two connection
//! profiles. Its state machine is owned by the service; this module only
//! drives transitions and observes phases:
//!
//! start -> `RUNNING`/`CDC` -> lag drained -> `RUNNING`/`READY_FOR_PROMOTE`
//! -> promote -> `RUNNING`/`PROMOTE_IN_PROGRESS` -> `COMPLETED`

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::gcp::dms::{MigrationJob, StaticIpConnectivity};
use crate::gcp::GcpError;
use crate::manager::Manager;
use crate::profile::{self, ProfileError};
use crate::resolved::{self, GcpProject, Instance};
use crate::retry::{retry, retryable, terminal};

const DELETE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DELETE_INTERVAL: Duration = Duration::from_secs(5);
const GET_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const GET_INTERVAL: Duration = Duration::from_secs(5);
const CREATE_OPERATION_INTERVAL: Duration = Duration::from_secs(5);
const DEMOTE_OPERATION_INTERVAL: Duration = Duration::from_secs(10);
const START_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const START_INTERVAL: Duration = Duration::from_secs(20);
const PROMOTE_OPERATION_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Google API error: {0}")]
    Gcp(#[from] GcpError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

pub type Result<T, E = MigrationError> = std::result::Result<T, E>;

/// Create the migration job from scratch: tear down any prior job of the
/// same name, recreate the connection profiles, create the continuous
/// job and demote the destination.
///
/// The job is *not* started; startup happens as a separate step once the
/// source authorized networks cover the target's outgoing IPs.
pub async fn prepare_migration_job(
    mgr: &Manager,
    project: &GcpProject,
    source: &Instance,
    target: &Instance,
) -> Result<String> {
    let migration_name = resolved::migration_name(&source.name, &target.name);

    delete_migration_job(mgr, project, &migration_name).await?;

    profile::create_connection_profiles(mgr, project, source, target).await?;

    let job = get_or_create_migration_job(mgr, project, &migration_name).await?;

    demote_destination(mgr, &job).await?;

    Ok(migration_name)
}

async fn get_or_create_migration_job(
    mgr: &Manager,
    project: &GcpProject,
    migration_name: &str,
) -> Result<MigrationJob> {
    let name = project.component_uri("migrationJobs", migration_name);

    match mgr.dms.get_migration_job(&name).await {
        Ok(job) => {
            info!(job = %migration_name, "migration job already exists");
            return Ok(job);
        }
        Err(err) if err.is_not_found() => {}
        Err(err) => return Err(err.into()),
    }

    let job = MigrationJob {
        name: None,
        display_name: Some(migration_name.to_string()),
        labels: BTreeMap::from([
            ("app".to_string(), mgr.app_name.clone()),
            ("team".to_string(), mgr.namespace.clone()),
        ]),
        kind: Some("CONTINUOUS".to_string()),
        state: None,
        phase: None,
        source: Some(project.component_uri("connectionProfiles", &format!("source-{}", mgr.app_name))),
        destination: Some(
            project.component_uri("connectionProfiles", &format!("target-{}", mgr.app_name)),
        ),
        static_ip_connectivity: Some(StaticIpConnectivity::default()),
    };

    info!(job = %migration_name, "creating new migration job");
    let op = mgr
        .dms
        .create_migration_job(&project.parent_uri(), migration_name, &job)
        .await?;
    mgr.dms
        .wait_for_operation(op, CREATE_OPERATION_INTERVAL)
        .await?;

    let job = mgr.dms.get_migration_job(&name).await?;
    info!(job = %migration_name, "migration job created");
    Ok(job)
}

async fn demote_destination(mgr: &Manager, job: &MigrationJob) -> Result<()> {
    let Some(name) = job.name.as_deref() else {
        return Ok(());
    };

    info!(job = %name, "demoting target instance");
    let op = mgr.dms.demote_destination(name).await?;

    mgr.dms
        .wait_for_operation(op, DEMOTE_OPERATION_INTERVAL)
        .await?;
    info!(job = %name, "target instance demoted");
    Ok(())
}

/// Start the job. The start call itself is terminal on failure; waiting
/// for the returned operation retries within its envelope.
pub async fn start_migration_job(
    mgr: &Manager,
    project: &GcpProject,
    migration_name: &str,
) -> Result<()> {
    let name = project.component_uri("migrationJobs", migration_name);

    info!(job = %migration_name, "starting migration job");
    let start_op = mgr.dms.start_migration_job(&name).await?;
    let op_name = start_op.name.clone();

    info!(job = %migration_name, "waiting for migration job to start");
    retry(START_TIMEOUT, START_INTERVAL, || async {
        let op = mgr
            .dms
            .get_operation(&op_name)
            .await
            .map_err(|e| retryable(MigrationError::from(e)))?;
        if !op.done {
            return Err(retryable(MigrationError::Gcp(GcpError::OperationFailed {
                name: op_name.clone(),
                message: "still starting".to_string(),
            })));
        }
        if let Some(error) = op.error {
            return Err(terminal(MigrationError::Gcp(GcpError::OperationFailed {
                name: op_name.clone(),
                message: error.message,
            })));
        }
        Ok(())
    })
    .await?;

    info!(job = %migration_name, "migration job started");
    Ok(())
}

/// Fetch the job, retrying through the permission-propagation delay a
/// fresh job can exhibit.
pub async fn get_migration_job(
    mgr: &Manager,
    project: &GcpProject,
    migration_name: &str,
) -> Result<MigrationJob> {
    let name = project.component_uri("migrationJobs", migration_name);

    retry(GET_TIMEOUT, GET_INTERVAL, || async {
        mgr.dms
            .get_migration_job(&name)
            .await
            .map_err(|e| retryable(MigrationError::from(e)))
    })
    .await
}

/// Invoke promote on the job and wait for the returned operation.
pub async fn promote_migration_job(
    mgr: &Manager,
    project: &GcpProject,
    migration_name: &str,
) -> Result<()> {
    let name = project.component_uri("migrationJobs", migration_name);

    info!(job = %migration_name, "promoting migration job");
    let op = mgr.dms.promote_migration_job(&name).await?;
    mgr.dms
        .wait_for_operation(op, PROMOTE_OPERATION_INTERVAL)
        .await?;

    info!(job = %migration_name, "migration job promoted");
    Ok(())
}

/// Delete the job and wait for the deletion; 404 is success.
pub async fn delete_migration_job(
    mgr: &Manager,
    project: &GcpProject,
    migration_name: &str,
) -> Result<()> {
    info!(job = %migration_name, "deleting previous migration job");
    let name = project.component_uri("migrationJobs", migration_name);

    let op = retry(DELETE_TIMEOUT, DELETE_INTERVAL, || async {
        match mgr.dms.delete_migration_job(&name).await {
            Ok(op) => Ok(Some(op)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(retryable(MigrationError::from(err))),
        }
    })
    .await?;

    if let Some(op) = op {
        mgr.dms.wait_for_operation(op, DELETE_INTERVAL).await?;
        info!(job = %migration_name, "migration job deleted");
    }

    Ok(())
}
