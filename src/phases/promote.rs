//! Promote phase: cut the application over to the target
//!
//! The helper application marks how far a previous run got: while it
//! exists the cutover work (promotion, ownership reassignment) still has
//! to happen; once it is gone those steps are complete and only the
//! application repoint remains.

use thiserror::Error;
use tracing::info;

use crate::application;
use crate::backup;
use crate::certificate::{self, CleanupPhase};
use crate::config::Config;
use crate::database;
use crate::gcp::dms::{
    JOB_PHASE_CDC, JOB_PHASE_PROMOTE_IN_PROGRESS, JOB_PHASE_READY_FOR_PROMOTE,
    JOB_STATE_COMPLETED, JOB_STATE_RUNNING,
};
use crate::instance;
use crate::lag::{self, LagError, LagPredicate};
use crate::manager::Manager;
use crate::migration::{self, MigrationError};
use crate::resolved::{self, GcpProject, Instance};

use super::{PhaseResult, Steps};

pub const STEPS_TOTAL: u32 = 19;

#[derive(Error, Debug)]
pub enum PromoteError {
    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Lag(#[from] LagError),

    #[error("migration job {name} is not ready for promotion: state {state:?}, phase {phase:?}")]
    NotReady {
        name: String,
        state: Option<String>,
        phase: Option<String>,
    },
}

/// Outcome of the promotion-readiness gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionReadiness {
    /// Job is replicating and lag is acceptably low; promote now
    Ready,
    /// A previous run already promoted (or is promoting); skip the call
    AlreadyPromoted,
}

/// Decide whether the migration job can be promoted.
///
/// `COMPLETED` state and `PROMOTE_IN_PROGRESS` phase are idempotent
/// successes from a previous run. A running job in CDC or
/// ready-for-promote must additionally show acceptably low lag.
pub fn classify_job(
    name: &str,
    state: Option<&str>,
    phase: Option<&str>,
) -> Result<Option<PromotionReadiness>, PromoteError> {
    if state == Some(JOB_STATE_COMPLETED) || phase == Some(JOB_PHASE_PROMOTE_IN_PROGRESS) {
        return Ok(Some(PromotionReadiness::AlreadyPromoted));
    }

    if state == Some(JOB_STATE_RUNNING)
        && matches!(phase, Some(JOB_PHASE_CDC) | Some(JOB_PHASE_READY_FOR_PROMOTE))
    {
        // Lag still needs to be checked before this counts as ready
        return Ok(None);
    }

    Err(PromoteError::NotReady {
        name: name.to_string(),
        state: state.map(str::to_string),
        phase: phase.map(str::to_string),
    })
}

async fn check_ready_for_promotion(
    mgr: &Manager,
    project: &GcpProject,
    source: &Instance,
    target: &Instance,
) -> Result<PromotionReadiness, PromoteError> {
    let migration_name = resolved::migration_name(&source.name, &target.name);
    let job = migration::get_migration_job(mgr, project, &migration_name).await?;

    if let Some(readiness) =
        classify_job(&migration_name, job.state.as_deref(), job.phase.as_deref())?
    {
        info!(job = %migration_name, "migration job already promoted");
        return Ok(readiness);
    }

    lag::wait_for_replication_lag(mgr, project, target, LagPredicate::AcceptablyLow).await?;
    Ok(PromotionReadiness::Ready)
}

/// Promote the job (waiting for lag to reach zero first) and re-shape the
/// target object as a standalone primary.
async fn promote(
    mgr: &Manager,
    project: &GcpProject,
    source: &Instance,
    target: &Instance,
    readiness: PromotionReadiness,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if readiness == PromotionReadiness::Ready {
        lag::wait_for_replication_lag(mgr, project, target, LagPredicate::ReachedZero).await?;

        let migration_name = resolved::migration_name(&source.name, &target.name);
        migration::promote_migration_job(mgr, project, &migration_name).await?;
    }

    instance::update_target_instance_after_promotion(mgr, &source.name, &target.name).await?;
    Ok(())
}

pub async fn run(cfg: &Config, mgr: &Manager) -> PhaseResult {
    let steps = Steps::new("Promote", STEPS_TOTAL);

    let project = steps
        .run(1, "Resolving GCP project", async {
            resolved::resolve_gcp_project(&mgr.kube, &mgr.namespace).await
        })
        .await?;

    let app = steps
        .run(2, "Getting application", mgr.apps.get(&mgr.app_name))
        .await?;

    let source = steps
        .run(3, "Resolving source instance", async {
            resolved::resolve_instance(mgr, &app, false).await
        })
        .await?;

    let database_name = steps
        .run(4, "Resolving database name", async {
            resolved::resolve_database_name(&app)
        })
        .await?;

    let helper = steps
        .run(
            5,
            "Looking up helper application",
            mgr.apps.get_opt(&resolved::helper_name(&mgr.app_name)),
        )
        .await?;

    if let Some(helper) = helper {
        let mut target = steps
            .run(6, "Resolving target instance", async {
                resolved::resolve_instance(mgr, &helper, false).await
            })
            .await?;

        let readiness = steps
            .run(7, "Checking migration is ready for promotion", async {
                check_ready_for_promotion(mgr, &project, &source, &target).await
            })
            .await?;

        steps
            .run(8, "Scaling application to zero", async {
                application::scale_application(mgr, 0).await
            })
            .await?;

        steps
            .run(9, "Promoting target instance", async {
                promote(mgr, &project, &source, &target, readiness).await
            })
            .await?;

        let cert_paths = steps
            .run(10, "Preparing promoted target database", async {
                prepare_promoted_database(mgr, cfg, &project, &mut target).await
            })
            .await?;

        steps
            .run(11, "Reassigning ownership in system database", async {
                database::reassign_owned(&target, database::POSTGRES_DATABASE, &cert_paths).await
            })
            .await?;

        steps
            .run(12, "Reassigning ownership in application database", async {
                database::reassign_owned(&target, &database_name, &cert_paths).await
            })
            .await?;

        steps
            .run(13, "Deleting helper application", async {
                application::delete_helper_application(mgr).await
            })
            .await?;
    } else {
        info!("Helper application is gone, skipping previously completed steps");
    }

    steps
        .run(14, "Deleting target database resource", async {
            mgr.sql_databases
                .delete_collection_labeled(&format!("app={}", mgr.app_name))
                .await
        })
        .await?;

    steps
        .run(15, "Waiting for config-connector resources to hand over", async {
            instance::wait_for_cnrm_resources_to_go_away(
                mgr,
                &cfg.target_instance.name,
                &mgr.app_name,
            )
            .await
        })
        .await?;

    let app = steps
        .run(16, "Updating application to use target instance", async {
            application::update_application_instance(mgr, &cfg.target_instance).await
        })
        .await?;

    let target = steps
        .run(17, "Resolving updated target instance", async {
            resolved::resolve_instance(mgr, &app, false).await
        })
        .await?;

    steps
        .run(18, "Updating application user", async {
            application::update_application_user(mgr, &project, &target).await
        })
        .await?;

    steps
        .run(19, "Creating backup of target instance", async {
            backup::create_backup(mgr, cfg, &project, &target.name).await
        })
        .await?;

    steps.complete();
    Ok(())
}

/// Reset the postgres password on the promoted target and issue a fresh
/// certificate, labelled for finalize-time cleanup.
async fn prepare_promoted_database(
    mgr: &Manager,
    cfg: &Config,
    project: &GcpProject,
    target: &mut Instance,
) -> Result<certificate::CertPaths, Box<dyn std::error::Error + Send + Sync>> {
    let password = database::make_password(&cfg.development);
    database::set_database_password(
        mgr,
        project,
        &target.name,
        database::POSTGRES_USER,
        &password,
    )
    .await?;
    target.postgres_password = password;

    let cert_paths = certificate::create_ssl_cert(
        mgr,
        project,
        &target.name,
        CleanupPhase::Finalize,
        &mut target.ssl_cert,
    )
    .await?;

    Ok(cert_paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_job_is_an_idempotent_success() {
        let result = classify_job("m", Some(JOB_STATE_COMPLETED), None).unwrap();
        assert_eq!(result, Some(PromotionReadiness::AlreadyPromoted));
    }

    #[test]
    fn promote_in_progress_is_an_idempotent_success() {
        let result =
            classify_job("m", Some(JOB_STATE_RUNNING), Some(JOB_PHASE_PROMOTE_IN_PROGRESS))
                .unwrap();
        assert_eq!(result, Some(PromotionReadiness::AlreadyPromoted));
    }

    #[test]
    fn running_cdc_still_needs_the_lag_gate() {
        let result = classify_job("m", Some(JOB_STATE_RUNNING), Some(JOB_PHASE_CDC)).unwrap();
        assert_eq!(result, None);

        let result =
            classify_job("m", Some(JOB_STATE_RUNNING), Some(JOB_PHASE_READY_FOR_PROMOTE)).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn anything_else_is_not_ready() {
        assert!(classify_job("m", Some("FAILED"), None).is_err());
        assert!(classify_job("m", None, None).is_err());
        assert!(classify_job("m", Some(JOB_STATE_RUNNING), Some("SETUP")).is_err());
    }
}
