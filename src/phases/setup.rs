//! Setup phase: provision the target and start continuous replication
//!
//! Idempotent by construction: re-running after a partial execution
//! adopts whatever already exists and converges to the same end state.

use crate::application;
use crate::backup;
use crate::certificate::{self, CleanupPhase};
use crate::config::Config;
use crate::database;
use crate::instance::{self, InstanceError};
use crate::manager::Manager;
use crate::migration;
use crate::netpol;
use crate::resolved;

use super::{PhaseResult, Steps};

pub const STEPS_TOTAL: u32 = 20;

/// Whether the configured names permit a migration at all.
pub fn validate_names(source_name: &str, target_name: &str) -> Result<(), InstanceError> {
    if source_name == target_name {
        return Err(InstanceError::Validation(
            "source and target instance cannot be the same".to_string(),
        ));
    }
    Ok(())
}

pub async fn run(cfg: &Config, mgr: &Manager) -> PhaseResult {
    let steps = Steps::new("Setup", STEPS_TOTAL);

    let project = steps
        .run(1, "Resolving GCP project", async {
            resolved::resolve_gcp_project(&mgr.kube, &mgr.namespace).await
        })
        .await?;

    let app = steps
        .run(2, "Getting application", mgr.apps.get(&mgr.app_name))
        .await?;

    let mut source = steps
        .run(3, "Resolving source instance", async {
            resolved::resolve_instance(mgr, &app, false).await
        })
        .await?;

    steps
        .run(4, "Checking source and target names", async {
            validate_names(&source.name, &cfg.target_instance.name)
        })
        .await?;

    let database_name = steps
        .run(5, "Resolving database name", async {
            resolved::resolve_database_name(&app)
        })
        .await?;

    steps
        .run(6, "Validating source instance", async {
            instance::validate_source_instance(mgr, &project, &source).await
        })
        .await?;

    let mut target = steps
        .run(7, "Creating target instance", async {
            instance::create_target_instance(mgr, cfg, &source).await?;
            let helper = mgr
                .apps
                .get(&resolved::helper_name(&mgr.app_name))
                .await
                .map_err(InstanceError::from)?;
            resolved::resolve_instance(mgr, &helper, false)
                .await
                .map_err(InstanceError::from)
        })
        .await?;

    steps
        .run(8, "Deleting application database from target instance", async {
            instance::delete_helper_target_database(mgr, &project, &target.name, &database_name)
                .await
        })
        .await?;

    steps
        .run(9, "Creating backup of source instance", async {
            backup::create_backup(mgr, cfg, &project, &source.name).await
        })
        .await?;

    steps
        .run(10, "Disabling cascading delete", async {
            application::disable_cascading_delete(mgr).await
        })
        .await?;

    steps
        .run(11, "Creating network policy", async {
            netpol::create_network_policy(mgr, &source, &target).await
        })
        .await?;

    steps
        .run(12, "Preparing source instance", async {
            instance::prepare_source_instance(mgr, cfg, &source, &target).await
        })
        .await?;

    steps
        .run(13, "Preparing source database", async {
            prepare_source_database(mgr, cfg, &project, &mut source, &database_name).await
        })
        .await?;

    steps
        .run(14, "Preparing target instance", async {
            instance::prepare_target_instance(mgr, cfg, &target).await
        })
        .await?;

    steps
        .run(15, "Preparing target database", async {
            prepare_target_database(mgr, cfg, &project, &mut target).await
        })
        .await?;

    let migration_name = steps
        .run(16, "Preparing migration job", async {
            migration::prepare_migration_job(mgr, &project, &source, &target).await
        })
        .await?;

    let helper = steps
        .run(
            17,
            "Getting helper application",
            mgr.apps.get(&resolved::helper_name(&mgr.app_name)),
        )
        .await?;

    let target = steps
        .run(18, "Resolving target instance outgoing IPs", async {
            resolved::resolve_instance(mgr, &helper, true).await
        })
        .await?;

    steps
        .run(19, "Authorizing target outgoing IPs on source", async {
            instance::add_target_outgoing_ips_to_source_auth_networks(mgr, &source, &target).await
        })
        .await?;

    steps
        .run(20, "Starting migration job", async {
            migration::start_migration_job(mgr, &project, &migration_name).await
        })
        .await?;

    steps.complete();
    Ok(())
}

/// Set the postgres password, issue a client certificate (labelled for
/// post-migration cleanup) and install pglogical on both source databases.
async fn prepare_source_database(
    mgr: &Manager,
    cfg: &Config,
    project: &resolved::GcpProject,
    source: &mut resolved::Instance,
    database_name: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let password = database::make_password(&cfg.development);
    database::set_database_password(
        mgr,
        project,
        &source.name,
        database::POSTGRES_USER,
        &password,
    )
    .await?;
    source.postgres_password = password;

    let cert_paths = certificate::create_ssl_cert(
        mgr,
        project,
        &source.name,
        CleanupPhase::Cleanup,
        &mut source.ssl_cert,
    )
    .await?;

    database::install_extension(source, database_name, &cert_paths).await?;
    Ok(())
}

/// Set the postgres password on the target and issue its certificate.
async fn prepare_target_database(
    mgr: &Manager,
    cfg: &Config,
    project: &resolved::GcpProject,
    target: &mut resolved::Instance,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
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

    certificate::create_ssl_cert(
        mgr,
        project,
        &target.name,
        CleanupPhase::Cleanup,
        &mut target.ssl_cert,
    )
    .await?;

    Ok(())
}
