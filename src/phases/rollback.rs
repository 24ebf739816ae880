//! Rollback phase: abandon the migration and return to the source
//!
//! Safe at any point between setup and finalize. One side effect is not
//! undone: pgaudit flags stripped from the source during setup stay
//! stripped and must be re-enabled manually.

use tracing::warn;

use crate::application;
use crate::certificate;
use crate::config::RollbackConfig;
use crate::instance::{self, FINALIZE_LABEL};
use crate::manager::Manager;
use crate::migration;
use crate::netpol;
use crate::profile;
use crate::resolved;

use super::{PhaseResult, Steps};

pub const STEPS_TOTAL: u32 = 17;

/// Whether the application still points at the source instance, in which
/// case mutating steps need no scale-down.
pub fn application_on_source(app: &crate::crd::Application, source_name: &str) -> bool {
    resolved::instance_name(app)
        .map(|name| name == source_name)
        .unwrap_or(false)
}

pub async fn run(cfg: &RollbackConfig, mgr: &Manager) -> PhaseResult {
    let steps = Steps::new("Rollback", STEPS_TOTAL);

    let app = steps
        .run(1, "Getting application", mgr.apps.get(&mgr.app_name))
        .await?;

    if application_on_source(&app, &cfg.source_instance.name) {
        steps.skip(2, "Application still uses source instance, skipping scale down");
    } else {
        steps
            .run(2, "Scaling application to zero", async {
                application::scale_application(mgr, 0).await
            })
            .await?;
    }

    steps
        .run(3, "Deleting helper application", async {
            application::delete_helper_application(mgr).await
        })
        .await?;

    let project = steps
        .run(4, "Resolving GCP project", async {
            resolved::resolve_gcp_project(&mgr.kube, &mgr.namespace).await
        })
        .await?;

    let migration_name = steps
        .run(5, "Resolving migration name", async {
            Ok::<_, std::convert::Infallible>(resolved::migration_name(
                &cfg.source_instance.name,
                &cfg.common.target_instance.name,
            ))
        })
        .await?;

    steps
        .run(6, "Deleting migration job", async {
            migration::delete_migration_job(mgr, &project, &migration_name).await
        })
        .await?;

    steps
        .run(7, "Cleaning up connection profiles", async {
            profile::cleanup_connection_profiles(mgr, &project).await
        })
        .await?;

    steps
        .run(8, "Deleting target instance", async {
            instance::delete_instance(mgr, &project, &cfg.common.target_instance.name).await
        })
        .await?;

    steps
        .run(9, "Deleting target master instance", async {
            let master_name = format!("{}-master", cfg.common.target_instance.name);
            instance::delete_instance(mgr, &project, &master_name).await
        })
        .await?;

    steps
        .run(10, "Deleting target database resource", async {
            mgr.sql_databases
                .delete_collection_labeled(&format!("app={}", mgr.app_name))
                .await
        })
        .await?;

    steps
        .run(11, "Deleting old source certificate", async {
            let common_name = resolved::helper_name(&cfg.source_instance.name);
            certificate::delete_ssl_cert_by_common_name(
                mgr,
                &project,
                &cfg.source_instance.name,
                &common_name,
            )
            .await
        })
        .await?;

    steps
        .run(12, "Waiting for database resource to go away", async {
            instance::wait_for_sql_database_resource_to_go_away(mgr, &mgr.app_name).await
        })
        .await?;

    let app = steps
        .run(13, "Updating application to use source instance", async {
            application::update_application_instance(mgr, &cfg.source_instance).await
        })
        .await?;

    let source = steps
        .run(14, "Resolving source instance", async {
            resolved::resolve_instance(mgr, &app, false).await
        })
        .await?;

    steps
        .run(15, "Updating application user", async {
            application::update_application_user(mgr, &project, &source).await
        })
        .await?;

    let selector = format!("{FINALIZE_LABEL}={}", mgr.app_name);

    steps
        .run(16, "Deleting SQL SSL certificates used during migration", async {
            mgr.sql_ssl_certs.delete_collection_labeled(&selector).await
        })
        .await?;

    steps
        .run(17, "Deleting network policy used during migration", async {
            netpol::delete_labeled_network_policies(mgr, &selector).await
        })
        .await?;

    warn!("pgaudit flags stripped from the source during setup are not restored; re-enable them manually if they were in use");

    steps.complete();
    Ok(())
}
