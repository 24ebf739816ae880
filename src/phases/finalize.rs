//! Finalize phase: tear down the source and every migration artifact
//!
//! Runs after the application has been verified on the target. The source
//! instance name comes from configuration because the application no
//! longer references it.

use crate::config::FinalizeConfig;
use crate::instance::{self, FINALIZE_LABEL};
use crate::manager::Manager;
use crate::migration;
use crate::netpol;
use crate::profile;
use crate::resolved;

use super::{PhaseResult, Steps};

pub const STEPS_TOTAL: u32 = 11;

pub async fn run(cfg: &FinalizeConfig, mgr: &Manager) -> PhaseResult {
    let steps = Steps::new("Finalize", STEPS_TOTAL);

    let project = steps
        .run(1, "Resolving GCP project", async {
            resolved::resolve_gcp_project(&mgr.kube, &mgr.namespace).await
        })
        .await?;

    let app = steps
        .run(2, "Getting application", mgr.apps.get(&mgr.app_name))
        .await?;

    let target = steps
        .run(3, "Resolving target instance", async {
            resolved::resolve_instance(mgr, &app, false).await
        })
        .await?;

    let migration_name = steps
        .run(4, "Resolving migration name", async {
            Ok::<_, std::convert::Infallible>(resolved::migration_name(
                &cfg.source_instance_name,
                &target.name,
            ))
        })
        .await?;

    steps
        .run(5, "Deleting migration job", async {
            migration::delete_migration_job(mgr, &project, &migration_name).await
        })
        .await?;

    steps
        .run(6, "Cleaning up connection profiles", async {
            profile::cleanup_connection_profiles(mgr, &project).await
        })
        .await?;

    steps
        .run(7, "Deleting master instance", async {
            let master_name = format!("{}-master", target.name);
            instance::delete_instance(mgr, &project, &master_name).await
        })
        .await?;

    steps
        .run(8, "Deleting source instance", async {
            instance::delete_instance(mgr, &project, &cfg.source_instance_name).await
        })
        .await?;

    steps
        .run(9, "Cleaning up authorized networks", async {
            instance::cleanup_auth_networks(mgr, &target.name).await
        })
        .await?;

    let selector = format!("{FINALIZE_LABEL}={}", mgr.app_name);

    steps
        .run(10, "Deleting SQL SSL certificates used during migration", async {
            mgr.sql_ssl_certs.delete_collection_labeled(&selector).await
        })
        .await?;

    steps
        .run(11, "Deleting network policy used during migration", async {
            netpol::delete_labeled_network_policies(mgr, &selector).await
        })
        .await?;

    steps.complete();
    Ok(())
}
