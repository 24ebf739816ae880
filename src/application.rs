//! Application lifecycle during the migration
//!
//! The application is repointed to the new instance by mutating its spec
//! with the correlation-id protocol: stamp a fresh id, force a re-sync,
//! then wait until the operators report that exact id rolled out. Wall
//! clock is never trusted as a substitute for the observed stamp.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::json;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::InstanceSettings;
use crate::crd::{Application, ApplicationStatus, CONDITION_REASON_UP_TO_DATE};
use crate::database::{self, DatabaseError};
use crate::instance::define_instance;
use crate::k8s;
use crate::manager::Manager;
use crate::resolved::{self, GcpProject, Instance, ResolveError};
use crate::retry::{retry, retryable, terminal, RetryError};

/// Field manager for scale-subresource writes
const FIELD_MANAGER: &str = "cloudsql-migrator";

/// Sentinel hash forcing the operator to re-sync an unchanged spec
const RESYNC_HASH: &str = "resync";

const UPDATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const UPDATE_INTERVAL: Duration = Duration::from_secs(1);
const USER_READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const USER_READY_INTERVAL: Duration = Duration::from_secs(5);

/// Settle time between applying an application update and polling for the
/// operators' reaction
const OPERATOR_SETTLE_DELAY: Duration = Duration::from_secs(15);
const ROLLOUT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Instance(Box<crate::instance::InstanceError>),

    #[error("not ready: {0}")]
    NotReady(String),
}

pub type Result<T, E = ApplicationError> = std::result::Result<T, E>;

fn classify(err: kube::Error) -> RetryError<ApplicationError> {
    if k8s::is_retryable(&err) {
        retryable(err.into())
    } else {
        terminal(err.into())
    }
}

/// Scale the application's deployment through the scale subresource.
pub async fn scale_application(mgr: &Manager, replicas: i32) -> Result<()> {
    info!(name = %mgr.app_name, replicas, "scaling application");

    let deployments: Api<Deployment> = Api::namespaced(mgr.kube.clone(), &mgr.namespace);
    let patch = json!({ "spec": { "replicas": replicas } });
    deployments
        .patch_scale(
            &mgr.app_name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

    Ok(())
}

/// Point the application at the instance described by `settings` and wait
/// for the operators to finish rolling it out.
pub async fn update_application_instance(
    mgr: &Manager,
    settings: &InstanceSettings,
) -> Result<Application> {
    info!(name = %mgr.app_name, instance = %settings.name, "updating application to use new instance");

    let correlation_id = Uuid::new_v4().to_string();

    let mut app = retry(UPDATE_TIMEOUT, UPDATE_INTERVAL, || {
        let correlation_id = correlation_id.clone();
        async move {
            let mut app = mgr.apps.get(&mgr.app_name).await.map_err(classify)?;

            app.annotations_mut().insert(
                crate::crd::CORRELATION_ID_ANNOTATION.to_string(),
                correlation_id,
            );

            let target = define_instance(settings, &app)
                .map_err(|e| terminal(ApplicationError::Instance(Box::new(e))))?;
            if let Some(gcp) = app.spec.gcp.as_mut() {
                gcp.sql_instances = vec![target];
            }

            app.status
                .get_or_insert_with(ApplicationStatus::default)
                .synchronization_hash = Some(RESYNC_HASH.to_string());

            match mgr.apps.update(&app).await {
                Ok(updated) => {
                    info!(name = %mgr.app_name, "application update applied");
                    Ok(updated)
                }
                Err(err) if k8s::is_conflict(&err) => {
                    info!(name = %mgr.app_name, "retrying update of application");
                    Err(retryable(err.into()))
                }
                Err(err) => Err(classify(err)),
            }
        }
    })
    .await?;

    // Give the operators time to observe the change before polling status
    tokio::time::sleep(OPERATOR_SETTLE_DELAY).await;

    while !app.synchronized(&correlation_id) {
        info!(name = %app.name_any(), "waiting for app rollout");
        tokio::time::sleep(ROLLOUT_POLL_INTERVAL).await;
        app = mgr.apps.get(&mgr.app_name).await?;
    }

    Ok(app)
}

/// Rotate the application user's password on the target once the operator
/// reports the user converged.
pub async fn update_application_user(
    mgr: &Manager,
    project: &GcpProject,
    target: &Instance,
) -> Result<()> {
    info!(user = %target.app_username, "updating application user");

    retry(USER_READY_TIMEOUT, USER_READY_INTERVAL, || async {
        let user = match mgr.sql_users.get_opt(&target.app_username).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                info!(user = %target.app_username, "user not found, retrying");
                return Err(retryable(ApplicationError::NotReady(format!(
                    "SQLUser {} not found",
                    target.app_username
                ))));
            }
            Err(err) => return Err(classify(err)),
        };

        match user.condition().and_then(|c| c.reason.as_deref()) {
            Some(CONDITION_REASON_UP_TO_DATE) => Ok(()),
            _ => {
                info!(user = %target.app_username, "user not up to date, retrying");
                Err(retryable(ApplicationError::NotReady(format!(
                    "SQLUser {} not up to date",
                    target.app_username
                ))))
            }
        }
    })
    .await?;

    database::set_database_password(
        mgr,
        project,
        &target.name,
        &target.app_username,
        &target.app_password,
    )
    .await?;

    Ok(())
}

/// Switch off cascading delete on the application's instance entry so a
/// stray application deletion cannot take the instance with it.
pub async fn disable_cascading_delete(mgr: &Manager) -> Result<()> {
    info!(name = %mgr.app_name, "disabling cascading delete");

    retry(UPDATE_TIMEOUT, UPDATE_INTERVAL, || async {
        let mut app = mgr.apps.get(&mgr.app_name).await.map_err(classify)?;

        match app
            .spec
            .gcp
            .as_mut()
            .and_then(|gcp| gcp.sql_instances.first_mut())
        {
            Some(entry) => entry.cascading_delete = false,
            None => {
                return Err(terminal(ApplicationError::Resolve(
                    ResolveError::MissingSqlInstance(app.name_any()),
                )));
            }
        }

        match mgr.apps.update(&app).await {
            Ok(_) => Ok(()),
            Err(err) if k8s::is_conflict(&err) => Err(retryable(err.into())),
            Err(err) => Err(classify(err)),
        }
    })
    .await
}

/// Delete the helper application; absence is success.
pub async fn delete_helper_application(mgr: &Manager) -> Result<()> {
    let helper_name = resolved::helper_name(&mgr.app_name);
    info!(name = %helper_name, "deleting helper application");

    mgr.apps.delete(&helper_name).await?;
    Ok(())
}
