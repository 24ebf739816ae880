//! Instance lifecycle management
//!
//! The target instance is never created directly: a helper application is
//! written instead, and the external operator chain provisions the
//! instance together with its IAM bindings, users, databases, secrets and
//! certificates — the same way the source was provisioned. Everything
//! else here mutates declarative SQLInstance objects with the
//! fetch-mutate-update-retry-on-conflict idiom and waits for the operator
//! to report readiness.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::ObjectMeta;
use kube::ResourceExt;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, InstanceSettings};
use crate::crd::{
    Application, ApplicationSpec, AuthorizedNetwork, BackupConfiguration, CloudSqlInstance,
    DatabaseFlag, GcpSpec, InstanceFlag, Replicas, SQLInstance, CORRELATION_ID_ANNOTATION,
};
use crate::gcp::GcpError;
use crate::k8s;
use crate::manager::Manager;
use crate::resolved::{self, GcpProject, Instance, ResolveError};
use crate::retry::{retry, retryable, terminal, RetryError};

/// Authorized-network entries owned by this tool carry this name prefix;
/// only such entries are ever removed during cleanup.
pub const MIGRATOR_AUTH_NETWORK_PREFIX: &str = "migrator:";

/// Label marking objects to be removed by cleanup after a finished migration
pub const CLEANUP_LABEL: &str = "migrator.nais.io/cleanup";

/// Label marking objects to be removed during finalize/rollback
pub const FINALIZE_LABEL: &str = "migrator.nais.io/finalize";

/// Replica image for the helper application; it only needs to exist
const HELPER_APP_IMAGE: &str =
    "europe-north1-docker.pkg.dev/nais-io/nais/images/kafka-debug:latest";

/// Public echo service used to discover the local outgoing IP
const IP_ECHO_URL: &str = "https://api.ipify.org";
const IP_ECHO_TIMEOUT: Duration = Duration::from_secs(15);

/// Private networks must live on the platform VPC
const PRIVATE_NETWORK_PREFIX: &str = "projects/nais-";
const PRIVATE_NETWORK_SUFFIX: &str = "/global/networks/nais-vpc";

/// Logical-replication flags required on the source during CDC
const FLAG_ENABLE_PGLOGICAL: &str = "cloudsql.enable_pglogical";
const FLAG_LOGICAL_DECODING: &str = "cloudsql.logical_decoding";

const UPDATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const UPDATE_INTERVAL: Duration = Duration::from_secs(3);
const READY_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const READY_INTERVAL: Duration = Duration::from_secs(3);
const ROLLOUT_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const ROLLOUT_INTERVAL: Duration = Duration::from_secs(5);
const DELETE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DELETE_INTERVAL: Duration = Duration::from_secs(10);
const CNRM_WAIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const CNRM_WAIT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Google API error: {0}")]
    Gcp(#[from] GcpError),

    #[error("resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("outgoing IP lookup failed: {0}")]
    IpLookup(#[from] reqwest::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not ready: {0}")]
    NotReady(String),
}

pub type Result<T, E = InstanceError> = std::result::Result<T, E>;

fn classify(err: kube::Error) -> RetryError<InstanceError> {
    if k8s::is_retryable(&err) {
        retryable(err.into())
    } else {
        terminal(err.into())
    }
}

/// Shape the target instance as a deep copy of the application's source
/// entry with the configured overrides applied.
///
/// Cascading delete is always disabled; enabling disk autoresize clears
/// the explicit disk size so the two never conflict.
pub fn define_instance(
    settings: &InstanceSettings,
    app: &Application,
) -> Result<CloudSqlInstance> {
    let source = app
        .sql_instance()
        .ok_or_else(|| ResolveError::MissingSqlInstance(app.name_any()))?;

    let mut target = source.clone();
    target.name = Some(settings.name.clone());
    target.cascading_delete = false;

    if let Some(kind) = &settings.kind {
        target.kind = Some(kind.clone());
    }
    if let Some(tier) = &settings.tier {
        target.tier = Some(tier.clone());
    }
    if let Some(disk_size) = settings.disk_size {
        target.disk_size = Some(disk_size);
    }
    if let Some(autoresize) = settings.disk_autoresize {
        target.disk_autoresize = Some(autoresize);
        if autoresize {
            target.disk_size = None;
        }
    }

    Ok(target)
}

fn is_pgaudit_flag(name: &str) -> bool {
    name == "cloudsql.enable_pgaudit" || name.starts_with("pgaudit.")
}

/// Remove every pgaudit flag from a declarative instance; returns whether
/// any were present. The pgaudit shared library must not be loaded while
/// the migration job replicates.
pub fn strip_pgaudit_flags(flags: &mut Vec<DatabaseFlag>) -> bool {
    let before = flags.len();
    flags.retain(|flag| !is_pgaudit_flag(&flag.name));
    flags.len() != before
}

/// Same stripping for the application-level flag list.
pub fn strip_pgaudit_app_flags(flags: &mut Vec<InstanceFlag>) -> bool {
    let before = flags.len();
    flags.retain(|flag| !is_pgaudit_flag(&flag.name));
    flags.len() != before
}

/// Append an authorized network unless an entry with the same CIDR exists.
pub fn append_auth_net_if_not_exists(
    networks: &mut Vec<AuthorizedNetwork>,
    entry: AuthorizedNetwork,
) {
    if networks.iter().any(|n| n.value == entry.value) {
        return;
    }
    networks.push(entry);
}

/// Remove every authorized network owned by this tool, identified by the
/// `migrator:` name prefix. Returns whether anything was removed.
pub fn remove_migration_auth_networks(networks: &mut Vec<AuthorizedNetwork>) -> bool {
    let before = networks.len();
    networks.retain(|n| {
        !n.name
            .as_deref()
            .map(|name| name.starts_with(MIGRATOR_AUTH_NETWORK_PREFIX))
            .unwrap_or(false)
    });
    networks.len() != before
}

/// Ensure a database flag is set to `on`.
fn set_flag(flags: &mut Vec<DatabaseFlag>, name: &str) {
    match flags.iter_mut().find(|flag| flag.name == name) {
        Some(flag) => flag.value = "on".to_string(),
        None => flags.push(DatabaseFlag {
            name: name.to_string(),
            value: "on".to_string(),
        }),
    }
}

/// Create the target instance by writing a helper application and waiting
/// for the operators to roll it out.
///
/// Idempotent: an existing helper is adopted and only waited on.
pub async fn create_target_instance(mgr: &Manager, cfg: &Config, source: &Instance) -> Result<()> {
    let app = mgr.apps.get(&mgr.app_name).await?;
    let target = define_instance(&cfg.target_instance, &app)?;
    let helper_name = resolved::helper_name(&mgr.app_name);

    let helper = match mgr.apps.get_opt(&helper_name).await? {
        Some(existing) => {
            info!(helper = %helper_name, "helper application already exists");
            existing
        }
        None => {
            let helper = build_helper_application(cfg, &app, &target, source, &helper_name);
            info!(helper = %helper_name, "creating helper application for target instance");
            mgr.apps.create(&helper).await?
        }
    };

    let expected_correlation_id = helper
        .annotations()
        .get(CORRELATION_ID_ANNOTATION)
        .cloned()
        .unwrap_or_default();

    retry(ROLLOUT_TIMEOUT, ROLLOUT_INTERVAL, || async {
        // A get may briefly 404 right after the create call propagates
        let helper = match mgr.apps.get_opt(&helper_name).await {
            Ok(Some(helper)) => helper,
            Ok(None) => {
                return Err(retryable(InstanceError::NotReady(format!(
                    "helper application {helper_name} not visible yet"
                ))));
            }
            Err(err) => return Err(classify(err)),
        };
        if helper.rollout_complete(&expected_correlation_id) {
            Ok(())
        } else {
            info!(helper = %helper_name, "waiting for helper application rollout");
            Err(retryable(InstanceError::NotReady(format!(
                "helper application {helper_name} not rolled out"
            ))))
        }
    })
    .await?;

    info!(helper = %helper_name, target = %cfg.target_instance.name, "target instance created");
    Ok(())
}

fn build_helper_application(
    cfg: &Config,
    app: &Application,
    target: &CloudSqlInstance,
    source: &Instance,
    helper_name: &str,
) -> Application {
    // HA and PITR stay off and pgaudit stays unloaded while the migration
    // job owns the target; the source settings are restored after promotion.
    let mut target = target.clone();
    target.high_availability = false;
    target.point_in_time_recovery = false;
    strip_pgaudit_app_flags(&mut target.flags);

    Application {
        metadata: ObjectMeta {
            name: Some(helper_name.to_string()),
            namespace: Some(cfg.namespace.clone()),
            labels: Some(BTreeMap::from([
                ("app".to_string(), app.name_any()),
                ("team".to_string(), cfg.namespace.clone()),
                (CLEANUP_LABEL.to_string(), app.name_any()),
            ])),
            annotations: Some(BTreeMap::from([
                (
                    "migrator.nais.io/source-instance".to_string(),
                    source.name.clone(),
                ),
                (
                    "migrator.nais.io/target-instance".to_string(),
                    cfg.target_instance.name.clone(),
                ),
                (
                    CORRELATION_ID_ANNOTATION.to_string(),
                    Uuid::new_v4().to_string(),
                ),
            ])),
            ..Default::default()
        },
        spec: ApplicationSpec {
            image: HELPER_APP_IMAGE.to_string(),
            replicas: Some(Replicas {
                min: Some(1),
                max: Some(1),
                ..Default::default()
            }),
            gcp: Some(GcpSpec {
                sql_instances: vec![target],
                ..Default::default()
            }),
            rest: Default::default(),
        },
        status: None,
    }
}

/// Delete the extra database the helper provisioned on the target; the
/// migration job re-creates and populates it.
pub async fn delete_helper_target_database(
    mgr: &Manager,
    project: &GcpProject,
    target_name: &str,
    database_name: &str,
) -> Result<()> {
    let helper_name = resolved::helper_name(&mgr.app_name);

    info!("deleting kubernetes database resource for target instance");
    mgr.sql_databases
        .delete_collection_labeled(&format!("app={helper_name}"))
        .await?;

    info!(database = %database_name, instance = %target_name, "deleting database in target instance");
    retry(DELETE_TIMEOUT, Duration::from_secs(5), || async {
        let op = match mgr
            .sql_admin
            .delete_database(&project.id, target_name, database_name)
            .await
        {
            Ok(op) => op,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(retryable(InstanceError::from(err))),
        };
        mgr.sql_admin
            .wait_for_operation(&project.id, op, Duration::from_secs(1))
            .await
            .map_err(|e| retryable(InstanceError::from(e)))
    })
    .await
}

/// Prepare the source instance for replication: authorize the target,
/// enable logical decoding, drop pgaudit.
pub async fn prepare_source_instance(
    mgr: &Manager,
    cfg: &Config,
    source: &Instance,
    target: &Instance,
) -> Result<()> {
    info!(instance = %source.name, "preparing source instance for migration");

    let dev_network = if cfg.development.add_auth_network {
        Some(development_auth_network().await?)
    } else {
        None
    };

    retry(UPDATE_TIMEOUT, UPDATE_INTERVAL, || {
        let dev_network = dev_network.clone();
        async move {
            let mut object = mgr.sql_instances.get(&source.name).await.map_err(classify)?;
            let settings = &mut object.spec.settings;

            if let Some(outgoing_ip) = target.outgoing_ips.first() {
                append_auth_net_if_not_exists(
                    &mut settings.ip_configuration.authorized_networks,
                    AuthorizedNetwork {
                        name: Some(target.name.clone()),
                        value: format!("{outgoing_ip}/32"),
                    },
                );
            }
            if let Some(network) = dev_network {
                append_auth_net_if_not_exists(
                    &mut settings.ip_configuration.authorized_networks,
                    network,
                );
            }

            set_flag(&mut settings.database_flags, FLAG_ENABLE_PGLOGICAL);
            set_flag(&mut settings.database_flags, FLAG_LOGICAL_DECODING);
            strip_pgaudit_flags(&mut settings.database_flags);

            update_instance_object(mgr, &object).await
        }
    })
    .await?;

    wait_for_instance_ready(mgr, &source.name).await?;
    info!(instance = %source.name, "source instance prepared for migration");
    Ok(())
}

/// Authorize every outgoing IP the target has developed on the source.
/// Idempotent; new addresses may keep appearing after setup started.
pub async fn add_target_outgoing_ips_to_source_auth_networks(
    mgr: &Manager,
    source: &Instance,
    target: &Instance,
) -> Result<()> {
    retry(UPDATE_TIMEOUT, UPDATE_INTERVAL, || async {
        let mut object = mgr.sql_instances.get(&source.name).await.map_err(classify)?;
        let networks = &mut object.spec.settings.ip_configuration.authorized_networks;

        for (i, outgoing_ip) in target.outgoing_ips.iter().enumerate() {
            append_auth_net_if_not_exists(
                networks,
                AuthorizedNetwork {
                    name: Some(format!("{}-{}", target.name, i)),
                    value: format!("{outgoing_ip}/32"),
                },
            );
        }

        update_instance_object(mgr, &object).await
    })
    .await?;

    wait_for_instance_ready(mgr, &source.name).await
}

/// Prepare the target instance for its replica role: no backups, no PITR,
/// zonal availability, no pgaudit.
pub async fn prepare_target_instance(mgr: &Manager, cfg: &Config, target: &Instance) -> Result<()> {
    info!(instance = %target.name, "preparing target instance for migration");

    let dev_network = if cfg.development.add_auth_network {
        Some(development_auth_network().await?)
    } else {
        None
    };

    retry(UPDATE_TIMEOUT, UPDATE_INTERVAL, || {
        let dev_network = dev_network.clone();
        async move {
            let mut object = mgr.sql_instances.get(&target.name).await.map_err(classify)?;
            let settings = &mut object.spec.settings;

            settings.backup_configuration = Some(BackupConfiguration {
                enabled: Some(false),
                point_in_time_recovery_enabled: Some(false),
                ..Default::default()
            });
            settings.availability_type = Some("ZONAL".to_string());
            strip_pgaudit_flags(&mut settings.database_flags);

            if let Some(network) = dev_network {
                append_auth_net_if_not_exists(
                    &mut settings.ip_configuration.authorized_networks,
                    network,
                );
            }

            update_instance_object(mgr, &object).await
        }
    })
    .await?;

    wait_for_instance_ready(mgr, &target.name).await?;
    info!(instance = %target.name, "target instance prepared for migration");
    Ok(())
}

/// Promote the target object to a standalone primary and restore the
/// availability and backup settings the source carried.
pub async fn update_target_instance_after_promotion(
    mgr: &Manager,
    source_name: &str,
    target_name: &str,
) -> Result<()> {
    let source = mgr.sql_instances.get(source_name).await?;
    let source_settings = source.spec.settings.clone();

    retry(UPDATE_TIMEOUT, UPDATE_INTERVAL, || {
        let source_settings = source_settings.clone();
        async move {
            let mut object = mgr.sql_instances.get(target_name).await.map_err(classify)?;

            object.spec.instance_type = Some("CLOUD_SQL_INSTANCE".to_string());
            object.spec.master_instance_ref = None;
            object.spec.settings.availability_type = source_settings.availability_type.clone();
            object.spec.settings.backup_configuration = source_settings.backup_configuration.clone();

            update_instance_object(mgr, &object).await
        }
    })
    .await?;

    wait_for_instance_ready(mgr, target_name).await?;
    info!(instance = %target_name, "target instance updated after promotion");
    Ok(())
}

/// Wait until the declarative SQLInstance and SQLUser named after the old
/// instance have either disappeared or been adopted by the application.
///
/// Both waiters run concurrently and both must succeed.
pub async fn wait_for_cnrm_resources_to_go_away(
    mgr: &Manager,
    instance_name: &str,
    app_name: &str,
) -> Result<()> {
    let instances = async {
        retry(CNRM_WAIT_TIMEOUT, CNRM_WAIT_INTERVAL, || async {
            match mgr.sql_instances.get_opt(instance_name).await {
                Ok(None) => Ok(()),
                Ok(Some(object)) if owned_by(object.owner_references(), app_name) => Ok(()),
                Ok(Some(_)) => Err(retryable(InstanceError::NotReady(format!(
                    "SQLInstance {instance_name} still present"
                )))),
                Err(err) => Err(classify(err)),
            }
        })
        .await
    };

    let users = async {
        retry(CNRM_WAIT_TIMEOUT, CNRM_WAIT_INTERVAL, || async {
            match mgr.sql_users.get_opt(instance_name).await {
                Ok(None) => Ok(()),
                Ok(Some(object)) if owned_by(object.owner_references(), app_name) => Ok(()),
                Ok(Some(_)) => Err(retryable(InstanceError::NotReady(format!(
                    "SQLUser {instance_name} still present"
                )))),
                Err(err) => Err(classify(err)),
            }
        })
        .await
    };

    tokio::try_join!(instances, users)?;
    Ok(())
}

fn owned_by(owners: &[OwnerReference], app_name: &str) -> bool {
    owners.iter().any(|owner| owner.name == app_name)
}

/// Wait until no labelled SQLDatabase resources remain for the application.
pub async fn wait_for_sql_database_resource_to_go_away(
    mgr: &Manager,
    app_name: &str,
) -> Result<()> {
    retry(CNRM_WAIT_TIMEOUT, CNRM_WAIT_INTERVAL, || async {
        let remaining = mgr
            .sql_databases
            .list_labeled(&format!("app={app_name}"))
            .await
            .map_err(classify)?;
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(retryable(InstanceError::NotReady(format!(
                "{} SQLDatabase resources still present",
                remaining.len()
            ))))
        }
    })
    .await
}

/// Validate the source before any mutation and surface advisory warnings
/// for settings the migration will change.
pub async fn validate_source_instance(
    mgr: &Manager,
    project: &GcpProject,
    source: &Instance,
) -> Result<()> {
    let raw = retry(UPDATE_TIMEOUT, Duration::from_secs(5), || async {
        mgr.sql_admin
            .get_instance(&project.id, &source.name)
            .await
            .map_err(|e| retryable(InstanceError::from(e)))
    })
    .await?;

    let settings = raw.settings.as_ref();

    if let Some(private_network) = settings
        .and_then(|s| s.ip_configuration.as_ref())
        .and_then(|ip| ip.private_network.as_deref())
    {
        if !private_network.starts_with(PRIVATE_NETWORK_PREFIX)
            || !private_network.ends_with(PRIVATE_NETWORK_SUFFIX)
        {
            return Err(InstanceError::Validation(format!(
                "source instance has unsupported private network {private_network}"
            )));
        }
    }

    let app = mgr.apps.get(&mgr.app_name).await?;
    if let Some(entry) = app.sql_instance() {
        if entry
            .databases
            .first()
            .and_then(|db| db.env_var_prefix.as_deref())
            .is_some()
        {
            warn!(
                "application uses a custom env var prefix; generated variable names will change with the new instance"
            );
        }
    }

    if let Some(settings) = settings {
        if settings
            .backup_configuration
            .as_ref()
            .map(|b| b.point_in_time_recovery_enabled)
            .unwrap_or(false)
        {
            warn!("point-in-time recovery is enabled on the source; it will be disabled on the target during migration");
        }
        if settings.availability_type.as_deref() == Some("REGIONAL") {
            warn!("high availability is enabled on the source; it will be disabled on the target during migration");
        }
        if settings
            .database_flags
            .iter()
            .any(|flag| is_pgaudit_flag(&flag.name))
        {
            warn!("pgaudit flags are set on the source; they will be dropped and must be re-enabled manually after migration");
        }
    }

    Ok(())
}

/// Delete a managed instance. Absence is success; the managed API deletes
/// asynchronously so the delete itself is fire-and-forget.
pub async fn delete_instance(mgr: &Manager, project: &GcpProject, name: &str) -> Result<()> {
    retry(DELETE_TIMEOUT, DELETE_INTERVAL, || async {
        match mgr.sql_admin.get_instance(&project.id, name).await {
            Err(err) if err.is_not_found() => {
                info!(instance = %name, "instance not found, skipping deletion");
                return Ok(());
            }
            Err(err) => return Err(retryable(InstanceError::from(err))),
            Ok(_) => {}
        }

        info!(instance = %name, "deleting instance");
        match mgr.sql_admin.delete_instance(&project.id, name).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(retryable(InstanceError::from(err))),
        }
    })
    .await
}

/// Remove every `migrator:`-owned authorized network from the target.
pub async fn cleanup_auth_networks(mgr: &Manager, target_name: &str) -> Result<()> {
    retry(UPDATE_TIMEOUT, UPDATE_INTERVAL, || async {
        let mut object = mgr.sql_instances.get(target_name).await.map_err(classify)?;
        let networks = &mut object.spec.settings.ip_configuration.authorized_networks;

        if !remove_migration_auth_networks(networks) {
            return Ok(());
        }

        update_instance_object(mgr, &object).await
    })
    .await
}

/// Discover the workstation's outgoing IP and shape it as a tool-owned
/// authorized network named `migrator:<user>@<host>`.
async fn development_auth_network() -> Result<AuthorizedNetwork> {
    let outgoing_ip = get_outgoing_ip().await?;

    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    Ok(AuthorizedNetwork {
        name: Some(format!("{MIGRATOR_AUTH_NETWORK_PREFIX}{user}@{host}")),
        value: format!("{outgoing_ip}/32"),
    })
}

/// Resolve the local outgoing IP through the public echo service.
pub async fn get_outgoing_ip() -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(IP_ECHO_TIMEOUT)
        .build()?;
    let ip = client
        .get(IP_ECHO_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(ip.trim().to_string())
}

/// Write the mutated object back; a 409 is surfaced as retryable so the
/// enclosing loop refetches and reapplies the mutation.
async fn update_instance_object(
    mgr: &Manager,
    object: &SQLInstance,
) -> std::result::Result<(), RetryError<InstanceError>> {
    match mgr.sql_instances.update(object).await {
        Ok(_) => Ok(()),
        Err(err) if k8s::is_conflict(&err) => {
            info!(instance = %object.name_any(), "conflicting instance update, retrying");
            Err(retryable(err.into()))
        }
        Err(err) => Err(classify(err)),
    }
}

/// Poll the declarative object until the operator reports it converged.
async fn wait_for_instance_ready(mgr: &Manager, name: &str) -> Result<()> {
    retry(READY_TIMEOUT, READY_INTERVAL, || async {
        let object = mgr.sql_instances.get(name).await.map_err(classify)?;
        if object.is_ready() {
            Ok(())
        } else {
            info!(instance = %name, "waiting for instance to be ready");
            Err(retryable(InstanceError::NotReady(format!(
                "instance {name} not ready"
            ))))
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(names: &[&str]) -> Vec<DatabaseFlag> {
        names
            .iter()
            .map(|name| DatabaseFlag {
                name: name.to_string(),
                value: "on".to_string(),
            })
            .collect()
    }

    #[test]
    fn strips_exactly_pgaudit_flags() {
        let mut set = flags(&[
            "cloudsql.enable_pgaudit",
            "pgaudit.log",
            "pgaudit.role",
            "cloudsql.enable_pglogical",
            "max_connections",
        ]);
        assert!(strip_pgaudit_flags(&mut set));
        let names: Vec<&str> = set.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["cloudsql.enable_pglogical", "max_connections"]);
    }

    #[test]
    fn strip_is_idempotent() {
        let mut set = flags(&["pgaudit.log", "work_mem"]);
        assert!(strip_pgaudit_flags(&mut set));
        assert!(!strip_pgaudit_flags(&mut set));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn append_auth_net_is_idempotent_on_value() {
        let mut networks = vec![AuthorizedNetwork {
            name: Some("existing".to_string()),
            value: "10.0.0.1/32".to_string(),
        }];

        append_auth_net_if_not_exists(
            &mut networks,
            AuthorizedNetwork {
                name: Some("other-name-same-value".to_string()),
                value: "10.0.0.1/32".to_string(),
            },
        );
        assert_eq!(networks.len(), 1);

        append_auth_net_if_not_exists(
            &mut networks,
            AuthorizedNetwork {
                name: Some("new".to_string()),
                value: "10.0.0.2/32".to_string(),
            },
        );
        assert_eq!(networks.len(), 2);
    }

    #[test]
    fn removes_only_migrator_owned_networks() {
        let mut networks = vec![
            AuthorizedNetwork {
                name: Some("migrator:dev@laptop".to_string()),
                value: "1.2.3.4/32".to_string(),
            },
            AuthorizedNetwork {
                name: Some("office".to_string()),
                value: "5.6.7.8/32".to_string(),
            },
            AuthorizedNetwork {
                name: None,
                value: "9.9.9.9/32".to_string(),
            },
        ];

        assert!(remove_migration_auth_networks(&mut networks));
        assert_eq!(networks.len(), 2);
        assert!(networks.iter().all(|n| {
            n.name
                .as_deref()
                .map(|name| !name.starts_with(MIGRATOR_AUTH_NETWORK_PREFIX))
                .unwrap_or(true)
        }));

        assert!(!remove_migration_auth_networks(&mut networks));
    }

    #[test]
    fn set_flag_appends_or_mutates() {
        let mut set = vec![DatabaseFlag {
            name: FLAG_ENABLE_PGLOGICAL.to_string(),
            value: "off".to_string(),
        }];

        set_flag(&mut set, FLAG_ENABLE_PGLOGICAL);
        set_flag(&mut set, FLAG_LOGICAL_DECODING);

        assert_eq!(set.len(), 2);
        assert!(set.iter().all(|f| f.value == "on"));
    }
}
