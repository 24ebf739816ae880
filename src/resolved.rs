//! Resolution of cluster and cloud state into a consistent snapshot
//!
//! Nothing here is persisted; every phase re-reads the authoritative state
//! through these lookups so that re-runs observe reality, not cached
//! assumptions.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::{Api, Client, ResourceExt};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::crd::{Application, CONDITION_REASON_UPDATE_FAILED, CONDITION_REASON_UP_TO_DATE};
use crate::manager::Manager;
use crate::retry::{retry, retryable, terminal};

/// Region is fixed for the whole deployment
pub const REGION: &str = "europe-north1";

/// Namespace annotation carrying the owning GCP project id
pub const PROJECT_ID_ANNOTATION: &str = "cnrm.cloud.google.com/project-id";

/// Maximum length accepted by the DMS API for job and profile names
const MAX_MIGRATION_NAME_LENGTH: usize = 60;

/// Maximum length for Kubernetes object names derived here
const MAX_HELPER_NAME_LENGTH: usize = 63;

/// How long to wait for the operators to produce a usable instance object
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const RESOLVE_INTERVAL: Duration = Duration::from_secs(5);

/// How long to wait for re-issued application credentials
const SECRET_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const SECRET_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("namespace {namespace} has no {PROJECT_ID_ANNOTATION} annotation")]
    MissingProjectAnnotation { namespace: String },

    #[error("application {0} does not have a sql instance")]
    MissingSqlInstance(String),

    #[error("application {0} does not have a database")]
    MissingDatabase(String),

    #[error("instance {instance} is not ready: {reason}")]
    InstanceNotReady { instance: String, reason: String },

    #[error("instance {0} has no public IP address")]
    MissingPublicIp(String),

    #[error("instance {0} has no outgoing IP address")]
    MissingOutgoingIp(String),

    #[error("secret {secret} is missing credentials for {instance}")]
    MissingCredentials { secret: String, instance: String },
}

pub type Result<T, E = ResolveError> = std::result::Result<T, E>;

fn classify_kube(err: kube::Error) -> crate::retry::RetryError<ResolveError> {
    if crate::k8s::is_retryable(&err) {
        retryable(err.into())
    } else {
        terminal(err.into())
    }
}

/// The GCP project owning both instances; URIs are derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpProject {
    pub id: String,
}

impl GcpProject {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// `projects/{id}/locations/{region}`
    pub fn parent_uri(&self) -> String {
        format!("projects/{}/locations/{}", self.id, REGION)
    }

    /// `projects/{id}/locations/{region}/{kind}/{name}`
    pub fn component_uri(&self, kind: &str, name: &str) -> String {
        format!("{}/{}/{}", self.parent_uri(), kind, name)
    }
}

/// SSL client material for one instance, filled in by the cert manager
#[derive(Debug, Clone, Default)]
pub struct SslCertMaterial {
    pub ca_cert: String,
    pub client_cert: String,
    pub client_key: String,
}

/// One managed Postgres endpoint, assembled from cluster state.
///
/// `postgres_password` and `ssl_cert` start empty and are populated by the
/// database-preparation steps of the running phase.
#[derive(Debug, Clone, Default)]
pub struct Instance {
    pub name: String,
    pub primary_ip: String,
    pub outgoing_ips: Vec<String>,
    pub app_username: String,
    pub app_password: String,
    pub postgres_password: String,
    pub ssl_cert: SslCertMaterial,
}

/// Read the project id annotation off the namespace object.
pub async fn resolve_gcp_project(client: &Client, namespace: &str) -> Result<GcpProject> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = namespaces.get(namespace).await?;

    ns.annotations()
        .get(PROJECT_ID_ANNOTATION)
        .map(|id| GcpProject::new(id.clone()))
        .ok_or_else(|| ResolveError::MissingProjectAnnotation {
            namespace: namespace.to_string(),
        })
}

/// Derive the instance name from the application's sole SQL-instance entry.
pub fn instance_name(app: &Application) -> Result<String> {
    let entry = app
        .sql_instance()
        .ok_or_else(|| ResolveError::MissingSqlInstance(app.name_any()))?;
    Ok(entry
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| app.name_any()))
}

/// Derive the database name from the sole database of the sole instance.
pub fn resolve_database_name(app: &Application) -> Result<String> {
    let entry = app
        .sql_instance()
        .ok_or_else(|| ResolveError::MissingSqlInstance(app.name_any()))?;
    if entry.databases.len() != 1 {
        return Err(ResolveError::MissingDatabase(app.name_any()));
    }
    let name = &entry.databases[0].name;
    Ok(if name.is_empty() {
        app.name_any()
    } else {
        name.clone()
    })
}

/// Assemble a consistent [`Instance`] for the application's instance,
/// waiting for the operators to converge it first.
///
/// With `require_outgoing_ip` the lookup additionally blocks until the
/// operator has populated at least one `OUTGOING` address.
pub async fn resolve_instance(
    mgr: &Manager,
    app: &Application,
    require_outgoing_ip: bool,
) -> Result<Instance> {
    let name = instance_name(app)?;

    let (primary_ip, outgoing_ips) = retry(RESOLVE_TIMEOUT, RESOLVE_INTERVAL, || async {
        let Some(object) = mgr
            .sql_instances
            .get_opt(&name)
            .await
            .map_err(|e| classify_kube(e))?
        else {
            return Err(retryable(ResolveError::InstanceNotReady {
                instance: name.clone(),
                reason: "object not found".to_string(),
            }));
        };

        match object.condition().and_then(|c| c.reason.as_deref()) {
            Some(CONDITION_REASON_UP_TO_DATE) => {}
            // The operator self-heals from failed updates, so this is
            // retryable rather than terminal
            Some(CONDITION_REASON_UPDATE_FAILED) => {
                return Err(retryable(ResolveError::InstanceNotReady {
                    instance: name.clone(),
                    reason: CONDITION_REASON_UPDATE_FAILED.to_string(),
                }));
            }
            other => {
                return Err(retryable(ResolveError::InstanceNotReady {
                    instance: name.clone(),
                    reason: other
                        .map(str::to_string)
                        .unwrap_or_else(|| "no conditions reported".to_string()),
                }));
            }
        }

        let status = object.status.as_ref();
        let Some(primary_ip) = status.and_then(|s| s.public_ip_address.clone()) else {
            return Err(retryable(ResolveError::MissingPublicIp(name.clone())));
        };

        let outgoing_ips: Vec<String> = status
            .map(|s| {
                s.ip_address
                    .iter()
                    .filter(|a| a.kind.as_deref() == Some("OUTGOING"))
                    .filter_map(|a| a.ip_address.clone())
                    .collect()
            })
            .unwrap_or_default();

        if require_outgoing_ip && outgoing_ips.is_empty() {
            return Err(retryable(ResolveError::MissingOutgoingIp(name.clone())));
        }

        Ok((primary_ip, outgoing_ips))
    })
    .await?;

    let (app_username, app_password) = resolve_credentials(mgr, app).await?;

    info!(instance = %name, primary_ip = %primary_ip, "resolved instance");

    Ok(Instance {
        name,
        primary_ip,
        outgoing_ips,
        app_username,
        app_password,
        postgres_password: String::new(),
        ssl_cert: SslCertMaterial::default(),
    })
}

/// Read the application credentials from the operator-managed secret,
/// guarding against stale credentials with the correlation-id annotation.
async fn resolve_credentials(mgr: &Manager, app: &Application) -> Result<(String, String)> {
    let app_name = app.name_any();
    let secret_name = format!("google-sql-{app_name}");
    let expected_correlation_id = app
        .status
        .as_ref()
        .and_then(|s| s.correlation_id.clone());

    let secrets: Api<Secret> = Api::namespaced(mgr.kube.clone(), &mgr.namespace);

    retry(SECRET_TIMEOUT, SECRET_INTERVAL, || {
        let secrets = secrets.clone();
        let secret_name = secret_name.clone();
        let expected = expected_correlation_id.clone();
        let app_name = app_name.clone();
        async move {
            let secret = match secrets.get_opt(&secret_name).await {
                Ok(Some(secret)) => secret,
                Ok(None) => {
                    return Err(retryable(ResolveError::MissingCredentials {
                        secret: secret_name,
                        instance: app_name,
                    }));
                }
                Err(err) => return Err(classify_kube(err)),
            };

            // Credentials issued for an older spec version must not be used
            if let Some(expected) = &expected {
                let observed = secret
                    .annotations()
                    .get(crate::crd::CORRELATION_ID_ANNOTATION);
                if observed != Some(expected) {
                    return Err(retryable(ResolveError::MissingCredentials {
                        secret: secret_name,
                        instance: app_name,
                    }));
                }
            }

            extract_credentials(secret.data.as_ref()).ok_or_else(|| {
                retryable(ResolveError::MissingCredentials {
                    secret: secret_name,
                    instance: app_name,
                })
            })
        }
    })
    .await
}

fn extract_credentials(
    data: Option<&BTreeMap<String, k8s_openapi::ByteString>>,
) -> Option<(String, String)> {
    let data = data?;
    let username = first_with_suffix(data, "_USERNAME")?;
    let password = first_with_suffix(data, "_PASSWORD")?;
    Some((username, password))
}

fn first_with_suffix(
    data: &BTreeMap<String, k8s_openapi::ByteString>,
    suffix: &str,
) -> Option<String> {
    data.iter()
        .find(|(key, _)| key.ends_with(suffix))
        .and_then(|(_, value)| String::from_utf8(value.0.clone()).ok())
}

/// Name of the migration job for a source/target pair, bounded for the
/// DMS API.
pub fn migration_name(source: &str, target: &str) -> String {
    shorten_name(&format!("{source}-{target}"), MAX_MIGRATION_NAME_LENGTH)
}

/// Name of the helper object (application or SSL cert) derived from a base
/// name, bounded for Kubernetes.
pub fn helper_name(base: &str) -> String {
    shorten_name(&format!("migrator-{base}"), MAX_HELPER_NAME_LENGTH)
}

/// Deterministic, collision-resistant shortening: names that fit are kept
/// verbatim; longer ones are truncated and suffixed with a hash of the
/// full name so distinct inputs stay distinct.
fn shorten_name(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }

    let digest = Sha256::digest(name.as_bytes());
    let suffix: String = digest
        .iter()
        .take(4)
        .map(|b| format!("{b:02x}"))
        .collect();

    let prefix = name
        .chars()
        .take(max_len - suffix.len() - 1)
        .collect::<String>();
    let prefix = prefix.trim_end_matches('-');

    format!("{prefix}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_uri_has_fixed_region() {
        let project = GcpProject::new("my-project");
        assert_eq!(
            project.parent_uri(),
            "projects/my-project/locations/europe-north1"
        );
    }

    #[test]
    fn component_uri_appends_kind_and_name() {
        let project = GcpProject::new("my-project");
        assert_eq!(
            project.component_uri("migrationJobs", "a-b"),
            "projects/my-project/locations/europe-north1/migrationJobs/a-b"
        );
    }

    #[test]
    fn short_names_are_unchanged() {
        assert_eq!(migration_name("myapp", "myapp-v2"), "myapp-myapp-v2");
    }

    #[test]
    fn migration_name_is_bounded() {
        let source = "a".repeat(80);
        let target = "b".repeat(80);
        let name = migration_name(&source, &target);
        assert!(name.len() <= 60);
    }

    #[test]
    fn migration_name_is_deterministic() {
        let source = "a".repeat(80);
        let target = "b".repeat(80);
        assert_eq!(
            migration_name(&source, &target),
            migration_name(&source, &target)
        );
    }

    #[test]
    fn long_distinct_names_stay_distinct() {
        let shared_prefix = "x".repeat(70);
        let a = migration_name(&shared_prefix, "tail-one");
        let b = migration_name(&shared_prefix, "tail-two");
        assert_ne!(a, b);
    }

    #[test]
    fn helper_name_is_prefixed_and_bounded() {
        assert_eq!(helper_name("myapp"), "migrator-myapp");
        let long = "y".repeat(100);
        assert!(helper_name(&long).len() <= 63);
    }

    #[test]
    fn shortened_names_have_no_trailing_dash_before_suffix() {
        // Truncation landing on a dash must not produce a double dash
        let name = format!("{}-{}", "a".repeat(54), "b".repeat(30));
        let shortened = shorten_name(&name, 60);
        assert!(!shortened.contains("--"));
        assert!(shortened.len() <= 60);
    }
}
