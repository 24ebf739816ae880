//! Connection profiles in the database-migration service
//!
//! One profile per endpoint, id `<role>-<appName>`. Profiles cannot be
//! updated in place, so creation always deletes any prior profile of the
//! same id first.

use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::database::{DATABASE_PORT, POSTGRES_USER};
use crate::gcp::dms::{ConnectionProfile, PostgresqlConnectionProfile, SslConfig, StaticIpConnectivity};
use crate::gcp::GcpError;
use crate::manager::Manager;
use crate::resolved::{GcpProject, Instance};
use crate::retry::{retry, retryable};

const DELETE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DELETE_INTERVAL: Duration = Duration::from_secs(5);
const OPERATION_INTERVAL: Duration = Duration::from_secs(5);

const ROLE_SOURCE: &str = "source";
const ROLE_TARGET: &str = "target";

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Google API error: {0}")]
    Gcp(#[from] GcpError),
}

pub type Result<T, E = ProfileError> = std::result::Result<T, E>;

fn profile_id(role: &str, app_name: &str) -> String {
    format!("{role}-{app_name}")
}

/// Create the source and target connection profiles, replacing any prior
/// profiles of the same ids.
pub async fn create_connection_profiles(
    mgr: &Manager,
    project: &GcpProject,
    source: &Instance,
    target: &Instance,
) -> Result<()> {
    for (role, instance) in [(ROLE_SOURCE, source), (ROLE_TARGET, target)] {
        let id = profile_id(role, &mgr.app_name);

        delete_connection_profile(mgr, project, &id).await?;

        info!(profile = %id, "creating connection profile");
        let profile = connection_profile(instance);
        let op = match mgr
            .dms
            .create_connection_profile(&project.parent_uri(), &id, &profile)
            .await
        {
            Ok(op) => op,
            Err(err) if err.is_already_exists() => {
                info!(profile = %id, "connection profile already exists, skipping");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        mgr.dms.wait_for_operation(op, OPERATION_INTERVAL).await?;
        info!(profile = %id, "connection profile created");
    }

    Ok(())
}

/// Delete both profiles by their computed ids.
pub async fn cleanup_connection_profiles(mgr: &Manager, project: &GcpProject) -> Result<()> {
    for role in [ROLE_SOURCE, ROLE_TARGET] {
        let id = profile_id(role, &mgr.app_name);
        delete_connection_profile(mgr, project, &id).await?;
    }
    Ok(())
}

/// Delete one profile and wait for the operation; 404 is success.
async fn delete_connection_profile(mgr: &Manager, project: &GcpProject, id: &str) -> Result<()> {
    info!(profile = %id, "deleting connection profile");
    let name = project.component_uri("connectionProfiles", id);

    let op = retry(DELETE_TIMEOUT, DELETE_INTERVAL, || async {
        match mgr.dms.delete_connection_profile(&name).await {
            Ok(op) => Ok(Some(op)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(retryable(ProfileError::from(err))),
        }
    })
    .await?;

    if let Some(op) = op {
        info!(profile = %id, "waiting for connection profile deletion");
        mgr.dms.wait_for_operation(op, OPERATION_INTERVAL).await?;
        info!(profile = %id, "connection profile deleted");
    }

    Ok(())
}

fn connection_profile(instance: &Instance) -> ConnectionProfile {
    ConnectionProfile {
        name: None,
        postgresql: Some(PostgresqlConnectionProfile {
            host: instance.primary_ip.clone(),
            port: i32::from(DATABASE_PORT),
            username: POSTGRES_USER.to_string(),
            password: Some(instance.postgres_password.clone()),
            ssl: Some(SslConfig {
                kind: Some("SERVER_CLIENT".to_string()),
                client_key: Some(instance.ssl_cert.client_key.clone()),
                client_certificate: Some(instance.ssl_cert.client_cert.clone()),
                ca_certificate: Some(instance.ssl_cert.ca_cert.clone()),
            }),
            cloud_sql_id: Some(instance.name.clone()),
            static_ip_connectivity: Some(StaticIpConnectivity::default()),
        }),
        provider: Some("CLOUDSQL".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolved::SslCertMaterial;

    fn instance() -> Instance {
        Instance {
            name: "myapp".to_string(),
            primary_ip: "10.1.2.3".to_string(),
            outgoing_ips: vec![],
            app_username: "myapp".to_string(),
            app_password: "apppw".to_string(),
            postgres_password: "pgpw".to_string(),
            ssl_cert: SslCertMaterial {
                ca_cert: "CA".to_string(),
                client_cert: "CERT".to_string(),
                client_key: "KEY".to_string(),
            },
        }
    }

    #[test]
    fn profile_ids_are_role_prefixed() {
        assert_eq!(profile_id("source", "myapp"), "source-myapp");
        assert_eq!(profile_id("target", "myapp"), "target-myapp");
    }

    #[test]
    fn profile_connects_as_postgres_with_server_client_ssl() {
        let profile = connection_profile(&instance());
        let pg = profile.postgresql.unwrap();

        assert_eq!(pg.host, "10.1.2.3");
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.username, "postgres");
        assert_eq!(pg.password.as_deref(), Some("pgpw"));
        assert_eq!(pg.cloud_sql_id.as_deref(), Some("myapp"));
        assert!(pg.static_ip_connectivity.is_some());

        let ssl = pg.ssl.unwrap();
        assert_eq!(ssl.kind.as_deref(), Some("SERVER_CLIENT"));
        assert_eq!(ssl.client_key.as_deref(), Some("KEY"));
        assert_eq!(ssl.client_certificate.as_deref(), Some("CERT"));
        assert_eq!(ssl.ca_certificate.as_deref(), Some("CA"));

        assert_eq!(profile.provider.as_deref(), Some("CLOUDSQL"));
    }
}
