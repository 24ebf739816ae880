//! Cloud SQL Admin API (v1) client
//!
//! Covers the instance, user, backup-run, server-side SSL cert and
//! operation surfaces the migration touches. Long-running calls return an
//! [`Operation`] which is polled to `DONE`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiClient, GcpError, Result};

const BASE_URL: &str = "https://sqladmin.googleapis.com/v1";

/// Raw managed representation of an instance
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInstance {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<InstanceSettings>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<IpMapping>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_type: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub database_flags: Vec<DatabaseFlag>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_configuration: Option<BackupConfiguration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_configuration: Option<IpConfiguration>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DatabaseFlag {
    pub name: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfiguration {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub point_in_time_recovery_enabled: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_network: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorized_networks: Vec<AclEntry>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AclEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct IpMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Managed database user; fetched, mutated and written back whole
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackupRun {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct SslCert {
    #[serde(default)]
    pub common_name: String,

    #[serde(default)]
    pub sha1_fingerprint: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct SslCertsListResponse {
    #[serde(default)]
    items: Vec<SslCert>,
}

/// Long-running SQL Admin operation
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationErrors>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status.as_deref() == Some("DONE")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperationErrors {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<OperationError>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct SqlAdminClient {
    api: ApiClient,
}

impl SqlAdminClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn get_instance(&self, project: &str, instance: &str) -> Result<DatabaseInstance> {
        let url = format!("{BASE_URL}/projects/{project}/instances/{instance}");
        self.api.get_json(&url).await
    }

    /// Issue the delete; the API tears the instance down asynchronously
    /// and the returned operation is not waited on.
    pub async fn delete_instance(&self, project: &str, instance: &str) -> Result<Operation> {
        let url = format!("{BASE_URL}/projects/{project}/instances/{instance}");
        self.api.delete_json(&url).await
    }

    /// Drop a database from an instance.
    pub async fn delete_database(
        &self,
        project: &str,
        instance: &str,
        database: &str,
    ) -> Result<Operation> {
        let url =
            format!("{BASE_URL}/projects/{project}/instances/{instance}/databases/{database}");
        self.api.delete_json(&url).await
    }

    pub async fn get_user(&self, project: &str, instance: &str, name: &str) -> Result<User> {
        let url = format!("{BASE_URL}/projects/{project}/instances/{instance}/users/{name}");
        self.api.get_json(&url).await
    }

    pub async fn update_user(
        &self,
        project: &str,
        instance: &str,
        user: &User,
    ) -> Result<Operation> {
        let url = format!("{BASE_URL}/projects/{project}/instances/{instance}/users");
        let mut query = vec![("name", user.name.clone())];
        if let Some(host) = &user.host {
            query.push(("host", host.clone()));
        }
        self.api.put_json(&url, &query, user).await
    }

    pub async fn insert_backup_run(
        &self,
        project: &str,
        instance: &str,
        run: &BackupRun,
    ) -> Result<Operation> {
        let url = format!("{BASE_URL}/projects/{project}/instances/{instance}/backupRuns");
        self.api.post_json(&url, &[], run).await
    }

    pub async fn list_ssl_certs(&self, project: &str, instance: &str) -> Result<Vec<SslCert>> {
        let url = format!("{BASE_URL}/projects/{project}/instances/{instance}/sslCerts");
        let resp: SslCertsListResponse = self.api.get_json(&url).await?;
        Ok(resp.items)
    }

    pub async fn delete_ssl_cert(
        &self,
        project: &str,
        instance: &str,
        sha1_fingerprint: &str,
    ) -> Result<Operation> {
        let url = format!(
            "{BASE_URL}/projects/{project}/instances/{instance}/sslCerts/{sha1_fingerprint}"
        );
        self.api.delete_json(&url).await
    }

    pub async fn get_operation(&self, project: &str, name: &str) -> Result<Operation> {
        let url = format!("{BASE_URL}/projects/{project}/operations/{name}");
        self.api.get_json(&url).await
    }

    /// Poll `op` at `interval` until the service reports `DONE`.
    ///
    /// The ambient phase deadline bounds this; the API has no unbounded
    /// operations of its own.
    pub async fn wait_for_operation(
        &self,
        project: &str,
        mut op: Operation,
        interval: Duration,
    ) -> Result<()> {
        while !op.is_done() {
            tokio::time::sleep(interval).await;
            debug!(operation = %op.name, "waiting for SQL Admin operation");
            op = self.get_operation(project, &op.name).await?;
        }

        if let Some(errors) = &op.error {
            let message = errors
                .errors
                .iter()
                .filter_map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(GcpError::OperationFailed {
                name: op.name,
                message,
            });
        }

        Ok(())
    }
}
