//! Database Migration Service API (v1) client
//!
//! Connection profiles describe the two endpoints; the migration job is
//! the continuous CDC stream between them. All mutating calls return a
//! long-running operation addressed by full resource name.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiClient, GcpError, Result};

const BASE_URL: &str = "https://datamigration.googleapis.com/v1";

/// Steady replication state of a started job
pub const JOB_STATE_RUNNING: &str = "RUNNING";
/// Terminal state after promotion
pub const JOB_STATE_COMPLETED: &str = "COMPLETED";

/// Continuous change-data-capture in progress
pub const JOB_PHASE_CDC: &str = "CDC";
/// Lag has drained enough for a promote call
pub const JOB_PHASE_READY_FOR_PROMOTE: &str = "READY_FOR_PROMOTE";
/// Promote call accepted and executing
pub const JOB_PHASE_PROMOTE_IN_PROGRESS: &str = "PROMOTE_IN_PROGRESS";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgresql: Option<PostgresqlConnectionProfile>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlConnectionProfile {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: i32,

    #[serde(default)]
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<SslConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_sql_id: Option<String>,

    /// Presence selects static-IP connectivity; the object is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_ip_connectivity: Option<StaticIpConnectivity>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct SslConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct StaticIpConnectivity {}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct MigrationJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// `CONTINUOUS` for CDC migrations
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Full resource name of the source connection profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_ip_connectivity: Option<StaticIpConnectivity>,
}

impl MigrationJob {
    pub fn state_is(&self, state: &str) -> bool {
        self.state.as_deref() == Some(state)
    }

    pub fn phase_is(&self, phase: &str) -> bool {
        self.phase.as_deref() == Some(phase)
    }
}

/// google.longrunning.Operation as returned by DMS
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DmsOperation {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DmsOperationError>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DmsOperationError {
    #[serde(default)]
    pub code: i32,

    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Default)]
struct Empty {}

#[derive(Clone)]
pub struct DmsClient {
    api: ApiClient,
}

impl DmsClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// `parent` is `projects/{id}/locations/{region}`.
    pub async fn create_connection_profile(
        &self,
        parent: &str,
        profile_id: &str,
        profile: &ConnectionProfile,
    ) -> Result<DmsOperation> {
        let url = format!("{BASE_URL}/{parent}/connectionProfiles");
        self.api
            .post_json(
                &url,
                &[("connectionProfileId", profile_id.to_string())],
                profile,
            )
            .await
    }

    /// `name` is the full connection-profile resource name.
    pub async fn delete_connection_profile(&self, name: &str) -> Result<DmsOperation> {
        let url = format!("{BASE_URL}/{name}");
        self.api.delete_json(&url).await
    }

    pub async fn get_migration_job(&self, name: &str) -> Result<MigrationJob> {
        let url = format!("{BASE_URL}/{name}");
        self.api.get_json(&url).await
    }

    pub async fn create_migration_job(
        &self,
        parent: &str,
        job_id: &str,
        job: &MigrationJob,
    ) -> Result<DmsOperation> {
        let url = format!("{BASE_URL}/{parent}/migrationJobs");
        self.api
            .post_json(&url, &[("migrationJobId", job_id.to_string())], job)
            .await
    }

    pub async fn delete_migration_job(&self, name: &str) -> Result<DmsOperation> {
        let url = format!("{BASE_URL}/{name}");
        self.api.delete_json(&url).await
    }

    pub async fn start_migration_job(&self, name: &str) -> Result<DmsOperation> {
        let url = format!("{BASE_URL}/{name}:start");
        self.api.post_json(&url, &[], &Empty::default()).await
    }

    pub async fn demote_destination(&self, name: &str) -> Result<DmsOperation> {
        let url = format!("{BASE_URL}/{name}:demoteDestination");
        self.api.post_json(&url, &[], &Empty::default()).await
    }

    pub async fn promote_migration_job(&self, name: &str) -> Result<DmsOperation> {
        let url = format!("{BASE_URL}/{name}:promote");
        self.api.post_json(&url, &[], &Empty::default()).await
    }

    /// `name` is the full operation resource name.
    pub async fn get_operation(&self, name: &str) -> Result<DmsOperation> {
        let url = format!("{BASE_URL}/{name}");
        self.api.get_json(&url).await
    }

    /// Poll `op` at `interval` until `done`, then surface any error.
    pub async fn wait_for_operation(
        &self,
        mut op: DmsOperation,
        interval: Duration,
    ) -> Result<()> {
        while !op.done {
            tokio::time::sleep(interval).await;
            debug!(operation = %op.name, "waiting for DMS operation");
            op = self.get_operation(&op.name).await?;
        }

        if let Some(error) = &op.error {
            return Err(GcpError::OperationFailed {
                name: op.name,
                message: error.message.clone(),
            });
        }

        Ok(())
    }
}
