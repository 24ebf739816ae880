//! Config-connector SQL resources (sql.cnrm.cloud.google.com/v1beta1)
//!
//! Only the fields the orchestrator reads or mutates are modelled; the
//! server keeps everything else.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition reason reported once the operator has converged an object
pub const CONDITION_REASON_UP_TO_DATE: &str = "UpToDate";

/// Condition reason for a failed update; the operator self-heals, so this
/// is treated as retryable rather than terminal
pub const CONDITION_REASON_UPDATE_FAILED: &str = "UpdateFailed";

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
}

/// SQLInstance mirrors one Cloud SQL instance
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "sql.cnrm.cloud.google.com",
    version = "v1beta1",
    kind = "SQLInstance",
    plural = "sqlinstances",
    namespaced,
    status = "SqlInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SqlInstanceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_version: Option<String>,

    /// `CLOUD_SQL_INSTANCE` for a primary, `READ_REPLICA_INSTANCE` while
    /// the target is being replicated into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_instance_ref: Option<ResourceRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    #[serde(default)]
    pub settings: SqlInstanceSettings,

    /// Unmodelled spec fields, carried through round trips
    #[serde(flatten)]
    pub rest: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SqlInstanceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_autoresize: Option<bool>,

    /// `ZONAL` or `REGIONAL`; forced to `ZONAL` on the target during CDC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_configuration: Option<BackupConfiguration>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub database_flags: Vec<DatabaseFlag>,

    #[serde(default)]
    pub ip_configuration: IpConfiguration,

    #[serde(flatten)]
    pub rest: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_in_time_recovery_enabled: Option<bool>,

    #[serde(flatten)]
    pub rest: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct DatabaseFlag {
    pub name: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_ssl: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_network_ref: Option<ResourceRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorized_networks: Vec<AuthorizedNetwork>,

    #[serde(flatten)]
    pub rest: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct AuthorizedNetwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// CIDR, `/32` for everything this tool appends
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SqlInstanceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip_address: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_address: Vec<IpAddress>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct IpAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// `PRIMARY` or `OUTGOING`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl SQLInstance {
    /// First reported condition, which the operator uses for readiness
    pub fn condition(&self) -> Option<&Condition> {
        self.status.as_ref()?.conditions.first()
    }

    /// Whether the operator reports the object converged (`status=True`)
    pub fn is_ready(&self) -> bool {
        self.condition()
            .and_then(|c| c.status.as_deref())
            .map(|s| s == "True")
            .unwrap_or(false)
    }
}

/// SQLSSLCert requests a client certificate for one instance
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "sql.cnrm.cloud.google.com",
    version = "v1beta1",
    kind = "SQLSSLCert",
    plural = "sqlsslcerts",
    namespaced,
    status = "SqlSslCertStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SqlSslCertSpec {
    pub common_name: String,
    pub instance_ref: ResourceRef,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SqlSslCertStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ca_cert: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// SQLUser mirrors one database user on an instance
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "sql.cnrm.cloud.google.com",
    version = "v1beta1",
    kind = "SQLUser",
    plural = "sqlusers",
    namespaced,
    status = "SqlUserStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SqlUserSpec {
    pub instance_ref: ResourceRef,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SqlUserStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl SQLUser {
    pub fn condition(&self) -> Option<&Condition> {
        self.status.as_ref()?.conditions.first()
    }
}

/// SQLDatabase mirrors one database on an instance
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "sql.cnrm.cloud.google.com",
    version = "v1beta1",
    kind = "SQLDatabase",
    plural = "sqldatabases",
    namespaced,
    status = "SqlDatabaseStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SqlDatabaseSpec {
    pub instance_ref: ResourceRef,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SqlDatabaseStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
