use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation carrying the per-write correlation id. The orchestrator
/// stamps a fresh id on every application mutation and waits for it to be
/// reflected in `status.correlationId` before trusting downstream state.
pub const CORRELATION_ID_ANNOTATION: &str = "nais.io/deploymentCorrelationID";

/// Terminal synchronization states accepted after an application update
pub const SYNC_ROLLOUT_COMPLETE: &str = "RolloutComplete";
pub const SYNC_SYNCHRONIZED: &str = "Synchronized";

/// Application is the platform's declarative workload object. It owns
/// exactly one SQL instance and exactly one database; the external
/// operator chain (workload operator + config-connector glue) turns the
/// `gcp.sqlInstances` entry into a full set of cloud resources.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "nais.io",
    version = "v1alpha1",
    kind = "Application",
    plural = "applications",
    namespaced,
    status = "ApplicationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Container image of the workload
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<Replicas>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<GcpSpec>,

    /// Everything else in the spec survives the fetch-mutate-update
    /// round trip untouched
    #[serde(flatten)]
    pub rest: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Replicas {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i32>,

    #[serde(flatten)]
    pub rest: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcpSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sql_instances: Vec<CloudSqlInstance>,

    /// Other GCP resources owned by the application, untouched here
    #[serde(flatten)]
    pub rest: std::collections::BTreeMap<String, serde_json::Value>,
}

/// One managed SQL instance owned by the application.
///
/// Unset optional fields inherit platform defaults; the migration copies
/// this struct wholesale when shaping the target instance.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudSqlInstance {
    /// Instance name; the application name is used when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Postgres version selector, e.g. `POSTGRES_17`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_autoresize: Option<bool>,

    /// Tear down the instance when the application is deleted. Disabled
    /// for the whole duration of a migration.
    #[serde(default)]
    pub cascading_delete: bool,

    #[serde(default)]
    pub high_availability: bool,

    #[serde(default)]
    pub point_in_time_recovery: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<InstanceFlag>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<CloudSqlDatabase>,

    /// Unmodelled instance settings, carried through round trips
    #[serde(flatten)]
    pub rest: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct InstanceFlag {
    pub name: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudSqlDatabase {
    pub name: String,

    /// Prefix of the generated credential env vars; changing instances can
    /// change the generated names when this is non-default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var_prefix: Option<String>,

    #[serde(flatten)]
    pub rest: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    /// Correlation id of the last spec version the operators observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_state: Option<String>,

    /// Hash of the last synchronized spec; stamping a sentinel here forces
    /// the operator to re-sync an unchanged spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_rollout_status: Option<String>,

    #[serde(flatten)]
    pub rest: std::collections::BTreeMap<String, serde_json::Value>,
}

impl Application {
    /// The application's sole SQL-instance entry, if any
    pub fn sql_instance(&self) -> Option<&CloudSqlInstance> {
        self.spec.gcp.as_ref()?.sql_instances.first()
    }

    /// Whether the operators have observed `correlation_id` and finished
    /// rolling the application out. Used for the helper application, where
    /// only a completed rollout proves the instance exists.
    pub fn rollout_complete(&self, correlation_id: &str) -> bool {
        self.observed(correlation_id)
            && self.sync_state_is(&[SYNC_ROLLOUT_COMPLETE])
    }

    /// Whether the operators have observed `correlation_id` and reached a
    /// terminal sync state. Used after ordinary application updates.
    pub fn synchronized(&self, correlation_id: &str) -> bool {
        self.observed(correlation_id)
            && self.sync_state_is(&[SYNC_ROLLOUT_COMPLETE, SYNC_SYNCHRONIZED])
    }

    fn observed(&self, correlation_id: &str) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.correlation_id.as_deref())
            == Some(correlation_id)
    }

    fn sync_state_is(&self, accepted: &[&str]) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.synchronization_state.as_deref())
            .map(|state| accepted.contains(&state))
            .unwrap_or(false)
    }
}
