//! Shared fixtures for unit tests

use kube::core::ObjectMeta;

use cloudsql_migrator::crd::{
    Application, ApplicationSpec, CloudSqlDatabase, CloudSqlInstance, GcpSpec, InstanceFlag,
};

pub const SOURCE_INSTANCE_NAME: &str = "my-source-instance-name";
pub const SOURCE_TYPE: &str = "POSTGRES_14";
pub const SOURCE_TIER: &str = "db-custom-2-8192";
pub const SOURCE_DISK_SIZE: i64 = 500;

pub const TARGET_INSTANCE_NAME: &str = "my-target-instance-name";
pub const TARGET_TYPE: &str = "POSTGRES_15";
pub const TARGET_TIER: &str = "db-custom-1-3840";
pub const TARGET_DISK_SIZE: i64 = 100;

/// An application owning one instance and one database, the shape every
/// migration starts from.
pub fn application(instance: CloudSqlInstance) -> Application {
    Application {
        metadata: ObjectMeta {
            name: Some("my-app-name".to_string()),
            namespace: Some("mynamespace".to_string()),
            ..Default::default()
        },
        spec: ApplicationSpec {
            image: "my-docker-image:latest".to_string(),
            replicas: None,
            gcp: Some(GcpSpec {
                sql_instances: vec![instance],
                ..Default::default()
            }),
            rest: Default::default(),
        },
        status: None,
    }
}

/// A minimally-configured source instance entry
pub fn bare_source_instance() -> CloudSqlInstance {
    CloudSqlInstance {
        name: Some(SOURCE_INSTANCE_NAME.to_string()),
        databases: vec![CloudSqlDatabase {
            name: "mydb".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// A fully-configured source instance entry
pub fn configured_source_instance() -> CloudSqlInstance {
    CloudSqlInstance {
        name: Some(SOURCE_INSTANCE_NAME.to_string()),
        kind: Some(SOURCE_TYPE.to_string()),
        tier: Some(SOURCE_TIER.to_string()),
        disk_size: Some(SOURCE_DISK_SIZE),
        disk_autoresize: None,
        cascading_delete: true,
        high_availability: true,
        point_in_time_recovery: true,
        flags: vec![InstanceFlag {
            name: "cloudsql.enable_pgaudit".to_string(),
            value: "on".to_string(),
        }],
        databases: vec![CloudSqlDatabase {
            name: "mydb".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    }
}
