//! Typed declarative resources reconciled by the external operators
//!
//! The migration never reconciles these itself; it reads and writes them
//! and waits for the platform operators to converge.

mod application;
mod sql;

pub use application::{
    Application, ApplicationSpec, ApplicationStatus, CloudSqlDatabase, CloudSqlInstance,
    GcpSpec, InstanceFlag, Replicas, CORRELATION_ID_ANNOTATION, SYNC_ROLLOUT_COMPLETE,
    SYNC_SYNCHRONIZED,
};
pub use sql::{
    AuthorizedNetwork, BackupConfiguration, Condition, DatabaseFlag, IpAddress,
    IpConfiguration, ResourceRef, SqlDatabaseSpec, SqlDatabaseStatus, SqlInstanceSettings,
    SqlInstanceSpec, SqlInstanceStatus, SqlSslCertSpec, SqlSslCertStatus, SqlUserSpec,
    SqlUserStatus, SQLDatabase, SQLInstance, SQLSSLCert, SQLUser,
    CONDITION_REASON_UPDATE_FAILED, CONDITION_REASON_UP_TO_DATE,
};
