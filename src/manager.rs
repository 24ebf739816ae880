//! Client assembly shared by all four binaries
//!
//! The [`Manager`] is constructed once at startup and handed to every
//! step. It owns the Kubernetes client, the typed resource clients for
//! the operator-reconciled kinds, and the three Google API clients.

use kube::Client;
use thiserror::Error;

use crate::config::Config;
use crate::crd::{Application, SQLDatabase, SQLInstance, SQLSSLCert, SQLUser};
use crate::gcp::dms::DmsClient;
use crate::gcp::monitoring::MonitoringClient;
use crate::gcp::sqladmin::SqlAdminClient;
use crate::gcp::{ApiClient, GcpError};
use crate::k8s::ResourceClient;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("failed to create Kubernetes client: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to create Google API client: {0}")]
    Gcp(#[from] GcpError),
}

pub struct Manager {
    pub kube: Client,

    pub apps: ResourceClient<Application>,
    pub sql_instances: ResourceClient<SQLInstance>,
    pub sql_users: ResourceClient<SQLUser>,
    pub sql_databases: ResourceClient<SQLDatabase>,
    pub sql_ssl_certs: ResourceClient<SQLSSLCert>,

    pub sql_admin: SqlAdminClient,
    pub dms: DmsClient,
    pub monitoring: MonitoringClient,

    pub app_name: String,
    pub namespace: String,
}

impl Manager {
    /// Connect to the cluster and the Google APIs.
    pub async fn new(cfg: &Config) -> Result<Self, ManagerError> {
        let kube = Client::try_default().await?;
        let api = ApiClient::new().await?;

        Ok(Self {
            apps: ResourceClient::namespaced(kube.clone(), &cfg.namespace),
            sql_instances: ResourceClient::namespaced(kube.clone(), &cfg.namespace),
            sql_users: ResourceClient::namespaced(kube.clone(), &cfg.namespace),
            sql_databases: ResourceClient::namespaced(kube.clone(), &cfg.namespace),
            sql_ssl_certs: ResourceClient::namespaced(kube.clone(), &cfg.namespace),
            sql_admin: SqlAdminClient::new(api.clone()),
            dms: DmsClient::new(api.clone()),
            monitoring: MonitoringClient::new(api),
            kube,
            app_name: cfg.app_name.clone(),
            namespace: cfg.namespace.clone(),
        })
    }
}
