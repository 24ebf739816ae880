//! SSL certificate management
//!
//! Client certificates are requested declaratively through SQLSSLCert
//! objects so the config-connector operator talks to the managed API. The
//! issued PEM material is materialized to per-invocation temporary files
//! for the Postgres connector and the DMS connection profiles.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use kube::core::ObjectMeta;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

use crate::crd::{ResourceRef, SQLSSLCert, SqlSslCertSpec};
use crate::gcp::GcpError;
use crate::instance::{CLEANUP_LABEL, FINALIZE_LABEL};
use crate::k8s;
use crate::manager::Manager;
use crate::resolved::{self, GcpProject, SslCertMaterial};
use crate::retry::{retry, retryable, terminal};

const CERT_READY_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const CERT_READY_INTERVAL: Duration = Duration::from_secs(3);
const OPERATION_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Google API error: {0}")]
    Gcp(#[from] GcpError),

    #[error("failed to write certificate file: {0}")]
    Io(#[from] std::io::Error),

    #[error("certificate not ready: {0}")]
    NotReady(String),
}

pub type Result<T, E = CertificateError> = std::result::Result<T, E>;

/// Which teardown phase removes a certificate created now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPhase {
    /// Issued during setup; removed by post-migration cleanup
    Cleanup,
    /// Issued during promote; removed by finalize (or rollback)
    Finalize,
}

impl CleanupPhase {
    pub fn label_key(self) -> &'static str {
        match self {
            CleanupPhase::Cleanup => CLEANUP_LABEL,
            CleanupPhase::Finalize => FINALIZE_LABEL,
        }
    }
}

/// Filesystem locations of the materialized PEM files
#[derive(Debug, Clone)]
pub struct CertPaths {
    pub root_cert_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Request (or adopt) a client certificate for `instance_name`, wait for
/// the operator to issue it, and write the PEM material to temp files.
///
/// The managed API refuses to issue a second certificate with an existing
/// common name, so a colliding server-side certificate is deleted before a
/// new declarative resource is created.
pub async fn create_ssl_cert(
    mgr: &Manager,
    project: &GcpProject,
    instance_name: &str,
    phase: CleanupPhase,
    material: &mut SslCertMaterial,
) -> Result<CertPaths> {
    let cert_name = resolved::helper_name(instance_name);

    let existing = mgr.sql_ssl_certs.get_opt(&cert_name).await?;
    if existing.is_none() {
        delete_ssl_cert_by_common_name(mgr, project, instance_name, &cert_name).await?;

        info!(instance = %instance_name, cert = %cert_name, "creating new ssl certificate");
        let cert = SQLSSLCert {
            metadata: ObjectMeta {
                name: Some(cert_name.clone()),
                namespace: Some(mgr.namespace.clone()),
                labels: Some(BTreeMap::from([
                    ("app".to_string(), mgr.app_name.clone()),
                    ("team".to_string(), mgr.namespace.clone()),
                    (phase.label_key().to_string(), mgr.app_name.clone()),
                ])),
                ..Default::default()
            },
            spec: SqlSslCertSpec {
                common_name: cert_name.clone(),
                instance_ref: ResourceRef {
                    name: Some(instance_name.to_string()),
                    namespace: Some(mgr.namespace.clone()),
                    external: None,
                },
            },
            status: None,
        };
        match mgr.sql_ssl_certs.create(&cert).await {
            Ok(_) => {}
            Err(err) if k8s::is_already_exists(&err) => {}
            Err(err) => return Err(err.into()),
        }
    }

    let issued = retry(CERT_READY_TIMEOUT, CERT_READY_INTERVAL, || async {
        let cert = mgr
            .sql_ssl_certs
            .get(&cert_name)
            .await
            .map_err(|e| terminal(CertificateError::from(e)))?;

        let status = cert.status.as_ref();
        let ready = status
            .map(|s| s.cert.is_some() && s.private_key.is_some() && s.server_ca_cert.is_some())
            .unwrap_or(false);

        if ready {
            Ok(cert)
        } else {
            info!(cert = %cert_name, "waiting for SQLSSLCert to be ready");
            Err(retryable(CertificateError::NotReady(cert_name.clone())))
        }
    })
    .await?;

    let status = issued
        .status
        .ok_or_else(|| CertificateError::NotReady(cert_name.clone()))?;
    material.ca_cert = status.server_ca_cert.unwrap_or_default();
    material.client_cert = status.cert.unwrap_or_default();
    material.client_key = status.private_key.unwrap_or_default();

    let root_cert_path = write_temp_file("root", ".crt", &material.ca_cert, 0o644)?;
    let cert_path = write_temp_file("client", ".crt", &material.client_cert, 0o644)?;
    let key_path = write_temp_file("client", ".key", &material.client_key, 0o600)?;

    info!(instance = %instance_name, cert = %cert_name, "ssl certificate created successfully");

    Ok(CertPaths {
        root_cert_path,
        cert_path,
        key_path,
    })
}

/// Delete any server-side certificate with the given common name and wait
/// for the operation. Absence is success.
pub async fn delete_ssl_cert_by_common_name(
    mgr: &Manager,
    project: &GcpProject,
    instance_name: &str,
    common_name: &str,
) -> Result<()> {
    let certs = match mgr.sql_admin.list_ssl_certs(&project.id, instance_name).await {
        Ok(certs) => certs,
        Err(err) if err.is_not_found() => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    for cert in certs {
        if cert.common_name != common_name {
            continue;
        }

        info!(instance = %instance_name, common_name = %common_name, "deleting existing server-side certificate");
        let op = match mgr
            .sql_admin
            .delete_ssl_cert(&project.id, instance_name, &cert.sha1_fingerprint)
            .await
        {
            Ok(op) => op,
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err.into()),
        };
        mgr.sql_admin
            .wait_for_operation(&project.id, op, OPERATION_INTERVAL)
            .await?;
    }

    Ok(())
}

/// Write PEM material to a uniquely-named temp file that outlives this
/// invocation. The private key stays owner-only readable.
fn write_temp_file(prefix: &str, suffix: &str, data: &str, mode: u32) -> Result<PathBuf> {
    let file = tempfile::Builder::new()
        .prefix(&format!("{prefix}-"))
        .suffix(suffix)
        .tempfile()?;

    let (mut handle, path) = file.keep().map_err(|e| CertificateError::Io(e.error))?;
    handle.write_all(data.as_bytes())?;
    handle.set_permissions(std::fs::Permissions::from_mode(mode))?;

    Ok(path)
}
