//! Direct SQL access to the managed instances
//!
//! Connections are TLS-verified against the instance CA with a client
//! certificate (`verify-ca` semantics: the chain is validated, the
//! hostname is not — the server certificate names the instance, not its
//! IP). All DDL is fixed text.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tokio_postgres_rustls_improved::MakeRustlsConnect;
use tracing::{info, warn};

use crate::certificate::CertPaths;
use crate::config::Development;
use crate::gcp::GcpError;
use crate::manager::Manager;
use crate::resolved::{GcpProject, Instance};
use crate::retry::{retry, retryable, terminal};

/// The system database present on every instance
pub const POSTGRES_DATABASE: &str = "postgres";

/// The managed superuser the migration operates as
pub const POSTGRES_USER: &str = "postgres";

pub const DATABASE_PORT: u16 = 5432;

const GENERATED_PASSWORD_LENGTH: usize = 14;
const UNSAFE_DEVELOPMENT_PASSWORD: &str = "testpassword";

const PASSWORD_UPDATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const PASSWORD_UPDATE_INTERVAL: Duration = Duration::from_secs(3);
const OPERATION_INTERVAL: Duration = Duration::from_secs(1);

/// Installed on both source databases before the migration job starts:
/// the job replicates through pglogical as the postgres user.
const INSTALL_EXTENSION_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS pglogical;
GRANT USAGE ON SCHEMA pglogical TO "postgres";
GRANT SELECT ON ALL TABLES IN SCHEMA pglogical TO "postgres";
GRANT SELECT ON ALL SEQUENCES IN SCHEMA pglogical TO "postgres";
GRANT USAGE ON SCHEMA public TO "postgres";
GRANT SELECT ON ALL TABLES IN SCHEMA public TO "postgres";
GRANT SELECT ON ALL SEQUENCES IN SCHEMA public TO "postgres";
ALTER USER "postgres" WITH REPLICATION;
"#;

/// Run on the target after promotion: the replication agent owned every
/// replicated object and must hand ownership back.
const REASSIGN_OWNED_SQL: &str =
    r#"REASSIGN OWNED BY cloudsqlexternalsync TO cloudsqlsuperuser;"#;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Google API error: {0}")]
    Gcp(#[from] GcpError),

    #[error("failed to read certificate file: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

/// Generate a database password, or the fixed development one.
pub fn make_password(development: &Development) -> String {
    if development.unsafe_password {
        warn!("using unsafe password for database user because of development mode setting");
        return UNSAFE_DEVELOPMENT_PASSWORD.to_string();
    }

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Set a managed user's password and wait for the operation.
///
/// The user may not be visible yet right after instance creation (404) and
/// concurrent operations conflict (409); both retry within the envelope.
pub async fn set_database_password(
    mgr: &Manager,
    project: &GcpProject,
    instance_name: &str,
    username: &str,
    password: &str,
) -> Result<()> {
    info!(instance = %instance_name, user = %username, "updating Cloud SQL user password");

    let op = retry(PASSWORD_UPDATE_TIMEOUT, PASSWORD_UPDATE_INTERVAL, || async {
        let mut user = match mgr.sql_admin.get_user(&project.id, instance_name, username).await {
            Ok(user) => user,
            Err(err) if err.is_not_found() => {
                info!(user = %username, "user not found, retrying");
                return Err(retryable(DatabaseError::from(err)));
            }
            Err(err) => return Err(terminal(DatabaseError::from(err))),
        };

        user.password = Some(password.to_string());

        match mgr.sql_admin.update_user(&project.id, instance_name, &user).await {
            Ok(op) => Ok(op),
            Err(err) if err.is_conflict() => {
                info!(user = %username, "conflicting user update, retrying");
                Err(retryable(DatabaseError::from(err)))
            }
            Err(err) => Err(terminal(DatabaseError::from(err))),
        }
    })
    .await?;

    mgr.sql_admin
        .wait_for_operation(&project.id, op, OPERATION_INTERVAL)
        .await?;

    info!(user = %username, "updated Cloud SQL user password");
    Ok(())
}

/// An open connection to one database on one instance
pub struct DbConnection {
    client: tokio_postgres::Client,
}

impl DbConnection {
    /// Open a `verify-ca` TLS connection and ping it once.
    pub async fn connect(
        instance_ip: &str,
        username: &str,
        password: &str,
        database: &str,
        certs: &CertPaths,
    ) -> Result<Self> {
        let config = format!(
            "host={instance_ip} port={DATABASE_PORT} user={username} password={password} dbname={database} connect_timeout=15",
        );

        let tls = build_tls_connector(certs)?;
        let (client, connection) = tokio_postgres::connect(&config, tls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "database connection closed");
            }
        });

        let conn = Self { client };
        if let Err(err) = conn.client.simple_query("SELECT 1").await {
            return Err(err.into());
        }
        Ok(conn)
    }

    pub async fn batch_execute(&self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await?;
        Ok(())
    }
}

/// Install pglogical and the replication grants on the system database and
/// the application database of the source.
pub async fn install_extension(
    source: &Instance,
    database_name: &str,
    certs: &CertPaths,
) -> Result<()> {
    info!(instance = %source.name, "installing pglogical extension and adding grants");

    let targets = [
        (POSTGRES_DATABASE, POSTGRES_USER, &source.postgres_password),
        (database_name, source.app_username.as_str(), &source.app_password),
    ];

    for (database, username, password) in targets {
        info!(database = %database, user = %username, "connecting to database");
        let conn =
            DbConnection::connect(&source.primary_ip, username, password, database, certs).await?;

        info!(database = %database, "installing extension and granting permissions to postgres user");
        conn.batch_execute(INSTALL_EXTENSION_SQL).await?;
    }

    Ok(())
}

/// Reassign ownership of everything the replication agent created in one
/// database of the target. Runs as the postgres superuser.
pub async fn reassign_owned(target: &Instance, database: &str, certs: &CertPaths) -> Result<()> {
    info!(instance = %target.name, database = %database, "reassigning ownership from replication agent");

    let conn = DbConnection::connect(
        &target.primary_ip,
        POSTGRES_USER,
        &target.postgres_password,
        database,
        certs,
    )
    .await?;

    conn.batch_execute(REASSIGN_OWNED_SQL).await?;
    Ok(())
}

fn build_tls_connector(certs: &CertPaths) -> Result<MakeRustlsConnect> {
    let mut root_store = RootCertStore::empty();
    let ca_pem = fs::read(&certs.root_cert_path)?;
    for cert in rustls_pemfile::certs(&mut ca_pem.as_slice()) {
        let cert = cert.map_err(|e| DatabaseError::Tls(format!("invalid CA certificate: {e}")))?;
        root_store
            .add(cert)
            .map_err(|e| DatabaseError::Tls(format!("failed to add CA certificate: {e}")))?;
    }
    if root_store.is_empty() {
        return Err(DatabaseError::Tls(
            "no CA certificates found in root cert file".to_string(),
        ));
    }

    let client_pem = fs::read(&certs.cert_path)?;
    let client_certs = rustls_pemfile::certs(&mut client_pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DatabaseError::Tls(format!("invalid client certificate: {e}")))?;

    let key_pem = fs::read(&certs.key_path)?;
    let client_key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| DatabaseError::Tls(format!("invalid client key: {e}")))?
        .ok_or_else(|| DatabaseError::Tls("no private key found in key file".to_string()))?;

    let verifier = WebPkiServerVerifier::builder(Arc::new(root_store))
        .build()
        .map_err(|e| DatabaseError::Tls(format!("failed to build verifier: {e}")))?;

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(CaOnlyVerifier { inner: verifier }))
        .with_client_auth_cert(client_certs, client_key)
        .map_err(|e| DatabaseError::Tls(format!("invalid client auth configuration: {e}")))?;

    Ok(MakeRustlsConnect::new(config))
}

/// `verify-ca` verifier: the chain must validate against the instance CA,
/// but the server name is not checked — the certificate names the
/// instance while connections go to its IP.
#[derive(Debug)]
struct CaOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for CaOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            Err(err) => Err(err),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_passwords_are_random_and_sized() {
        let dev = Development::default();
        let a = make_password(&dev);
        let b = make_password(&dev);
        assert_eq!(a.len(), GENERATED_PASSWORD_LENGTH);
        assert_eq!(b.len(), GENERATED_PASSWORD_LENGTH);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn unsafe_password_is_fixed() {
        let dev = Development {
            unsafe_password: true,
            ..Default::default()
        };
        assert_eq!(make_password(&dev), UNSAFE_DEVELOPMENT_PASSWORD);
    }

    #[test]
    fn install_sql_targets_postgres_user_only() {
        assert!(INSTALL_EXTENSION_SQL.contains("CREATE EXTENSION IF NOT EXISTS pglogical"));
        assert!(INSTALL_EXTENSION_SQL.contains("ALTER USER \"postgres\" WITH REPLICATION"));
        // Fixed text, no interpolation points
        assert!(!INSTALL_EXTENSION_SQL.contains("{"));
    }

    #[test]
    fn reassign_sql_hands_ownership_to_superuser() {
        assert_eq!(
            REASSIGN_OWNED_SQL,
            "REASSIGN OWNED BY cloudsqlexternalsync TO cloudsqlsuperuser;"
        );
    }
}
