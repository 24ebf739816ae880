//! Environment configuration for the migration binaries
//!
//! All configuration comes from environment variables. Each binary parses
//! the common set plus its phase-specific additions before anything else
//! runs; a parse failure is exit code 1.

use std::env;
use std::fmt;

use thiserror::Error;

/// Errors raised while reading the environment
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingVariable(&'static str),

    #[error("environment variable {name} has invalid value {value:?}: expected {expected}")]
    InvalidValue {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// Log output format, selected by `LOG_FORMAT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration (`LOG_LEVEL`, `LOG_FORMAT`)
#[derive(Debug, Clone)]
pub struct Logging {
    pub level: String,
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Logging {
    fn from_env() -> Result<Self> {
        let level = optional("LOG_LEVEL")?.unwrap_or_else(|| "info".to_string());
        let format = match optional("LOG_FORMAT")?.as_deref() {
            None => LogFormat::Text,
            Some(v) if v.eq_ignore_ascii_case("text") => LogFormat::Text,
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "LOG_FORMAT",
                    value: other.to_string(),
                    expected: "TEXT or JSON",
                });
            }
        };
        Ok(Self { level, format })
    }
}

/// Development-mode toggles (prefix `DEVELOPMENT_MODE_`)
#[derive(Debug, Clone, Copy, Default)]
pub struct Development {
    /// Skip taking backups
    pub skip_backup: bool,
    /// Use a fixed, unsafe password for the postgres user
    pub unsafe_password: bool,
    /// Discover the workstation's outgoing IP and authorize it on both instances
    pub add_auth_network: bool,
}

impl Development {
    fn from_env() -> Result<Self> {
        Ok(Self {
            skip_backup: flag("DEVELOPMENT_MODE_SKIP_BACKUP")?,
            unsafe_password: flag("DEVELOPMENT_MODE_UNSAFE_PASSWORD")?,
            add_auth_network: flag("DEVELOPMENT_MODE_ADD_AUTH_NETWORK")?,
        })
    }
}

/// Desired shape of an instance, read from `<PREFIX>_INSTANCE_*` variables.
///
/// Only `name` is required; every unset override leaves the corresponding
/// source value intact when the instance is defined from an application.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceSettings {
    pub name: String,
    pub kind: Option<String>,
    pub tier: Option<String>,
    pub disk_size: Option<i64>,
    /// Tri-state: unset inherits from source, `Some(true)` also zeroes disk size
    pub disk_autoresize: Option<bool>,
}

impl InstanceSettings {
    fn from_env(
        name_var: &'static str,
        kind_var: &'static str,
        tier_var: &'static str,
        disk_size_var: &'static str,
        disk_autoresize_var: &'static str,
    ) -> Result<Self> {
        Ok(Self {
            name: required(name_var)?,
            kind: optional(kind_var)?,
            tier: optional(tier_var)?,
            disk_size: optional_i64(disk_size_var)?,
            disk_autoresize: optional_bool(disk_autoresize_var)?,
        })
    }

    fn target_from_env() -> Result<Self> {
        Self::from_env(
            "TARGET_INSTANCE_NAME",
            "TARGET_INSTANCE_TYPE",
            "TARGET_INSTANCE_TIER",
            "TARGET_INSTANCE_DISK_SIZE",
            "TARGET_INSTANCE_DISK_AUTORESIZE",
        )
    }

    fn source_from_env() -> Result<Self> {
        Self::from_env(
            "SOURCE_INSTANCE_NAME",
            "SOURCE_INSTANCE_TYPE",
            "SOURCE_INSTANCE_TIER",
            "SOURCE_INSTANCE_DISK_SIZE",
            "SOURCE_INSTANCE_DISK_AUTORESIZE",
        )
    }
}

/// Common configuration shared by all four binaries
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the application owning the source instance (`APP_NAME`)
    pub app_name: String,
    /// Namespace to operate in (`NAMESPACE`)
    pub namespace: String,
    /// Shape of the target instance (`TARGET_INSTANCE_*`)
    pub target_instance: InstanceSettings,
    pub logging: Logging,
    pub development: Development,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            app_name: required("APP_NAME")?,
            namespace: required("NAMESPACE")?,
            target_instance: InstanceSettings::target_from_env()?,
            logging: Logging::from_env()?,
            development: Development::from_env()?,
        })
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "app={} namespace={} target={}",
            self.app_name, self.namespace, self.target_instance.name
        )
    }
}

/// Configuration for `finalize`: additionally needs the (now detached)
/// source instance name, since the application no longer references it.
#[derive(Debug, Clone)]
pub struct FinalizeConfig {
    pub common: Config,
    pub source_instance_name: String,
}

impl FinalizeConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            common: Config::from_env()?,
            source_instance_name: required("SOURCE_INSTANCE_NAME")?,
        })
    }
}

/// Configuration for `rollback`: the full source shape, used to point the
/// application back at the instance it started on.
#[derive(Debug, Clone)]
pub struct RollbackConfig {
    pub common: Config,
    pub source_instance: InstanceSettings,
}

impl RollbackConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            common: Config::from_env()?,
            source_instance: InstanceSettings::source_from_env()?,
        })
    }
}

fn required(name: &'static str) -> Result<String> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVariable(name)),
    }
}

fn optional(name: &'static str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => Ok(Some(v)),
        _ => Ok(None),
    }
}

fn optional_i64(name: &'static str) -> Result<Option<i64>> {
    match optional(name)? {
        None => Ok(None),
        Some(v) => v
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name,
                value: v,
                expected: "an integer",
            }),
    }
}

/// Tri-state boolean: unset stays unset, anything else must parse
fn optional_bool(name: &'static str) -> Result<Option<bool>> {
    match optional(name)? {
        None => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(Some(true)),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(Some(false)),
        Some(v) => Err(ConfigError::InvalidValue {
            name,
            value: v,
            expected: "true or false",
        }),
    }
}

/// Boolean toggle: absent means false
fn flag(name: &'static str) -> Result<bool> {
    Ok(optional_bool(name)?.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    // Environment variables are process-global; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env(vars: &[(&str, &str)]) -> MutexGuard<'static, ()> {
        let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for name in [
            "APP_NAME",
            "NAMESPACE",
            "TARGET_INSTANCE_NAME",
            "TARGET_INSTANCE_TYPE",
            "TARGET_INSTANCE_TIER",
            "TARGET_INSTANCE_DISK_SIZE",
            "TARGET_INSTANCE_DISK_AUTORESIZE",
            "SOURCE_INSTANCE_NAME",
            "LOG_LEVEL",
            "LOG_FORMAT",
            "DEVELOPMENT_MODE_SKIP_BACKUP",
            "DEVELOPMENT_MODE_UNSAFE_PASSWORD",
            "DEVELOPMENT_MODE_ADD_AUTH_NETWORK",
        ] {
            env::remove_var(name);
        }
        for (name, value) in vars {
            env::set_var(name, value);
        }
        guard
    }

    #[test]
    fn minimal_configuration_parses() {
        let _guard = with_env(&[
            ("APP_NAME", "myapp"),
            ("NAMESPACE", "myteam"),
            ("TARGET_INSTANCE_NAME", "myapp-v2"),
        ]);
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.app_name, "myapp");
        assert_eq!(cfg.namespace, "myteam");
        assert_eq!(cfg.target_instance.name, "myapp-v2");
        assert_eq!(cfg.target_instance.tier, None);
        assert_eq!(cfg.target_instance.disk_autoresize, None);
        assert_eq!(cfg.logging.format, LogFormat::Text);
        assert!(!cfg.development.skip_backup);
    }

    #[test]
    fn missing_app_name_is_an_error() {
        let _guard = with_env(&[("NAMESPACE", "myteam"), ("TARGET_INSTANCE_NAME", "t")]);
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVariable("APP_NAME")));
    }

    #[test]
    fn disk_autoresize_tri_state() {
        let _guard = with_env(&[
            ("APP_NAME", "myapp"),
            ("NAMESPACE", "myteam"),
            ("TARGET_INSTANCE_NAME", "myapp-v2"),
            ("TARGET_INSTANCE_DISK_AUTORESIZE", "true"),
        ]);
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.target_instance.disk_autoresize, Some(true));
    }

    #[test]
    fn invalid_disk_size_is_an_error() {
        let _guard = with_env(&[
            ("APP_NAME", "myapp"),
            ("NAMESPACE", "myteam"),
            ("TARGET_INSTANCE_NAME", "myapp-v2"),
            ("TARGET_INSTANCE_DISK_SIZE", "a-lot"),
        ]);
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn log_format_json() {
        let _guard = with_env(&[
            ("APP_NAME", "myapp"),
            ("NAMESPACE", "myteam"),
            ("TARGET_INSTANCE_NAME", "myapp-v2"),
            ("LOG_FORMAT", "JSON"),
        ]);
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn development_toggles() {
        let _guard = with_env(&[
            ("APP_NAME", "myapp"),
            ("NAMESPACE", "myteam"),
            ("TARGET_INSTANCE_NAME", "myapp-v2"),
            ("DEVELOPMENT_MODE_SKIP_BACKUP", "true"),
            ("DEVELOPMENT_MODE_ADD_AUTH_NETWORK", "true"),
        ]);
        let cfg = Config::from_env().unwrap();
        assert!(cfg.development.skip_backup);
        assert!(!cfg.development.unsafe_password);
        assert!(cfg.development.add_auth_network);
    }

    #[test]
    fn finalize_requires_source_name() {
        let _guard = with_env(&[
            ("APP_NAME", "myapp"),
            ("NAMESPACE", "myteam"),
            ("TARGET_INSTANCE_NAME", "myapp-v2"),
        ]);
        assert!(FinalizeConfig::from_env().is_err());
    }
}
