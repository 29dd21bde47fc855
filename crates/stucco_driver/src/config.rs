//! Server configuration, read from `STUCCO_*` environment variables.

use std::path::PathBuf;

use crate::{
    env::{Environment, ProcessEnv},
    error::DriverError,
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 150 * 1024 * 1024;

pub const ENV_PLUGIN: &str = "STUCCO_PLUGIN";
pub const ENV_HOST: &str = "STUCCO_HOST";
pub const ENV_PORT: &str = "STUCCO_PORT";
pub const ENV_ROOT_CA: &str = "STUCCO_ROOT_CA";
pub const ENV_PRIVATE_KEY: &str = "STUCCO_PRIVATE_KEY";
pub const ENV_CERT: &str = "STUCCO_CERT";
pub const ENV_MAX_MESSAGE_SIZE: &str = "STUCCO_MAX_MESSAGE_SIZE";
pub const ENV_PROFILE: &str = "STUCCO_PROFILE";
pub const ENV_CA: &str = "STUCCO_CA";
pub const ENV_API_KEY: &str = "STUCCO_API_KEY";
pub const ENV_AUTH_DEBUG: &str = "STUCCO_AUTH_DEBUG";
pub const ENV_CWD: &str = "STUCCO_CWD";

/// Material for the default authorizer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    /// CA bundle (PEM text or a path to it) for client certificate checks.
    pub ca: Option<String>,
    pub api_key: Option<String>,
    /// Log authorization failures.
    pub debug: bool,
}

impl AuthConfig {
    pub fn is_enabled(&self) -> bool {
        self.ca.is_some() || self.api_key.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Launched by the engine as a subprocess.
    pub plugin: bool,
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
    /// Server TLS material, PEM text or file paths. All three or none.
    pub root_ca: Option<String>,
    pub private_key: Option<String>,
    pub cert: Option<String>,
    pub max_message_size: usize,
    pub profile: bool,
    /// Root for handler resolution.
    pub cwd: PathBuf,
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            plugin: false,
            host: DEFAULT_HOST.to_string(),
            port: 0,
            root_ca: None,
            private_key: None,
            cert: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            profile: false,
            cwd: PathBuf::from("."),
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, DriverError> {
        Self::from_environment(&ProcessEnv)
    }

    pub fn from_environment(env: &dyn Environment) -> Result<Self, DriverError> {
        let defaults = Self::default();
        let var = |key: &str| env.get(key).filter(|v| !v.trim().is_empty());

        let port = match var(ENV_PORT) {
            Some(p) => p
                .trim()
                .parse()
                .map_err(|_| DriverError::Config(format!("{ENV_PORT}={p} is not a valid port")))?,
            None => defaults.port,
        };
        let max_message_size = match var(ENV_MAX_MESSAGE_SIZE) {
            Some(size) => size.trim().parse().map_err(|_| {
                DriverError::Config(format!("{ENV_MAX_MESSAGE_SIZE}={size} is not a valid size"))
            })?,
            None => defaults.max_message_size,
        };

        Ok(Self {
            plugin: var(ENV_PLUGIN).is_some_and(|v| is_truthy(&v)),
            host: var(ENV_HOST).unwrap_or(defaults.host),
            port,
            root_ca: var(ENV_ROOT_CA),
            private_key: var(ENV_PRIVATE_KEY),
            cert: var(ENV_CERT),
            max_message_size,
            profile: var(ENV_PROFILE).is_some_and(|v| is_truthy(&v)),
            cwd: var(ENV_CWD).map(PathBuf::from).unwrap_or(defaults.cwd),
            auth: AuthConfig {
                ca: var(ENV_CA),
                api_key: var(ENV_API_KEY),
                debug: var(ENV_AUTH_DEBUG).is_some_and(|v| is_truthy(&v)),
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Reads PEM material given either inline or as a path to a file.
pub fn read_pem(material: &str) -> Result<Vec<u8>, DriverError> {
    if material.contains("-----BEGIN") {
        return Ok(material.as_bytes().to_vec());
    }
    std::fs::read(material).map_err(|e| DriverError::Config(format!("cannot read {material}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;

    #[test]
    fn defaults_without_env() {
        let cfg = ServerConfig::from_environment(&MapEnv::new()).unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.max_message_size, 150 * 1024 * 1024);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn reads_all_variables() {
        let env = MapEnv::new();
        env.set(ENV_PLUGIN, "true").unwrap();
        env.set(ENV_PORT, "50051").unwrap();
        env.set(ENV_MAX_MESSAGE_SIZE, "1024").unwrap();
        env.set(ENV_PROFILE, "1").unwrap();
        env.set(ENV_API_KEY, "xyz").unwrap();
        env.set(ENV_AUTH_DEBUG, "yes").unwrap();
        env.set(ENV_CWD, "/srv/handlers").unwrap();

        let cfg = ServerConfig::from_environment(&env).unwrap();
        assert!(cfg.plugin && cfg.profile && cfg.auth.debug);
        assert_eq!(cfg.port, 50051);
        assert_eq!(cfg.max_message_size, 1024);
        assert_eq!(cfg.auth.api_key.as_deref(), Some("xyz"));
        assert!(cfg.auth.is_enabled());
        assert_eq!(cfg.cwd, PathBuf::from("/srv/handlers"));
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        let env = MapEnv::new();
        env.set(ENV_PORT, "http").unwrap();
        let err = ServerConfig::from_environment(&env).unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
    }

    #[test]
    fn inline_pem_is_used_as_is() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert_eq!(read_pem(pem).unwrap(), pem.as_bytes());
        assert!(read_pem("/definitely/not/here.pem").is_err());
    }
}
