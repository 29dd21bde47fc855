//! Environment accessor shared by `SetSecrets` and the handlers it feeds.

use std::{env, fmt::Debug};

use dashmap::DashMap;

/// Key/value environment. `SetSecrets` writes through it; handlers read it.
/// Later writes simply overwrite earlier ones.
pub trait Environment: Send + Sync + Debug {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
}

/// Rejects names and values the process environment cannot hold.
pub fn validate(key: &str, value: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("secret name is empty".to_string());
    }
    if key.contains(['=', '\0']) {
        return Err(format!("invalid secret name {key:?}"));
    }
    if value.contains('\0') {
        return Err(format!("invalid value for secret {key:?}"));
    }
    Ok(())
}

/// The real process environment.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        validate(key, value)?;
        unsafe {
            env::set_var(key, value);
        }
        Ok(())
    }
}

/// Isolated in-memory environment, mostly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    map: DashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Environment for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        validate(key, value)?;
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_env_overwrites() {
        let env = MapEnv::new();
        assert_eq!(env.get("TOKEN"), None);
        env.set("TOKEN", "a").unwrap();
        env.set("TOKEN", "b").unwrap();
        assert_eq!(env.get("TOKEN"), Some("b".to_string()));
    }

    #[test]
    fn process_env_round_trips() {
        let key = "STUCCO_DRIVER_TEST_PROCESS_ENV";
        ProcessEnv.set(key, "value").unwrap();
        assert_eq!(ProcessEnv.get(key), Some("value".to_string()));
        unsafe { env::remove_var(key) };
    }

    #[test]
    fn unrepresentable_entries_are_rejected() {
        assert_eq!(ProcessEnv.set("", "v").unwrap_err(), "secret name is empty");
        assert!(ProcessEnv.set("A=B", "v").is_err());
        assert!(ProcessEnv.set("NUL\0KEY", "v").is_err());
        assert!(ProcessEnv.set("STUCCO_DRIVER_TEST_NUL_VALUE", "a\0b").is_err());
        assert_eq!(ProcessEnv.get("STUCCO_DRIVER_TEST_NUL_VALUE"), None);

        let env = MapEnv::new();
        assert!(env.set("A=B", "v").is_err());
        assert_eq!(env.get("A=B"), None);
        assert!(env.set("A", "x=y").is_ok());
    }
}
