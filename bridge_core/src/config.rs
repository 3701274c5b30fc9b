//! `Bridge.toml` settings, discovered by walking up from the working
//! directory, plus environment overrides.

use crate::discovery::CollisionPolicy;
use crate::error::{BridgeError, Result};
use crate::guest::DEFAULT_MAX_CALL_DEPTH;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "Bridge.toml";
pub const DEBUG_ENV: &str = "BRIDGE_DEBUG";
pub const EXECUTION_PATH_ENV: &str = "BRIDGE_EXECUTION_PATH";

/// Bridge-wide settings.
///
/// ```toml
/// execution_path = "/srv/guest"
/// search_paths = ["vendor/guest_modules"]
/// debug = false
/// max_call_depth = 100
/// collision_policy = "reject"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Resolution root. The process working directory is used when unset.
    pub execution_path: Option<PathBuf>,
    /// Extra directories appended to every module's default path list.
    pub search_paths: Vec<PathBuf>,
    /// Trace every trampoline call and return.
    pub debug: bool,
    pub max_call_depth: usize,
    pub collision_policy: CollisionPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            execution_path: None,
            search_paths: Vec::new(),
            debug: false,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            collision_policy: CollisionPolicy::default(),
        }
    }
}

impl BridgeConfig {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let content = fs::read_to_string(config_path.as_ref())
            .map_err(|e| BridgeError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn from_project_root() -> Result<Self> {
        let mut current_dir = std::env::current_dir().map_err(|e| {
            BridgeError::Config(format!("Failed to get current directory: {}", e))
        })?;

        loop {
            let config_path = current_dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                debug!("Loading bridge config from {}", config_path.display());
                return Self::load(config_path);
            }

            if !current_dir.pop() {
                break;
            }
        }

        Err(BridgeError::Config(format!(
            "Could not find {}",
            CONFIG_FILE_NAME
        )))
    }

    /// Project config if one is found, otherwise defaults, with environment
    /// overrides applied either way.
    pub fn discover() -> Self {
        let config = match Self::from_project_root() {
            Ok(config) => config,
            Err(e) => {
                debug!("Using default bridge config: {}", e);
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if debug_enabled_from_env() {
            self.debug = true;
        }
        if let Some(path) = std::env::var_os(EXECUTION_PATH_ENV) {
            if !path.is_empty() {
                self.execution_path = Some(PathBuf::from(path));
            }
        }
        self
    }

    /// The resolution root: the configured path, else the working directory.
    pub fn root(&self) -> Option<PathBuf> {
        match &self.execution_path {
            Some(path) => Some(path.clone()),
            None => std::env::current_dir().ok(),
        }
    }
}

/// `BRIDGE_DEBUG` is on for any value except empty, `0` or `false`.
pub fn debug_enabled_from_env() -> bool {
    match std::env::var(DEBUG_ENV) {
        Ok(value) => {
            let value = value.trim();
            !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);

        let config_content = r#"
execution_path = "/srv/guest"
search_paths = ["vendor/guest_modules"]
debug = true
collision_policy = "last_wins"
"#;
        fs::write(&config_path, config_content).unwrap();

        let config = BridgeConfig::load(config_path).unwrap();
        assert_eq!(config.execution_path, Some(PathBuf::from("/srv/guest")));
        assert_eq!(config.search_paths, vec![PathBuf::from("vendor/guest_modules")]);
        assert!(config.debug);
        assert_eq!(config.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(config.collision_policy, CollisionPolicy::LastWins);
    }

    #[test]
    fn test_invalid_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "debug = \"sometimes\"").unwrap();

        let result = BridgeConfig::load(config_path);
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_root_prefers_configured_path() {
        let config = BridgeConfig {
            execution_path: Some(PathBuf::from("/opt/root")),
            ..Default::default()
        };
        assert_eq!(config.root(), Some(PathBuf::from("/opt/root")));
        assert!(BridgeConfig::default().root().is_some());
    }

    #[test]
    fn test_debug_env_override() {
        let config = BridgeConfig::default();
        for (value, expected) in [("1", true), ("yes", true), ("0", false), ("FALSE", false), ("", false)] {
            std::env::set_var(DEBUG_ENV, value);
            assert_eq!(debug_enabled_from_env(), expected, "{}={:?}", DEBUG_ENV, value);
            assert_eq!(config.clone().with_env_overrides().debug, expected);
        }
        std::env::remove_var(DEBUG_ENV);
        assert!(!debug_enabled_from_env());
        assert!(!config.with_env_overrides().debug);
    }
}
