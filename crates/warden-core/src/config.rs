use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_INSTANCE_NAME: &str = "WARDEN_INSTANCE_NAME";
pub const ENV_ENGINE_SETTINGS: &str = "WARDEN_ENGINE_SETTINGS";
pub const ENV_VERBOSE_LOGGING: &str = "WARDEN_VERBOSE_LOGGING";
pub const ENV_CONFIG_ID: &str = "WARDEN_CONFIG_ID";

/// Persisted environment settings, applied with
/// `EnvironmentBuilder::from_config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    /// Native settings, either an embedded JSON document or a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
    #[serde(default)]
    pub verbose_logging: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_id: Option<i64>,
    /// Name of the native provider, see `warden_native::select_provider`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<String>,
}

impl EnvironmentConfig {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid environment config: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Read the `WARDEN_*` process environment variables.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let verbose_logging = match var(ENV_VERBOSE_LOGGING).as_deref() {
            None | Some("" | "0" | "false") => false,
            Some("1" | "true") => true,
            Some(other) => {
                return Err(CoreError::Config(format!(
                    "{ENV_VERBOSE_LOGGING} must be true or false, got '{other}'"
                )))
            }
        };
        let config_id = var(ENV_CONFIG_ID)
            .map(|raw| {
                raw.parse::<i64>().map_err(|e| {
                    CoreError::Config(format!("{ENV_CONFIG_ID} is not a config id: {e}"))
                })
            })
            .transpose()?;
        Ok(Self {
            instance_name: var(ENV_INSTANCE_NAME),
            settings: var(ENV_ENGINE_SETTINGS).map(serde_json::Value::String),
            verbose_logging,
            config_id,
            native: None,
        })
    }

    /// The settings as the string forwarded to native handles.
    pub fn settings_string(&self) -> Option<String> {
        self.settings.as_ref().map(|settings| match settings {
            serde_json::Value::String(raw) => raw.clone(),
            document => document.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/environment.json");

        let config = EnvironmentConfig {
            instance_name: Some("loader".to_owned()),
            settings: Some(serde_json::json!({"SQL": {"CONNECTION": "mem://roundtrip"}})),
            verbose_logging: true,
            config_id: Some(42),
            native: Some("memory".to_owned()),
        };
        config.save(&path).unwrap();

        let loaded = EnvironmentConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.settings_string().as_deref(),
            Some(r#"{"SQL":{"CONNECTION":"mem://roundtrip"}}"#)
        );
    }

    #[test]
    fn missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("environment.json");
        std::fs::write(&path, "{}").unwrap();

        let loaded = EnvironmentConfig::load(&path).unwrap();
        assert_eq!(loaded, EnvironmentConfig::default());
        assert!(loaded.settings_string().is_none());
    }

    #[test]
    fn invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("environment.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            EnvironmentConfig::load(&path),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn reads_variables() {
        let vars: HashMap<&str, &str> = [
            (ENV_INSTANCE_NAME, "from-env"),
            (ENV_ENGINE_SETTINGS, r#"{"SQL":{"CONNECTION":"mem://env"}}"#),
            (ENV_VERBOSE_LOGGING, "true"),
            (ENV_CONFIG_ID, "17"),
        ]
        .into_iter()
        .collect();
        let config =
            EnvironmentConfig::from_vars(|key| vars.get(key).map(|v| (*v).to_owned())).unwrap();

        assert_eq!(config.instance_name.as_deref(), Some("from-env"));
        assert!(config.verbose_logging);
        assert_eq!(config.config_id, Some(17));
        assert_eq!(
            config.settings_string().as_deref(),
            Some(r#"{"SQL":{"CONNECTION":"mem://env"}}"#)
        );
    }

    #[test]
    fn rejects_bad_variables() {
        let bad_id = EnvironmentConfig::from_vars(|key| {
            (key == ENV_CONFIG_ID).then(|| "seven".to_owned())
        });
        assert!(matches!(bad_id, Err(CoreError::Config(_))));

        let bad_flag = EnvironmentConfig::from_vars(|key| {
            (key == ENV_VERBOSE_LOGGING).then(|| "loud".to_owned())
        });
        assert!(matches!(bad_flag, Err(CoreError::Config(_))));
    }
}
