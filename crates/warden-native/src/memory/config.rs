use super::{Failure, HandleCore};
use crate::catalog::codes;
use crate::handle::{HandleKind, NativeConfig, NativeConfigManager, NativeHandle};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(rename = "DSRC_ID")]
    pub id: i64,
    #[serde(rename = "DSRC_CODE")]
    pub code: String,
}

/// Configuration snapshot: the data sources records may be loaded under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(rename = "DATA_SOURCES")]
    pub data_sources: Vec<DataSource>,
}

impl ConfigDocument {
    pub fn template() -> Self {
        Self {
            data_sources: vec![
                DataSource {
                    id: 1,
                    code: "TEST".to_owned(),
                },
                DataSource {
                    id: 2,
                    code: "SEARCH".to_owned(),
                },
            ],
        }
    }

    pub fn has_data_source(&self, code: &str) -> bool {
        self.data_sources.iter().any(|ds| ds.code == code)
    }

    pub(crate) fn add_data_source(&mut self, code: &str) -> Result<i64, Failure> {
        let code = code.trim().to_uppercase();
        if code.is_empty() {
            return Err(Failure::new(
                codes::MISSING_FIELD,
                "data source code must not be empty",
            ));
        }
        if self.has_data_source(&code) {
            return Err(Failure::new(
                codes::DUPLICATE_DATA_SOURCE,
                format!("data source '{code}' already exists"),
            ));
        }
        let id = self.data_sources.iter().map(|ds| ds.id).max().unwrap_or(0) + 1;
        self.data_sources.push(DataSource { id, code });
        Ok(id)
    }

    /// Content-derived identifier; identical documents share an id.
    pub(crate) fn config_id(&self) -> Result<i64, Failure> {
        let json = serde_json::to_vec(self)
            .map_err(|e| Failure::new(codes::INVALID_JSON, format!("config encode: {e}")))?;
        let digest = blake3::hash(&json);
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&digest.as_bytes()[..4]);
        Ok(i64::from(u32::from_le_bytes(prefix)) + 1)
    }

    pub(crate) fn parse(definition: &str) -> Result<Self, Failure> {
        serde_json::from_str(definition)
            .map_err(|e| Failure::new(codes::INVALID_JSON, format!("invalid config: {e}")))
    }

    pub(crate) fn to_json(&self) -> Result<String, Failure> {
        serde_json::to_string(self)
            .map_err(|e| Failure::new(codes::INVALID_JSON, format!("config encode: {e}")))
    }
}

pub(crate) struct MemoryConfig {
    core: HandleCore,
    documents: Mutex<HashMap<i64, ConfigDocument>>,
    next_handle: AtomicI64,
}

impl MemoryConfig {
    pub fn new(core: HandleCore) -> Self {
        Self {
            core,
            documents: Mutex::new(HashMap::new()),
            next_handle: AtomicI64::new(1),
        }
    }

    fn open(&self, document: ConfigDocument) -> i64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, document);
        handle
    }

    fn with_document<T>(
        &self,
        config_handle: i64,
        f: impl FnOnce(&mut ConfigDocument) -> Result<T, Failure>,
    ) -> Result<T, Failure> {
        let mut documents = self
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let document = documents.get_mut(&config_handle).ok_or_else(|| {
            Failure::new(
                codes::UNKNOWN_CONFIG_HANDLE,
                format!("unknown config handle {config_handle}"),
            )
        })?;
        f(document)
    }
}

impl NativeHandle for MemoryConfig {
    fn kind(&self) -> HandleKind {
        self.core.kind()
    }

    fn init(&self, instance_name: &str, settings: &str, verbose_logging: bool) -> i64 {
        self.core
            .init(instance_name, settings, verbose_logging, |_| Ok(()))
    }

    fn destroy(&self) -> i64 {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.core.destroy()
    }

    fn last_exception_code(&self) -> i64 {
        self.core.last_exception_code()
    }

    fn last_exception(&self) -> String {
        self.core.last_exception()
    }

    fn clear_last_exception(&self) {
        self.core.clear_last_exception();
    }
}

impl NativeConfig for MemoryConfig {
    fn create(&self, config_handle: &mut i64) -> i64 {
        self.core.run(|_| {
            *config_handle = self.open(ConfigDocument::template());
            Ok(())
        })
    }

    fn load(&self, config_definition: &str, config_handle: &mut i64) -> i64 {
        self.core.run(|_| {
            let document = ConfigDocument::parse(config_definition)?;
            *config_handle = self.open(document);
            Ok(())
        })
    }

    fn export(&self, config_handle: i64, response: &mut String) -> i64 {
        self.core.run(|_| {
            *response = self.with_document(config_handle, |doc| doc.to_json())?;
            Ok(())
        })
    }

    fn close(&self, config_handle: i64) -> i64 {
        self.core.run(|_| {
            let removed = self
                .documents
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&config_handle);
            match removed {
                Some(_) => Ok(()),
                None => Err(Failure::new(
                    codes::UNKNOWN_CONFIG_HANDLE,
                    format!("unknown config handle {config_handle}"),
                )),
            }
        })
    }

    fn add_data_source(&self, config_handle: i64, input_json: &str, response: &mut String) -> i64 {
        self.core.run(|_| {
            let input: serde_json::Value = serde_json::from_str(input_json).map_err(|e| {
                Failure::new(codes::INVALID_JSON, format!("invalid data source: {e}"))
            })?;
            let code = input
                .get("DSRC_CODE")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| Failure::new(codes::MISSING_FIELD, "DSRC_CODE is required"))?
                .to_owned();
            let id = self.with_document(config_handle, |doc| doc.add_data_source(&code))?;
            *response = json!({ "DSRC_ID": id }).to_string();
            Ok(())
        })
    }

    fn list_data_sources(&self, config_handle: i64, response: &mut String) -> i64 {
        self.core.run(|_| {
            let sources = self.with_document(config_handle, |doc| Ok(doc.data_sources.clone()))?;
            *response = json!({ "DATA_SOURCES": sources }).to_string();
            Ok(())
        })
    }
}

pub(crate) struct MemoryConfigManager {
    core: HandleCore,
}

impl MemoryConfigManager {
    pub fn new(core: HandleCore) -> Self {
        Self { core }
    }
}

impl NativeHandle for MemoryConfigManager {
    fn kind(&self) -> HandleKind {
        self.core.kind()
    }

    fn init(&self, instance_name: &str, settings: &str, verbose_logging: bool) -> i64 {
        self.core
            .init(instance_name, settings, verbose_logging, |_| Ok(()))
    }

    fn destroy(&self) -> i64 {
        self.core.destroy()
    }

    fn last_exception_code(&self) -> i64 {
        self.core.last_exception_code()
    }

    fn last_exception(&self) -> String {
        self.core.last_exception()
    }

    fn clear_last_exception(&self) {
        self.core.clear_last_exception();
    }
}

impl NativeConfigManager for MemoryConfigManager {
    fn add_config(&self, config_definition: &str, comment: &str, config_id: &mut i64) -> i64 {
        self.core.run(|binding| {
            let document = ConfigDocument::parse(config_definition)?;
            *config_id = binding.repository.lock()?.register_config(document, comment)?;
            Ok(())
        })
    }

    fn get_config(&self, config_id: i64, response: &mut String) -> i64 {
        self.core.run(|binding| {
            let state = binding.repository.lock()?;
            let stored = state.configs.get(&config_id).ok_or_else(|| {
                Failure::new(
                    codes::UNKNOWN_CONFIG_ID,
                    format!("unknown config id {config_id}"),
                )
            })?;
            *response = stored.document.to_json()?;
            Ok(())
        })
    }

    fn get_config_list(&self, response: &mut String) -> i64 {
        self.core.run(|binding| {
            let state = binding.repository.lock()?;
            let configs: Vec<_> = state
                .configs
                .iter()
                .map(|(id, stored)| {
                    json!({
                        "CONFIG_ID": id,
                        "CONFIG_COMMENTS": stored.comment,
                        "SYS_CREATE_DT": stored.created_at,
                    })
                })
                .collect();
            *response = json!({ "CONFIGS": configs }).to_string();
            Ok(())
        })
    }

    fn get_default_config_id(&self, config_id: &mut i64) -> i64 {
        self.core.run(|binding| {
            *config_id = binding.repository.lock()?.default_config_id;
            Ok(())
        })
    }

    fn set_default_config_id(&self, config_id: i64) -> i64 {
        self.core.run(|binding| {
            let mut state = binding.repository.lock()?;
            if !state.configs.contains_key(&config_id) {
                return Err(Failure::new(
                    codes::UNKNOWN_CONFIG_ID,
                    format!("unknown config id {config_id}"),
                ));
            }
            state.default_config_id = config_id;
            Ok(())
        })
    }

    fn replace_default_config_id(&self, current_config_id: i64, new_config_id: i64) -> i64 {
        self.core.run(|binding| {
            let mut state = binding.repository.lock()?;
            if state.default_config_id != current_config_id {
                return Err(Failure::new(
                    codes::REPLACE_CONFLICT,
                    format!(
                        "default config is {}, expected {current_config_id}",
                        state.default_config_id
                    ),
                ));
            }
            if !state.configs.contains_key(&new_config_id) {
                return Err(Failure::new(
                    codes::UNKNOWN_CONFIG_ID,
                    format!("unknown config id {new_config_id}"),
                ));
            }
            state.default_config_id = new_config_id;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryNative;
    use crate::provider::NativeProvider;

    const SETTINGS: &str = r#"{"SQL":{"CONNECTION":"mem://config-tests"}}"#;

    #[test]
    fn template_contains_default_sources() {
        let doc = ConfigDocument::template();
        assert!(doc.has_data_source("TEST"));
        assert!(doc.has_data_source("SEARCH"));
        assert!(!doc.has_data_source("CUSTOMERS"));
    }

    #[test]
    fn add_data_source_normalizes_and_rejects_duplicates() {
        let mut doc = ConfigDocument::template();
        assert_eq!(doc.add_data_source(" customers ").unwrap(), 3);
        assert!(doc.has_data_source("CUSTOMERS"));
        let err = doc.add_data_source("CUSTOMERS").unwrap_err();
        assert_eq!(err.code, codes::DUPLICATE_DATA_SOURCE);
    }

    #[test]
    fn config_id_follows_content() {
        let a = ConfigDocument::template();
        let mut b = ConfigDocument::template();
        assert_eq!(a.config_id().unwrap(), b.config_id().unwrap());
        b.add_data_source("X").unwrap();
        assert_ne!(a.config_id().unwrap(), b.config_id().unwrap());
        assert!(a.config_id().unwrap() > 0);
    }

    #[test]
    fn config_handle_edit_and_export() {
        let native = InMemoryNative::new();
        let config = native.config();
        assert_eq!(config.init("t", SETTINGS, false), 0);

        let mut handle = 0;
        assert_eq!(config.create(&mut handle), 0);
        let mut response = String::new();
        assert_eq!(
            config.add_data_source(handle, r#"{"DSRC_CODE":"CUSTOMERS"}"#, &mut response),
            0
        );
        assert_eq!(response, r#"{"DSRC_ID":3}"#);

        let mut exported = String::new();
        assert_eq!(config.export(handle, &mut exported), 0);
        assert!(ConfigDocument::parse(&exported)
            .unwrap()
            .has_data_source("CUSTOMERS"));

        assert_eq!(config.close(handle), 0);
        assert_eq!(config.close(handle), codes::UNKNOWN_CONFIG_HANDLE);
    }

    #[test]
    fn manager_replace_detects_conflict() {
        let native = InMemoryNative::new();
        let first = native.seed_default_config(SETTINGS, &[]).unwrap();
        let manager = native.config_manager();
        assert_eq!(manager.init("t", SETTINGS, false), 0);

        let mut doc = ConfigDocument::template();
        doc.add_data_source("X").unwrap();
        let mut second = 0;
        assert_eq!(
            manager.add_config(&doc.to_json().unwrap(), "with X", &mut second),
            0
        );

        assert_eq!(
            manager.replace_default_config_id(second, first),
            codes::REPLACE_CONFLICT
        );
        assert_eq!(manager.replace_default_config_id(first, second), 0);
        let mut current = 0;
        assert_eq!(manager.get_default_config_id(&mut current), 0);
        assert_eq!(current, second);

        let mut list = String::new();
        assert_eq!(manager.get_config_list(&mut list), 0);
        assert!(list.contains("with X"));
    }

    #[test]
    fn manager_rejects_unknown_default() {
        let native = InMemoryNative::new();
        let manager = native.config_manager();
        assert_eq!(manager.init("t", SETTINGS, false), 0);
        assert_eq!(manager.set_default_config_id(42), codes::UNKNOWN_CONFIG_ID);
        assert!(manager.last_exception().starts_with("7221E|"));
    }
}
