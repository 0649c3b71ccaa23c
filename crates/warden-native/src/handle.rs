use serde::{Deserialize, Serialize};

/// Call flags understood by the native engine.
pub mod flags {
    pub const NO_FLAGS: i64 = 0;
    /// Ask write operations to describe the entities they affected.
    pub const WITH_INFO: i64 = 1 << 62;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    Engine,
    Config,
    ConfigManager,
    Diagnostic,
    Product,
}

impl std::fmt::Display for HandleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleKind::Engine => write!(f, "engine"),
            HandleKind::Config => write!(f, "config"),
            HandleKind::ConfigManager => write!(f, "config-manager"),
            HandleKind::Diagnostic => write!(f, "diagnostic"),
            HandleKind::Product => write!(f, "product"),
        }
    }
}

/// Surface shared by every native handle.
///
/// All operations return a status code, `0` on success. A non-zero code is
/// explained by `last_exception_code` / `last_exception`. The last exception
/// is kept per calling thread and stays valid until that thread's next
/// failing call on the same handle or `clear_last_exception`.
pub trait NativeHandle: Send + Sync {
    fn kind(&self) -> HandleKind;

    fn init(&self, instance_name: &str, settings: &str, verbose_logging: bool) -> i64;

    fn destroy(&self) -> i64;

    fn last_exception_code(&self) -> i64;

    fn last_exception(&self) -> String;

    fn clear_last_exception(&self);
}

pub trait NativeEngine: NativeHandle {
    /// Initialize bound to a specific configuration; `0` selects the
    /// repository's default configuration.
    fn init_with_config_id(
        &self,
        instance_name: &str,
        settings: &str,
        config_id: i64,
        verbose_logging: bool,
    ) -> i64;

    fn add_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        record_definition: &str,
        flags: i64,
        response: &mut String,
    ) -> i64;

    fn delete_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        flags: i64,
        response: &mut String,
    ) -> i64;

    fn reevaluate_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        flags: i64,
        response: &mut String,
    ) -> i64;

    fn get_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        flags: i64,
        response: &mut String,
    ) -> i64;

    fn get_entity_by_record_id(
        &self,
        data_source_code: &str,
        record_id: &str,
        flags: i64,
        response: &mut String,
    ) -> i64;

    fn search_by_attributes(&self, attributes: &str, flags: i64, response: &mut String) -> i64;

    fn why_records(
        &self,
        data_source_code_1: &str,
        record_id_1: &str,
        data_source_code_2: &str,
        record_id_2: &str,
        flags: i64,
        response: &mut String,
    ) -> i64;

    fn get_record_preview(&self, record_definition: &str, flags: i64, response: &mut String)
        -> i64;

    fn prime_engine(&self) -> i64;

    fn get_stats(&self, response: &mut String) -> i64;

    fn get_active_config_id(&self, config_id: &mut i64) -> i64;

    fn count_redo_records(&self, count: &mut i64) -> i64;
}

/// Editor for detached configuration documents, addressed by config handle.
pub trait NativeConfig: NativeHandle {
    fn create(&self, config_handle: &mut i64) -> i64;

    fn load(&self, config_definition: &str, config_handle: &mut i64) -> i64;

    fn export(&self, config_handle: i64, response: &mut String) -> i64;

    fn close(&self, config_handle: i64) -> i64;

    fn add_data_source(&self, config_handle: i64, input_json: &str, response: &mut String) -> i64;

    fn list_data_sources(&self, config_handle: i64, response: &mut String) -> i64;
}

/// Registry of configurations stored in the repository.
pub trait NativeConfigManager: NativeHandle {
    fn add_config(&self, config_definition: &str, comment: &str, config_id: &mut i64) -> i64;

    fn get_config(&self, config_id: i64, response: &mut String) -> i64;

    fn get_config_list(&self, response: &mut String) -> i64;

    fn get_default_config_id(&self, config_id: &mut i64) -> i64;

    fn set_default_config_id(&self, config_id: i64) -> i64;

    /// Compare-and-swap of the default configuration id.
    fn replace_default_config_id(&self, current_config_id: i64, new_config_id: i64) -> i64;
}

pub trait NativeDiagnostic: NativeHandle {
    fn init_with_config_id(
        &self,
        instance_name: &str,
        settings: &str,
        config_id: i64,
        verbose_logging: bool,
    ) -> i64;

    fn get_repository_info(&self, response: &mut String) -> i64;

    fn check_repository_performance(&self, seconds: i64, response: &mut String) -> i64;

    fn get_feature(&self, feature_id: i64, response: &mut String) -> i64;

    fn purge_repository(&self) -> i64;
}

pub trait NativeProduct: NativeHandle {
    fn get_version(&self, response: &mut String) -> i64;

    fn get_license(&self, response: &mut String) -> i64;
}
