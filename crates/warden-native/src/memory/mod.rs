//! In-process native engine.
//!
//! Repositories live inside an `InMemoryNative` and are selected by the
//! `SQL.CONNECTION` entry of the settings document (`mem://<name>`). Handles
//! opened from the same provider with the same connection share one
//! repository, so a config registered through one handle is visible to every
//! other handle, exactly like a shared database.

mod config;
mod diagnostic;
mod engine;

pub use config::{ConfigDocument, DataSource};

use crate::catalog::codes;
use crate::handle::{
    HandleKind, NativeConfig, NativeConfigManager, NativeDiagnostic, NativeEngine, NativeProduct,
};
use crate::provider::NativeProvider;
use crate::NativeSetupError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};
use tracing::debug;

const CONNECTION_SCHEME: &str = "mem://";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleAction {
    Init,
    Destroy,
}

/// One entry of the provider's handle journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeEvent {
    pub handle_id: u64,
    pub kind: HandleKind,
    pub action: HandleAction,
}

#[derive(Clone, Default)]
pub struct InMemoryNative {
    inner: Arc<Inner>,
}

#[derive(Default)]
pub(crate) struct Inner {
    repositories: Mutex<HashMap<String, Arc<Repository>>>,
    journal: Mutex<Vec<NativeEvent>>,
    next_handle: AtomicU64,
}

impl InMemoryNative {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide provider used when no provider is configured explicitly.
    pub fn shared() -> Self {
        static SHARED: OnceLock<InMemoryNative> = OnceLock::new();
        SHARED.get_or_init(InMemoryNative::new).clone()
    }

    /// Register a configuration carrying the template data sources plus
    /// `data_sources` and make it the repository default.
    pub fn seed_default_config(
        &self,
        settings: &str,
        data_sources: &[&str],
    ) -> Result<i64, NativeSetupError> {
        let connection = parse_connection(settings)?;
        let mut document = ConfigDocument::template();
        for code in data_sources {
            document.add_data_source(code)?;
        }
        let repository = self.inner.repository(&connection);
        let mut state = repository.lock()?;
        let config_id = state.register_config(document, "seeded default")?;
        state.default_config_id = config_id;
        debug!("seeded {connection} with default config {config_id}");
        Ok(config_id)
    }

    /// Every init/destroy performed by handles of this provider, in order.
    pub fn events(&self) -> Vec<NativeEvent> {
        self.inner
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Handles that were initialized and not yet destroyed.
    pub fn live_handles(&self) -> usize {
        let events = self.events();
        let inits = events
            .iter()
            .filter(|e| e.action == HandleAction::Init)
            .count();
        inits - (events.len() - inits)
    }
}

impl NativeProvider for InMemoryNative {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn engine(&self) -> Arc<dyn NativeEngine> {
        Arc::new(engine::MemoryEngine::new(self.core(HandleKind::Engine)))
    }

    fn config(&self) -> Arc<dyn NativeConfig> {
        Arc::new(config::MemoryConfig::new(self.core(HandleKind::Config)))
    }

    fn config_manager(&self) -> Arc<dyn NativeConfigManager> {
        Arc::new(config::MemoryConfigManager::new(
            self.core(HandleKind::ConfigManager),
        ))
    }

    fn diagnostic(&self) -> Arc<dyn NativeDiagnostic> {
        Arc::new(diagnostic::MemoryDiagnostic::new(
            self.core(HandleKind::Diagnostic),
        ))
    }

    fn product(&self) -> Arc<dyn NativeProduct> {
        Arc::new(diagnostic::MemoryProduct::new(self.core(HandleKind::Product)))
    }
}

impl InMemoryNative {
    fn core(&self, kind: HandleKind) -> HandleCore {
        HandleCore {
            id: self.inner.next_handle.fetch_add(1, Ordering::Relaxed) + 1,
            kind,
            native: Arc::clone(&self.inner),
            binding: Mutex::new(None),
            last_errors: Mutex::new(HashMap::new()),
        }
    }
}

impl Inner {
    fn repository(&self, connection: &str) -> Arc<Repository> {
        let mut repositories = self
            .repositories
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            repositories
                .entry(connection.to_owned())
                .or_insert_with(|| Arc::new(Repository::new(connection))),
        )
    }

    fn journal(&self, handle_id: u64, kind: HandleKind, action: HandleAction) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(NativeEvent {
                handle_id,
                kind,
                action,
            });
    }
}

/// Native failure: status code plus last-exception text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Failure {
    pub code: i64,
    pub message: String,
}

impl Failure {
    pub fn new(code: i64, message: impl std::fmt::Display) -> Self {
        Self {
            code,
            message: format!("{code:04}E|{message}"),
        }
    }
}

impl From<Failure> for NativeSetupError {
    fn from(f: Failure) -> Self {
        NativeSetupError::InvalidSettings(f.message)
    }
}

#[derive(Debug, Deserialize)]
struct SettingsDocument {
    #[serde(rename = "SQL", default)]
    sql: Option<SqlSettings>,
}

#[derive(Debug, Deserialize)]
struct SqlSettings {
    #[serde(rename = "CONNECTION")]
    connection: String,
}

/// Resolve the repository name from a settings document.
fn parse_connection(settings: &str) -> Result<String, Failure> {
    let doc: SettingsDocument = serde_json::from_str(settings)
        .map_err(|e| Failure::new(codes::INVALID_SETTINGS, format!("invalid settings: {e}")))?;
    let Some(sql) = doc.sql else {
        return Ok("default".to_owned());
    };
    match sql.connection.strip_prefix(CONNECTION_SCHEME) {
        Some(name) if !name.is_empty() => Ok(name.to_owned()),
        _ => Err(Failure::new(
            codes::INVALID_SETTINGS,
            format!("unsupported connection '{}'", sql.connection),
        )),
    }
}

#[derive(Clone)]
pub(crate) struct Binding {
    pub instance_name: String,
    pub repository: Arc<Repository>,
}

/// State common to every memory handle: binding and last exception.
pub(crate) struct HandleCore {
    id: u64,
    kind: HandleKind,
    native: Arc<Inner>,
    binding: Mutex<Option<Binding>>,
    /// Last failure seen by each calling thread.
    last_errors: Mutex<HashMap<ThreadId, Failure>>,
}

impl HandleCore {
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Bind to the repository named by `settings`; `after` runs before the
    /// binding is published and may veto it.
    pub fn init(
        &self,
        instance_name: &str,
        settings: &str,
        verbose_logging: bool,
        after: impl FnOnce(&Binding) -> Result<(), Failure>,
    ) -> i64 {
        let result = (|| {
            let mut slot = self
                .binding
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(Failure::new(
                    codes::ALREADY_INITIALIZED,
                    format!("{} handle already initialized", self.kind),
                ));
            }
            let connection = parse_connection(settings)?;
            let binding = Binding {
                instance_name: instance_name.to_owned(),
                repository: self.native.repository(&connection),
            };
            after(&binding)?;
            if verbose_logging {
                debug!(
                    "{} handle {} bound to {connection} as {instance_name}",
                    self.kind, self.id
                );
            }
            *slot = Some(binding);
            self.native.journal(self.id, self.kind, HandleAction::Init);
            Ok(())
        })();
        self.finish(result)
    }

    pub fn destroy(&self) -> i64 {
        let result = {
            let mut slot = self
                .binding
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.take() {
                Some(_) => {
                    self.native
                        .journal(self.id, self.kind, HandleAction::Destroy);
                    Ok(())
                }
                None => Err(self.not_initialized()),
            }
        };
        self.finish(result)
    }

    /// Run `op` against the current binding and record its outcome.
    pub fn run(&self, op: impl FnOnce(&Binding) -> Result<(), Failure>) -> i64 {
        let binding = self
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let result = match binding {
            Some(binding) => op(&binding),
            None => Err(self.not_initialized()),
        };
        self.finish(result)
    }

    pub fn last_exception_code(&self) -> i64 {
        self.last_errors()
            .get(&thread::current().id())
            .map_or(0, |failure| failure.code)
    }

    pub fn last_exception(&self) -> String {
        self.last_errors()
            .get(&thread::current().id())
            .map(|failure| failure.message.clone())
            .unwrap_or_default()
    }

    pub fn clear_last_exception(&self) {
        self.last_errors().remove(&thread::current().id());
    }

    fn last_errors(&self) -> MutexGuard<'_, HashMap<ThreadId, Failure>> {
        self.last_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn not_initialized(&self) -> Failure {
        Failure::new(
            codes::NOT_INITIALIZED,
            format!("{} handle {} is not initialized", self.kind, self.id),
        )
    }

    fn finish(&self, result: Result<(), Failure>) -> i64 {
        match result {
            Ok(()) => 0,
            Err(failure) => {
                let code = failure.code;
                self.last_errors().insert(thread::current().id(), failure);
                code
            }
        }
    }
}

pub(crate) struct StoredConfig {
    pub document: ConfigDocument,
    pub comment: String,
    pub created_at: String,
}

pub(crate) struct StoredRecord {
    pub definition: serde_json::Map<String, serde_json::Value>,
    pub entity_id: i64,
}

#[derive(Default)]
pub(crate) struct RepositoryState {
    pub configs: BTreeMap<i64, StoredConfig>,
    pub default_config_id: i64,
    pub records: BTreeMap<(String, String), StoredRecord>,
    pub next_entity_id: i64,
    pub redo_count: i64,
}

impl RepositoryState {
    pub fn register_config(
        &mut self,
        document: ConfigDocument,
        comment: &str,
    ) -> Result<i64, Failure> {
        let config_id = document.config_id()?;
        self.configs.entry(config_id).or_insert_with(|| StoredConfig {
            document,
            comment: comment.to_owned(),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        Ok(config_id)
    }

    /// Resolve `config_id`, where `0` means the repository default.
    pub fn resolve_config(&self, config_id: i64) -> Result<(i64, ConfigDocument), Failure> {
        let id = if config_id == 0 {
            self.default_config_id
        } else {
            config_id
        };
        if id == 0 {
            return Err(Failure::new(
                codes::NO_DEFAULT_CONFIG,
                "no default configuration has been registered",
            ));
        }
        self.configs
            .get(&id)
            .map(|stored| (id, stored.document.clone()))
            .ok_or_else(|| Failure::new(codes::UNKNOWN_CONFIG_ID, format!("unknown config id {id}")))
    }
}

pub(crate) struct Repository {
    pub name: String,
    state: Mutex<RepositoryState>,
}

impl Repository {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: Mutex::new(RepositoryState::default()),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, RepositoryState>, Failure> {
        self.state.lock().map_err(|e| {
            Failure::new(
                codes::REPOSITORY_LOCK,
                format!("repository '{}' lock poisoned: {e}", self.name),
            )
        })
    }
}
