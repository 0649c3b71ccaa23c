use super::config::ConfigDocument;
use super::{Failure, HandleCore, RepositoryState, StoredRecord};
use crate::catalog::codes;
use crate::handle::{flags, HandleKind, NativeEngine, NativeHandle};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

struct ActiveConfig {
    id: i64,
    document: ConfigDocument,
}

#[derive(Default)]
struct Workload {
    added: AtomicI64,
    deleted: AtomicI64,
    reevaluated: AtomicI64,
}

pub(crate) struct MemoryEngine {
    core: HandleCore,
    active: Mutex<Option<ActiveConfig>>,
    workload: Workload,
}

impl MemoryEngine {
    pub fn new(core: HandleCore) -> Self {
        Self {
            core,
            active: Mutex::new(None),
            workload: Workload::default(),
        }
    }

    /// Run a record-level operation: the data source must exist in the
    /// configuration this handle was initialized with.
    fn run_for_source(
        &self,
        data_source_code: &str,
        op: impl FnOnce(&mut RepositoryState) -> Result<(), Failure>,
    ) -> i64 {
        self.core.run(|binding| {
            self.check_source(data_source_code)?;
            let mut state = binding.repository.lock()?;
            op(&mut state)
        })
    }

    fn check_source(&self, data_source_code: &str) -> Result<(), Failure> {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(active) = active.as_ref() else {
            return Err(Failure::new(codes::NOT_INITIALIZED, "engine has no active config"));
        };
        if active.document.has_data_source(data_source_code) {
            Ok(())
        } else {
            Err(Failure::new(
                codes::UNKNOWN_DATA_SOURCE,
                format!("Unknown DATA_SOURCE value '{data_source_code}'"),
            ))
        }
    }

    fn active_id(&self) -> Option<i64> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.id)
    }
}

fn parse_object(definition: &str) -> Result<Map<String, Value>, Failure> {
    match serde_json::from_str::<Value>(definition) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Failure::new(
            codes::INVALID_JSON,
            "record definition must be a JSON object",
        )),
        Err(e) => Err(Failure::new(codes::INVALID_JSON, format!("invalid JSON: {e}"))),
    }
}

fn unknown_record(data_source_code: &str, record_id: &str) -> Failure {
    Failure::new(
        codes::UNKNOWN_RECORD,
        format!("Unknown record: dsrc[{data_source_code}], record[{record_id}]"),
    )
}

fn record_key(data_source_code: &str, record_id: &str) -> (String, String) {
    (data_source_code.to_owned(), record_id.to_owned())
}

fn info(data_source_code: &str, record_id: &str, entity_id: Option<i64>, flags: i64) -> String {
    if flags & flags::WITH_INFO == 0 {
        return String::new();
    }
    let affected: Vec<Value> = entity_id
        .into_iter()
        .map(|id| json!({ "ENTITY_ID": id }))
        .collect();
    json!({
        "DATA_SOURCE": data_source_code,
        "RECORD_ID": record_id,
        "AFFECTED_ENTITIES": affected,
    })
    .to_string()
}

fn entity_json(data_source_code: &str, record_id: &str, record: &StoredRecord) -> Value {
    json!({
        "ENTITY_ID": record.entity_id,
        "RECORDS": [{
            "DATA_SOURCE": data_source_code,
            "RECORD_ID": record_id,
        }],
    })
}

impl NativeHandle for MemoryEngine {
    fn kind(&self) -> HandleKind {
        self.core.kind()
    }

    fn init(&self, instance_name: &str, settings: &str, verbose_logging: bool) -> i64 {
        self.init_with_config_id(instance_name, settings, 0, verbose_logging)
    }

    fn destroy(&self) -> i64 {
        let rc = self.core.destroy();
        if rc == 0 {
            *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
        rc
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

impl NativeEngine for MemoryEngine {
    fn init_with_config_id(
        &self,
        instance_name: &str,
        settings: &str,
        config_id: i64,
        verbose_logging: bool,
    ) -> i64 {
        self.core
            .init(instance_name, settings, verbose_logging, |binding| {
                let (id, document) = binding.repository.lock()?.resolve_config(config_id)?;
                if verbose_logging {
                    debug!("engine {instance_name} loaded config {id}");
                }
                *self.active.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(ActiveConfig { id, document });
                Ok(())
            })
    }

    fn add_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        record_definition: &str,
        flags: i64,
        response: &mut String,
    ) -> i64 {
        self.run_for_source(data_source_code, |state| {
            let definition = parse_object(record_definition)?;
            if let Some(declared) = definition.get("DATA_SOURCE").and_then(Value::as_str) {
                if declared != data_source_code {
                    return Err(Failure::new(
                        codes::INVALID_ARGUMENT,
                        format!("DATA_SOURCE '{declared}' does not match '{data_source_code}'"),
                    ));
                }
            }
            let key = record_key(data_source_code, record_id);
            let entity_id = match state.records.get(&key) {
                Some(existing) => existing.entity_id,
                None => {
                    state.next_entity_id += 1;
                    state.next_entity_id
                }
            };
            state.records.insert(
                key,
                StoredRecord {
                    definition,
                    entity_id,
                },
            );
            self.workload.added.fetch_add(1, Ordering::Relaxed);
            *response = info(data_source_code, record_id, Some(entity_id), flags);
            Ok(())
        })
    }

    fn delete_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        flags: i64,
        response: &mut String,
    ) -> i64 {
        self.run_for_source(data_source_code, |state| {
            let removed = state
                .records
                .remove(&record_key(data_source_code, record_id));
            if removed.is_some() {
                self.workload.deleted.fetch_add(1, Ordering::Relaxed);
            }
            *response = info(
                data_source_code,
                record_id,
                removed.map(|r| r.entity_id),
                flags,
            );
            Ok(())
        })
    }

    fn reevaluate_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        flags: i64,
        response: &mut String,
    ) -> i64 {
        self.run_for_source(data_source_code, |state| {
            let record = state
                .records
                .get(&record_key(data_source_code, record_id))
                .ok_or_else(|| unknown_record(data_source_code, record_id))?;
            self.workload.reevaluated.fetch_add(1, Ordering::Relaxed);
            *response = info(data_source_code, record_id, Some(record.entity_id), flags);
            Ok(())
        })
    }

    fn get_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        _flags: i64,
        response: &mut String,
    ) -> i64 {
        self.run_for_source(data_source_code, |state| {
            let record = state
                .records
                .get(&record_key(data_source_code, record_id))
                .ok_or_else(|| unknown_record(data_source_code, record_id))?;
            *response = json!({
                "DATA_SOURCE": data_source_code,
                "RECORD_ID": record_id,
                "JSON_DATA": record.definition,
            })
            .to_string();
            Ok(())
        })
    }

    fn get_entity_by_record_id(
        &self,
        data_source_code: &str,
        record_id: &str,
        _flags: i64,
        response: &mut String,
    ) -> i64 {
        self.run_for_source(data_source_code, |state| {
            let record = state
                .records
                .get(&record_key(data_source_code, record_id))
                .ok_or_else(|| unknown_record(data_source_code, record_id))?;
            *response = json!({
                "RESOLVED_ENTITY": entity_json(data_source_code, record_id, record),
            })
            .to_string();
            Ok(())
        })
    }

    fn search_by_attributes(&self, attributes: &str, _flags: i64, response: &mut String) -> i64 {
        self.core.run(|binding| {
            let wanted = parse_object(attributes)?;
            let state = binding.repository.lock()?;
            let entities: Vec<Value> = state
                .records
                .iter()
                .filter(|(_, record)| {
                    wanted
                        .iter()
                        .any(|(key, value)| record.definition.get(key) == Some(value))
                })
                .map(|((ds, id), record)| json!({ "ENTITY": entity_json(ds, id, record) }))
                .collect();
            *response = json!({ "RESOLVED_ENTITIES": entities }).to_string();
            Ok(())
        })
    }

    fn why_records(
        &self,
        data_source_code_1: &str,
        record_id_1: &str,
        data_source_code_2: &str,
        record_id_2: &str,
        _flags: i64,
        response: &mut String,
    ) -> i64 {
        self.core.run(|binding| {
            self.check_source(data_source_code_1)?;
            self.check_source(data_source_code_2)?;
            let state = binding.repository.lock()?;
            let first = state
                .records
                .get(&record_key(data_source_code_1, record_id_1))
                .ok_or_else(|| unknown_record(data_source_code_1, record_id_1))?;
            let second = state
                .records
                .get(&record_key(data_source_code_2, record_id_2))
                .ok_or_else(|| unknown_record(data_source_code_2, record_id_2))?;
            let shared: Vec<&String> = first
                .definition
                .iter()
                .filter(|(key, value)| second.definition.get(*key) == Some(*value))
                .map(|(key, _)| key)
                .filter(|key| key.as_str() != "DATA_SOURCE")
                .collect();
            *response = json!({
                "WHY_RESULTS": [{
                    "ENTITY_ID": first.entity_id,
                    "ENTITY_ID_2": second.entity_id,
                    "MATCH_INFO": { "SHARED_FEATURES": shared },
                }],
            })
            .to_string();
            Ok(())
        })
    }

    fn get_record_preview(
        &self,
        record_definition: &str,
        _flags: i64,
        response: &mut String,
    ) -> i64 {
        self.core.run(|_| {
            let definition = parse_object(record_definition)?;
            let data_source = definition
                .get("DATA_SOURCE")
                .and_then(Value::as_str)
                .ok_or_else(|| Failure::new(codes::MISSING_FIELD, "DATA_SOURCE is required"))?;
            self.check_source(data_source)?;
            let features: Map<String, Value> = definition
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "DATA_SOURCE" | "RECORD_ID"))
                .map(|(key, value)| (key.clone(), json!([{ "FEAT_DESC": value }])))
                .collect();
            *response = json!({ "FEATURES": features }).to_string();
            Ok(())
        })
    }

    fn prime_engine(&self) -> i64 {
        self.core.run(|_| Ok(()))
    }

    fn get_stats(&self, response: &mut String) -> i64 {
        self.core.run(|_| {
            *response = json!({
                "workload": {
                    "loadedRecords": self.workload.added.load(Ordering::Relaxed),
                    "deletedRecords": self.workload.deleted.load(Ordering::Relaxed),
                    "reevaluations": self.workload.reevaluated.load(Ordering::Relaxed),
                    "activeConfigId": self.active_id(),
                },
            })
            .to_string();
            Ok(())
        })
    }

    fn get_active_config_id(&self, config_id: &mut i64) -> i64 {
        self.core.run(|_| {
            *config_id = self.active_id().unwrap_or(0);
            Ok(())
        })
    }

    fn count_redo_records(&self, count: &mut i64) -> i64 {
        self.core.run(|binding| {
            *count = binding.repository.lock()?.redo_count;
            Ok(())
        })
    }
}
