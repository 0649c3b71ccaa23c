use super::{Failure, HandleCore};
use crate::catalog::codes;
use crate::handle::{HandleKind, NativeDiagnostic, NativeHandle, NativeProduct};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

pub(crate) struct MemoryDiagnostic {
    core: HandleCore,
    config_id: AtomicI64,
}

impl MemoryDiagnostic {
    pub fn new(core: HandleCore) -> Self {
        Self {
            core,
            config_id: AtomicI64::new(0),
        }
    }
}

impl NativeHandle for MemoryDiagnostic {
    fn kind(&self) -> HandleKind {
        self.core.kind()
    }

    fn init(&self, instance_name: &str, settings: &str, verbose_logging: bool) -> i64 {
        self.init_with_config_id(instance_name, settings, 0, verbose_logging)
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

impl NativeDiagnostic for MemoryDiagnostic {
    fn init_with_config_id(
        &self,
        instance_name: &str,
        settings: &str,
        config_id: i64,
        verbose_logging: bool,
    ) -> i64 {
        self.core
            .init(instance_name, settings, verbose_logging, |binding| {
                let (id, _) = binding.repository.lock()?.resolve_config(config_id)?;
                self.config_id.store(id, Ordering::Relaxed);
                Ok(())
            })
    }

    fn get_repository_info(&self, response: &mut String) -> i64 {
        self.core.run(|binding| {
            let state = binding.repository.lock()?;
            *response = json!({
                "dataStores": [{
                    "id": "CORE",
                    "type": "memory",
                    "location": binding.repository.name,
                }],
                "instanceName": binding.instance_name,
                "configId": self.config_id.load(Ordering::Relaxed),
                "recordCount": state.records.len(),
            })
            .to_string();
            Ok(())
        })
    }

    fn check_repository_performance(&self, seconds: i64, response: &mut String) -> i64 {
        self.core.run(|binding| {
            if seconds < 0 {
                return Err(Failure::new(
                    codes::INVALID_ARGUMENT,
                    format!("seconds must not be negative, got {seconds}"),
                ));
            }
            let started = std::time::Instant::now();
            let reads = binding.repository.lock()?.records.len();
            *response = json!({
                "numRecordsInserted": reads,
                "insertTime": started.elapsed().as_millis() as i64,
            })
            .to_string();
            Ok(())
        })
    }

    fn get_feature(&self, feature_id: i64, response: &mut String) -> i64 {
        self.core.run(|binding| {
            let state = binding.repository.lock()?;
            let features: BTreeSet<(String, String)> = state
                .records
                .values()
                .flat_map(|record| record.definition.iter())
                .filter(|(key, _)| !matches!(key.as_str(), "DATA_SOURCE" | "RECORD_ID"))
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), value)
                })
                .collect();
            let index = usize::try_from(feature_id - 1).ok();
            let (ftype, value) = index
                .and_then(|i| features.iter().nth(i))
                .ok_or_else(|| {
                    Failure::new(
                        codes::UNKNOWN_FEATURE,
                        format!("Unknown feature id {feature_id}"),
                    )
                })?;
            *response = json!({
                "LIB_FEAT_ID": feature_id,
                "FTYPE_CODE": ftype,
                "ELEMENTS": [{ "FELEM_CODE": ftype, "FELEM_VALUE": value }],
            })
            .to_string();
            Ok(())
        })
    }

    fn purge_repository(&self) -> i64 {
        self.core.run(|binding| {
            let mut state = binding.repository.lock()?;
            state.records.clear();
            state.redo_count = 0;
            Ok(())
        })
    }
}

pub(crate) struct MemoryProduct {
    core: HandleCore,
}

impl MemoryProduct {
    pub fn new(core: HandleCore) -> Self {
        Self { core }
    }
}

impl NativeHandle for MemoryProduct {
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

impl NativeProduct for MemoryProduct {
    fn get_version(&self, response: &mut String) -> i64 {
        self.core.run(|_| {
            *response = json!({
                "PRODUCT_NAME": "Warden in-memory native",
                "VERSION": env!("CARGO_PKG_VERSION"),
            })
            .to_string();
            Ok(())
        })
    }

    fn get_license(&self, response: &mut String) -> i64 {
        self.core.run(|_| {
            *response = json!({
                "licenseType": "EVAL",
                "recordLimit": 0,
            })
            .to_string();
            Ok(())
        })
    }
}
