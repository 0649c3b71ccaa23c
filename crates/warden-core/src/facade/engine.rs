use super::{invoke, Capability, InitArgs};
use crate::environment::{Shared, State, Sub};
use crate::error::handle_return_code;
use crate::retry::OperationId;
use crate::CoreError;
use std::sync::{Arc, Weak};
use warden_native::{HandleKind, NativeEngine, NativeProvider};

/// Record ingestion and resolution queries.
///
/// Record-level operations are healed and retried once when they fail, since
/// the usual cause is a configuration registered after the engine was
/// initialized.
#[derive(Debug)]
pub struct Engine {
    owner: Weak<Shared>,
}

impl Capability for Engine {
    type Native = dyn NativeEngine;

    const KIND: HandleKind = HandleKind::Engine;

    fn sub(state: &State) -> &Sub<Self> {
        &state.engine
    }

    fn sub_mut(state: &mut State) -> &mut Sub<Self> {
        &mut state.engine
    }

    fn open(provider: &dyn NativeProvider) -> Arc<Self::Native> {
        provider.engine()
    }

    fn init(native: &Self::Native, args: &InitArgs<'_>) -> i64 {
        native.init_with_config_id(
            args.instance_name,
            args.settings,
            args.config_id,
            args.verbose_logging,
        )
    }

    fn attach(owner: Weak<Shared>) -> Self {
        Self { owner }
    }
}

impl Engine {
    fn respond(
        &self,
        op: OperationId,
        call: impl Fn(&dyn NativeEngine, &mut String) -> i64,
    ) -> Result<String, CoreError> {
        invoke::<Self, _>(&self.owner, op, |native| {
            let mut response = String::new();
            let rc = call(native, &mut response);
            handle_return_code(rc, native)?;
            Ok(response)
        })
    }

    pub fn add_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        record_definition: &str,
        flags: i64,
    ) -> Result<String, CoreError> {
        self.respond(OperationId::AddRecord, |native, response| {
            native.add_record(data_source_code, record_id, record_definition, flags, response)
        })
    }

    pub fn delete_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        flags: i64,
    ) -> Result<String, CoreError> {
        self.respond(OperationId::DeleteRecord, |native, response| {
            native.delete_record(data_source_code, record_id, flags, response)
        })
    }

    pub fn reevaluate_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        flags: i64,
    ) -> Result<String, CoreError> {
        self.respond(OperationId::ReevaluateRecord, |native, response| {
            native.reevaluate_record(data_source_code, record_id, flags, response)
        })
    }

    pub fn get_record(
        &self,
        data_source_code: &str,
        record_id: &str,
        flags: i64,
    ) -> Result<String, CoreError> {
        self.respond(OperationId::GetRecord, |native, response| {
            native.get_record(data_source_code, record_id, flags, response)
        })
    }

    pub fn get_entity_by_record_id(
        &self,
        data_source_code: &str,
        record_id: &str,
        flags: i64,
    ) -> Result<String, CoreError> {
        self.respond(OperationId::GetEntityByRecordId, |native, response| {
            native.get_entity_by_record_id(data_source_code, record_id, flags, response)
        })
    }

    pub fn search_by_attributes(&self, attributes: &str, flags: i64) -> Result<String, CoreError> {
        self.respond(OperationId::SearchByAttributes, |native, response| {
            native.search_by_attributes(attributes, flags, response)
        })
    }

    pub fn why_records(
        &self,
        data_source_code_1: &str,
        record_id_1: &str,
        data_source_code_2: &str,
        record_id_2: &str,
        flags: i64,
    ) -> Result<String, CoreError> {
        self.respond(OperationId::WhyRecords, |native, response| {
            native.why_records(
                data_source_code_1,
                record_id_1,
                data_source_code_2,
                record_id_2,
                flags,
                response,
            )
        })
    }

    pub fn get_record_preview(
        &self,
        record_definition: &str,
        flags: i64,
    ) -> Result<String, CoreError> {
        self.respond(OperationId::GetRecordPreview, |native, response| {
            native.get_record_preview(record_definition, flags, response)
        })
    }

    pub fn prime_engine(&self) -> Result<(), CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::PrimeEngine, |native| {
            handle_return_code(native.prime_engine(), native)
        })
    }

    pub fn get_stats(&self) -> Result<String, CoreError> {
        self.respond(OperationId::GetStats, |native, response| {
            native.get_stats(response)
        })
    }

    /// The config id the native engine is currently bound to.
    pub fn get_active_config_id(&self) -> Result<i64, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::GetActiveConfigId, |native| {
            let mut config_id = 0;
            handle_return_code(native.get_active_config_id(&mut config_id), native)?;
            Ok(config_id)
        })
    }

    pub fn count_redo_records(&self) -> Result<i64, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::CountRedoRecords, |native| {
            let mut count = 0;
            handle_return_code(native.count_redo_records(&mut count), native)?;
            Ok(count)
        })
    }
}
