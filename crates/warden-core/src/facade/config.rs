use super::{invoke, Capability};
use crate::environment::{Shared, State, Sub};
use crate::error::handle_return_code;
use crate::retry::OperationId;
use crate::CoreError;
use std::sync::{Arc, Weak};
use warden_native::{HandleKind, NativeConfig, NativeProvider};

/// Editing of detached configuration documents. Nothing here touches the
/// configuration the engine runs with until the document is registered and
/// made the default through `ConfigManager`.
pub struct Config {
    owner: Weak<Shared>,
}

impl Capability for Config {
    type Native = dyn NativeConfig;

    const KIND: HandleKind = HandleKind::Config;

    fn sub(state: &State) -> &Sub<Self> {
        &state.config
    }

    fn sub_mut(state: &mut State) -> &mut Sub<Self> {
        &mut state.config
    }

    fn open(provider: &dyn NativeProvider) -> Arc<Self::Native> {
        provider.config()
    }

    fn attach(owner: Weak<Shared>) -> Self {
        Self { owner }
    }
}

impl Config {
    /// Open a new document seeded from the default template.
    pub fn create_config(&self) -> Result<i64, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::CreateConfig, |native| {
            let mut config_handle = 0;
            handle_return_code(native.create(&mut config_handle), native)?;
            Ok(config_handle)
        })
    }

    pub fn import_config(&self, config_definition: &str) -> Result<i64, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::ImportConfig, |native| {
            let mut config_handle = 0;
            handle_return_code(native.load(config_definition, &mut config_handle), native)?;
            Ok(config_handle)
        })
    }

    pub fn export_config(&self, config_handle: i64) -> Result<String, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::ExportConfig, |native| {
            let mut response = String::new();
            handle_return_code(native.export(config_handle, &mut response), native)?;
            Ok(response)
        })
    }

    pub fn close_config(&self, config_handle: i64) -> Result<(), CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::CloseConfig, |native| {
            handle_return_code(native.close(config_handle), native)
        })
    }

    /// Add a data source described by `input_json`, e.g.
    /// `{"DSRC_CODE":"CUSTOMERS"}`.
    pub fn add_data_source(&self, config_handle: i64, input_json: &str) -> Result<String, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::AddDataSource, |native| {
            let mut response = String::new();
            let rc = native.add_data_source(config_handle, input_json, &mut response);
            handle_return_code(rc, native)?;
            Ok(response)
        })
    }

    pub fn get_data_sources(&self, config_handle: i64) -> Result<String, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::GetDataSources, |native| {
            let mut response = String::new();
            let rc = native.list_data_sources(config_handle, &mut response);
            handle_return_code(rc, native)?;
            Ok(response)
        })
    }
}
