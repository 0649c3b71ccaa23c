use super::{invoke, Capability};
use crate::environment::{Shared, State, Sub};
use crate::error::handle_return_code;
use crate::retry::OperationId;
use crate::CoreError;
use std::sync::{Arc, Weak};
use warden_native::{HandleKind, NativeConfigManager, NativeProvider};

/// The repository's registry of configurations and its default pointer.
pub struct ConfigManager {
    owner: Weak<Shared>,
}

impl Capability for ConfigManager {
    type Native = dyn NativeConfigManager;

    const KIND: HandleKind = HandleKind::ConfigManager;

    fn sub(state: &State) -> &Sub<Self> {
        &state.config_manager
    }

    fn sub_mut(state: &mut State) -> &mut Sub<Self> {
        &mut state.config_manager
    }

    fn open(provider: &dyn NativeProvider) -> Arc<Self::Native> {
        provider.config_manager()
    }

    fn attach(owner: Weak<Shared>) -> Self {
        Self { owner }
    }
}

impl ConfigManager {
    /// Store `config_definition` and return its config id. Registering the
    /// same document twice yields the same id.
    pub fn register_config(&self, config_definition: &str, comment: &str) -> Result<i64, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::RegisterConfig, |native| {
            let mut config_id = 0;
            let rc = native.add_config(config_definition, comment, &mut config_id);
            handle_return_code(rc, native)?;
            Ok(config_id)
        })
    }

    pub fn get_config(&self, config_id: i64) -> Result<String, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::GetConfig, |native| {
            let mut response = String::new();
            handle_return_code(native.get_config(config_id, &mut response), native)?;
            Ok(response)
        })
    }

    pub fn get_config_registry(&self) -> Result<String, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::GetConfigRegistry, |native| {
            let mut response = String::new();
            handle_return_code(native.get_config_list(&mut response), native)?;
            Ok(response)
        })
    }

    /// `0` when no default has been set.
    pub fn get_default_config_id(&self) -> Result<i64, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::GetDefaultConfigId, |native| {
            let mut config_id = 0;
            handle_return_code(native.get_default_config_id(&mut config_id), native)?;
            Ok(config_id)
        })
    }

    pub fn set_default_config_id(&self, config_id: i64) -> Result<(), CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::SetDefaultConfigId, |native| {
            handle_return_code(native.set_default_config_id(config_id), native)
        })
    }

    /// Move the default from `current_config_id` to `new_config_id`. Fails
    /// with `ReplaceConflict` if another writer moved it first.
    pub fn replace_default_config_id(
        &self,
        current_config_id: i64,
        new_config_id: i64,
    ) -> Result<(), CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::ReplaceDefaultConfigId, |native| {
            let rc = native.replace_default_config_id(current_config_id, new_config_id);
            handle_return_code(rc, native)
        })
    }
}
