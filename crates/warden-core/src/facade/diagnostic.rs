use super::{invoke, Capability, InitArgs};
use crate::environment::{Shared, State, Sub};
use crate::error::handle_return_code;
use crate::retry::OperationId;
use crate::CoreError;
use std::sync::{Arc, Weak};
use warden_native::{HandleKind, NativeDiagnostic, NativeProvider};

pub struct Diagnostic {
    owner: Weak<Shared>,
}

impl Capability for Diagnostic {
    type Native = dyn NativeDiagnostic;

    const KIND: HandleKind = HandleKind::Diagnostic;

    fn sub(state: &State) -> &Sub<Self> {
        &state.diagnostic
    }

    fn sub_mut(state: &mut State) -> &mut Sub<Self> {
        &mut state.diagnostic
    }

    fn open(provider: &dyn NativeProvider) -> Arc<Self::Native> {
        provider.diagnostic()
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

impl Diagnostic {
    pub fn get_repository_info(&self) -> Result<String, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::GetRepositoryInfo, |native| {
            let mut response = String::new();
            handle_return_code(native.get_repository_info(&mut response), native)?;
            Ok(response)
        })
    }

    pub fn check_repository_performance(&self, seconds: i64) -> Result<String, CoreError> {
        invoke::<Self, _>(
            &self.owner,
            OperationId::CheckRepositoryPerformance,
            |native| {
                let mut response = String::new();
                let rc = native.check_repository_performance(seconds, &mut response);
                handle_return_code(rc, native)?;
                Ok(response)
            },
        )
    }

    pub fn get_feature(&self, feature_id: i64) -> Result<String, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::GetFeature, |native| {
            let mut response = String::new();
            handle_return_code(native.get_feature(feature_id, &mut response), native)?;
            Ok(response)
        })
    }

    /// Remove every record from the repository. Configurations are kept.
    pub fn purge_repository(&self) -> Result<(), CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::PurgeRepository, |native| {
            handle_return_code(native.purge_repository(), native)
        })
    }
}
