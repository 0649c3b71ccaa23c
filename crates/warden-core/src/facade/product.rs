use super::{invoke, Capability};
use crate::environment::{Shared, State, Sub};
use crate::error::handle_return_code;
use crate::retry::OperationId;
use crate::CoreError;
use std::sync::{Arc, Weak};
use warden_native::{HandleKind, NativeProduct, NativeProvider};

pub struct Product {
    owner: Weak<Shared>,
}

impl Capability for Product {
    type Native = dyn NativeProduct;

    const KIND: HandleKind = HandleKind::Product;

    fn sub(state: &State) -> &Sub<Self> {
        &state.product
    }

    fn sub_mut(state: &mut State) -> &mut Sub<Self> {
        &mut state.product
    }

    fn open(provider: &dyn NativeProvider) -> Arc<Self::Native> {
        provider.product()
    }

    fn attach(owner: Weak<Shared>) -> Self {
        Self { owner }
    }
}

impl Product {
    pub fn get_version(&self) -> Result<String, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::GetVersion, |native| {
            let mut response = String::new();
            handle_return_code(native.get_version(&mut response), native)?;
            Ok(response)
        })
    }

    pub fn get_license(&self) -> Result<String, CoreError> {
        invoke::<Self, _>(&self.owner, OperationId::GetLicense, |native| {
            let mut response = String::new();
            handle_return_code(native.get_license(&mut response), native)?;
            Ok(response)
        })
    }
}
