//! Typed facades over the native handles.
//!
//! A facade holds only a weak reference to its environment. Every operation
//! resolves the current native handle at call time, so work issued after a
//! `reinitialize` always lands on the new generation.

mod config;
mod config_manager;
mod diagnostic;
mod engine;
mod product;

pub use config::Config;
pub use config_manager::ConfigManager;
pub use diagnostic::Diagnostic;
pub use engine::Engine;
pub use product::Product;

use crate::environment::{Environment, Shared, State, Sub};
use crate::retry::{invoke_with_retry, OperationId};
use crate::CoreError;
use std::sync::{Arc, Weak};
use tracing::debug;
use warden_native::{HandleKind, NativeHandle, NativeProvider};

/// Values every native handle is initialized with.
pub(crate) struct InitArgs<'a> {
    pub instance_name: &'a str,
    pub settings: &'a str,
    pub config_id: i64,
    pub verbose_logging: bool,
}

/// Ties a facade type to its native handle trait and its slot in the
/// environment state.
pub(crate) trait Capability: Sized + Send + Sync + 'static {
    type Native: NativeHandle + ?Sized;

    const KIND: HandleKind;

    fn sub(state: &State) -> &Sub<Self>;

    fn sub_mut(state: &mut State) -> &mut Sub<Self>;

    fn open(provider: &dyn NativeProvider) -> Arc<Self::Native>;

    fn init(native: &Self::Native, args: &InitArgs<'_>) -> i64 {
        native.init(args.instance_name, args.settings, args.verbose_logging)
    }

    fn attach(owner: Weak<Shared>) -> Self;
}

/// Run `call` against the current native handle of `C`, inside the
/// execution gate and through the retry dispatcher.
pub(crate) fn invoke<C, T>(
    owner: &Weak<Shared>,
    op: OperationId,
    mut call: impl FnMut(&C::Native) -> Result<T, CoreError>,
) -> Result<T, CoreError>
where
    C: Capability,
{
    let env = Environment::from_weak(owner)?;
    let result = invoke_with_retry(&env, op, || {
        env.execute(|| {
            let native = env.lease::<C>()?;
            call(&native)
        })
    });
    if env.is_verbose_logging() {
        match &result {
            Ok(_) => debug!("{op} on {} handle succeeded", C::KIND),
            Err(e) => debug!("{op} on {} handle failed: {e}", C::KIND),
        }
    }
    result
}
