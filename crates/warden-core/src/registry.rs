//! Process-wide slot holding the single active environment.

use crate::environment::Environment;
use crate::CoreError;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub(crate) struct Registry {
    slot: Mutex<Option<Environment>>,
}

pub(crate) static REGISTRY: Registry = Registry::new();

impl Registry {
    const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Environment>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn active(&self) -> Option<Environment> {
        self.lock().clone()
    }

    /// Construct and register an environment while holding the slot.
    ///
    /// Fails with `SingletonViolation` before `create` runs if the slot is
    /// occupied, so a rejected build has no native side effects.
    pub fn register_with(
        &self,
        create: impl FnOnce() -> Result<Environment, CoreError>,
    ) -> Result<Environment, CoreError> {
        let mut slot = self.lock();
        if let Some(active) = slot.as_ref() {
            return Err(CoreError::SingletonViolation {
                instance_name: active.instance_name().to_owned(),
            });
        }
        let env = create()?;
        debug!("registered environment {}", env.instance_name());
        *slot = Some(env.clone());
        Ok(env)
    }

    /// Vacate the slot if it still holds `env`.
    pub fn unregister(&self, env: &Environment) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|active| active.same_as(env)) {
            *slot = None;
            debug!("unregistered environment {}", env.instance_name());
            true
        } else {
            false
        }
    }
}
