use crate::handle::{
    NativeConfig, NativeConfigManager, NativeDiagnostic, NativeEngine, NativeProduct,
};
use crate::NativeSetupError;
use std::sync::Arc;

/// Factory for uninitialized native handles.
///
/// Every call returns a fresh handle; the caller owns its `init`/`destroy`
/// lifecycle.
pub trait NativeProvider: Send + Sync {
    fn name(&self) -> &str;

    fn engine(&self) -> Arc<dyn NativeEngine>;

    fn config(&self) -> Arc<dyn NativeConfig>;

    fn config_manager(&self) -> Arc<dyn NativeConfigManager>;

    fn diagnostic(&self) -> Arc<dyn NativeDiagnostic>;

    fn product(&self) -> Arc<dyn NativeProduct>;
}

pub fn select_provider(name: &str) -> Result<Arc<dyn NativeProvider>, NativeSetupError> {
    match name {
        "memory" => Ok(Arc::new(crate::memory::InMemoryNative::shared())),
        other => Err(NativeSetupError::ProviderUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_memory_provider() {
        let provider = select_provider("memory").unwrap();
        assert_eq!(provider.name(), "memory");
    }

    #[test]
    fn select_unknown_provider_fails() {
        assert!(matches!(
            select_provider("jni"),
            Err(NativeSetupError::ProviderUnavailable(name)) if name == "jni"
        ));
    }
}
