use crate::config::EnvironmentConfig;
use crate::error::handle_return_code;
use crate::facade::{Capability, Config, ConfigManager, Diagnostic, Engine, InitArgs, Product};
use crate::gate::ExecutionGate;
use crate::lifecycle::{validate_transition, Lifecycle};
use crate::registry::REGISTRY;
use crate::CoreError;
use std::panic::Location;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{debug, info, warn};
use warden_native::{select_provider, InMemoryNative, NativeHandle, NativeProvider};

/// Settings used when the builder is not given any.
pub const DEFAULT_SETTINGS: &str = r#"{"PIPELINE":{"CONFIGPATH":"/etc/opt/warden","RESOURCEPATH":"/opt/warden/resources","SUPPORTPATH":"/opt/warden/data"},"SQL":{"CONNECTION":"mem://default"}}"#;

/// The process-wide handle to the native engine.
///
/// At most one environment is active at a time. Cloning is cheap and every
/// clone refers to the same environment.
#[derive(Clone)]
pub struct Environment {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    instance_name: String,
    settings: String,
    verbose_logging: bool,
    native: Arc<dyn NativeProvider>,
    gate: ExecutionGate,
    state: RwLock<State>,
}

/// A native handle and the config generation it was opened under.
pub(crate) struct Slot<N: ?Sized> {
    pub native: Arc<N>,
    pub generation: u64,
}

/// Native slot and cached facade for one capability.
pub(crate) struct Sub<C: Capability> {
    pub native: Option<Slot<C::Native>>,
    pub facade: Option<Arc<C>>,
}

impl<C: Capability> Default for Sub<C> {
    fn default() -> Self {
        Self {
            native: None,
            facade: None,
        }
    }
}

pub(crate) struct State {
    lifecycle: Lifecycle,
    config_id: Option<i64>,
    default_config_id: Option<i64>,
    generation: u64,
    pub engine: Sub<Engine>,
    pub config: Sub<Config>,
    pub config_manager: Sub<ConfigManager>,
    pub diagnostic: Sub<Diagnostic>,
    pub product: Sub<Product>,
}

impl State {
    fn new(config_id: Option<i64>) -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            config_id,
            default_config_id: None,
            generation: 0,
            engine: Sub::default(),
            config: Sub::default(),
            config_manager: Sub::default(),
            diagnostic: Sub::default(),
            product: Sub::default(),
        }
    }

    fn ensure_active(&self) -> Result<(), CoreError> {
        if self.lifecycle == Lifecycle::Active {
            Ok(())
        } else {
            Err(CoreError::NotActive)
        }
    }

    /// Config id handed to native init: the pinned id, else the default
    /// resolved at (re)initialization, else `0` for the native default.
    fn effective_config_id(&self) -> i64 {
        self.config_id.or(self.default_config_id).unwrap_or(0)
    }
}

pub struct EnvironmentBuilder {
    instance_name: String,
    settings: String,
    verbose_logging: bool,
    config_id: Option<i64>,
    native: Option<Arc<dyn NativeProvider>>,
}

impl EnvironmentBuilder {
    #[must_use]
    pub fn instance_name(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = instance_name.into();
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: impl Into<String>) -> Self {
        self.settings = settings.into();
        self
    }

    #[must_use]
    pub fn verbose_logging(mut self, verbose_logging: bool) -> Self {
        self.verbose_logging = verbose_logging;
        self
    }

    /// Pin the configuration the engine is initialized with.
    #[must_use]
    pub fn config_id(mut self, config_id: i64) -> Self {
        self.config_id = Some(config_id);
        self
    }

    #[must_use]
    pub fn native(mut self, native: Arc<dyn NativeProvider>) -> Self {
        self.native = Some(native);
        self
    }

    /// Apply every value present in `config`.
    pub fn from_config(mut self, config: &EnvironmentConfig) -> Result<Self, CoreError> {
        if let Some(name) = &config.instance_name {
            self.instance_name.clone_from(name);
        }
        if let Some(settings) = config.settings_string() {
            self.settings = settings;
        }
        if let Some(config_id) = config.config_id {
            self.config_id = Some(config_id);
        }
        if let Some(native) = &config.native {
            self.native = Some(select_provider(native)?);
        }
        self.verbose_logging = config.verbose_logging;
        Ok(self)
    }

    /// Create, initialize and register the environment.
    ///
    /// Fails with `SingletonViolation` while another environment is active.
    pub fn build(self) -> Result<Environment, CoreError> {
        REGISTRY.register_with(|| Environment::initialize(self))
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("instance_name", &self.shared.instance_name)
            .field("lifecycle", &self.lifecycle())
            .field("config_id", &self.config_id())
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Start configuring a new environment. The instance name defaults to
    /// the file stem of the calling source file.
    #[track_caller]
    pub fn builder() -> EnvironmentBuilder {
        let caller = Location::caller();
        let instance_name = Path::new(caller.file())
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("warden")
            .to_owned();
        EnvironmentBuilder {
            instance_name,
            settings: DEFAULT_SETTINGS.to_owned(),
            verbose_logging: false,
            config_id: None,
            native: None,
        }
    }

    /// The currently registered environment, if any.
    pub fn active_instance() -> Option<Environment> {
        REGISTRY.active()
    }

    fn initialize(builder: EnvironmentBuilder) -> Result<Environment, CoreError> {
        let native = builder
            .native
            .unwrap_or_else(|| Arc::new(InMemoryNative::shared()));
        info!(
            "initializing environment {} on {} native",
            builder.instance_name,
            native.name()
        );
        let env = Environment {
            shared: Arc::new(Shared {
                instance_name: builder.instance_name,
                settings: builder.settings,
                verbose_logging: builder.verbose_logging,
                native,
                gate: ExecutionGate::new(),
                state: RwLock::new(State::new(builder.config_id)),
            }),
        };

        let mut state = env.write();
        let resolved = env.open_base(&mut state);
        match resolved {
            Ok(default_config_id) => {
                validate_transition(state.lifecycle, Lifecycle::Active)?;
                state.default_config_id = (default_config_id != 0).then_some(default_config_id);
                state.lifecycle = Lifecycle::Active;
                debug!(
                    "environment {} active, default config {:?}, pinned {:?}",
                    env.shared.instance_name, state.default_config_id, state.config_id
                );
            }
            Err(e) => {
                warn!("environment {} failed to initialize: {e}", env.shared.instance_name);
                env.close_all(&mut state);
                state.lifecycle = Lifecycle::Destroyed;
                return Err(e);
            }
        }
        drop(state);
        Ok(env)
    }

    /// Open the config handles every environment starts with and resolve
    /// the repository's default config id (`0` when there is none).
    fn open_base(&self, state: &mut State) -> Result<i64, CoreError> {
        let manager = self.open::<ConfigManager>(state)?;
        self.open::<Config>(state)?;
        let mut default_config_id = 0;
        let rc = manager.get_default_config_id(&mut default_config_id);
        handle_return_code(rc, &*manager)?;
        Ok(default_config_id)
    }

    pub(crate) fn from_weak(owner: &Weak<Shared>) -> Result<Environment, CoreError> {
        owner
            .upgrade()
            .map(|shared| Environment { shared })
            .ok_or(CoreError::NotActive)
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn same_as(&self, other: &Environment) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn instance_name(&self) -> &str {
        &self.shared.instance_name
    }

    pub fn settings(&self) -> &str {
        &self.shared.settings
    }

    pub fn is_verbose_logging(&self) -> bool {
        self.shared.verbose_logging
    }

    /// The pinned config id; `None` when the repository default is used.
    pub fn config_id(&self) -> Option<i64> {
        self.read().config_id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.read().lifecycle
    }

    /// Incremented by every `reinitialize`.
    pub fn config_generation(&self) -> u64 {
        self.read().generation
    }

    pub fn ensure_active(&self) -> Result<(), CoreError> {
        self.read().ensure_active()
    }

    pub fn engine(&self) -> Result<Arc<Engine>, CoreError> {
        self.facade::<Engine>()
    }

    pub fn config(&self) -> Result<Arc<Config>, CoreError> {
        self.facade::<Config>()
    }

    pub fn config_manager(&self) -> Result<Arc<ConfigManager>, CoreError> {
        self.facade::<ConfigManager>()
    }

    pub fn diagnostic(&self) -> Result<Arc<Diagnostic>, CoreError> {
        self.facade::<Diagnostic>()
    }

    pub fn product(&self) -> Result<Arc<Product>, CoreError> {
        self.facade::<Product>()
    }

    /// The configuration the native engine is currently running with.
    pub fn active_config_id(&self) -> Result<i64, CoreError> {
        self.engine()?.get_active_config_id()
    }

    /// Run `task` as a tracked in-flight call.
    ///
    /// Fails with `NotActive` unless the environment is active. The task's
    /// own result, success or error, is returned unchanged.
    pub fn execute<T, E>(&self, task: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<CoreError>,
    {
        self.ensure_active()?;
        let _ticket = self.shared.gate.admit();
        // a transition may have completed while we waited for admission
        self.ensure_active()?;
        task()
    }

    pub fn executing_count(&self) -> usize {
        self.shared.gate.executing_count()
    }

    /// Rebind the environment to `config_id`.
    ///
    /// Waits for in-flight calls on other threads to finish, then opens the
    /// next generation's handles before destroying the current ones. The
    /// engine is always part of the next generation since its init is what
    /// validates `config_id`; other handles are reopened only if they were
    /// open. If any handle of the next generation fails to open, the staged
    /// handles are destroyed and the environment keeps its current config,
    /// generation and handles.
    pub fn reinitialize(&self, config_id: i64) -> Result<(), CoreError> {
        self.ensure_active()?;
        let _closed = self.shared.gate.close();
        let mut state = self.write();
        state.ensure_active()?;
        validate_transition(state.lifecycle, Lifecycle::Active)?;
        info!(
            "reinitializing environment {} onto config {config_id}",
            self.shared.instance_name
        );

        let reopen = Reopen {
            config_manager: state.config_manager.native.is_some(),
            config: state.config.native.is_some(),
            product: state.product.native.is_some(),
            diagnostic: state.diagnostic.native.is_some(),
        };
        let previous_config_id = state.config_id.replace(config_id);
        let mut staged = Staged::default();
        if let Err(e) = self.stage(&state, &reopen, &mut staged) {
            warn!(
                "reinitializing environment {} onto config {config_id} failed, keeping config {:?}: {e}",
                self.shared.instance_name, previous_config_id
            );
            self.discard(staged);
            state.config_id = previous_config_id;
            return Err(e);
        }

        self.close_all(&mut state);
        state.generation += 1;
        let generation = state.generation;
        install::<ConfigManager>(&mut state, staged.config_manager, generation);
        install::<Config>(&mut state, staged.config, generation);
        install::<Product>(&mut state, staged.product, generation);
        install::<Diagnostic>(&mut state, staged.diagnostic, generation);
        install::<Engine>(&mut state, staged.engine, generation);
        debug!(
            "environment {} now on config {config_id} (generation {generation})",
            self.shared.instance_name
        );
        Ok(())
    }

    /// Destroy every open native handle and vacate the singleton slot.
    ///
    /// Waits for in-flight calls on other threads. Calling it again is a
    /// no-op.
    pub fn destroy(&self) -> Result<(), CoreError> {
        if self.lifecycle() == Lifecycle::Destroyed {
            return Ok(());
        }
        {
            let _closed = self.shared.gate.close();
            let mut state = self.write();
            if state.lifecycle == Lifecycle::Destroyed {
                return Ok(());
            }
            validate_transition(state.lifecycle, Lifecycle::Destroyed)?;
            info!("destroying environment {}", self.shared.instance_name);
            self.close_all(&mut state);
            state.lifecycle = Lifecycle::Destroyed;
            state.engine.facade = None;
            state.config.facade = None;
            state.config_manager.facade = None;
            state.diagnostic.facade = None;
            state.product.facade = None;
        }
        REGISTRY.unregister(self);
        Ok(())
    }

    fn facade<C: Capability>(&self) -> Result<Arc<C>, CoreError> {
        {
            let state = self.read();
            state.ensure_active()?;
            let sub = C::sub(&state);
            if let (Some(facade), Some(slot)) = (&sub.facade, &sub.native) {
                if slot.generation == state.generation {
                    return Ok(Arc::clone(facade));
                }
            }
        }
        let mut state = self.write();
        state.ensure_active()?;
        self.open::<C>(&mut state)?;
        let owner = Arc::downgrade(&self.shared);
        let facade = C::sub_mut(&mut state)
            .facade
            .get_or_insert_with(|| Arc::new(C::attach(owner)));
        Ok(Arc::clone(facade))
    }

    /// The current native handle for `C`, opened on first use.
    pub(crate) fn lease<C: Capability>(&self) -> Result<Arc<C::Native>, CoreError> {
        {
            let state = self.read();
            state.ensure_active()?;
            if let Some(slot) = &C::sub(&state).native {
                if slot.generation == state.generation {
                    return Ok(Arc::clone(&slot.native));
                }
            }
        }
        let mut state = self.write();
        state.ensure_active()?;
        self.open::<C>(&mut state)
    }

    fn open<C: Capability>(&self, state: &mut State) -> Result<Arc<C::Native>, CoreError> {
        if let Some(slot) = &C::sub(state).native {
            if slot.generation == state.generation {
                return Ok(Arc::clone(&slot.native));
            }
            // opened under an earlier generation, never reuse it
            self.close::<C>(state);
        }
        let native = self.create::<C>(state)?;
        C::sub_mut(state).native = Some(Slot {
            native: Arc::clone(&native),
            generation: state.generation,
        });
        Ok(native)
    }

    /// Open and initialize a handle for `C` without installing it.
    fn create<C: Capability>(&self, state: &State) -> Result<Arc<C::Native>, CoreError> {
        let native = C::open(self.shared.native.as_ref());
        let args = InitArgs {
            instance_name: &self.shared.instance_name,
            settings: &self.shared.settings,
            config_id: state.effective_config_id(),
            verbose_logging: self.shared.verbose_logging,
        };
        let rc = C::init(&native, &args);
        handle_return_code(rc, &*native)?;
        debug!(
            "opened {} handle for {} on config {}",
            C::KIND,
            self.shared.instance_name,
            args.config_id
        );
        Ok(native)
    }

    fn close<C: Capability>(&self, state: &mut State) {
        if let Some(slot) = C::sub_mut(state).native.take() {
            self.release::<C>(&slot.native);
        }
    }

    fn release<C: Capability>(&self, native: &C::Native) {
        let rc = native.destroy();
        if rc == 0 {
            debug!(
                "destroyed {} handle for {}",
                C::KIND,
                self.shared.instance_name
            );
        } else {
            warn!(
                "destroying {} handle for {} failed: {} {}",
                C::KIND,
                self.shared.instance_name,
                native.last_exception_code(),
                native.last_exception()
            );
        }
    }

    /// Engine-side handles go first, the config handles they depend on last.
    fn close_all(&self, state: &mut State) {
        self.close::<Engine>(state);
        self.close::<Diagnostic>(state);
        self.close::<Product>(state);
        self.close::<Config>(state);
        self.close::<ConfigManager>(state);
    }

    fn stage(&self, state: &State, reopen: &Reopen, staged: &mut Staged) -> Result<(), CoreError> {
        staged.engine = Some(self.create::<Engine>(state)?);
        if reopen.config_manager {
            staged.config_manager = Some(self.create::<ConfigManager>(state)?);
        }
        if reopen.config {
            staged.config = Some(self.create::<Config>(state)?);
        }
        if reopen.product {
            staged.product = Some(self.create::<Product>(state)?);
        }
        if reopen.diagnostic {
            staged.diagnostic = Some(self.create::<Diagnostic>(state)?);
        }
        Ok(())
    }

    /// Destroy staged handles in the same order as `close_all`.
    fn discard(&self, staged: Staged) {
        if let Some(native) = staged.engine {
            self.release::<Engine>(&*native);
        }
        if let Some(native) = staged.diagnostic {
            self.release::<Diagnostic>(&*native);
        }
        if let Some(native) = staged.product {
            self.release::<Product>(&*native);
        }
        if let Some(native) = staged.config {
            self.release::<Config>(&*native);
        }
        if let Some(native) = staged.config_manager {
            self.release::<ConfigManager>(&*native);
        }
    }
}

/// Which optional handles were open when `reinitialize` started.
struct Reopen {
    config_manager: bool,
    config: bool,
    product: bool,
    diagnostic: bool,
}

/// Handles opened for the next generation and not yet installed.
#[derive(Default)]
struct Staged {
    config_manager: Option<Arc<<ConfigManager as Capability>::Native>>,
    config: Option<Arc<<Config as Capability>::Native>>,
    product: Option<Arc<<Product as Capability>::Native>>,
    diagnostic: Option<Arc<<Diagnostic as Capability>::Native>>,
    engine: Option<Arc<<Engine as Capability>::Native>>,
}

fn install<C: Capability>(state: &mut State, native: Option<Arc<C::Native>>, generation: u64) {
    if let Some(native) = native {
        C::sub_mut(state).native = Some(Slot { native, generation });
    }
}
