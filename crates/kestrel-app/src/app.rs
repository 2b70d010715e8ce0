//! The application: registration façade, lifecycle and the run loop.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use kestrel_env::profile::APPLICATION_NAME_KEY;
use kestrel_env::Environment;

use crate::component::{DependencyView, Registration};
use crate::error::AppResult;
use crate::registry::ComponentRegistry;
use crate::wiring;

/// One-shot lifecycle callback.
pub type LifecycleFn = Box<dyn FnOnce(&Application) -> AppResult<()> + Send>;

/// Context handed to component init and destroy hooks.
pub struct HookContext<'a> {
    /// The application's environment.
    pub env: &'a Arc<Environment>,
    /// The application, for component lookups.
    pub app: &'a Application,
}

/// An application: an environment, a component registry and the lifecycle
/// around them.
pub struct Application {
    env: Arc<Environment>,
    explicit_name: Option<String>,
    name: Mutex<Option<String>>,
    registry: ComponentRegistry,
    before_init: Mutex<Vec<LifecycleFn>>,
    runner: Mutex<Option<LifecycleFn>>,
    destroyer: Mutex<Option<LifecycleFn>>,
}

impl Application {
    /// Create an application over a built environment.
    pub fn new(env: Arc<Environment>) -> Self {
        Self {
            env,
            explicit_name: None,
            name: Mutex::new(None),
            registry: ComponentRegistry::new(),
            before_init: Mutex::new(Vec::new()),
            runner: Mutex::new(None),
            destroyer: Mutex::new(None),
        }
    }

    /// Name the application explicitly, overriding configuration.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.explicit_name = Some(name.into());
        self
    }

    /// The environment.
    pub fn env(&self) -> &Arc<Environment> {
        &self.env
    }

    /// The component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// The resolved application name; `None` before [`run`](Self::run).
    pub fn name(&self) -> Option<String> {
        self.name.lock().clone()
    }

    /// Register a component.
    pub fn register(&self, registration: Registration) -> AppResult<()> {
        self.registry.register(registration)
    }

    /// Run once after the environment is final, before wiring.
    pub fn before_init(&self, hook: impl FnOnce(&Application) -> AppResult<()> + Send + 'static) {
        self.before_init.lock().push(Box::new(hook));
    }

    /// The application body, run after wiring completes.
    pub fn runner(&self, runner: impl FnOnce(&Application) -> AppResult<()> + Send + 'static) {
        *self.runner.lock() = Some(Box::new(runner));
    }

    /// Run during shutdown, after component destroy hooks.
    pub fn destroyer(&self, destroyer: impl FnOnce(&Application) -> AppResult<()> + Send + 'static) {
        *self.destroyer.lock() = Some(Box::new(destroyer));
    }

    /// A dependency view of the component registered under `name`.
    pub fn get_by_name(&self, name: &str) -> Option<DependencyView> {
        self.registry.get_by_name(name)
    }

    /// The unique or primary provider of `I`.
    pub fn get_by_type<I: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> AppResult<Arc<parking_lot::RwLock<I>>> {
        self.registry.get_by_type::<I>()
    }

    /// Every provider of `I`, registration order.
    pub fn get_all_of_type<I: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Vec<(String, Arc<parking_lot::RwLock<I>>)> {
        self.registry.get_all_of_type::<I>()
    }

    /// All registered component names.
    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Start the application: resolve the name, run before-init handlers,
    /// wire every component, run the runner, then tear down (component
    /// destroy hooks in reverse readiness order, then the destroyer).
    pub fn run(&self) -> AppResult<()> {
        let name = self.resolve_name();
        *self.name.lock() = Some(name.clone());
        info!(app = %name, "starting application");

        let before_init = std::mem::take(&mut *self.before_init.lock());
        for hook in before_init {
            hook(self)?;
        }

        wiring::wire_all(self)?;
        info!(app = %name, components = self.registry.len(), "application ready");

        let runner = self.runner.lock().take();
        let outcome = match runner {
            Some(runner) => runner(self),
            None => Ok(()),
        };

        self.destroy_components();
        if let Some(destroyer) = self.destroyer.lock().take() {
            let teardown = destroyer(self);
            if outcome.is_ok() {
                teardown?;
            }
        }
        info!(app = %name, "application stopped");
        outcome
    }

    fn resolve_name(&self) -> String {
        if let Some(name) = &self.explicit_name {
            return name.clone();
        }
        if let Some(name) = self.env.get(APPLICATION_NAME_KEY) {
            if !name.is_empty() {
                return name;
            }
        }
        std::env::args()
            .next()
            .and_then(|argv0| {
                Path::new(&argv0)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "application".to_string())
    }

    fn destroy_components(&self) {
        for definition in self.registry.ready_reverse() {
            let Some(hook) = definition.destroy_hook() else {
                continue;
            };
            let context = HookContext {
                env: &self.env,
                app: self,
            };
            if let Err(err) = hook(&mut *definition.handle().write(), &context) {
                warn!(component = definition.name(), %err, "destroy hook failed");
            }
        }
    }
}
