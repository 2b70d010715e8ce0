//! Component declarations: the `Component` trait, typed dependency views
//! and the registration builder.
//!
//! Everything the wiring pass needs is declared here as typed descriptors
//! at registration time; nothing is recovered by runtime introspection
//! beyond a `TypeId` map lookup.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use kestrel_env::Bindable;

use crate::app::HookContext;
use crate::error::{AppError, AppResult};

/// A wirable object. Implementations accept resolved dependencies through
/// [`assign`](Component::assign); the default rejects every field, for
/// components with no injected fields.
pub trait Component: Any + Send + Sync {
    /// Collection ordering weight; lower sorts first. Ties keep discovery
    /// order.
    fn order(&self) -> i64 {
        0
    }

    /// Accept a resolved dependency for a declared field.
    fn assign(&mut self, field: &str, value: Injected) -> AppResult<()> {
        let _ = value;
        Err(AppError::unknown_field(field))
    }
}

/// Shared component handle; wiring mutates through the lock.
pub type ComponentHandle = Arc<RwLock<dyn Component>>;

/// Init hook, invoked once after a component's fields are assigned.
pub type InitHook =
    Box<dyn Fn(&mut dyn Component, &HookContext<'_>) -> AppResult<()> + Send + Sync>;

/// Destroy hook, invoked during shutdown in reverse readiness order.
pub type DestroyHook =
    Box<dyn Fn(&mut dyn Component, &HookContext<'_>) -> AppResult<()> + Send + Sync>;

// ---------------------------------------------------------------------------
// Typed views
// ---------------------------------------------------------------------------

/// Identity of a concrete type or trait object, with its display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeKey {
    id: TypeId,
    /// Full type name, for diagnostics.
    pub name: &'static str,
}

impl TypeKey {
    /// The key of `T`, which may be a trait object (`dyn Service`).
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// The underlying `TypeId`.
    pub fn id(&self) -> TypeId {
        self.id
    }
}

/// Pre-coerced typed views of one component, keyed by target type.
///
/// Coercion from the concrete handle to each provided view (concrete type
/// or trait object) happens at registration; recovery is a `TypeId` lookup
/// plus downcast of the stored `Arc`.
#[derive(Clone, Default)]
pub struct ViewSet {
    views: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ViewSet {
    /// Store a view under the type it exposes.
    pub fn insert<I: ?Sized + Send + Sync + 'static>(&mut self, view: Arc<RwLock<I>>) {
        self.views.insert(TypeId::of::<I>(), Arc::new(view));
    }

    /// Recover the view for `I`, if provided.
    pub fn get<I: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<RwLock<I>>> {
        self.views
            .get(&TypeId::of::<I>())?
            .downcast_ref::<Arc<RwLock<I>>>()
            .cloned()
    }

    /// Whether a view for this type id is provided.
    pub fn contains(&self, id: TypeId) -> bool {
        self.views.contains_key(&id)
    }
}

impl std::fmt::Debug for ViewSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewSet").field("types", &self.views.len()).finish()
    }
}

/// A resolved dependency: the provider's name plus its typed views.
#[derive(Debug, Clone)]
pub struct DependencyView {
    name: String,
    views: ViewSet,
}

impl DependencyView {
    pub(crate) fn new(name: String, views: ViewSet) -> Self {
        Self { name, views }
    }

    /// The provider's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recover the provider as `I` (concrete type or trait object).
    pub fn get<I: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<RwLock<I>>> {
        self.views.get::<I>()
    }
}

/// A value handed to [`Component::assign`].
#[derive(Debug, Clone)]
pub enum Injected {
    /// A single resolved dependency.
    One(DependencyView),
    /// All matching dependencies, collection-ordered.
    Many(Vec<DependencyView>),
    /// A resolved text expression.
    Text(String),
}

impl Injected {
    /// The single dependency as `I`.
    pub fn one<I: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<RwLock<I>>> {
        match self {
            Self::One(view) => view.get::<I>(),
            _ => None,
        }
    }

    /// All dependencies as `I`, skipping none (a provider registered for
    /// the collection type always carries the view).
    pub fn many<I: ?Sized + Send + Sync + 'static>(&self) -> Vec<Arc<RwLock<I>>> {
        match self {
            Self::Many(views) => views.iter().filter_map(|v| v.get::<I>()).collect(),
            _ => Vec::new(),
        }
    }

    /// The resolved text.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Field declarations
// ---------------------------------------------------------------------------

/// One injected field of a component, declared at registration.
#[derive(Debug, Clone)]
pub enum FieldDecl {
    /// A reference to another component, by name or by type.
    Ref {
        /// Target field.
        field: &'static str,
        /// Exact provider name; `None` for by-type lookup.
        name: Option<String>,
        /// Provider type; `None` for by-name lookup.
        key: Option<TypeKey>,
        /// Whether absence aborts wiring.
        required: bool,
        /// Whether every matching provider is collected.
        collection: bool,
    },
    /// A configuration-derived text value.
    Value {
        /// Target field.
        field: &'static str,
        /// Placeholder expression, e.g. `${server.port:8080}`.
        expr: String,
        /// Whether the expression must resolve completely.
        required: bool,
    },
}

impl FieldDecl {
    /// The target field name.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Ref { field, .. } | Self::Value { field, .. } => field,
        }
    }
}

/// Configuration backing of a component: bound from the environment instead
/// of wired from other components.
pub struct ConfigBacking {
    pub(crate) prefix: String,
    pub(crate) listen: bool,
    pub(crate) bindable: Arc<RwLock<dyn Bindable>>,
    pub(crate) type_id: TypeId,
}

// ---------------------------------------------------------------------------
// Registration builder
// ---------------------------------------------------------------------------

/// Everything the registry needs to know about one component.
pub struct Registration {
    pub(crate) handle: ComponentHandle,
    pub(crate) name: String,
    pub(crate) type_key: TypeKey,
    pub(crate) primary: bool,
    pub(crate) views: ViewSet,
    pub(crate) fields: Vec<FieldDecl>,
    pub(crate) init: Option<InitHook>,
    pub(crate) destroy: Option<DestroyHook>,
    pub(crate) config: Option<ConfigBacking>,
}

impl Registration {
    /// Register a component under its bare type name, providing its own
    /// concrete type.
    pub fn new<T: Component>(handle: Arc<RwLock<T>>) -> Self {
        let mut views = ViewSet::default();
        views.insert::<T>(Arc::clone(&handle));
        Self {
            handle,
            name: bare_type_name(type_name::<T>()).to_string(),
            type_key: TypeKey::of::<T>(),
            primary: false,
            views,
            fields: Vec::new(),
            init: None,
            destroy: None,
            config: None,
        }
    }

    /// Register a configuration-backed component: populated by
    /// `Environment::bind` under `prefix` instead of field wiring.
    pub fn config<T: Component + Bindable>(handle: Arc<RwLock<T>>, prefix: impl Into<String>) -> Self {
        let bindable: Arc<RwLock<dyn Bindable>> = handle.clone();
        let mut registration = Self::new(handle);
        registration.config = Some(ConfigBacking {
            prefix: prefix.into(),
            listen: false,
            bindable,
            type_id: TypeId::of::<T>(),
        });
        registration
    }

    /// Keep the configuration binding live across source changes. Only
    /// meaningful for [`config`](Self::config) registrations.
    pub fn listen(mut self, listen: bool) -> Self {
        if let Some(config) = &mut self.config {
            config.listen = listen;
        }
        self
    }

    /// Override the registered name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Prefer this component when a by-type lookup is ambiguous.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Additionally provide `I` (typically a trait object view of the
    /// component).
    pub fn provides<I: ?Sized + Send + Sync + 'static>(mut self, view: Arc<RwLock<I>>) -> Self {
        self.views.insert::<I>(view);
        self
    }

    /// Inject the component registered under `name` into `field`.
    pub fn inject_by_name(mut self, field: &'static str, name: impl Into<String>, required: bool) -> Self {
        self.fields.push(FieldDecl::Ref {
            field,
            name: Some(name.into()),
            key: None,
            required,
            collection: false,
        });
        self
    }

    /// Inject the unique (or primary) provider of `I` into `field`.
    pub fn inject_by_type<I: ?Sized + 'static>(mut self, field: &'static str, required: bool) -> Self {
        self.fields.push(FieldDecl::Ref {
            field,
            name: None,
            key: Some(TypeKey::of::<I>()),
            required,
            collection: false,
        });
        self
    }

    /// Inject every provider of `I` into `field`, collection-ordered.
    pub fn inject_all<I: ?Sized + 'static>(mut self, field: &'static str) -> Self {
        self.fields.push(FieldDecl::Ref {
            field,
            name: None,
            key: Some(TypeKey::of::<I>()),
            required: false,
            collection: true,
        });
        self
    }

    /// Inject the resolved text of a placeholder expression into `field`.
    pub fn value(mut self, field: &'static str, expr: impl Into<String>, required: bool) -> Self {
        self.fields.push(FieldDecl::Value {
            field,
            expr: expr.into(),
            required,
        });
        self
    }

    /// Run after all fields are assigned, before the component is ready.
    pub fn on_init(
        mut self,
        hook: impl Fn(&mut dyn Component, &HookContext<'_>) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.init = Some(Box::new(hook));
        self
    }

    /// Run during shutdown, reverse readiness order.
    pub fn on_destroy(
        mut self,
        hook: impl Fn(&mut dyn Component, &HookContext<'_>) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.destroy = Some(Box::new(hook));
        self
    }
}

/// Last path segment of a full type name.
fn bare_type_name(full: &'static str) -> &'static str {
    full.rsplit("::").next().unwrap_or(full)
}
