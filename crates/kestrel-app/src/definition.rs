//! A registered component and its wiring state.

use std::any::TypeId;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::component::{
    ComponentHandle, ConfigBacking, DependencyView, DestroyHook, FieldDecl, InitHook, Registration,
    TypeKey, ViewSet,
};

/// Wiring state; `Ready` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireState {
    /// Registered, not yet visited.
    Registered,
    /// On the active wiring chain.
    Wiring,
    /// Fully wired and initialized.
    Ready,
}

#[derive(Debug)]
struct WiringProgress {
    state: WireState,
    /// Collection ordering weight, read from the component when it became
    /// ready.
    order: i64,
    /// Global readiness sequence number; destroy runs in reverse.
    ready_seq: usize,
}

/// One registered component: handle, declarations, hooks and wiring state.
pub struct ComponentDefinition {
    handle: ComponentHandle,
    name: String,
    type_key: TypeKey,
    primary: bool,
    views: ViewSet,
    fields: Vec<FieldDecl>,
    init: Option<InitHook>,
    destroy: Option<DestroyHook>,
    config: Option<ConfigBacking>,
    /// Registration order, the tie-breaker for collection sorting.
    index: usize,
    progress: Mutex<WiringProgress>,
}

impl ComponentDefinition {
    pub(crate) fn from_registration(registration: Registration, index: usize) -> Self {
        Self {
            handle: registration.handle,
            name: registration.name,
            type_key: registration.type_key,
            primary: registration.primary,
            views: registration.views,
            fields: registration.fields,
            init: registration.init,
            destroy: registration.destroy,
            config: registration.config,
            index,
            progress: Mutex::new(WiringProgress {
                state: WireState::Registered,
                order: 0,
                ready_seq: 0,
            }),
        }
    }

    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The component's concrete type key.
    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// Whether this definition wins ambiguous by-type lookups.
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Whether this definition provides the given type.
    pub fn provides(&self, id: TypeId) -> bool {
        self.views.contains(id)
    }

    /// Registration order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The shared component handle.
    pub fn handle(&self) -> &ComponentHandle {
        &self.handle
    }

    /// A dependency view of this component.
    pub fn view(&self) -> DependencyView {
        DependencyView::new(self.name.clone(), self.views.clone())
    }

    /// Current wiring state.
    pub fn state(&self) -> WireState {
        self.progress.lock().state
    }

    /// Whether wiring has completed.
    pub fn is_ready(&self) -> bool {
        self.state() == WireState::Ready
    }

    /// Collection ordering weight; 0 until ready.
    pub fn order(&self) -> i64 {
        self.progress.lock().order
    }

    /// Readiness sequence number; 0 until ready.
    pub fn ready_seq(&self) -> usize {
        self.progress.lock().ready_seq
    }

    pub(crate) fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    pub(crate) fn init_hook(&self) -> Option<&InitHook> {
        self.init.as_ref()
    }

    pub(crate) fn destroy_hook(&self) -> Option<&DestroyHook> {
        self.destroy.as_ref()
    }

    pub(crate) fn config_backing(&self) -> Option<&ConfigBacking> {
        self.config.as_ref()
    }

    pub(crate) fn mark_wiring(&self) {
        self.progress.lock().state = WireState::Wiring;
    }

    pub(crate) fn mark_ready(&self, ready_seq: usize) {
        let order = self.handle.read().order();
        let mut progress = self.progress.lock();
        progress.state = WireState::Ready;
        progress.order = order;
        progress.ready_seq = ready_seq;
    }
}

/// Shared definition handle.
pub type SharedDefinition = Arc<ComponentDefinition>;
