//! Component wiring over a [`kestrel_env::Environment`].
//!
//! Components register as typed descriptors ([`Registration`]): a shared
//! handle, the views it provides (its concrete type plus any trait-object
//! views), and declarations for the fields it wants injected by name, by
//! type, as an ordered collection, or as resolved configuration text.
//! [`Application::run`] wires the whole graph depth-first with cycle
//! detection, invokes lifecycle hooks, and keeps configuration-backed
//! components live-bound to the environment.
//!
//! ```no_run
//! use std::sync::Arc;
//! use parking_lot::RwLock;
//! use kestrel_app::{Application, Component, Registration};
//! use kestrel_env::Environment;
//!
//! struct Greeter;
//! impl Component for Greeter {}
//!
//! # fn main() -> kestrel_app::AppResult<()> {
//! let env = Arc::new(Environment::from_process()?);
//! let app = Application::new(env);
//! app.register(Registration::new(Arc::new(RwLock::new(Greeter))))?;
//! app.run()
//! # }
//! ```

pub mod app;
pub mod component;
pub mod definition;
pub mod error;
pub mod registry;
mod wiring;

pub use app::{Application, HookContext};
pub use component::{
    Component, ComponentHandle, DependencyView, FieldDecl, Injected, Registration, TypeKey,
    ViewSet,
};
pub use definition::{ComponentDefinition, WireState};
pub use error::{AppError, AppResult};
pub use registry::ComponentRegistry;
