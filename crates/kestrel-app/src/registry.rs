//! Insertion-ordered component registry with by-name and by-type lookup.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::component::{DependencyView, Registration, TypeKey};
use crate::definition::{ComponentDefinition, SharedDefinition};
use crate::error::{AppError, AppResult};

/// All registered components, in registration order.
#[derive(Default)]
pub struct ComponentRegistry {
    container: RwLock<IndexMap<String, SharedDefinition>>,
    ready_seq: AtomicUsize,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component. A duplicate name or a doubly declared field is
    /// fatal immediately.
    pub fn register(&self, registration: Registration) -> AppResult<()> {
        for (i, field) in registration.fields.iter().enumerate() {
            let name = field.field();
            if registration.fields[..i].iter().any(|f| f.field() == name) {
                return Err(AppError::ConflictingFieldDeclaration {
                    component: registration.name.clone(),
                    field: name.to_string(),
                });
            }
        }

        let mut container = self.container.write();
        if container.contains_key(&registration.name) {
            return Err(AppError::duplicate(&registration.name));
        }
        let name = registration.name.clone();
        let definition = ComponentDefinition::from_registration(registration, container.len());
        debug!(component = %name, "component registered");
        container.insert(name, Arc::new(definition));
        Ok(())
    }

    /// The definition registered under `name`.
    pub fn get(&self, name: &str) -> Option<SharedDefinition> {
        self.container.read().get(name).cloned()
    }

    /// All definitions, registration order.
    pub fn definitions(&self) -> Vec<SharedDefinition> {
        self.container.read().values().cloned().collect()
    }

    /// Definitions providing `key`, registration order.
    pub fn definitions_of(&self, key: TypeKey) -> Vec<SharedDefinition> {
        self.container
            .read()
            .values()
            .filter(|d| d.provides(key.id()))
            .cloned()
            .collect()
    }

    /// The unique or primary provider of `key`. Zero providers is
    /// [`AppError::TypeNotFound`]; several without exactly one primary is
    /// [`AppError::LookupAmbiguous`].
    pub fn primary_of(&self, key: TypeKey) -> AppResult<SharedDefinition> {
        let mut candidates = self.definitions_of(key);
        match candidates.len() {
            0 => Err(AppError::TypeNotFound {
                type_name: key.name,
            }),
            1 => Ok(candidates.remove(0)),
            _ => {
                let mut primaries = candidates.into_iter().filter(|d| d.is_primary());
                match (primaries.next(), primaries.next()) {
                    (Some(primary), None) => Ok(primary),
                    _ => Err(AppError::LookupAmbiguous {
                        type_name: key.name,
                    }),
                }
            }
        }
    }

    /// A dependency view of the component registered under `name`.
    pub fn get_by_name(&self, name: &str) -> Option<DependencyView> {
        self.get(name).map(|d| d.view())
    }

    /// The unique or primary provider of `I`, as a typed handle.
    pub fn get_by_type<I: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> AppResult<Arc<RwLock<I>>> {
        let key = TypeKey::of::<I>();
        let definition = self.primary_of(key)?;
        definition
            .view()
            .get::<I>()
            .ok_or(AppError::TypeNotFound { type_name: key.name })
    }

    /// Every provider of `I`: name to typed handle, registration order.
    pub fn get_all_of_type<I: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Vec<(String, Arc<RwLock<I>>)> {
        self.definitions_of(TypeKey::of::<I>())
            .into_iter()
            .filter_map(|d| {
                let view = d.view().get::<I>()?;
                Some((d.name().to_string(), view))
            })
            .collect()
    }

    /// All registered names, registration order.
    pub fn names(&self) -> Vec<String> {
        self.container.read().keys().cloned().collect()
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.container.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.container.read().is_empty()
    }

    /// Ready definitions, reverse readiness order (for shutdown).
    pub fn ready_reverse(&self) -> Vec<SharedDefinition> {
        let mut ready: Vec<SharedDefinition> = self
            .container
            .read()
            .values()
            .filter(|d| d.is_ready())
            .cloned()
            .collect();
        ready.sort_by_key(|d| std::cmp::Reverse(d.ready_seq()));
        ready
    }

    /// Next readiness sequence number.
    pub(crate) fn next_ready_seq(&self) -> usize {
        self.ready_seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}
