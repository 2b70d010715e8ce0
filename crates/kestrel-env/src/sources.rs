//! Ordered registry of property sources.
//!
//! Earlier position wins lookups; every mutation keeps the order explicit
//! and fires a single observer notification so an owning environment can
//! react (e.g. subscribe to a newly added live source).

use std::sync::Arc;

use tracing::debug;

use crate::error::{EnvError, EnvResult};
use crate::source::{PropertySource, SharedSource};

/// Observer invoked once per registry mutation with the affected source name.
pub type SourcesObserver = Box<dyn Fn(&str) + Send + Sync>;

/// Ordered collection of property sources. First match wins.
#[derive(Default)]
pub struct PropertySources {
    sources: Vec<SharedSource>,
    observer: Option<SourcesObserver>,
}

impl std::fmt::Debug for PropertySources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertySources")
            .field(
                "sources",
                &self.sources.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            )
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl PropertySources {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the mutation observer. Replaces any previous observer.
    pub fn set_observer(&mut self, observer: SourcesObserver) {
        self.observer = Some(observer);
    }

    fn notify(&self, name: &str) {
        if let Some(observer) = &self.observer {
            observer(name);
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.name() == name)
    }

    /// Remove an existing source with the same name, keeping order of the rest.
    fn remove_if_present(&mut self, name: &str) {
        if let Some(index) = self.position(name) {
            self.sources.remove(index);
        }
    }

    /// Whether a source with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Look up a source by name.
    pub fn get(&self, name: &str) -> Option<SharedSource> {
        self.position(name).map(|i| Arc::clone(&self.sources[i]))
    }

    /// Number of registered sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Iterate sources in precedence order (highest first).
    pub fn iter(&self) -> impl Iterator<Item = &SharedSource> {
        self.sources.iter()
    }

    /// Clone the current ordering.
    pub fn snapshot(&self) -> Vec<SharedSource> {
        self.sources.clone()
    }

    /// First-match lookup across all sources.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.sources.iter().find_map(|s| s.get(key))
    }

    /// Add at the highest precedence. A same-named source is removed first.
    pub fn add_first(&mut self, source: impl PropertySource + 'static) {
        self.add_first_arc(Arc::new(source));
    }

    /// [`add_first`](Self::add_first) for an already shared source.
    pub fn add_first_arc(&mut self, source: SharedSource) {
        let name = source.name().to_string();
        debug!(source = %name, "adding property source at highest precedence");
        self.remove_if_present(&name);
        self.sources.insert(0, source);
        self.notify(&name);
    }

    /// Add at the lowest precedence. A same-named source is removed first.
    pub fn add_last(&mut self, source: impl PropertySource + 'static) {
        self.add_last_arc(Arc::new(source));
    }

    /// [`add_last`](Self::add_last) for an already shared source.
    pub fn add_last_arc(&mut self, source: SharedSource) {
        let name = source.name().to_string();
        debug!(source = %name, "adding property source at lowest precedence");
        self.remove_if_present(&name);
        self.sources.push(source);
        self.notify(&name);
    }

    /// Insert immediately above the named source.
    pub fn add_before(
        &mut self,
        relative_to: &str,
        source: impl PropertySource + 'static,
    ) -> EnvResult<()> {
        self.add_before_arc(relative_to, Arc::new(source))
    }

    /// [`add_before`](Self::add_before) for an already shared source.
    pub fn add_before_arc(&mut self, relative_to: &str, source: SharedSource) -> EnvResult<()> {
        self.relative_index(relative_to, source.name())?;
        let name = source.name().to_string();
        self.remove_if_present(&name);
        // Recompute: removal may have shifted the anchor.
        let anchor = self
            .position(relative_to)
            .ok_or_else(|| EnvError::source_not_found(relative_to))?;
        self.sources.insert(anchor, source);
        self.notify(&name);
        Ok(())
    }

    /// Insert immediately below the named source.
    pub fn add_after(
        &mut self,
        relative_to: &str,
        source: impl PropertySource + 'static,
    ) -> EnvResult<()> {
        self.add_after_arc(relative_to, Arc::new(source))
    }

    /// [`add_after`](Self::add_after) for an already shared source.
    pub fn add_after_arc(&mut self, relative_to: &str, source: SharedSource) -> EnvResult<()> {
        self.relative_index(relative_to, source.name())?;
        let name = source.name().to_string();
        self.remove_if_present(&name);
        let anchor = self
            .position(relative_to)
            .ok_or_else(|| EnvError::source_not_found(relative_to))?;
        self.sources.insert(anchor + 1, source);
        self.notify(&name);
        Ok(())
    }

    /// Replace the named source in place, keeping its position.
    pub fn replace(
        &mut self,
        name: &str,
        source: impl PropertySource + 'static,
    ) -> EnvResult<()> {
        self.replace_arc(name, Arc::new(source))
    }

    /// [`replace`](Self::replace) for an already shared source.
    pub fn replace_arc(&mut self, name: &str, source: SharedSource) -> EnvResult<()> {
        let index = self
            .position(name)
            .ok_or_else(|| EnvError::source_not_found(name))?;
        debug!(source = %name, "replacing property source in place");
        self.sources[index] = source;
        self.notify(name);
        Ok(())
    }

    /// Remove and return the named source, if present.
    pub fn remove(&mut self, name: &str) -> Option<SharedSource> {
        let index = self.position(name)?;
        debug!(source = %name, "removing property source");
        let source = self.sources.remove(index);
        self.notify(name);
        Some(source)
    }

    /// Validate a relative insertion: anchor must exist and differ from the
    /// inserted source's name.
    fn relative_index(&self, relative_to: &str, inserted: &str) -> EnvResult<usize> {
        if relative_to == inserted {
            return Err(EnvError::SelfReference {
                name: inserted.to_string(),
            });
        }
        self.position(relative_to)
            .ok_or_else(|| EnvError::source_not_found(relative_to))
    }
}
