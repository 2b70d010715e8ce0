//! Property sources: named key-value providers, optionally live-updating.
//!
//! A [`PropertySource`] is the leaf of the resolution stack. Sources that can
//! change at runtime hand out a bounded [`tokio::sync::mpsc`] queue per
//! subscriber; emission is fire-and-forget (a full queue drops the event with
//! a warning rather than blocking the writer).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::warn;

/// Source name of the command-line argument source.
pub const COMMAND_LINE_SOURCE_NAME: &str = "commandLineArgs";

/// Source name of the OS environment-variable source.
pub const SYSTEM_ENVIRONMENT_SOURCE_NAME: &str = "systemEnvironment";

/// Capacity of the per-subscriber change-event queue.
pub const CHANGE_QUEUE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// Kind of a single key change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The key did not exist before.
    Added,
    /// The key existed with a different value.
    Updated,
    /// The key was removed.
    Deleted,
}

/// A single configuration key change, as emitted by a live source.
#[derive(Debug, Clone)]
pub struct KeyChangeEvent {
    /// The changed key.
    pub key: String,
    /// The previous value, if any.
    pub old_value: Option<String>,
    /// The new value (`None` for [`ChangeKind::Deleted`]).
    pub new_value: Option<String>,
    /// What happened to the key.
    pub kind: ChangeKind,
}

// ---------------------------------------------------------------------------
// PropertySource
// ---------------------------------------------------------------------------

/// A named, enumerable key-value view.
///
/// The name is the source's identity inside an ordered registry and is
/// immutable once constructed. Enumeration order is unspecified; precedence
/// is decided by the registry, not by the source.
pub trait PropertySource: Send + Sync {
    /// Unique source name.
    fn name(&self) -> &str;

    /// Look up a single key.
    fn get(&self, key: &str) -> Option<String>;

    /// Look up a key, falling back to `default` when absent.
    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Enumerate all pairs. Order is unspecified.
    fn entries(&self) -> Vec<(String, String)>;

    /// Subscribe to key changes under a subscriber name.
    ///
    /// Returns `None` when the source cannot change (the default).
    fn subscribe(&self, subscriber: &str) -> Option<mpsc::Receiver<KeyChangeEvent>> {
        let _ = subscriber;
        None
    }

    /// Drop a previous subscription. No-op for immutable sources.
    fn unsubscribe(&self, subscriber: &str) {
        let _ = subscriber;
    }
}

/// Shared, reference-counted property source.
pub type SharedSource = Arc<dyn PropertySource>;

impl<T: PropertySource + ?Sized> PropertySource for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        (**self).get_or(key, default)
    }

    fn entries(&self) -> Vec<(String, String)> {
        (**self).entries()
    }

    fn subscribe(&self, subscriber: &str) -> Option<mpsc::Receiver<KeyChangeEvent>> {
        (**self).subscribe(subscriber)
    }

    fn unsubscribe(&self, subscriber: &str) {
        (**self).unsubscribe(subscriber)
    }
}

// ---------------------------------------------------------------------------
// MapSource
// ---------------------------------------------------------------------------

/// Immutable source backed by a map snapshot.
#[derive(Debug, Clone)]
pub struct MapSource {
    name: String,
    properties: HashMap<String, String>,
}

impl MapSource {
    /// Create a source from a prepared map.
    pub fn new(name: impl Into<String>, properties: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    /// Create a source from string pairs.
    pub fn from_pairs<K, V>(name: impl Into<String>, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            name,
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl PropertySource for MapSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// CommandLineSource
// ---------------------------------------------------------------------------

/// Source over `--key=value` command-line tokens.
///
/// A token shorter than four characters or without the `--` prefix is not a
/// property token and is skipped; a missing or leading `=` is skipped too.
/// `--key=` yields an empty string value.
#[derive(Debug, Clone)]
pub struct CommandLineSource {
    inner: MapSource,
}

impl CommandLineSource {
    /// Parse the supplied argv tokens.
    pub fn new(args: &[String]) -> Self {
        let mut properties = HashMap::new();
        for arg in args {
            if let Some((key, value)) = parse_property_token(arg) {
                properties.insert(key, value);
            }
        }
        Self {
            inner: MapSource::new(COMMAND_LINE_SOURCE_NAME, properties),
        }
    }

    /// Parse the current process argv.
    pub fn from_process() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::new(&args)
    }
}

impl PropertySource for CommandLineSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.inner.entries()
    }
}

/// Extract `(key, value)` from a `--key=value` token, if it is one.
fn parse_property_token(arg: &str) -> Option<(String, String)> {
    // At least four characters: `--k=`
    if arg.len() < 4 || !arg.starts_with("--") {
        return None;
    }
    let arg = arg[2..].trim();
    let index = arg.find('=')?;
    if index == 0 {
        return None;
    }
    let key = arg[..index].trim();
    let value = arg[index + 1..].trim();
    Some((key.to_string(), value.to_string()))
}

/// Look a single key up directly from argv tokens, without building a source.
pub fn command_line_property(args: &[String], key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    args.iter().find_map(|arg| {
        parse_property_token(arg).and_then(|(k, v)| (k == key).then_some(v))
    })
}

// ---------------------------------------------------------------------------
// SystemEnvSource
// ---------------------------------------------------------------------------

/// Snapshot of the OS environment variables at construction time.
#[derive(Debug, Clone)]
pub struct SystemEnvSource {
    inner: MapSource,
}

impl SystemEnvSource {
    /// Snapshot the current process environment.
    pub fn new() -> Self {
        Self {
            inner: MapSource::new(SYSTEM_ENVIRONMENT_SOURCE_NAME, std::env::vars().collect()),
        }
    }
}

impl Default for SystemEnvSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertySource for SystemEnvSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.inner.entries()
    }
}

// ---------------------------------------------------------------------------
// DynamicMapSource
// ---------------------------------------------------------------------------

/// Mutable source that emits [`KeyChangeEvent`]s to its subscribers.
///
/// Stands in for an external configuration center attached after startup:
/// writers call [`set`](DynamicMapSource::set) / [`remove`](DynamicMapSource::remove)
/// and every live subscriber receives the change through its own queue.
pub struct DynamicMapSource {
    name: String,
    properties: RwLock<HashMap<String, String>>,
    subscribers: Mutex<Vec<(String, mpsc::Sender<KeyChangeEvent>)>>,
}

impl DynamicMapSource {
    /// Create an empty dynamic source.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_properties(name, HashMap::new())
    }

    /// Create a dynamic source with initial content.
    pub fn with_properties(name: impl Into<String>, properties: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            properties: RwLock::new(properties),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Set a key, emitting `Added` or `Updated` to subscribers.
    ///
    /// Setting a key to its current value is a no-op.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let old_value = {
            let mut map = self.properties.write();
            let old = map.get(&key).cloned();
            if old.as_deref() == Some(value.as_str()) {
                return;
            }
            map.insert(key.clone(), value.clone());
            old
        };
        let kind = if old_value.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Added
        };
        self.emit(KeyChangeEvent {
            key,
            old_value,
            new_value: Some(value),
            kind,
        });
    }

    /// Remove a key, emitting `Deleted` when it was present.
    pub fn remove(&self, key: &str) {
        let old_value = self.properties.write().remove(key);
        if let Some(old_value) = old_value {
            self.emit(KeyChangeEvent {
                key: key.to_string(),
                old_value: Some(old_value),
                new_value: None,
                kind: ChangeKind::Deleted,
            });
        }
    }

    fn emit(&self, event: KeyChangeEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(subscriber, sender)| {
            match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        source = %self.name,
                        subscriber = %subscriber,
                        key = %event.key,
                        "change queue full; event dropped"
                    );
                    true
                }
                // Receiver gone: forget the subscription.
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

impl PropertySource for DynamicMapSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<String> {
        self.properties.read().get(key).cloned()
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.properties
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn subscribe(&self, subscriber: &str) -> Option<mpsc::Receiver<KeyChangeEvent>> {
        let (tx, rx) = mpsc::channel(CHANGE_QUEUE_CAPACITY);
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(name, _)| name != subscriber);
        subscribers.push((subscriber.to_string(), tx));
        Some(rx)
    }

    fn unsubscribe(&self, subscriber: &str) {
        self.subscribers
            .lock()
            .retain(|(name, _)| name != subscriber);
    }
}
