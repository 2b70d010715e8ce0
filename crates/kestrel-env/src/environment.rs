//! The environment: assembled source stack, profiles, subscriptions and
//! typed binding.
//!
//! Built once through [`EnvironmentBuilder`], then shared behind `Arc`.
//! Active profiles and profile directories are fixed at construction;
//! the source stack stays mutable through the `add_source_*` family.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bind::{convert_field, Bindable};
use crate::deploy::{detect_deploy, DefaultDetector, DeployDetector, DeployInfo};
use crate::error::{EnvError, EnvResult};
use crate::profile::{
    default_application_file, load_file_source, profile_application_files, resolve_profile_dirs,
    PROFILE_INCLUDE_KEY,
};
use crate::resolver::PlaceholderResolver;
use crate::source::{
    CommandLineSource, KeyChangeEvent, MapSource, PropertySource, SharedSource, SystemEnvSource,
};
use crate::sources::PropertySources;

/// Name of the synthetic source publishing the detected deployment.
pub const DEPLOY_SOURCE_NAME: &str = "deployProperties";

static ENVIRONMENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Handler invoked for matching key changes.
pub type ChangeHandler = Box<dyn Fn(&KeyChangeEvent) -> EnvResult<()> + Send + Sync>;

/// Hook invoked after every source-registry mutation with the source name.
pub type SourcesChangedHook = Arc<dyn Fn(&str) + Send + Sync>;

enum KeyPattern {
    /// `""` or `"*"`: every key.
    All,
    /// Exact key text, or regex match on the same text.
    Matching { raw: String, regex: Regex },
}

impl KeyPattern {
    fn compile(pattern: &str) -> EnvResult<Self> {
        if pattern.is_empty() || pattern == "*" {
            return Ok(Self::All);
        }
        let regex = Regex::new(pattern).map_err(|source| EnvError::InvalidKeyPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self::Matching {
            raw: pattern.to_string(),
            regex,
        })
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Matching { raw, regex } => raw == key || regex.is_match(key),
        }
    }
}

struct KeySubscription {
    pattern: KeyPattern,
    handler: ChangeHandler,
}

struct BoundEntry {
    /// Kept so the listen subscriptions' target stays alive.
    _erased: Arc<RwLock<dyn Bindable>>,
    /// The original `Arc<RwLock<T>>`, for typed re-binds. `None` when the
    /// bind came through the type-erased entry point.
    typed: Option<Arc<dyn Any + Send + Sync>>,
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Layered configuration view over an ordered source stack.
pub struct Environment {
    sources: Arc<RwLock<PropertySources>>,
    resolver: PlaceholderResolver,
    active_profiles: Vec<String>,
    profile_dirs: Vec<PathBuf>,
    deploy: DeployInfo,
    subscriptions: Arc<RwLock<Vec<Arc<KeySubscription>>>>,
    bound: Mutex<HashMap<TypeId, BoundEntry>>,
    dispatch_tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriber_name: String,
}

impl Environment {
    /// Start building an environment.
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// Build with all defaults (process argv, detected deployment,
    /// discovered profile directories).
    pub fn from_process() -> EnvResult<Self> {
        Self::builder().build()
    }

    // -- lookup ------------------------------------------------------------

    /// Look a key up across the stack, placeholder-resolving the value.
    pub fn try_get(&self, key: &str) -> EnvResult<Option<String>> {
        let snapshot = self.sources.read().snapshot();
        let Some(raw) = lookup_in(&snapshot, key) else {
            return Ok(None);
        };
        self.resolver
            .resolve(&raw, &|k| lookup_in(&snapshot, k))
            .map(Some)
    }

    /// [`try_get`](Self::try_get) with resolution failures logged and
    /// flattened to `None`.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(%key, %err, "property lookup failed");
                None
            }
        }
    }

    /// Look a key up, falling back to `default` when absent.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Look a key up; absence is an error.
    pub fn get_required(&self, key: &str) -> EnvResult<String> {
        self.try_get(key)?.ok_or_else(|| EnvError::unresolved(key))
    }

    /// Whether any source carries the key.
    pub fn contains(&self, key: &str) -> bool {
        let snapshot = self.sources.read().snapshot();
        lookup_in(&snapshot, key).is_some()
    }

    /// Expand placeholders in arbitrary text against this environment.
    pub fn resolve_placeholders(&self, text: &str) -> EnvResult<String> {
        let snapshot = self.sources.read().snapshot();
        self.resolver.resolve(text, &|k| lookup_in(&snapshot, k))
    }

    /// Expand placeholders; any unresolvable one is an error regardless of
    /// the environment's leniency.
    pub fn resolve_required_placeholders(&self, text: &str) -> EnvResult<String> {
        let snapshot = self.sources.read().snapshot();
        self.resolver
            .resolve_required(text, &|k| lookup_in(&snapshot, k))
    }

    /// Active profiles, highest precedence first.
    pub fn active_profiles(&self) -> &[String] {
        &self.active_profiles
    }

    /// The profile directories that were scanned.
    pub fn profile_dirs(&self) -> &[PathBuf] {
        &self.profile_dirs
    }

    /// The detected deployment.
    pub fn deploy(&self) -> &DeployInfo {
        &self.deploy
    }

    /// Names of the registered sources, precedence order.
    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    // -- source mutation ---------------------------------------------------

    /// Add a source at the highest precedence and subscribe to its changes.
    pub fn add_source_first(&self, source: impl PropertySource + 'static) {
        let source: SharedSource = Arc::new(source);
        self.sources.write().add_first_arc(Arc::clone(&source));
        self.subscribe_source(&source);
    }

    /// Add a source at the lowest precedence and subscribe to its changes.
    pub fn add_source_last(&self, source: impl PropertySource + 'static) {
        let source: SharedSource = Arc::new(source);
        self.sources.write().add_last_arc(Arc::clone(&source));
        self.subscribe_source(&source);
    }

    /// Insert a source immediately above the named one.
    pub fn add_source_before(
        &self,
        relative_to: &str,
        source: impl PropertySource + 'static,
    ) -> EnvResult<()> {
        let source: SharedSource = Arc::new(source);
        self.sources
            .write()
            .add_before_arc(relative_to, Arc::clone(&source))?;
        self.subscribe_source(&source);
        Ok(())
    }

    /// Insert a source immediately below the named one.
    pub fn add_source_after(
        &self,
        relative_to: &str,
        source: impl PropertySource + 'static,
    ) -> EnvResult<()> {
        let source: SharedSource = Arc::new(source);
        self.sources
            .write()
            .add_after_arc(relative_to, Arc::clone(&source))?;
        self.subscribe_source(&source);
        Ok(())
    }

    /// Replace the named source in place.
    pub fn replace_source(
        &self,
        name: &str,
        source: impl PropertySource + 'static,
    ) -> EnvResult<()> {
        let source: SharedSource = Arc::new(source);
        self.sources.write().replace_arc(name, Arc::clone(&source))?;
        self.subscribe_source(&source);
        Ok(())
    }

    /// Remove the named source.
    pub fn remove_source(&self, name: &str) -> Option<SharedSource> {
        let removed = self.sources.write().remove(name);
        if let Some(removed) = &removed {
            removed.unsubscribe(&self.subscriber_name);
        }
        removed
    }

    /// Fold a parent environment in: parent sources whose names are absent
    /// join at lowest precedence, parent profiles append with
    /// order-preserving dedup. Constructor-phase operation; requires
    /// exclusive access.
    pub fn merge(&mut self, parent: &Environment) {
        let parent_sources = parent.sources.read().snapshot();
        for source in parent_sources {
            let absent = !self.sources.read().contains(source.name());
            if absent {
                self.sources.write().add_last_arc(Arc::clone(&source));
                self.subscribe_source(&source);
            }
        }
        for profile in &parent.active_profiles {
            if !self.active_profiles.contains(profile) {
                self.active_profiles.push(profile.clone());
            }
        }
    }

    // -- change subscriptions ---------------------------------------------

    /// Subscribe a handler to key changes. `""` and `"*"` match every key;
    /// any other pattern matches its exact text or as a regex.
    pub fn subscribe_keys(
        &self,
        pattern: &str,
        handler: impl Fn(&KeyChangeEvent) -> EnvResult<()> + Send + Sync + 'static,
    ) -> EnvResult<()> {
        let pattern = KeyPattern::compile(pattern)?;
        self.subscriptions.write().push(Arc::new(KeySubscription {
            pattern,
            handler: Box::new(handler),
        }));
        Ok(())
    }

    fn subscribe_source(&self, source: &SharedSource) {
        let Some(mut rx) = source.subscribe(&self.subscriber_name) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let subscriptions = Arc::clone(&self.subscriptions);
                let name = source.name().to_string();
                let task = handle.spawn(async move {
                    while let Some(event) = rx.recv().await {
                        let snapshot: Vec<_> = subscriptions.read().iter().cloned().collect();
                        dispatch_event(&snapshot, &event);
                    }
                    debug!(source = %name, "change stream closed");
                });
                self.dispatch_tasks.lock().push(task);
            }
            Err(_) => {
                source.unsubscribe(&self.subscriber_name);
                warn!(
                    source = source.name(),
                    "no async runtime; live updates disabled for source"
                );
            }
        }
    }

    /// Stop all dispatch tasks. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        for task in self.dispatch_tasks.lock().drain(..) {
            task.abort();
        }
    }

    // -- typed binding -----------------------------------------------------

    /// Populate `target` from keys under `prefix`. With `listen`, every
    /// field stays current through an exact-key change subscription, and a
    /// later listen-bind of the same type returns the already-bound
    /// instance.
    pub fn bind<T: Bindable>(
        &self,
        prefix: &str,
        target: Arc<RwLock<T>>,
        listen: bool,
    ) -> EnvResult<Arc<RwLock<T>>> {
        if listen {
            if let Some(entry) = self.bound.lock().get(&TypeId::of::<T>()) {
                return entry
                    .typed
                    .as_ref()
                    .and_then(|typed| typed.downcast_ref::<Arc<RwLock<T>>>())
                    .cloned()
                    .ok_or(EnvError::AlreadyBound {
                        type_name: std::any::type_name::<T>(),
                    });
            }
        }
        let erased: Arc<RwLock<dyn Bindable>> = target.clone();
        self.bind_target(prefix, &erased, listen)?;
        if listen {
            self.bound.lock().insert(
                TypeId::of::<T>(),
                BoundEntry {
                    _erased: erased,
                    typed: Some(Arc::new(Arc::clone(&target))),
                },
            );
        }
        Ok(target)
    }

    /// Type-erased [`bind`](Self::bind), for callers that track concrete
    /// types themselves. `type_id` keys the idempotence cache.
    pub fn bind_dyn(
        &self,
        prefix: &str,
        target: Arc<RwLock<dyn Bindable>>,
        type_id: TypeId,
        listen: bool,
    ) -> EnvResult<()> {
        if listen && self.bound.lock().contains_key(&type_id) {
            return Ok(());
        }
        self.bind_target(prefix, &target, listen)?;
        if listen {
            self.bound.lock().insert(
                type_id,
                BoundEntry {
                    _erased: target,
                    typed: None,
                },
            );
        }
        Ok(())
    }

    fn bind_target(
        &self,
        prefix: &str,
        target: &Arc<RwLock<dyn Bindable>>,
        listen: bool,
    ) -> EnvResult<()> {
        let fields = target.read().fields();
        for field in &fields {
            let key = join_key(prefix, field.relative_key());
            let raw = self.try_get(&key)?;
            let fallback = match field.default {
                Some(default) => Some(self.resolve_placeholders(default)?),
                None => None,
            };
            let value = convert_field(&key, field, raw.as_deref(), fallback.as_deref())?;
            target.write().apply(field.field, value)?;
        }
        if !listen {
            return Ok(());
        }
        for field in fields {
            let key = join_key(prefix, field.relative_key());
            let target = Arc::clone(target);
            let resolver = self.resolver;
            let sources = Arc::clone(&self.sources);
            let exact = key.clone();
            self.subscribe_keys(&regex::escape(&key), move |event| {
                if event.key != exact {
                    return Ok(());
                }
                let snapshot = sources.read().snapshot();
                let lookup = |k: &str| lookup_in(&snapshot, k);
                let raw = match &event.new_value {
                    Some(text) => Some(resolver.resolve(text, &lookup)?),
                    None => None,
                };
                let fallback = match field.default {
                    Some(default) => Some(resolver.resolve(default, &lookup)?),
                    None => None,
                };
                let value = convert_field(&exact, &field, raw.as_deref(), fallback.as_deref())?;
                debug!(key = %exact, "re-binding configuration field");
                target.write().apply(field.field, value)
            })?;
        }
        Ok(())
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lookup_in(snapshot: &[SharedSource], key: &str) -> Option<String> {
    snapshot.iter().find_map(|s| s.get(key))
}

fn dispatch_event(subscriptions: &[Arc<KeySubscription>], event: &KeyChangeEvent) {
    for subscription in subscriptions {
        if subscription.pattern.matches(&event.key) {
            if let Err(err) = (subscription.handler)(event) {
                warn!(key = %event.key, %err, "change handler failed");
            }
        }
    }
}

/// Join a bind prefix and a relative key with a single dot.
fn join_key(prefix: &str, relative: &str) -> String {
    if prefix.is_empty() {
        relative.to_string()
    } else if prefix.ends_with('.') {
        format!("{prefix}{relative}")
    } else {
        format!("{prefix}.{relative}")
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder assembling the source stack in precedence order: command line,
/// OS environment, detected deployment, default application file, active
/// profile files, then caller-supplied sources.
#[derive(Default)]
pub struct EnvironmentBuilder {
    args: Option<Vec<String>>,
    profile_dirs: Vec<PathBuf>,
    profiles: Vec<String>,
    additional_sources: Vec<SharedSource>,
    detectors: Vec<Arc<dyn DeployDetector>>,
    ignore_unresolvable: bool,
    on_sources_changed: Option<SourcesChangedHook>,
}

impl EnvironmentBuilder {
    /// Use these tokens instead of the process argv.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Scan exactly this directory (repeatable). Disables discovery.
    pub fn profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profile_dirs.push(dir.into());
        self
    }

    /// Activate this profile explicitly (repeatable). Disables derivation
    /// from the deployment and the include key.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.push(profile.into());
        self
    }

    /// Append a lowest-precedence source. Skipped at build time when a
    /// same-named source already exists.
    pub fn source(mut self, source: impl PropertySource + 'static) -> Self {
        self.additional_sources.push(Arc::new(source));
        self
    }

    /// Add a deployment detector, consulted before the default detector.
    pub fn detector(mut self, detector: Arc<dyn DeployDetector>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Leave unresolvable placeholders literal instead of failing lookups.
    pub fn ignore_unresolvable(mut self, ignore: bool) -> Self {
        self.ignore_unresolvable = ignore;
        self
    }

    /// Hook invoked after every source-registry mutation.
    pub fn on_sources_changed(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_sources_changed = Some(Arc::new(hook));
        self
    }

    /// Assemble the environment.
    pub fn build(mut self) -> EnvResult<Environment> {
        let args = self
            .args
            .take()
            .unwrap_or_else(|| std::env::args().collect());

        let resolver = if self.ignore_unresolvable {
            PlaceholderResolver::lenient()
        } else {
            PlaceholderResolver::new()
        };

        let mut detectors = self.detectors;
        detectors.push(Arc::new(DefaultDetector));
        let deploy = detect_deploy(&detectors, &args);

        let mut registry = PropertySources::new();
        registry.add_last(CommandLineSource::new(&args));
        registry.add_last(SystemEnvSource::new());
        registry.add_last(MapSource::new(
            DEPLOY_SOURCE_NAME,
            deploy.published_properties(),
        ));

        let profile_dirs = resolve_profile_dirs(&self.profile_dirs, &args, deploy.is_dev());
        let default_file = default_application_file(&profile_dirs);
        let default_name = match &default_file {
            Some(path) => {
                let name = file_source_name(path);
                registry.add_last_arc(Arc::new(load_file_source(name.clone(), path)?));
                Some(name)
            }
            None => None,
        };

        let active_profiles = resolve_active_profiles(&self.profiles, &registry, &deploy)?;
        let by_profile = profile_application_files(&profile_dirs);
        for profile in &active_profiles {
            let Some(files) = by_profile.get(profile) else {
                continue;
            };
            for file in files {
                let name = file_source_name(&file.path);
                let source: SharedSource = Arc::new(load_file_source(name, &file.path)?);
                match &default_name {
                    // Profile files sit above the default file, below
                    // everything non-file.
                    Some(default_name) => {
                        registry.add_before_arc(default_name, source)?;
                    }
                    None => registry.add_last_arc(source),
                }
            }
        }

        for source in self.additional_sources {
            if registry.contains(source.name()) {
                debug!(source = source.name(), "additional source name taken; skipped");
                continue;
            }
            registry.add_last_arc(source);
        }

        let hook = self.on_sources_changed;
        registry.set_observer(Box::new(move |name| {
            debug!(source = %name, "property sources changed");
            if let Some(hook) = &hook {
                hook(name);
            }
        }));

        let environment = Environment {
            sources: Arc::new(RwLock::new(registry)),
            resolver,
            active_profiles,
            profile_dirs,
            deploy,
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            bound: Mutex::new(HashMap::new()),
            dispatch_tasks: Mutex::new(Vec::new()),
            subscriber_name: format!(
                "environment-{}",
                ENVIRONMENT_SEQ.fetch_add(1, Ordering::Relaxed)
            ),
        };

        let snapshot = environment.sources.read().snapshot();
        for source in &snapshot {
            environment.subscribe_source(source);
        }

        info!(
            profiles = ?environment.active_profiles,
            deploy = %environment.deploy.env,
            sources = environment.sources.read().len(),
            "environment ready"
        );
        Ok(environment)
    }
}

fn file_source_name(path: &Path) -> String {
    format!("applicationFile:{}", path.display())
}

/// Active profiles: the explicit caller list, else the include key, else
/// `{set}`, `{env}`, `{set}-{env}` from the deployment. Placeholder-
/// resolved, empties dropped, order-preserving dedup.
fn resolve_active_profiles(
    explicit: &[String],
    registry: &PropertySources,
    deploy: &DeployInfo,
) -> EnvResult<Vec<String>> {
    let candidates: Vec<String> = if !explicit.is_empty() {
        explicit.to_vec()
    } else if let Some(include) = registry.lookup(PROFILE_INCLUDE_KEY) {
        include.split(',').map(str::to_string).collect()
    } else {
        let mut derived = Vec::new();
        if !deploy.set.is_empty() {
            derived.push(deploy.set.clone());
        }
        derived.push(deploy.env.to_string());
        if !deploy.set.is_empty() {
            derived.push(format!("{}-{}", deploy.set, deploy.env));
        }
        derived
    };

    // Lenient resolution so leftovers are detectable below.
    let resolver = PlaceholderResolver::lenient();
    let mut profiles = Vec::new();
    for candidate in candidates {
        let resolved = resolver.resolve(candidate.trim(), &|k| registry.lookup(k))?;
        let resolved = resolved.trim().to_string();
        if resolved.is_empty() {
            continue;
        }
        if resolved.contains("${") {
            return Err(EnvError::InvalidProfileDeclaration {
                profile: candidate,
                reason: "unresolved placeholder in profile name".to_string(),
            });
        }
        if !profiles.contains(&resolved) {
            profiles.push(resolved);
        }
    }
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::{BindField, BindKind, BindValue};
    use crate::source::DynamicMapSource;
    use std::sync::atomic::AtomicUsize;

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    fn build(tokens: &[&str]) -> Environment {
        Environment::builder()
            .args(args(tokens))
            .profile_dir("/nonexistent-kestrel-profiles")
            .build()
            .unwrap()
    }

    #[test]
    fn test_cli_beats_additional_sources() {
        let env = Environment::builder()
            .args(args(&["prog", "--user.name=cli"]))
            .profile_dir("/nonexistent-kestrel-profiles")
            .source(MapSource::from_pairs("extra", [("user.name", "map"), ("only", "x")]))
            .build()
            .unwrap();
        assert_eq!(env.get("user.name").as_deref(), Some("cli"));
        assert_eq!(env.get("only").as_deref(), Some("x"));
        assert!(env.contains("only"));
        assert!(!env.contains("missing"));
    }

    #[test]
    fn test_deploy_properties_published() {
        let env = build(&["prog", "--env=prod", "--set=sz"]);
        assert_eq!(env.get("kestrel.deploy.env").as_deref(), Some("prod"));
        assert_eq!(env.get("kestrel.deploy.set").as_deref(), Some("sz"));
        assert_eq!(env.active_profiles(), ["sz", "prod", "sz-prod"]);
    }

    #[test]
    fn test_default_deploy_profile() {
        let env = build(&["prog"]);
        assert_eq!(env.active_profiles(), ["dev"]);
    }

    #[test]
    fn test_explicit_profiles_win() {
        let env = Environment::builder()
            .args(args(&["prog", "--env=prod"]))
            .profile_dir("/nonexistent-kestrel-profiles")
            .profile("a")
            .profile("b")
            .profile("a")
            .build()
            .unwrap();
        assert_eq!(env.active_profiles(), ["a", "b"]);
    }

    #[test]
    fn test_profile_include_key() {
        let env = Environment::builder()
            .args(args(&["prog", "--kestrel.profile.include=x, y,,x"]))
            .profile_dir("/nonexistent-kestrel-profiles")
            .build()
            .unwrap();
        assert_eq!(env.active_profiles(), ["x", "y"]);
    }

    #[test]
    fn test_lookup_resolves_placeholders() {
        let env = Environment::builder()
            .args(args(&["prog", "--user.name=Arvin", "--greet=Hello:${user.name}"]))
            .profile_dir("/nonexistent-kestrel-profiles")
            .build()
            .unwrap();
        assert_eq!(env.get("greet").as_deref(), Some("Hello:Arvin"));
        assert_eq!(
            env.resolve_placeholders("${greet}!").unwrap(),
            "Hello:Arvin!"
        );
        assert!(env.resolve_required_placeholders("${missing}").is_err());
        assert!(matches!(
            env.get_required("missing"),
            Err(EnvError::UnresolvedPlaceholder { .. })
        ));
        assert_eq!(env.get_or("missing", "fb"), "fb");
    }

    #[test]
    fn test_source_mutation_and_observer() {
        static MUTATIONS: AtomicUsize = AtomicUsize::new(0);
        let env = Environment::builder()
            .args(args(&["prog"]))
            .profile_dir("/nonexistent-kestrel-profiles")
            .on_sources_changed(|_| {
                MUTATIONS.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();
        let before = MUTATIONS.load(Ordering::SeqCst);
        env.add_source_first(MapSource::from_pairs("override", [("k", "1")]));
        assert_eq!(env.get("k").as_deref(), Some("1"));
        env.remove_source("override");
        assert_eq!(env.get("k"), None);
        assert_eq!(MUTATIONS.load(Ordering::SeqCst), before + 2);
    }

    #[test]
    fn test_merge_dedups_sources_and_profiles() {
        let parent = Environment::builder()
            .args(args(&["prog"]))
            .profile_dir("/nonexistent-kestrel-profiles")
            .profile("shared")
            .profile("parent-only")
            .source(MapSource::from_pairs("parent", [("p", "1")]))
            .build()
            .unwrap();
        let mut child = Environment::builder()
            .args(args(&["prog"]))
            .profile_dir("/nonexistent-kestrel-profiles")
            .profile("shared")
            .source(MapSource::from_pairs("child", [("c", "1"), ("p", "child")]))
            .build()
            .unwrap();
        let sources_before = child.source_names().len();
        child.merge(&parent);
        // Parent-only source appended at lowest precedence; shared names
        // (commandLineArgs etc.) not duplicated.
        assert_eq!(child.source_names().len(), sources_before + 1);
        assert_eq!(child.get("p").as_deref(), Some("child"));
        assert_eq!(child.get("c").as_deref(), Some("1"));
        assert_eq!(child.active_profiles(), ["shared", "parent-only"]);
    }

    #[test]
    fn test_bad_subscription_pattern() {
        let env = build(&["prog"]);
        assert!(matches!(
            env.subscribe_keys("(unclosed", |_| Ok(())),
            Err(EnvError::InvalidKeyPattern { .. })
        ));
        env.subscribe_keys("", |_| Ok(())).unwrap();
        env.subscribe_keys("server\\..*", |_| Ok(())).unwrap();
    }

    #[derive(Default)]
    struct UserConfig {
        id: i64,
        username: String,
        active: bool,
    }

    impl Bindable for UserConfig {
        fn fields(&self) -> Vec<BindField> {
            vec![
                BindField::new("id", BindKind::I64),
                BindField::new("username", BindKind::Text).with_default("anonymous"),
                BindField::new("active", BindKind::Bool),
            ]
        }

        fn apply(&mut self, field: &str, value: BindValue) -> EnvResult<()> {
            match (field, value) {
                ("id", BindValue::I64(v)) => self.id = v,
                ("username", BindValue::Text(v)) => self.username = v,
                ("active", BindValue::Bool(v)) => self.active = v,
                (other, _) => {
                    return Err(EnvError::UnknownField {
                        field: other.to_string(),
                    })
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_bind_populates_fields() {
        let env = build(&["prog", "--user.id=7", "--user.active=true"]);
        let config = env
            .bind("user", Arc::new(RwLock::new(UserConfig::default())), false)
            .unwrap();
        let config = config.read();
        assert_eq!(config.id, 7);
        // Absent key falls back to the declared default.
        assert_eq!(config.username, "anonymous");
        assert!(config.active);
    }

    #[test]
    fn test_bind_resolves_placeholders_in_values() {
        // Bound values go through placeholder expansion before conversion.
        let env = build(&["prog", "--user.id=1", "--user.username=Hello_${user.id}"]);
        let config = env
            .bind("user", Arc::new(RwLock::new(UserConfig::default())), false)
            .unwrap();
        let config = config.read();
        assert_eq!(config.id, 1);
        assert_eq!(config.username, "Hello_1");
    }

    #[test]
    fn test_bind_optional_conversion_degrades_to_zero() {
        let env = build(&["prog", "--user.id=notanumber"]);
        let config = env
            .bind("user", Arc::new(RwLock::new(UserConfig::default())), false)
            .unwrap();
        assert_eq!(config.read().id, 0);
    }

    #[tokio::test]
    async fn test_listen_bind_is_idempotent() {
        let env = build(&["prog", "--user.id=1"]);
        let first = env
            .bind("user", Arc::new(RwLock::new(UserConfig::default())), true)
            .unwrap();
        let second = env
            .bind("user", Arc::new(RwLock::new(UserConfig::default())), true)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_dynamic_source_rebinds_listener() {
        let env = build(&["prog"]);
        let dynamic = Arc::new(DynamicMapSource::new("center"));
        dynamic.set("user.id", "1");
        env.add_source_first(Arc::clone(&dynamic));

        let config = env
            .bind("user", Arc::new(RwLock::new(UserConfig::default())), true)
            .unwrap();
        assert_eq!(config.read().id, 1);

        dynamic.set("user.id", "42");
        dynamic.set("user.username", "arvin");
        for _ in 0..50 {
            if config.read().id == 42 && config.read().username == "arvin" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(config.read().id, 42);
        assert_eq!(config.read().username, "arvin");

        // Deleted key reverts to the default, then zero.
        dynamic.remove("user.username");
        dynamic.remove("user.id");
        for _ in 0..50 {
            if config.read().id == 0 && config.read().username == "anonymous" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(config.read().username, "anonymous");
        assert_eq!(config.read().id, 0);
        env.shutdown();
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_others() {
        let env = build(&["prog"]);
        let dynamic = Arc::new(DynamicMapSource::new("center"));
        env.add_source_first(Arc::clone(&dynamic));

        static SEEN: AtomicUsize = AtomicUsize::new(0);
        env.subscribe_keys("*", |_| Err(EnvError::unresolved("boom")))
            .unwrap();
        env.subscribe_keys("*", |_| {
            SEEN.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        dynamic.set("k", "1");
        for _ in 0..50 {
            if SEEN.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        // The failing handler ran first and did not stop the second.
        assert_eq!(SEEN.load(Ordering::SeqCst), 1);
        env.shutdown();
    }
}
