//! Profile directory discovery and application-file loading.
//!
//! A profile directory is any directory holding at least one file named like
//! `application.properties` or `application-<profile>.yml`. Discovery is a
//! precedence chain ending in an upward ancestor walk for local development,
//! where the working directory is often a nested crate or package folder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{EnvError, EnvResult};
use crate::source::{command_line_property, MapSource};

/// Key declaring the profile directories to scan.
pub const PROFILE_DIRS_KEY: &str = "kestrel.profile.dirs";
/// Key declaring additional active profiles.
pub const PROFILE_INCLUDE_KEY: &str = "kestrel.profile.include";
/// Key declaring the application name.
pub const APPLICATION_NAME_KEY: &str = "kestrel.application.name";

/// Conventional sub-directories probed for application files.
const CONVENTIONAL_DIRS: [&str; 3] = ["./", "./config", "./conf"];

static APPLICATION_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^application-?(.*)\.(properties|props|prop|ya?ml|toml)$")
        .expect("literal pattern compiles")
});

/// An application file belonging to one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFile {
    /// Profile name; empty for the default `application.<ext>` file.
    pub profile: String,
    /// Full file path.
    pub path: PathBuf,
}

/// Match a file name against the application-file pattern, returning the
/// profile segment (empty for the default file).
fn application_file_profile(file_name: &str) -> Option<String> {
    APPLICATION_FILE
        .captures(file_name)
        .map(|caps| caps[1].to_string())
}

/// Whether a directory contains at least one application file.
pub fn is_valid_profile_dir(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        entry
            .file_name()
            .to_str()
            .is_some_and(|name| application_file_profile(name).is_some())
    })
}

/// Resolve the profile directories to scan, precedence high to low:
/// explicit caller list, `--kestrel.profile.dirs=` argv token, the
/// same-named OS variable, the conventional set, and (development only) an
/// upward walk from the working directory. No match is an empty list, not
/// an error.
pub fn resolve_profile_dirs(explicit: &[PathBuf], args: &[String], dev: bool) -> Vec<PathBuf> {
    if !explicit.is_empty() {
        return explicit.iter().filter(|d| is_valid_profile_dir(d)).cloned().collect();
    }

    let declared = command_line_property(args, PROFILE_DIRS_KEY)
        .or_else(|| std::env::var(PROFILE_DIRS_KEY).ok());
    if let Some(declared) = declared {
        let dirs: Vec<PathBuf> = declared
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .filter(|d| is_valid_profile_dir(d))
            .collect();
        // An empty declaration falls through to the conventional set.
        if !dirs.is_empty() {
            return dirs;
        }
    }

    let conventional: Vec<PathBuf> = CONVENTIONAL_DIRS
        .iter()
        .map(PathBuf::from)
        .filter(|d| is_valid_profile_dir(d))
        .collect();
    if !conventional.is_empty() {
        return conventional;
    }

    if dev {
        if let Some(found) = walk_ancestors() {
            return found;
        }
    }

    debug!("no profile directory found");
    Vec::new()
}

/// Walk up from the working directory probing each ancestor's conventional
/// sub-directories. Used only in development deployments.
fn walk_ancestors() -> Option<Vec<PathBuf>> {
    let cwd = std::env::current_dir().ok()?;
    for ancestor in cwd.ancestors().skip(1) {
        let dirs: Vec<PathBuf> = CONVENTIONAL_DIRS
            .iter()
            .map(|sub| ancestor.join(sub.trim_start_matches("./")))
            .filter(|d| is_valid_profile_dir(d))
            .collect();
        if !dirs.is_empty() {
            debug!(dir = %ancestor.display(), "profile directory found in ancestor");
            return Some(dirs);
        }
    }
    None
}

/// First default `application.<ext>` file across the directories, in
/// directory order.
pub fn default_application_file(dirs: &[PathBuf]) -> Option<PathBuf> {
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .collect();
        names.sort();
        for name in names {
            if application_file_profile(&name).is_some_and(|p| p.is_empty()) {
                return Some(dir.join(name));
            }
        }
    }
    None
}

/// All per-profile application files across the directories: profile name →
/// files in directory order. Duplicates across directories are kept; the
/// caller disambiguates by path.
pub fn profile_application_files(dirs: &[PathBuf]) -> HashMap<String, Vec<ProfileFile>> {
    let mut by_profile: HashMap<String, Vec<ProfileFile>> = HashMap::new();
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .collect();
        names.sort();
        for name in names {
            if let Some(profile) = application_file_profile(&name) {
                if profile.is_empty() {
                    continue;
                }
                by_profile.entry(profile.clone()).or_default().push(ProfileFile {
                    profile,
                    path: dir.join(name),
                });
            }
        }
    }
    by_profile
}

/// Load a configuration file into a flat [`MapSource`].
///
/// `.properties`/`.props`/`.prop` are parsed line-wise: `#`/`!` comments and
/// blank lines skipped, split at the first `=` or `:`, key and value
/// trimmed. Placeholders are NOT substituted at load time; they resolve
/// against the full environment at lookup time. `.toml`/`.yml`/`.yaml` parse
/// via serde and flatten to dotted keys (array elements as `key.0`, `key.1`).
pub fn load_file_source(name: impl Into<String>, path: &Path) -> EnvResult<MapSource> {
    let text = std::fs::read_to_string(path).map_err(|source| EnvError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let properties = match extension.as_str() {
        "properties" | "props" | "prop" => parse_properties(&text),
        "toml" => {
            let value: toml::Value = toml::from_str(&text)
                .map_err(|e| EnvError::parse(path, e.to_string()))?;
            let json = serde_json::to_value(value)
                .map_err(|e| EnvError::parse(path, e.to_string()))?;
            flatten(&json)
        }
        "yml" | "yaml" => {
            let value: serde_yaml::Value = serde_yaml::from_str(&text)
                .map_err(|e| EnvError::parse(path, e.to_string()))?;
            let json = serde_json::to_value(value)
                .map_err(|e| EnvError::parse(path, e.to_string()))?;
            flatten(&json)
        }
        other => {
            warn!(path = %path.display(), extension = %other, "unknown file extension; parsed as properties");
            parse_properties(&text)
        }
    };
    Ok(MapSource::new(name, properties))
}

/// Line-wise `.properties` parser.
fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut properties = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some(index) = line.find(['=', ':']) else {
            continue;
        };
        let key = line[..index].trim();
        if key.is_empty() {
            continue;
        }
        let value = line[index + 1..].trim();
        properties.insert(key.to_string(), value.to_string());
    }
    properties
}

/// Flatten a JSON tree to dotted keys. Scalars render in their canonical
/// textual form; nulls are skipped.
fn flatten(value: &Value) -> HashMap<String, String> {
    let mut out = HashMap::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, child_key, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(child, format!("{prefix}.{index}"), out);
            }
        }
        Value::Null => {}
        Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}
