//! Error types for property resolution
use std::path::PathBuf;

use thiserror::Error;

/// Result type for environment operations
pub type EnvResult<T> = std::result::Result<T, EnvError>;

/// Error type for property sources, placeholder resolution and binding
#[derive(Error, Debug)]
pub enum EnvError {
    /// A registry operation referenced a source name that is not present
    #[error("PropertySource named '{name}' does not exist")]
    SourceNotFound {
        /// The missing source name
        name: String,
    },

    /// A source was added relative to its own name
    #[error("PropertySource named '{name}' cannot be added relative to itself")]
    SelfReference {
        /// The offending source name
        name: String,
    },

    /// Placeholder expansion re-entered a key already on the active chain
    #[error("Circular placeholder reference: {chain}")]
    CircularReference {
        /// The resolution chain, e.g. `a -> b -> a`
        chain: String,
    },

    /// A placeholder key could not be resolved and no default was given
    #[error("Could not resolve placeholder '{key}'")]
    UnresolvedPlaceholder {
        /// The unresolved key
        key: String,
    },

    /// A change subscription pattern failed to compile as a regex
    #[error("Invalid key pattern '{pattern}': {source}")]
    InvalidKeyPattern {
        /// The offending pattern
        pattern: String,
        /// The regex compile error
        #[source]
        source: regex::Error,
    },

    /// A resolved property value could not be converted to the field type
    #[error("Cannot convert value '{value}' of key '{key}' to {target}")]
    ConversionFailure {
        /// The configuration key
        key: String,
        /// The resolved text value
        value: String,
        /// The target semantic type
        target: &'static str,
    },

    /// An active profile name is malformed or still carries placeholders
    #[error("Invalid profile declaration '{profile}': {reason}")]
    InvalidProfileDeclaration {
        /// The profile name as declared
        profile: String,
        /// Why it was rejected
        reason: String,
    },

    /// A binder target reported a field name it does not declare
    #[error("Unknown bind field '{field}'")]
    UnknownField {
        /// The unknown field name
        field: String,
    },

    /// The same concrete type was already listen-bound through a different entry point
    #[error("Type '{type_name}' is already bound with a live subscription")]
    AlreadyBound {
        /// The concrete type name
        type_name: &'static str,
    },

    /// A configuration file could not be read
    #[error("Cannot read '{path}': {source}")]
    Io {
        /// The file path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be parsed
    #[error("Cannot parse '{path}': {message}")]
    Parse {
        /// The file path
        path: PathBuf,
        /// Parser diagnostics
        message: String,
    },
}

impl EnvError {
    /// Create a [`EnvError::SourceNotFound`]
    pub fn source_not_found(name: impl Into<String>) -> Self {
        Self::SourceNotFound { name: name.into() }
    }

    /// Create a [`EnvError::CircularReference`] from the active key chain
    pub fn circular_reference(chain: &[String]) -> Self {
        Self::CircularReference {
            chain: chain.join(" -> "),
        }
    }

    /// Create a [`EnvError::UnresolvedPlaceholder`]
    pub fn unresolved(key: impl Into<String>) -> Self {
        Self::UnresolvedPlaceholder { key: key.into() }
    }

    /// Create a [`EnvError::ConversionFailure`]
    pub fn conversion(
        key: impl Into<String>,
        value: impl Into<String>,
        target: &'static str,
    ) -> Self {
        Self::ConversionFailure {
            key: key.into(),
            value: value.into(),
            target,
        }
    }

    /// Create a [`EnvError::Parse`]
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}
