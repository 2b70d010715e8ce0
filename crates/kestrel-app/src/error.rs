//! Error types for component registration and wiring
use thiserror::Error;

use kestrel_env::EnvError;

/// Result type for wiring operations
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Error type for the component registry and the wiring pass
#[derive(Error, Debug)]
pub enum AppError {
    /// A component name was registered twice
    #[error("Component named '{name}' is already registered")]
    DuplicateRegistration {
        /// The colliding component name
        name: String,
    },

    /// Wiring re-entered a component type already on the active chain
    #[error("Cyclic dependency: {chain}")]
    CyclicDependency {
        /// The wiring chain, e.g. `A -> B -> A`
        chain: String,
    },

    /// A required dependency could not be resolved
    #[error("Component '{component}' requires field '{field}' but no candidate was found")]
    MissingRequiredDependency {
        /// The component being wired
        component: String,
        /// The unsatisfied field
        field: String,
    },

    /// Multiple candidates match a by-type lookup and none is primary
    #[error("Multiple components provide '{type_name}' and none is marked primary")]
    LookupAmbiguous {
        /// The requested type
        type_name: &'static str,
    },

    /// No component provides the requested type
    #[error("No component provides '{type_name}'")]
    TypeNotFound {
        /// The requested type
        type_name: &'static str,
    },

    /// A registration declared the same field twice
    #[error("Component '{component}' declares field '{field}' more than once")]
    ConflictingFieldDeclaration {
        /// The component being registered
        component: String,
        /// The doubly declared field
        field: String,
    },

    /// A component was handed a value for a field it does not declare
    #[error("Unknown component field '{field}'")]
    UnknownField {
        /// The unknown field name
        field: String,
    },

    /// A property resolution or binding failure during wiring
    #[error(transparent)]
    Env(#[from] EnvError),
}

impl AppError {
    /// Create an [`AppError::DuplicateRegistration`]
    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::DuplicateRegistration { name: name.into() }
    }

    /// Create an [`AppError::CyclicDependency`] from the active chain
    pub fn cyclic(chain: &[&str]) -> Self {
        Self::CyclicDependency {
            chain: chain.join(" -> "),
        }
    }

    /// Create an [`AppError::MissingRequiredDependency`]
    pub fn missing(component: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingRequiredDependency {
            component: component.into(),
            field: field.into(),
        }
    }

    /// Create an [`AppError::UnknownField`]
    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::UnknownField {
            field: field.into(),
        }
    }
}
