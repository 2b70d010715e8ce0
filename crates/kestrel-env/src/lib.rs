//! Layered property resolution.
//!
//! An [`Environment`] stacks ordered [`PropertySource`]s (command line, OS
//! environment, detected deployment, discovered application files, anything
//! the caller supplies), resolves `${key[:default]}` placeholders across the
//! whole stack, derives active profiles, and pushes key changes from live
//! sources to subscribed handlers and [`Bindable`] configuration structs.
//!
//! ```no_run
//! use kestrel_env::Environment;
//!
//! # fn main() -> kestrel_env::EnvResult<()> {
//! let env = Environment::builder()
//!     .args(["prog".to_string(), "--server.port=8080".to_string()])
//!     .build()?;
//! assert_eq!(env.get("server.port").as_deref(), Some("8080"));
//! # Ok(())
//! # }
//! ```

pub mod bind;
pub mod deploy;
pub mod environment;
pub mod error;
pub mod profile;
pub mod resolver;
pub mod source;
pub mod sources;

pub use bind::{BindField, BindKind, BindValue, Bindable};
pub use deploy::{DeployDetector, DeployEnv, DeployInfo};
pub use environment::{Environment, EnvironmentBuilder};
pub use error::{EnvError, EnvResult};
pub use resolver::PlaceholderResolver;
pub use source::{
    ChangeKind, CommandLineSource, DynamicMapSource, KeyChangeEvent, MapSource, PropertySource,
    SharedSource, SystemEnvSource,
};
pub use sources::PropertySources;
