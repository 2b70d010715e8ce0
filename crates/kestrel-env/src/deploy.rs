//! Deployment environment detection.
//!
//! Answers "which tier are we running in" (dev/test/fat/prod) and "which
//! unit/cluster" before any configuration file has been read, because the
//! answers decide which profile files load at all.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::source::command_line_property;

/// CLI/OS key declaring the deployment tier.
pub const DEPLOY_ENV_KEY: &str = "env";
/// CLI/OS key declaring the deployment unit.
pub const DEPLOY_SET_KEY: &str = "set";

/// Property keys the detected deployment is published under.
pub const DEPLOY_ENV_PROPERTY: &str = "kestrel.deploy.env";
/// See [`DEPLOY_ENV_PROPERTY`].
pub const DEPLOY_SET_PROPERTY: &str = "kestrel.deploy.set";

/// Deployment tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeployEnv {
    /// Local development (the default).
    #[default]
    Dev,
    /// Test tier.
    Test,
    /// Feature acceptance tier.
    Fat,
    /// Production tier.
    Prod,
}

impl DeployEnv {
    /// Canonical lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Fat => "fat",
            Self::Prod => "prod",
        }
    }
}

impl fmt::Display for DeployEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "fat" => Ok(Self::Fat),
            "prod" => Ok(Self::Prod),
            other => Err(format!("unknown deployment environment '{other}'")),
        }
    }
}

/// Detected deployment: tier, unit and any extra deploy-scoped properties.
#[derive(Debug, Clone, Default)]
pub struct DeployInfo {
    /// Deployment tier.
    pub env: DeployEnv,
    /// Deployment unit (cluster/replica set). Empty when undeclared.
    pub set: String,
    /// Extra properties a detector wants published alongside the deploy keys.
    pub properties: HashMap<String, String>,
}

impl DeployInfo {
    /// Whether this is a local development deployment.
    pub fn is_dev(&self) -> bool {
        self.env == DeployEnv::Dev
    }

    /// The properties this deployment publishes into the environment,
    /// deploy keys included.
    pub fn published_properties(&self) -> HashMap<String, String> {
        let mut props = self.properties.clone();
        props.insert(DEPLOY_ENV_PROPERTY.to_string(), self.env.to_string());
        props.insert(DEPLOY_SET_PROPERTY.to_string(), self.set.clone());
        props
    }
}

/// A strategy for recognizing the deployment this process runs in.
///
/// Returning `None` passes the decision to the next detector.
pub trait DeployDetector: Send + Sync {
    /// Detector name, for logging.
    fn name(&self) -> &str;

    /// Try to detect the deployment from the given argv.
    fn detect(&self, args: &[String]) -> Option<DeployInfo>;
}

/// Default detector: `--env=` / `--set=` CLI tokens first, then the `env` /
/// `set` OS variables. An unparsable tier falls back to [`DeployEnv::Dev`].
#[derive(Debug, Default)]
pub struct DefaultDetector;

impl DefaultDetector {
    fn value(args: &[String], key: &str) -> Option<String> {
        command_line_property(args, key)
            .or_else(|| std::env::var(key).ok())
            .filter(|v| !v.is_empty())
    }
}

impl DeployDetector for DefaultDetector {
    fn name(&self) -> &str {
        "default"
    }

    fn detect(&self, args: &[String]) -> Option<DeployInfo> {
        let env_value = Self::value(args, DEPLOY_ENV_KEY);
        let set = Self::value(args, DEPLOY_SET_KEY).unwrap_or_default();
        let env = match env_value.as_deref() {
            Some(text) => match text.parse() {
                Ok(env) => env,
                Err(reason) => {
                    debug!(%reason, "declared deployment tier not recognized; assuming dev");
                    DeployEnv::Dev
                }
            },
            None => DeployEnv::Dev,
        };
        Some(DeployInfo {
            env,
            set,
            properties: HashMap::new(),
        })
    }
}

/// Run detectors in order; the first non-`None` answer wins. With no answer
/// at all the deployment is plain [`DeployEnv::Dev`].
pub fn detect_deploy(detectors: &[Arc<dyn DeployDetector>], args: &[String]) -> DeployInfo {
    for detector in detectors {
        if let Some(info) = detector.detect(args) {
            debug!(detector = detector.name(), env = %info.env, set = %info.set, "deployment detected");
            return info;
        }
    }
    DeployInfo::default()
}
