use std::env;
#[cfg(feature = "toml-config")]
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::runtime::jit::jit_executable::DEFAULT_MAX_SPECIALIZATIONS;
use crate::runtime::jit::request::KeyPolicy;
use crate::runtime::jit::specialization::SpecializationMode;

pub const WORKERS_ENV: &str = "KERNJIT_WORKERS";
pub const KEY_POLICY_ENV: &str = "KERNJIT_KEY_POLICY";
pub const SPECIALIZATION_ENV: &str = "KERNJIT_SPECIALIZATION";
pub const MAX_SPECIALIZATIONS_ENV: &str = "KERNJIT_MAX_SPECIALIZATIONS";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// Compilation worker threads.
    pub worker_threads: usize,
    pub key_policy: KeyPolicy,
    pub specialization: SpecializationMode,
    /// Upper bound on specialized executables per compiled handle.
    pub max_specializations: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            key_policy: KeyPolicy::default(),
            specialization: SpecializationMode::default(),
            max_specializations: DEFAULT_MAX_SPECIALIZATIONS,
        }
    }
}

impl JitConfig {
    /// Defaults overridden by `KERNJIT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(workers) = parse_var::<usize, _>(&lookup, WORKERS_ENV) {
            config.worker_threads = workers.max(1);
        }
        if let Some(policy) = parse_var(&lookup, KEY_POLICY_ENV) {
            config.key_policy = policy;
        }
        if let Some(mode) = parse_var(&lookup, SPECIALIZATION_ENV) {
            config.specialization = mode;
        }
        if let Some(max) = parse_var(&lookup, MAX_SPECIALIZATIONS_ENV) {
            config.max_specializations = max;
        }
        config
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(source)?;
        config.worker_threads = config.worker_threads.max(1);
        Ok(config)
    }

    #[cfg(feature = "toml-config")]
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&source)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(variable = name, value = %raw, error = %err, "ignoring invalid setting");
            None
        }
    }
}
