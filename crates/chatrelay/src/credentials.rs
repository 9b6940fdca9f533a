//! Provider credentials and configuration status.
//!
//! Credentials are read from an [`EnvSource`] so callers can substitute a
//! fixture map for the process environment. Missing credentials are a
//! reportable state, never an error.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::llm::Provider;

/// A source of named environment values.
pub trait EnvSource: Send + Sync {
    /// Value of `name`, or `None` when unset.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Point-in-time snapshot of each provider's credential.
#[derive(Clone, Default)]
pub struct Credentials {
    openai: Option<String>,
    anthropic: Option<String>,
    google: Option<String>,
}

impl Credentials {
    /// Read every provider's designated credential. Empty values count as unset.
    pub fn current(env: &(impl EnvSource + ?Sized)) -> Self {
        let read = |provider: Provider| env.var(provider.api_key_env()).filter(|v| !v.is_empty());
        Self {
            openai: read(Provider::OpenAI),
            anthropic: read(Provider::Anthropic),
            google: read(Provider::Google),
        }
    }

    pub fn get(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAI => self.openai.as_deref(),
            Provider::Anthropic => self.anthropic.as_deref(),
            Provider::Google => self.google.as_deref(),
        }
    }

    pub fn is_set(&self, provider: Provider) -> bool {
        self.get(provider).is_some()
    }

    /// Which credentials are missing, in provider declaration order.
    pub fn status(&self) -> ConfigStatus {
        let errors: Vec<String> = Provider::ALL
            .into_iter()
            .filter(|p| !self.is_set(*p))
            .map(|p| format!("{} not set", p.api_key_env()))
            .collect();
        ConfigStatus {
            valid: errors.is_empty(),
            errors,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = |p: Provider| if self.is_set(p) { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("openai", &state(Provider::OpenAI))
            .field("anthropic", &state(Provider::Anthropic))
            .field("google", &state(Provider::Google))
            .finish()
    }
}

/// Which required credentials are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigStatus {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Recompute the configuration status from `env`.
pub fn check_config(env: &(impl EnvSource + ?Sized)) -> ConfigStatus {
    Credentials::current(env).status()
}
