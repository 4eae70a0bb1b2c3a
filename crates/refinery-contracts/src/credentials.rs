use std::env;
use std::sync::{Arc, OnceLock};

use serde_json::Value;

use crate::store::Store;

pub const CREDENTIAL_STORE_KEY: &str = "refinery.api_key_override";

const ENV_KEYS: [&str; 3] = ["GEMINI_API_KEY", "API_KEY", "GOOGLE_API_KEY"];

static ENV_DEFAULT: OnceLock<Option<String>> = OnceLock::new();

/// Environment-provided default key, read once per process.
pub fn environment_default() -> Option<String> {
    ENV_DEFAULT
        .get_or_init(|| ENV_KEYS.iter().find_map(|key| non_empty_env(key)))
        .clone()
}

/// Two-tier key lookup: a user-entered override from the store, then the
/// environment default. Nothing is cached; the override slot is read on every
/// call.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn Store>,
    env_default: Option<String>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            env_default: environment_default(),
        }
    }

    pub fn with_env_default(store: Arc<dyn Store>, env_default: Option<String>) -> Self {
        Self { store, env_default }
    }

    pub fn resolve(&self) -> Option<String> {
        self.override_key()
            .or_else(|| non_blank(self.env_default.as_deref()))
    }

    pub fn override_key(&self) -> Option<String> {
        let value = self.store.get(CREDENTIAL_STORE_KEY).ok().flatten()?;
        non_blank(value.as_str())
    }

    pub fn set_override(&self, key: &str) -> anyhow::Result<()> {
        self.store
            .set(CREDENTIAL_STORE_KEY, Value::String(key.trim().to_string()))
    }

    pub fn clear_override(&self) -> anyhow::Result<()> {
        self.store.remove(CREDENTIAL_STORE_KEY)
    }
}

/// Show only the last four characters of a key.
pub fn mask_key(key: &str) -> String {
    let count = key.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = key.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
