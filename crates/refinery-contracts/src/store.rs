use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

/// Durable key-value slot storage shared by the library and the credential
/// override.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// JSON object file; every write re-reads the file and replaces only the
/// touched key so other keys written by another handle survive.
///
/// A missing file reads as empty. An unreadable or corrupt file is an error
/// and is never overwritten. Writes land through a sibling temp file that is
/// renamed over the target.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, apply: impl FnOnce(&mut Map<String, Value>)) -> anyhow::Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let mut on_disk = read_json_object(&self.path)?;
        apply(&mut on_disk);
        write_json_object(&self.path, &on_disk)
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(read_json_object(&self.path)?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.update(|payload| {
            payload.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.update(|payload| {
            payload.remove(key);
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    payload: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let payload = self
            .payload
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(payload.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut payload = self
            .payload
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        payload.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut payload = self
            .payload
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        payload.remove(key);
        Ok(())
    }
}

fn read_json_object(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()))
        }
    };
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match parsed {
        Value::Object(payload) => Ok(payload),
        _ => bail!("{} does not hold a JSON object", path.display()),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed creating {}", parent.display()))?;
    let encoded = serde_json::to_string_pretty(payload)?;
    let mut staged = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed staging write in {}", parent.display()))?;
    staged
        .write_all(encoded.as_bytes())
        .with_context(|| format!("failed writing {}", staged.path().display()))?;
    staged
        .persist(path)
        .with_context(|| format!("failed replacing {}", path.display()))?;
    Ok(())
}
