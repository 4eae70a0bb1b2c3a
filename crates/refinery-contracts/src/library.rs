use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domains::Domain;
use crate::error::{RefineryError, RefineryResult};
use crate::events::{emit_quiet, EventKind, EventWriter};
use crate::store::Store;

pub const LIBRARY_STORE_KEY: &str = "refinery.library";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedTemplate {
    pub id: String,
    pub title: String,
    pub category: String,
    pub content: String,
    pub domain: Domain,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub received: usize,
    pub added: usize,
    pub total: usize,
}

/// Saved templates, newest first.
///
/// The in-memory collection is the source of truth for the session. Every
/// mutation builds the next collection, writes it to the store, and only then
/// swaps it in, all under one lock, so memory and storage never diverge.
pub struct Library {
    store: Arc<dyn Store>,
    entries: Mutex<Vec<SavedTemplate>>,
    events: Option<EventWriter>,
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("entries", &self.entries)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl Library {
    /// Load the persisted collection. Entries that no longer parse are
    /// skipped and repeated ids keep their first occurrence.
    pub fn open(store: Arc<dyn Store>) -> RefineryResult<Self> {
        let raw = store
            .get(LIBRARY_STORE_KEY)
            .map_err(|err| RefineryError::storage(format!("{err:#}")))?;
        let loaded: Vec<SavedTemplate> = raw
            .as_ref()
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| serde_json::from_value::<SavedTemplate>(row.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        let entries = merge_first_seen(&[], &loaded);
        Ok(Self {
            store,
            entries: Mutex::new(entries),
            events: None,
        })
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn list(&self) -> RefineryResult<Vec<SavedTemplate>> {
        Ok(self.lock()?.clone())
    }

    pub fn get(&self, id: &str) -> RefineryResult<Option<SavedTemplate>> {
        Ok(self.lock()?.iter().find(|entry| entry.id == id).cloned())
    }

    pub fn save(
        &self,
        content: &str,
        title: &str,
        category: &str,
        domain: Domain,
    ) -> RefineryResult<SavedTemplate> {
        let entry = SavedTemplate {
            id: Uuid::now_v7().to_string(),
            title: title.to_string(),
            category: category.to_string(),
            content: content.to_string(),
            domain,
            created_at: Utc::now().trunc_subsecs(3),
        };

        let mut entries = self.lock()?;
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.push(entry.clone());
        next.extend(entries.iter().cloned());
        self.persist(&next)?;
        *entries = next;
        drop(entries);

        emit_quiet(
            self.events.as_ref(),
            EventKind::LibrarySaved,
            json!({
                "id": entry.id,
                "title": entry.title,
                "domain": entry.domain,
            }),
        );
        Ok(entry)
    }

    /// Remove the entry with `id`. Returns whether anything was removed.
    pub fn delete(&self, id: &str) -> RefineryResult<bool> {
        let mut entries = self.lock()?;
        if !entries.iter().any(|entry| entry.id == id) {
            return Ok(false);
        }
        let next: Vec<SavedTemplate> = entries
            .iter()
            .filter(|entry| entry.id != id)
            .cloned()
            .collect();
        self.persist(&next)?;
        *entries = next;
        drop(entries);

        emit_quiet(
            self.events.as_ref(),
            EventKind::LibraryDeleted,
            json!({ "id": id }),
        );
        Ok(true)
    }

    /// Merge an external document into the library. External entries come
    /// first; the first occurrence of each id wins.
    pub fn import(&self, raw: &str) -> RefineryResult<ImportSummary> {
        let external = match parse_collection(raw) {
            Ok(rows) => rows,
            Err(err) => {
                emit_quiet(
                    self.events.as_ref(),
                    EventKind::LibraryImportFailed,
                    json!({ "error": err.to_string() }),
                );
                return Err(err);
            }
        };

        let mut entries = self.lock()?;
        let known: HashSet<&str> = entries.iter().map(|entry| entry.id.as_str()).collect();
        let added = external
            .iter()
            .map(|entry| entry.id.as_str())
            .filter(|id| !known.contains(id))
            .collect::<HashSet<&str>>()
            .len();
        let next = merge_first_seen(&external, &entries);
        self.persist(&next)?;
        let summary = ImportSummary {
            received: external.len(),
            added,
            total: next.len(),
        };
        *entries = next;
        drop(entries);

        emit_quiet(
            self.events.as_ref(),
            EventKind::LibraryImported,
            json!({
                "received": summary.received,
                "added": summary.added,
                "total": summary.total,
            }),
        );
        Ok(summary)
    }

    pub fn import_from_file(&self, path: &Path) -> RefineryResult<ImportSummary> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            RefineryError::import(format!("failed reading {}: {err}", path.display()))
        })?;
        self.import(&raw)
    }

    /// Pretty-printed JSON array of the whole collection.
    pub fn export(&self) -> RefineryResult<String> {
        let entries = self.lock()?;
        serde_json::to_string_pretty(&*entries)
            .map_err(|err| RefineryError::storage(format!("export serialization failed: {err}")))
    }

    pub fn export_to_file(&self, path: &Path) -> RefineryResult<()> {
        let document = self.export()?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                RefineryError::storage(format!("failed creating {}: {err}", parent.display()))
            })?;
        }
        std::fs::write(path, document).map_err(|err| {
            RefineryError::storage(format!("failed writing {}: {err}", path.display()))
        })
    }

    fn persist(&self, entries: &[SavedTemplate]) -> RefineryResult<()> {
        let value = serde_json::to_value(entries)
            .map_err(|err| RefineryError::storage(format!("library serialization failed: {err}")))?;
        self.store
            .set(LIBRARY_STORE_KEY, value)
            .map_err(|err| RefineryError::storage(format!("{err:#}")))
    }

    fn lock(&self) -> RefineryResult<MutexGuard<'_, Vec<SavedTemplate>>> {
        self.entries
            .lock()
            .map_err(|_| RefineryError::storage("library lock poisoned"))
    }
}

pub fn suggested_export_file_name(date: NaiveDate) -> String {
    format!("refinery-library-{}.json", date.format("%Y-%m-%d"))
}

fn parse_collection(raw: &str) -> RefineryResult<Vec<SavedTemplate>> {
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|err| RefineryError::import(format!("document is not valid JSON: {err}")))?;
    let Value::Array(rows) = parsed else {
        return Err(RefineryError::import("expected a JSON array of templates"));
    };
    rows.into_iter()
        .enumerate()
        .map(|(idx, row)| {
            serde_json::from_value::<SavedTemplate>(row)
                .map_err(|err| RefineryError::import(format!("entry {idx} is malformed: {err}")))
        })
        .collect()
}

fn merge_first_seen(external: &[SavedTemplate], local: &[SavedTemplate]) -> Vec<SavedTemplate> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged = Vec::with_capacity(external.len() + local.len());
    for entry in external.iter().chain(local.iter()) {
        if seen.insert(entry.id.as_str()) {
            merged.push(entry.clone());
        }
    }
    merged
}
