//! Event-to-action trigger table with TOML persistence.
//!
//! Rules map a decoded event kind to a production action and are unique per
//! `(scope, event kind)`, where a scope names a tournament day, mat, or any
//! other editing context.  Edits happen in memory through [`TriggerTable::upsert`]
//! and reach disk only on an explicit [`TriggerTable::save`], which writes
//! atomically (temp file + rename) so a crash mid-save can never leave a
//! half-written store behind.
//!
//! A failed save keeps the in-memory rows AND the dirty flag, so no user
//! edit is silently lost.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use cast_core::EventKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Error type for trigger persistence.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error accessing trigger store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse trigger store: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize trigger store: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Which production action(s) a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    #[default]
    Scene,
    Overlay,
    Both,
}

/// One configured mapping from an event kind to production actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub kind: EventKind,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_template: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
}

fn default_enabled() -> bool {
    true
}

/// Field-wise partial update; absent fields keep the current value.
#[derive(Debug, Clone, Default)]
pub struct TriggerPatch {
    pub trigger_type: Option<TriggerType>,
    pub scene: Option<String>,
    pub overlay_template: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
}

/// On-disk shape: one rule list per scope.
///
/// `BTreeMap` keeps the file deterministic so diffs of the store stay
/// readable.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TriggerStore {
    #[serde(default)]
    scopes: BTreeMap<String, Vec<TriggerRule>>,
}

/// In-memory trigger table bound to one store file.
#[derive(Debug)]
pub struct TriggerTable {
    path: PathBuf,
    store: TriggerStore,
    dirty: HashSet<String>,
}

impl TriggerTable {
    /// Opens the table, reading existing rows from `path` if present.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let store = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TriggerStore::default(),
            Err(e) => {
                return Err(PersistenceError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            store,
            dirty: HashSet::new(),
        })
    }

    /// All rows for a scope, as stored (no enabled/priority filtering).
    pub fn load(&self, scope: &str) -> Vec<TriggerRule> {
        self.store.scopes.get(scope).cloned().unwrap_or_default()
    }

    /// Enabled rules for `(scope, kind)`, highest priority first.
    ///
    /// Scoped uniqueness normally yields at most one rule, but the ordering
    /// is defined regardless.
    pub fn rules_for(&self, scope: &str, kind: EventKind) -> Vec<TriggerRule> {
        let mut rules: Vec<TriggerRule> = self
            .store
            .scopes
            .get(scope)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.kind == kind && r.enabled)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    /// Merges `patch` into the row for `(scope, kind)`, creating the row with
    /// defaults (`scene` type, enabled, priority 0) when absent.  Marks the
    /// scope dirty.  Applying the same patch twice yields the same row.
    pub fn upsert(&mut self, scope: &str, kind: EventKind, patch: TriggerPatch) {
        let rows = self.store.scopes.entry(scope.to_string()).or_default();
        let idx = match rows.iter().position(|r| r.kind == kind) {
            Some(i) => i,
            None => {
                rows.push(TriggerRule {
                    kind,
                    trigger_type: TriggerType::default(),
                    scene: None,
                    overlay_template: None,
                    enabled: true,
                    priority: 0,
                });
                rows.len() - 1
            }
        };
        let row = &mut rows[idx];

        if let Some(trigger_type) = patch.trigger_type {
            row.trigger_type = trigger_type;
        }
        if let Some(scene) = patch.scene {
            row.scene = Some(scene);
        }
        if let Some(overlay_template) = patch.overlay_template {
            row.overlay_template = Some(overlay_template);
        }
        if let Some(enabled) = patch.enabled {
            row.enabled = enabled;
        }
        if let Some(priority) = patch.priority {
            row.priority = priority;
        }

        self.dirty.insert(scope.to_string());
        debug!(scope, kind = %kind, "trigger rule upserted");
    }

    /// Whether `scope` has unsaved edits.
    pub fn is_dirty(&self, scope: &str) -> bool {
        self.dirty.contains(scope)
    }

    /// Whether any scope has unsaved edits.
    pub fn has_unsaved_edits(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Persists the store atomically and clears the scope's dirty flag.
    ///
    /// A clean scope is a no-op.  On failure the rows and dirty flag are
    /// left untouched.
    pub fn save(&mut self, scope: &str) -> Result<(), PersistenceError> {
        if !self.dirty.contains(scope) {
            return Ok(());
        }
        self.write_store()?;
        self.dirty.remove(scope);
        info!(scope, path = %self.path.display(), "trigger rules saved");
        Ok(())
    }

    /// Persists every dirty scope (shutdown flush).
    pub fn save_all(&mut self) -> Result<(), PersistenceError> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        self.write_store()?;
        self.dirty.clear();
        info!(path = %self.path.display(), "trigger rules flushed");
        Ok(())
    }

    /// Writes the whole store to a temp file and renames it into place.
    /// Rename on the same filesystem is atomic, so readers see either the
    /// old complete file or the new complete file.
    fn write_store(&self) -> Result<(), PersistenceError> {
        let content = toml::to_string_pretty(&self.store)?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|source| PersistenceError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }

        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, content).map_err(|source| PersistenceError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
