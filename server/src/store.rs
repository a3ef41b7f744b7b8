//! Embedded document store: the database registry and its databases.
//!
//! # Design
//! `Server` maps names to `Arc<Database>` behind one `RwLock`; each
//! `Database` keeps its documents behind its own `Mutex`, which is the
//! serialization point for conflicting writes. A write holds that lock from
//! the revision check through persistence, so two writers sharing a base
//! revision cannot both succeed. Deleting a database takes the same lock, so
//! no write persists after its file is removed.
//!
//! A server opened on a directory keeps one `<name>.touchdb` JSON file per
//! database and rewrites it (temp file + rename) on every mutation. An
//! in-memory server skips persistence entirely.
//!
//! # Revisions
//! History is linear: only the latest revision of a document is kept. Ids
//! look like `3-<32 hex>`, where the leading number is the generation.
//! - Creating a never-seen id requires no base revision.
//! - Updating a live document requires the current revision as base.
//! - A tombstone can be recreated with no base or with the tombstone's
//!   revision; the new generation continues from the tombstone.
//! - Deleting takes an optional base; when given it must be current.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use touchdb_core::{user_properties, Properties};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::scheme;

const FILE_EXTENSION: &str = "touchdb";

/// One revision of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    pub rev: String,
    #[serde(default)]
    pub deleted: bool,
    /// Database sequence number at which this revision was written.
    pub seq: u64,
    /// User properties only; metadata lives in the fields above.
    pub properties: Properties,
}

impl Revision {
    /// Leading number of the revision id (`3` for `3-abc…`).
    pub fn generation(&self) -> u64 {
        generation_of(&self.rev)
    }

    /// The document as served: `_id`, `_rev`, `_deleted` when set, then the
    /// user properties.
    pub fn to_document(&self) -> Properties {
        let mut doc = Properties::new();
        doc.insert("_id".to_string(), Value::String(self.id.clone()));
        doc.insert("_rev".to_string(), Value::String(self.rev.clone()));
        if self.deleted {
            doc.insert("_deleted".to_string(), Value::Bool(true));
        }
        doc.extend(self.properties.clone());
        doc
    }
}

/// Summary returned by `GET /<db>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub db_name: String,
    pub doc_count: usize,
    pub update_seq: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabaseState {
    update_seq: u64,
    docs: BTreeMap<String, Revision>,
}

/// One named database.
#[derive(Debug)]
pub struct Database {
    name: String,
    file: Option<PathBuf>,
    state: Mutex<DatabaseState>,
    deleted: AtomicBool,
}

impl Database {
    fn new(name: &str, file: Option<PathBuf>, state: DatabaseState) -> Self {
        Self {
            name: name.to_string(),
            file,
            state: Mutex::new(state),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> Result<DatabaseInfo, StoreError> {
        let state = self.lock()?;
        Ok(DatabaseInfo {
            db_name: self.name.clone(),
            doc_count: state.docs.values().filter(|r| !r.deleted).count(),
            update_seq: state.update_seq,
        })
    }

    pub fn doc_count(&self) -> Result<usize, StoreError> {
        self.info().map(|info| info.doc_count)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.docs.is_empty())
    }

    /// Current revision of a live document.
    pub fn get(&self, doc_id: &str) -> Result<Revision, StoreError> {
        let state = self.lock()?;
        match state.docs.get(doc_id) {
            None => Err(StoreError::Missing(doc_id.to_string())),
            Some(rev) if rev.deleted => Err(StoreError::DocumentDeleted(doc_id.to_string())),
            Some(rev) => Ok(rev.clone()),
        }
    }

    /// Creates or updates a document. A `None` id generates a fresh UUID.
    ///
    /// Reserved `_` keys in `properties` are dropped; identity comes from
    /// `doc_id` and `base_rev` only.
    pub fn put(
        &self,
        doc_id: Option<&str>,
        properties: &Properties,
        base_rev: Option<&str>,
    ) -> Result<Revision, StoreError> {
        let mut state = self.lock()?;
        let id = doc_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let generation = match (state.docs.get(&id), base_rev) {
            (None, None) => 0,
            (None, Some(_)) => return Err(StoreError::Conflict(id)),
            (Some(current), None) if current.deleted => current.generation(),
            (Some(current), Some(base)) if base == current.rev => current.generation(),
            (Some(_), _) => return Err(StoreError::Conflict(id)),
        };

        let revision = Revision {
            rev: new_rev_id(generation + 1),
            id,
            deleted: false,
            seq: state.update_seq + 1,
            properties: user_properties(properties),
        };
        self.commit(&mut state, revision)
    }

    /// Replaces the current revision with a tombstone.
    pub fn delete(&self, doc_id: &str, base_rev: Option<&str>) -> Result<Revision, StoreError> {
        let mut state = self.lock()?;
        let current = match state.docs.get(doc_id) {
            None => return Err(StoreError::Missing(doc_id.to_string())),
            Some(rev) if rev.deleted => return Err(StoreError::DocumentDeleted(doc_id.to_string())),
            Some(rev) => rev,
        };
        if base_rev.is_some_and(|base| base != current.rev) {
            return Err(StoreError::Conflict(doc_id.to_string()));
        }

        let tombstone = Revision {
            id: doc_id.to_string(),
            rev: new_rev_id(current.generation() + 1),
            deleted: true,
            seq: state.update_seq + 1,
            properties: Properties::new(),
        };
        self.commit(&mut state, tombstone)
    }

    /// Live documents ordered by id.
    pub fn all_docs(&self) -> Result<Vec<Revision>, StoreError> {
        let state = self.lock()?;
        Ok(state.docs.values().filter(|r| !r.deleted).cloned().collect())
    }

    /// Latest revision of every document changed after `since`, by sequence.
    pub fn changes_since(&self, since: u64) -> Result<Vec<Revision>, StoreError> {
        let state = self.lock()?;
        let mut changes: Vec<Revision> = state
            .docs
            .values()
            .filter(|r| r.seq > since)
            .cloned()
            .collect();
        changes.sort_by_key(|r| r.seq);
        Ok(changes)
    }

    /// The state lock, refused once the database has been deleted. The flag
    /// is checked after acquiring so a waiter cannot outlive a delete.
    fn lock(&self) -> Result<MutexGuard<'_, DatabaseState>, StoreError> {
        let state = self.lock_state()?;
        if self.deleted.load(Ordering::Acquire) {
            return Err(StoreError::Deleted(self.name.clone()));
        }
        Ok(state)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, DatabaseState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Poisoned(self.name.clone()))
    }

    fn commit(
        &self,
        state: &mut DatabaseState,
        revision: Revision,
    ) -> Result<Revision, StoreError> {
        let previous = state.docs.insert(revision.id.clone(), revision.clone());
        state.update_seq = revision.seq;

        if let Err(e) = self.persist(state) {
            match previous {
                Some(prev) => state.docs.insert(prev.id.clone(), prev),
                None => state.docs.remove(&revision.id),
            };
            state.update_seq -= 1;
            return Err(e);
        }

        debug!(
            db = %self.name,
            doc = %revision.id,
            rev = %revision.rev,
            deleted = revision.deleted,
            "revision stored"
        );
        Ok(revision)
    }

    fn persist(&self, state: &DatabaseState) -> Result<(), StoreError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(state).map_err(|e| StoreError::Corrupt {
            path: file.display().to_string(),
            reason: e.to_string(),
        })?;
        let tmp = file.with_extension(format!("{FILE_EXTENSION}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, file)?;
        Ok(())
    }
}

/// Registry of databases for one server instance.
#[derive(Debug)]
pub struct Server {
    dir: Option<PathBuf>,
    databases: RwLock<HashMap<String, Arc<Database>>>,
}

impl Server {
    /// Opens (creating if needed) a server directory and loads every
    /// database file in it. Also registers the `touchdb` URL scheme.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut databases = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(file_stem_to_name) else {
                continue;
            };
            let state = load_state(&path)?;
            databases.insert(name.clone(), Arc::new(Database::new(&name, Some(path), state)));
        }

        scheme::register(touchdb_core::SCHEME);
        info!(dir = %dir.display(), databases = databases.len(), "server opened");
        Ok(Self {
            dir: Some(dir),
            databases: RwLock::new(databases),
        })
    }

    /// A server with no backing directory.
    pub fn in_memory() -> Self {
        scheme::register(touchdb_core::SCHEME);
        Self {
            dir: None,
            databases: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Existing database, if any.
    pub fn database(&self, name: &str) -> Result<Option<Arc<Database>>, StoreError> {
        let databases = self.databases.read().map_err(|_| poisoned())?;
        Ok(databases.get(name).cloned())
    }

    pub fn create_database(&self, name: &str) -> Result<Arc<Database>, StoreError> {
        let mut databases = self.databases.write().map_err(|_| poisoned())?;
        if databases.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        self.insert_new(&mut databases, name)
    }

    /// Removes the database and its file.
    pub fn delete_database(&self, name: &str) -> Result<(), StoreError> {
        let mut databases = self.databases.write().map_err(|_| poisoned())?;
        Self::remove(&mut databases, name)
    }

    /// Deletes any database called `name`, then creates it fresh.
    pub fn ensure_empty_database(&self, name: &str) -> Result<Arc<Database>, StoreError> {
        let mut databases = self.databases.write().map_err(|_| poisoned())?;
        match Self::remove(&mut databases, name) {
            Ok(()) | Err(StoreError::NoSuchDatabase(_)) => {}
            Err(e) => return Err(e),
        }
        self.insert_new(&mut databases, name)
    }

    /// Sorted database names.
    pub fn all_database_names(&self) -> Result<Vec<String>, StoreError> {
        let databases = self.databases.read().map_err(|_| poisoned())?;
        let mut names: Vec<String> = databases.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn insert_new(
        &self,
        databases: &mut HashMap<String, Arc<Database>>,
        name: &str,
    ) -> Result<Arc<Database>, StoreError> {
        if !is_valid_database_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        let file = self
            .dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{FILE_EXTENSION}", name_to_file_stem(name))));
        let db = Arc::new(Database::new(name, file, DatabaseState::default()));
        db.persist(&DatabaseState::default())?;
        databases.insert(name.to_string(), Arc::clone(&db));
        info!(db = %name, "database created");
        Ok(db)
    }

    fn remove(
        databases: &mut HashMap<String, Arc<Database>>,
        name: &str,
    ) -> Result<(), StoreError> {
        let db = databases
            .remove(name)
            .ok_or_else(|| StoreError::NoSuchDatabase(name.to_string()))?;
        // Held until the file is gone: no in-flight write may persist after.
        let _state = db.lock_state()?;
        db.deleted.store(true, Ordering::Release);
        if let Some(file) = &db.file {
            match fs::remove_file(file) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(db = %name, "database deleted");
        Ok(())
    }
}

/// `^[a-z][a-z0-9_$()+/-]*$`
pub fn is_valid_database_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_$()+-/".contains(c))
}

fn name_to_file_stem(name: &str) -> String {
    name.replace('/', ":")
}

fn file_stem_to_name(stem: &str) -> String {
    stem.replace(':', "/")
}

fn load_state(path: &Path) -> Result<DatabaseState, StoreError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn new_rev_id(generation: u64) -> String {
    format!("{generation}-{}", Uuid::new_v4().simple())
}

fn generation_of(rev: &str) -> u64 {
    rev.split_once('-')
        .and_then(|(generation, _)| generation.parse().ok())
        .unwrap_or(0)
}

fn poisoned() -> StoreError {
    StoreError::Poisoned("database registry".to_string())
}
