//! Example database
//!
//! Failing choice sequences persist across runs so a broken test fails
//! immediately on the next run instead of re-searching. Storage is a
//! directory tree, content-addressed and safe under concurrent processes:
//!
//! ```text
//! <root>/<hash(test_id)>/<hash(bug_key)>/<hash(entry bytes)>
//! ```
//!
//! Entry files hold the raw choice sequence with no header or version
//! prefix. Writers never take locks: an entry is written to a temp file in
//! the same directory, fsynced, then renamed into place, and names are
//! content hashes so concurrent writers of the same entry converge on the
//! same file. Readers snapshot the directory listing once and silently skip
//! entries that vanish before they are opened. Entry-level I/O errors are
//! swallowed (logged, the entry deleted where possible); only a root that
//! cannot be created at all falls back to an in-memory database, with a
//! single warning.

#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::data::{BugKey, ByteSeq};
use crate::settings::DatabaseConfig;

/// Maximum entries retained per `(test_id, bug_key)`; largest dropped first.
pub const ENTRY_CAP: usize = 16;

/// Directory used by [`DatabaseConfig::Default`].
pub const DEFAULT_DB_DIR: &str = ".conject-db";

/// Identity of one entry set: which test, which bug.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatabaseKey {
    /// Stable test identity.
    pub test_id: String,
    /// Which failing pattern under that test.
    pub bug_key: BugKey,
}

fn short_hash(data: &[u8]) -> String {
    hex::encode(&blake3::hash(data).as_bytes()[..8])
}

/// Persistence interface consumed by the engine.
///
/// Implementations must tolerate concurrent add/delete from other processes;
/// all methods are infallible from the caller's perspective, with I/O
/// problems handled (and logged) internally.
pub trait ExampleDatabase: fmt::Debug {
    /// Persist `value` under `key`. Saving an already-present value is a
    /// no-op.
    fn save(&self, key: &DatabaseKey, value: &[u8]);
    /// Remove `value` under `key`, if present.
    fn delete(&self, key: &DatabaseKey, value: &[u8]);
    /// All entries under `key`, smallest first.
    fn fetch(&self, key: &DatabaseKey) -> Vec<ByteSeq>;
    /// All entries for a test across every bug key, smallest first.
    fn fetch_test(&self, test_id: &str) -> Vec<ByteSeq>;
    /// Remove `value` wherever it appears under the test. Used when a
    /// replayed entry no longer reproduces and its original bug key is
    /// unknown.
    fn delete_for_test(&self, test_id: &str, value: &[u8]);
}

// ============================================================================
// Directory database
// ============================================================================

/// Content-addressed directory-tree database.
#[derive(Debug)]
pub struct DirectoryDatabase {
    root: PathBuf,
}

impl DirectoryDatabase {
    /// Open (creating if needed) a database rooted at `root`. Fails only
    /// when the root cannot be created or probed for writability.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<DirectoryDatabase> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        // Probe writability up front so the fallback decision happens once.
        let probe = root.join(".probe");
        fs::write(&probe, b"")?;
        let _ = fs::remove_file(&probe);
        Ok(DirectoryDatabase { root })
    }

    fn test_dir(&self, test_id: &str) -> PathBuf {
        self.root.join(short_hash(test_id.as_bytes()))
    }

    fn key_dir(&self, key: &DatabaseKey) -> PathBuf {
        self.test_dir(&key.test_id).join(short_hash(key.bug_key.canonical().as_bytes()))
    }

    fn write_entry(dir: &Path, value: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        let name = short_hash(value);
        let target = dir.join(&name);
        if target.exists() {
            return Ok(());
        }
        // Temp name includes the pid so concurrent writers never collide;
        // the final rename is what publishes the entry.
        let tmp = dir.join(format!(".tmp-{}-{}", name, std::process::id()));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(value)?;
        file.sync_all()?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            // A concurrent writer may have published the same content first.
            if !target.exists() {
                return Err(e);
            }
        }
        Ok(())
    }

    fn read_entries(dir: &Path) -> Vec<ByteSeq> {
        let listing = match fs::read_dir(dir) {
            Ok(listing) => listing,
            Err(_) => return Vec::new(),
        };
        let mut entries = Vec::new();
        for dirent in listing.flatten() {
            let path = dirent.path();
            let name = dirent.file_name();
            if name.to_string_lossy().starts_with('.') || path.is_dir() {
                continue;
            }
            match fs::read(&path) {
                Ok(bytes) => entries.push(bytes),
                // Vanished or unreadable between listing and open: a
                // concurrent delete, or corruption worth clearing out.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "dropping unreadable entry");
                    let _ = fs::remove_file(&path);
                }
            }
        }
        entries.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        entries
    }

    fn enforce_cap(dir: &Path) {
        let mut entries = Self::read_entries(dir);
        while entries.len() > ENTRY_CAP {
            if let Some(largest) = entries.pop() {
                let _ = fs::remove_file(dir.join(short_hash(&largest)));
            }
        }
    }
}

impl ExampleDatabase for DirectoryDatabase {
    fn save(&self, key: &DatabaseKey, value: &[u8]) {
        let dir = self.key_dir(key);
        if let Err(e) = Self::write_entry(&dir, value) {
            tracing::debug!(error = %e, "failed to persist example");
            return;
        }
        Self::enforce_cap(&dir);
    }

    fn delete(&self, key: &DatabaseKey, value: &[u8]) {
        let _ = fs::remove_file(self.key_dir(key).join(short_hash(value)));
    }

    fn fetch(&self, key: &DatabaseKey) -> Vec<ByteSeq> {
        Self::read_entries(&self.key_dir(key))
    }

    fn fetch_test(&self, test_id: &str) -> Vec<ByteSeq> {
        let test_dir = self.test_dir(test_id);
        let listing = match fs::read_dir(&test_dir) {
            Ok(listing) => listing,
            Err(_) => return Vec::new(),
        };
        let mut entries = Vec::new();
        for dirent in listing.flatten() {
            if dirent.path().is_dir() {
                entries.extend(Self::read_entries(&dirent.path()));
            }
        }
        entries.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        entries
    }

    fn delete_for_test(&self, test_id: &str, value: &[u8]) {
        let name = short_hash(value);
        let test_dir = self.test_dir(test_id);
        if let Ok(listing) = fs::read_dir(&test_dir) {
            for dirent in listing.flatten() {
                if dirent.path().is_dir() {
                    let _ = fs::remove_file(dirent.path().join(&name));
                }
            }
        }
    }
}

// ============================================================================
// In-memory database
// ============================================================================

type MemKey = (String, String);

/// Process-local database used as the unwritable-directory fallback and for
/// tests. Entries order by shortlex, mirroring the directory layout's
/// smallest-first reads.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    map: Mutex<HashMap<MemKey, BTreeSet<(usize, ByteSeq)>>>,
}

impl InMemoryDatabase {
    /// Fresh empty database.
    pub fn new() -> InMemoryDatabase {
        InMemoryDatabase::default()
    }

    fn mem_key(key: &DatabaseKey) -> MemKey {
        (key.test_id.clone(), key.bug_key.canonical())
    }
}

impl ExampleDatabase for InMemoryDatabase {
    fn save(&self, key: &DatabaseKey, value: &[u8]) {
        let mut map = self.map.lock().expect("database mutex poisoned");
        let set = map.entry(Self::mem_key(key)).or_default();
        set.insert((value.len(), value.to_vec()));
        while set.len() > ENTRY_CAP {
            let largest = set.iter().next_back().cloned();
            if let Some(largest) = largest {
                set.remove(&largest);
            }
        }
    }

    fn delete(&self, key: &DatabaseKey, value: &[u8]) {
        let mut map = self.map.lock().expect("database mutex poisoned");
        if let Some(set) = map.get_mut(&Self::mem_key(key)) {
            set.remove(&(value.len(), value.to_vec()));
        }
    }

    fn fetch(&self, key: &DatabaseKey) -> Vec<ByteSeq> {
        let map = self.map.lock().expect("database mutex poisoned");
        map.get(&Self::mem_key(key))
            .map(|set| set.iter().map(|(_, v)| v.clone()).collect())
            .unwrap_or_default()
    }

    fn fetch_test(&self, test_id: &str) -> Vec<ByteSeq> {
        let map = self.map.lock().expect("database mutex poisoned");
        let mut entries: Vec<ByteSeq> = map
            .iter()
            .filter(|((t, _), _)| t == test_id)
            .flat_map(|(_, set)| set.iter().map(|(_, v)| v.clone()))
            .collect();
        entries.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        entries
    }

    fn delete_for_test(&self, test_id: &str, value: &[u8]) {
        let mut map = self.map.lock().expect("database mutex poisoned");
        for ((t, _), set) in map.iter_mut() {
            if t == test_id {
                set.remove(&(value.len(), value.to_vec()));
            }
        }
    }
}

// ============================================================================
// Selection & fallback
// ============================================================================

/// Open the database selected by `config`. Returns `None` when persistence
/// is disabled; otherwise always returns *something*, degrading to an
/// in-memory database (with one warning) when the directory is unusable.
pub fn open_database(config: &DatabaseConfig) -> Option<Box<dyn ExampleDatabase>> {
    let root = match config {
        DatabaseConfig::Disabled => return None,
        DatabaseConfig::InMemory => return Some(Box::new(InMemoryDatabase::new())),
        DatabaseConfig::Default => PathBuf::from(DEFAULT_DB_DIR),
        DatabaseConfig::Directory(path) => path.clone(),
    };
    match DirectoryDatabase::open(&root) {
        Ok(db) => Some(Box::new(db)),
        Err(e) => {
            tracing::warn!(
                root = %root.display(),
                error = %e,
                "example database directory is not writable; falling back to in-memory \
                 storage (failures will not persist across runs)"
            );
            Some(Box::new(InMemoryDatabase::new()))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(test: &str, bug: &str) -> DatabaseKey {
        DatabaseKey {
            test_id: test.to_string(),
            bug_key: BugKey::new("assert", bug),
        }
    }

    #[test]
    fn directory_round_trip() {
        let dir = tempdir().unwrap();
        let db = DirectoryDatabase::open(dir.path()).unwrap();
        let k = key("t1", "bug.rs:1");
        db.save(&k, &[1, 2, 3]);
        db.save(&k, &[4]);
        assert_eq!(db.fetch(&k), vec![vec![4], vec![1, 2, 3]]);
        db.delete(&k, &[1, 2, 3]);
        assert_eq!(db.fetch(&k), vec![vec![4u8]]);
    }

    #[test]
    fn saving_the_same_entry_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let db = DirectoryDatabase::open(dir.path()).unwrap();
        let k = key("t1", "bug.rs:1");
        db.save(&k, &[9, 9]);
        db.save(&k, &[9, 9]);
        assert_eq!(db.fetch(&k).len(), 1);
    }

    #[test]
    fn fetch_test_spans_bug_keys() {
        let dir = tempdir().unwrap();
        let db = DirectoryDatabase::open(dir.path()).unwrap();
        db.save(&key("t1", "a"), &[1, 1, 1]);
        db.save(&key("t1", "b"), &[2]);
        db.save(&key("t2", "a"), &[3]);
        let got = db.fetch_test("t1");
        assert_eq!(got, vec![vec![2], vec![1, 1, 1]]);
    }

    #[test]
    fn delete_for_test_reaches_all_bug_keys() {
        let dir = tempdir().unwrap();
        let db = DirectoryDatabase::open(dir.path()).unwrap();
        db.save(&key("t1", "a"), &[5, 5]);
        db.save(&key("t1", "b"), &[5, 5]);
        db.delete_for_test("t1", &[5, 5]);
        assert!(db.fetch_test("t1").is_empty());
    }

    #[test]
    fn cap_drops_largest_entries() {
        let dir = tempdir().unwrap();
        let db = DirectoryDatabase::open(dir.path()).unwrap();
        let k = key("t1", "cap");
        for i in 0..(ENTRY_CAP + 4) {
            // Larger index, longer entry.
            db.save(&k, &vec![7u8; i + 1]);
        }
        let got = db.fetch(&k);
        assert_eq!(got.len(), ENTRY_CAP);
        assert!(got.iter().all(|e| e.len() <= ENTRY_CAP));
    }

    #[test]
    fn missing_keys_fetch_empty() {
        let dir = tempdir().unwrap();
        let db = DirectoryDatabase::open(dir.path()).unwrap();
        assert!(db.fetch(&key("absent", "x")).is_empty());
        assert!(db.fetch_test("absent").is_empty());
    }

    #[test]
    fn entries_survive_reopening() {
        let dir = tempdir().unwrap();
        let k = key("persisted", "x");
        {
            let db = DirectoryDatabase::open(dir.path()).unwrap();
            db.save(&k, &[1, 2, 3, 4]);
        }
        let db = DirectoryDatabase::open(dir.path()).unwrap();
        assert_eq!(db.fetch(&k), vec![vec![1, 2, 3, 4]]);
    }

    #[test]
    fn readers_ignore_temp_files() {
        let dir = tempdir().unwrap();
        let db = DirectoryDatabase::open(dir.path()).unwrap();
        let k = key("t1", "tmp");
        db.save(&k, &[8]);
        // Simulate a concurrent writer's in-flight temp file.
        let key_dir = dir
            .path()
            .join(short_hash("t1".as_bytes()))
            .join(short_hash(k.bug_key.canonical().as_bytes()));
        std::fs::write(key_dir.join(".tmp-deadbeef-1"), b"partial").unwrap();
        assert_eq!(db.fetch(&k), vec![vec![8u8]]);
    }

    #[test]
    fn in_memory_matches_directory_semantics() {
        let db = InMemoryDatabase::new();
        let k = key("t1", "a");
        db.save(&k, &[3, 3, 3]);
        db.save(&k, &[1]);
        assert_eq!(db.fetch(&k), vec![vec![1], vec![3, 3, 3]]);
        db.delete(&k, &[1]);
        assert_eq!(db.fetch(&k), vec![vec![3u8, 3, 3]]);
        db.save(&key("t1", "b"), &[2, 2]);
        assert_eq!(db.fetch_test("t1").len(), 2);
        db.delete_for_test("t1", &[3, 3, 3]);
        assert_eq!(db.fetch_test("t1"), vec![vec![2u8, 2]]);
    }

    #[test]
    fn disabled_config_opens_nothing() {
        assert!(open_database(&DatabaseConfig::Disabled).is_none());
        assert!(open_database(&DatabaseConfig::InMemory).is_some());
    }
}
