use crate::{
    backup::BackupStore, config::write_atomic, error::PatchError, game::GameTarget,
    langconfig::ConfigSnapshot,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub const RECORD_SCHEMA: u32 = 1;
const RECORD_FILE: &str = "record.json";
const LOCK_FILE: &str = "state.lock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedMarker {
    pub reason: String,
    pub affected: Vec<String>,
    pub since: String,
}

/// What is currently applied to one game directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub schema: u32,
    pub version: String,
    pub name: String,
    pub target: PathBuf,
    pub files: Vec<String>,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    #[serde(default)]
    pub backups: Vec<String>,
    #[serde(default)]
    pub created_dirs: Vec<String>,
    #[serde(default)]
    pub config: Option<ConfigSnapshot>,
    pub installed_at: String,
    #[serde(default)]
    pub degraded: Option<DegradedMarker>,
}

impl InstallRecord {
    pub fn new(version: &str, name: &str, target: &Path) -> Self {
        Self {
            schema: RECORD_SCHEMA,
            version: version.to_string(),
            name: name.to_string(),
            target: target.to_path_buf(),
            files: Vec::new(),
            checksums: BTreeMap::new(),
            backups: Vec::new(),
            created_dirs: Vec::new(),
            config: None,
            installed_at: now_rfc3339(),
            degraded: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn mark_degraded(&mut self, reason: impl Into<String>, affected: Vec<String>) {
        self.degraded = Some(DegradedMarker {
            reason: reason.into(),
            affected,
            since: now_rfc3339(),
        });
    }
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub record: Option<InstallRecord>,
    pub warning: Option<PatchError>,
}

/// Persisted install state for a single game target. Lives outside the game
/// directory so uninstall leaves that directory untouched.
#[derive(Debug, Clone)]
pub struct InstallStateStore {
    dir: PathBuf,
}

impl InstallStateStore {
    pub fn open(state_root: &Path, target: &GameTarget) -> Self {
        Self {
            dir: state_root.join(target_key(target.root())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub fn backups(&self) -> BackupStore {
        BackupStore::new(self.dir.join("backups"))
    }

    pub fn load(&self) -> LoadOutcome {
        let path = self.record_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return LoadOutcome::default(),
            Err(err) => return corrupt(path, format!("read failed: {err}")),
        };
        let record: InstallRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => return corrupt(path, format!("parse failed: {err}")),
        };
        if record.schema != RECORD_SCHEMA {
            return corrupt(path, format!("unsupported schema {}", record.schema));
        }
        LoadOutcome {
            record: Some(record),
            warning: None,
        }
    }

    pub fn save(&self, record: &InstallRecord) -> Result<(), PatchError> {
        let path = self.record_path();
        let raw = serde_json::to_string_pretty(record)
            .map_err(|err| PatchError::file_access("serialize", &path, io::Error::other(err)))?;
        write_atomic(&path, raw.as_bytes())
            .map_err(|err| PatchError::file_access("save", &path, err))?;
        tracing::debug!(path = %path.display(), version = %record.version, "install record saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), PatchError> {
        let path = self.record_path();
        match fs::remove_file(&path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => {
                Err(PatchError::file_access("remove", &path, err))
            }
            _ => Ok(()),
        }
    }

    /// Takes the per-target lock. A second holder fails immediately.
    pub fn lock(&self) -> Result<StateLock, PatchError> {
        let path = self.lock_path();
        fs::create_dir_all(&self.dir).map_err(|err| PatchError::file_access("create", &self.dir, err))?;

        for attempt in 0..2 {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(StateLock { path });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    let pid = fs::read_to_string(&path)
                        .ok()
                        .and_then(|raw| raw.trim().parse::<u32>().ok());
                    if attempt == 0 && pid.is_some_and(|pid| !process_alive(pid)) {
                        tracing::warn!(lock = %path.display(), pid, "reclaiming stale lock");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    return Err(PatchError::ConcurrentOperation { lock: path, pid });
                }
                Err(err) => return Err(PatchError::file_access("lock", &path, err)),
            }
        }
        Err(PatchError::ConcurrentOperation { lock: path, pid: None })
    }
}

/// Held for the duration of one mutating operation; released on drop.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn corrupt(path: PathBuf, reason: String) -> LoadOutcome {
    tracing::warn!(path = %path.display(), %reason, "ignoring unreadable install record");
    LoadOutcome {
        record: None,
        warning: Some(PatchError::CorruptState { path, reason }),
    }
}

fn target_key(root: &Path) -> String {
    let hash = blake3::hash(root.to_string_lossy().as_bytes());
    hash.to_hex()[..16].to_string()
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    if !proc_root.join("self").exists() {
        return true;
    }
    proc_root.join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::fake_game_dir;

    fn store() -> (tempfile::TempDir, InstallStateStore) {
        let tmp = tempfile::tempdir().unwrap();
        let game = fake_game_dir(tmp.path());
        let target = GameTarget::validate(&game).unwrap();
        let store = InstallStateStore::open(&tmp.path().join("state"), &target);
        (tmp, store)
    }

    #[test]
    fn load_missing_is_none_without_warning() {
        let (_tmp, store) = store();
        let outcome = store.load();
        assert!(outcome.record.is_none());
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn save_load_clear() {
        let (_tmp, store) = store();
        let mut record = InstallRecord::new("1.0", "LLC_zh-CN", Path::new("/games/LimbusCompany"));
        record.files = vec!["fonts/a.ttf".into(), "data/lang.pak".into()];
        store.save(&record).unwrap();

        let loaded = store.load().record.unwrap();
        assert_eq!(loaded, record);
        assert!(!store.dir().join("record.json.tmp").exists());

        store.clear().unwrap();
        assert!(store.load().record.is_none());
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_record_is_a_warning() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.record_path(), "{ not json").unwrap();

        let outcome = store.load();
        assert!(outcome.record.is_none());
        assert!(matches!(outcome.warning, Some(PatchError::CorruptState { .. })));
    }

    #[test]
    fn wrong_schema_is_corrupt() {
        let (_tmp, store) = store();
        let mut record = InstallRecord::new("1.0", "n", Path::new("/g"));
        record.schema = 99;
        store.save(&record).unwrap();
        assert!(store.load().warning.is_some());
    }

    #[test]
    fn second_lock_fails_fast_and_release_allows_retry() {
        let (_tmp, store) = store();
        let held = store.lock().unwrap();
        let err = store.lock().unwrap_err();
        match err {
            PatchError::ConcurrentOperation { pid, .. } => {
                assert_eq!(pid, Some(std::process::id()))
            }
            other => panic!("unexpected {other:?}"),
        }
        drop(held);
        assert!(!store.lock_path().exists());
        let _again = store.lock().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stale_lock_from_dead_process_is_reclaimed() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.lock_path(), u32::MAX.to_string()).unwrap();
        let _lock = store.lock().unwrap();
    }

    #[test]
    fn targets_get_distinct_keys() {
        assert_ne!(
            target_key(Path::new("/games/a")),
            target_key(Path::new("/games/b"))
        );
        assert_eq!(target_key(Path::new("/games/a")).len(), 16);
    }
}
