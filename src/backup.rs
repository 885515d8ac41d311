use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// Copies of game files the patch replaced, plus per-update stashes of the
/// previously installed patch files.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StashMeta {
    pub timestamp: u64,
    pub version: String,
    pub reason: Option<String>,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn originals_dir(&self) -> PathBuf {
        self.root.join("originals")
    }

    pub fn has_original(&self, rel: &str) -> bool {
        self.originals_dir().join(rel).is_file()
    }

    pub fn save_original(&self, game_root: &Path, rel: &str) -> io::Result<()> {
        copy_file(&game_root.join(rel), &self.originals_dir().join(rel))
    }

    /// Puts the original back in place. The backup copy is kept until
    /// `drop_original` so an aborted update can still rely on it.
    pub fn restore_original(&self, game_root: &Path, rel: &str) -> io::Result<()> {
        copy_file(&self.originals_dir().join(rel), &game_root.join(rel))
    }

    pub fn drop_original(&self, rel: &str) {
        let _ = fs::remove_file(self.originals_dir().join(rel));
    }

    pub fn open_stash(&self, version: &str, reason: Option<&str>) -> io::Result<Stash> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let stash_root = self.root.join("stash");
        let mut dir = stash_root.join(format!("stash-{stamp}"));
        let mut suffix = 1;
        while dir.exists() {
            dir = stash_root.join(format!("stash-{stamp}-{suffix}"));
            suffix += 1;
        }
        fs::create_dir_all(dir.join("files"))?;

        let meta = StashMeta {
            timestamp: stamp,
            version: version.to_string(),
            reason: reason.map(|value| value.to_string()),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(dir.join("meta.json"), meta_json)?;

        Ok(Stash {
            dir,
            entries: Vec::new(),
        })
    }

    /// Removes every saved original. Returns whether there were any.
    pub fn discard_originals(&self) -> io::Result<bool> {
        match fs::remove_dir_all(self.originals_dir()) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn discard_all(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// Cached copy of the files of the currently installed version, taken before
/// an update touches them.
#[derive(Debug)]
pub struct Stash {
    dir: PathBuf,
    entries: Vec<String>,
}

impl Stash {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn store(&mut self, game_root: &Path, rel: &str) -> io::Result<()> {
        copy_file(&game_root.join(rel), &self.dir.join("files").join(rel))?;
        self.entries.push(rel.to_string());
        Ok(())
    }

    pub fn restore(&self, game_root: &Path, rel: &str) -> io::Result<()> {
        copy_file(&self.dir.join("files").join(rel), &game_root.join(rel))
    }

    pub fn discard(self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn copy_file(source: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, dest).map(|_| ())
}
