//! Read-modify-write of the game's `Lang/config.json`, which selects the
//! active localization folder.

use crate::{config::write_atomic, error::PatchError, game::GameTarget};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

pub const LANG_KEY: &str = "lang";

/// Everything needed to put the config file back the way it was.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub existed: bool,
    #[serde(default)]
    pub original: Option<String>,
    #[serde(default)]
    pub previous: BTreeMap<String, Option<Value>>,
    #[serde(default)]
    pub created_dirs: Vec<PathBuf>,
}

pub struct ConfigToggler {
    path: PathBuf,
}

impl ConfigToggler {
    pub fn for_target(target: &GameTarget) -> Self {
        Self::at(target.lang_dir().join("config.json"))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Result<Map<String, Value>, PatchError> {
        Ok(self.read()?.map(|(_, map)| map).unwrap_or_default())
    }

    /// Sets every desired key and returns what they were before.
    pub fn apply(&self, desired: &BTreeMap<String, Value>) -> Result<ConfigSnapshot, PatchError> {
        let existing = self.read()?;
        let existed = existing.is_some();
        let (original, mut map) = match existing {
            Some((raw, map)) => (Some(raw), map),
            None => (None, Map::new()),
        };

        let mut previous = BTreeMap::new();
        let mut changed = !existed;
        for (key, value) in desired {
            let old = map.get(key).cloned();
            if old.as_ref() != Some(value) {
                changed = true;
            }
            previous.insert(key.clone(), old);
            map.insert(key.clone(), value.clone());
        }

        let mut created_dirs = Vec::new();
        if changed {
            created_dirs = missing_parents(&self.path);
            self.write_map(&map)?;
            tracing::info!(path = %self.path.display(), keys = ?desired.keys().collect::<Vec<_>>(), "game config updated");
        }

        Ok(ConfigSnapshot {
            existed,
            original,
            previous,
            created_dirs,
        })
    }

    pub fn restore(&self, snapshot: &ConfigSnapshot) -> Result<(), PatchError> {
        let current = self.read()?;
        let Some((raw, map)) = current else {
            if let (true, Some(original)) = (snapshot.existed, snapshot.original.as_ref()) {
                write_atomic(&self.path, original.as_bytes())
                    .map_err(|err| PatchError::file_access("restore", &self.path, err))?;
            }
            prune_dirs(&snapshot.created_dirs);
            return Ok(());
        };

        let mut map = map;
        for (key, previous) in &snapshot.previous {
            match previous {
                Some(value) => {
                    map.insert(key.clone(), value.clone());
                }
                None => {
                    map = map.into_iter().filter(|(k, _)| k != key).collect();
                }
            }
        }

        let original_map = snapshot.original.as_deref().and_then(|raw| parse_object(raw).ok());
        match (snapshot.original.as_ref(), original_map) {
            (Some(original), Some(original_map)) if original_map == map => {
                if &raw != original {
                    write_atomic(&self.path, original.as_bytes())
                        .map_err(|err| PatchError::file_access("restore", &self.path, err))?;
                }
            }
            _ if !snapshot.existed && map.is_empty() => {
                fs::remove_file(&self.path)
                    .or_else(ignore_not_found)
                    .map_err(|err| PatchError::file_access("remove", &self.path, err))?;
                prune_dirs(&snapshot.created_dirs);
            }
            _ => self.write_map(&map)?,
        }
        tracing::info!(path = %self.path.display(), "game config restored");
        Ok(())
    }

    fn read(&self) -> Result<Option<(String, Map<String, Value>)>, PatchError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PatchError::file_access("read", &self.path, err)),
        };
        let map = parse_object(&raw)
            .map_err(|reason| PatchError::Config(format!("{}: {reason}", self.path.display())))?;
        Ok(Some((raw, map)))
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<(), PatchError> {
        let raw = serde_json::to_string_pretty(map)
            .map_err(|err| PatchError::Config(err.to_string()))?;
        write_atomic(&self.path, raw.as_bytes())
            .map_err(|err| PatchError::file_access("write", &self.path, err))
    }
}

pub(crate) fn parse_object(raw: &str) -> Result<Map<String, Value>, String> {
    let trimmed = raw.trim_start_matches('\u{feff}');
    if trimmed.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

fn missing_parents(path: &Path) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || dir.exists() {
            break;
        }
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }
    missing
}

/// Removes directories deepest-first, leaving any that still hold files.
fn prune_dirs(dirs: &[PathBuf]) {
    for dir in dirs {
        let _ = fs::remove_dir(dir);
    }
}

fn ignore_not_found(err: io::Error) -> io::Result<()> {
    if err.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(err)
    }
}

pub fn lang_setting(value: &str) -> BTreeMap<String, Value> {
    BTreeMap::from([(LANG_KEY.to_string(), Value::String(value.to_string()))])
}
