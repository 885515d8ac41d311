use crate::error::PatchError;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const GAME_NAME: &str = "Limbus Company";
pub const GAME_EXECUTABLE: &str = "LimbusCompany.exe";
pub const DATA_DIR: &str = "LimbusCompany_Data";
const STEAM_FOLDER: &str = "Limbus Company";

/// A game installation root that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameTarget {
    root: PathBuf,
    valid: bool,
}

impl GameTarget {
    pub fn validate(path: &Path) -> Result<Self, PatchError> {
        let root = absolutize(path);
        if !root.is_dir() {
            return Err(PatchError::InvalidTarget {
                path: root,
                reason: "directory does not exist".to_string(),
            });
        }
        if !looks_like_game_root(&root) {
            return Err(PatchError::InvalidTarget {
                path: root,
                reason: format!("expected {GAME_EXECUTABLE} in the directory"),
            });
        }
        Ok(Self { root, valid: true })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Re-checks the markers; the directory may have changed since selection.
    pub fn is_valid(&self) -> bool {
        self.valid && looks_like_game_root(&self.root)
    }

    pub fn lang_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR).join("Lang")
    }
}

pub fn locate(hint: Option<&Path>) -> Result<GameTarget, PatchError> {
    if let Some(path) = hint {
        return GameTarget::validate(path);
    }

    let candidates = default_candidates();
    for candidate in &candidates {
        if looks_like_game_root(candidate) {
            tracing::debug!(path = %candidate.display(), "found game in default location");
            return GameTarget::validate(candidate);
        }
    }

    Err(PatchError::InvalidTarget {
        path: candidates.first().cloned().unwrap_or_default(),
        reason: format!(
            "{GAME_NAME} not found in {} default location(s); pass the game directory explicitly",
            candidates.len()
        ),
    })
}

pub fn looks_like_game_root(path: &Path) -> bool {
    path.join(GAME_EXECUTABLE).is_file()
}

fn default_candidates() -> Vec<PathBuf> {
    let mut roots = vec![PathBuf::from(r"C:\Program Files (x86)\Steam")];
    if let Some(home) = dirs_home() {
        roots.push(home.join(".local/share/Steam"));
        roots.push(home.join(".steam/steam"));
        roots.push(home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam"));
    }
    steam_game_candidates(&roots)
}

fn steam_game_candidates(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut libraries = Vec::new();
    for base in roots {
        let vdf = base.join("steamapps/libraryfolders.vdf");
        if vdf.exists() {
            match parse_steam_library_paths(&vdf) {
                Ok(paths) => libraries.extend(paths),
                Err(err) => {
                    tracing::debug!(path = %vdf.display(), error = %err, "skip unreadable library list")
                }
            }
        }
        libraries.push(base.clone());
    }

    let mut candidates = Vec::new();
    for lib in libraries {
        let candidate = lib.join("steamapps").join("common").join(STEAM_FOLDER);
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

fn parse_steam_library_paths(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let raw = fs::read_to_string(path)?;
    Ok(parse_library_folders(&raw))
}

fn parse_library_folders(raw: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if !line.contains("\"path\"") {
            continue;
        }

        let parts: Vec<&str> = line.split('"').collect();
        if parts.len() >= 4 {
            let path = parts[3].replace("\\\\", "\\");
            paths.push(PathBuf::from(path));
        }
    }
    paths
}

fn absolutize(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|base| base.home_dir().to_path_buf())
}

#[cfg(test)]
pub(crate) fn fake_game_dir(root: &Path) -> PathBuf {
    let game = root.join("LimbusCompany");
    fs::create_dir_all(game.join(DATA_DIR)).unwrap();
    fs::write(game.join(GAME_EXECUTABLE), b"MZ").unwrap();
    game
}
