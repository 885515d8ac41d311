use crate::{error::PatchError, game::DATA_DIR};
use std::{
    collections::HashSet,
    fs,
    io::Read,
    path::{Component, Path},
    time::{SystemTime, UNIX_EPOCH},
};
use walkdir::WalkDir;

pub const DEFAULT_NAME: &str = "LLC_zh-CN";
const FONT_EXTENSIONS: [&str; 2] = ["ttf", "otf"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    SevenZ,
}

impl ArchiveKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "zip" => Some(ArchiveKind::Zip),
            "7z" => Some(ArchiveKind::SevenZ),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(ArchiveKind::parse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub path: String,
    pub contents: Vec<u8>,
}

/// A fully materialized set of localization files. Paths are relative to the
/// game root, '/'-separated, and unique.
#[derive(Debug, Clone)]
pub struct ResourceBundle {
    version: String,
    name: String,
    entries: Vec<BundleEntry>,
}

impl ResourceBundle {
    pub fn new(
        version: impl Into<String>,
        name: impl Into<String>,
        entries: Vec<(String, Vec<u8>)>,
    ) -> Result<Self, PatchError> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(PatchError::InvalidBundle("bundle version is empty".into()));
        }
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(entries.len());
        for (raw, contents) in entries {
            let path = normalize_relative(&raw)?;
            if !seen.insert(path.clone()) {
                return Err(PatchError::InvalidBundle(format!("duplicate entry {path}")));
            }
            normalized.push(BundleEntry { path, contents });
        }
        if normalized.is_empty() {
            return Err(PatchError::InvalidBundle("bundle has no files".into()));
        }
        Ok(Self {
            version,
            name: name.into(),
            entries: normalized,
        })
    }

    pub fn from_archive(
        path: &Path,
        kind: ArchiveKind,
        version: &str,
        name: &str,
    ) -> Result<Self, PatchError> {
        match kind {
            ArchiveKind::Zip => Self::new(version, name, read_zip(path)?),
            ArchiveKind::SevenZ => {
                let scratch = scratch_dir(path)?;
                let result = sevenz_rust::decompress_file(path, &scratch)
                    .map_err(|err| PatchError::InvalidBundle(format!("extract {}: {err}", path.display())))
                    .and_then(|()| Self::from_dir(&scratch, version, name));
                let _ = fs::remove_dir_all(&scratch);
                result
            }
        }
    }

    pub fn from_dir(root: &Path, version: &str, name: &str) -> Result<Self, PatchError> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_ignored_path(entry.path()))
        {
            let entry = entry.map_err(|err| {
                PatchError::InvalidBundle(format!("walk {}: {err}", root.display()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| PatchError::InvalidBundle("entry outside bundle root".into()))?;
            let contents = fs::read(entry.path())
                .map_err(|err| PatchError::file_access("read", entry.path(), err))?;
            entries.push((rel.to_string_lossy().to_string(), contents));
        }
        Self::new(version, name, entries)
    }

    /// Replaces the bundle's shipped font with a user-chosen `.ttf`/`.otf`.
    pub fn with_font(mut self, font_path: &Path) -> Result<Self, PatchError> {
        let ext = font_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !FONT_EXTENSIONS.contains(&ext.as_str()) {
            return Err(PatchError::InvalidBundle(format!(
                "font must be .ttf or .otf: {}",
                font_path.display()
            )));
        }
        let file_name = font_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| PatchError::InvalidBundle("font path has no file name".into()))?;
        let contents =
            fs::read(font_path).map_err(|err| PatchError::file_access("read", font_path, err))?;

        let font_dir = self.font_dir();
        let prefix = format!("{font_dir}/");
        self.entries.retain(|entry| !entry.path.starts_with(&prefix));
        self.entries.push(BundleEntry {
            path: format!("{font_dir}/{file_name}"),
            contents,
        });
        Ok(self)
    }

    /// Adds `other`'s files; entries with the same path are replaced.
    pub fn merge(mut self, other: ResourceBundle) -> Self {
        for entry in other.entries {
            match self.entries.iter_mut().find(|existing| existing.path == entry.path) {
                Some(existing) => existing.contents = entry.contents,
                None => self.entries.push(entry),
            }
        }
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.path.clone()).collect()
    }

    pub fn font_dir(&self) -> String {
        let name = if self.name.is_empty() {
            DEFAULT_NAME
        } else {
            &self.name
        };
        format!("{DATA_DIR}/Lang/{name}/Font")
    }
}

/// Normalizes a relative path to '/' separators, rejecting anything that
/// could escape the game root.
pub fn normalize_relative(raw: &str) -> Result<String, PatchError> {
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') || unified.as_bytes().get(1) == Some(&b':') {
        return Err(PatchError::InvalidBundle(format!("absolute path {raw}")));
    }
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(PatchError::InvalidBundle(format!("path escapes root: {raw}"))),
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(PatchError::InvalidBundle(format!("empty path {raw:?}")));
    }
    Ok(parts.join("/"))
}

fn read_zip(path: &Path) -> Result<Vec<(String, Vec<u8>)>, PatchError> {
    let file = fs::File::open(path).map_err(|err| PatchError::file_access("open", path, err))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| PatchError::InvalidBundle(format!("read zip {}: {err}", path.display())))?;

    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|err| PatchError::InvalidBundle(format!("zip entry {i}: {err}")))?;
        if file.is_dir() {
            continue;
        }
        let Some(out_path) = file.enclosed_name() else {
            return Err(PatchError::InvalidBundle(format!(
                "unsafe zip entry {}",
                file.name()
            )));
        };
        if is_ignored_path(&out_path) {
            continue;
        }
        let rel = out_path.to_string_lossy().to_string();
        let mut contents = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut contents)
            .map_err(|err| PatchError::InvalidBundle(format!("extract {rel}: {err}")))?;
        entries.push((rel, contents));
    }
    Ok(entries)
}

fn scratch_dir(archive: &Path) -> Result<std::path::PathBuf, PatchError> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    let dir = parent.join(format!(".extract-{stamp}"));
    fs::create_dir_all(&dir).map_err(|err| PatchError::file_access("create", &dir, err))?;
    Ok(dir)
}

fn is_ignored_path(path: &Path) -> bool {
    path.components().any(|component| {
        let Component::Normal(part) = component else {
            return false;
        };
        let part = part.to_string_lossy();
        part.eq_ignore_ascii_case("__MACOSX")
            || part.eq_ignore_ascii_case(".ds_store")
            || part.eq_ignore_ascii_case("thumbs.db")
            || part == ".git"
            || part == ".svn"
    })
}
