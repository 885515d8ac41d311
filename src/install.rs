use crate::{
    backup::{BackupStore, Stash},
    bundle::{BundleEntry, ResourceBundle, DEFAULT_NAME},
    error::PatchError,
    game::GameTarget,
    langconfig::{lang_setting, parse_object, ConfigSnapshot, ConfigToggler, LANG_KEY},
    progress::{OperationStatus, Phase},
    state::{InstallRecord, InstallStateStore, LoadOutcome},
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Reinstall even when the recorded version matches.
    pub force: bool,
    /// Value for the game's `lang` setting; defaults to the bundle name.
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Absent,
    Installed { version: String },
    Degraded { version: String, affected: Vec<String> },
}

impl InstallState {
    pub fn of(record: Option<&InstallRecord>) -> Self {
        match record {
            None => InstallState::Absent,
            Some(record) => match &record.degraded {
                Some(marker) => InstallState::Degraded {
                    version: record.version.clone(),
                    affected: marker.affected.clone(),
                },
                None => InstallState::Installed {
                    version: record.version.clone(),
                },
            },
        }
    }

    pub fn label(&self) -> String {
        match self {
            InstallState::Absent => "not installed".to_string(),
            InstallState::Installed { version } => format!("installed {version}"),
            InstallState::Degraded { version, .. } => format!("degraded {version} (repair needed)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed {
        version: String,
        previous: Option<String>,
    },
    UpToDate {
        version: String,
    },
}

#[derive(Debug)]
pub struct InstallReport {
    pub outcome: InstallOutcome,
    pub written: usize,
    pub removed: usize,
    pub backed_up: usize,
    pub warnings: Vec<PatchError>,
}

#[derive(Debug)]
pub struct UninstallReport {
    /// `None` when nothing was installed.
    pub version: Option<String>,
    pub removed: usize,
    pub missing: Vec<String>,
    pub warnings: Vec<PatchError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    pub missing: Vec<String>,
    pub modified: Vec<String>,
}

impl Verification {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.modified.is_empty()
    }
}

#[derive(Debug)]
pub struct StatusReport {
    pub state: InstallState,
    pub record: Option<InstallRecord>,
    pub verification: Option<Verification>,
    pub warnings: Vec<PatchError>,
}

/// Everything one install touched, so it can be undone.
#[derive(Debug, Default)]
struct Journal {
    written_new: Vec<String>,
    backed_up: Vec<String>,
    created_dirs: Vec<PathBuf>,
    removed: Vec<String>,
    restored_originals: Vec<String>,
    config: Option<ConfigSnapshot>,
}

/// A bundle split into the files to place and the settings for the game
/// config file, which the toggler owns even when the bundle ships a copy.
#[derive(Debug)]
struct Plan<'a> {
    files: Vec<&'a BundleEntry>,
    settings: BTreeMap<String, Value>,
    checksums: BTreeMap<String, String>,
}

impl Plan<'_> {
    fn paths(&self) -> Vec<String> {
        self.files.iter().map(|entry| entry.path.clone()).collect()
    }
}

/// Moves one game directory between "not installed" and "installed version
/// X". Every mutating call holds the state lock for its whole duration.
pub struct InstallationManager {
    target: GameTarget,
    store: InstallStateStore,
    backups: BackupStore,
    toggler: ConfigToggler,
}

impl InstallationManager {
    pub fn new(target: GameTarget, state_root: &Path) -> Self {
        let store = InstallStateStore::open(state_root, &target);
        let backups = store.backups();
        let toggler = ConfigToggler::for_target(&target);
        Self {
            target,
            store,
            backups,
            toggler,
        }
    }

    pub fn target(&self) -> &GameTarget {
        &self.target
    }

    pub fn store(&self) -> &InstallStateStore {
        &self.store
    }

    pub fn state(&self) -> InstallState {
        InstallState::of(self.store.load().record.as_ref())
    }

    pub fn status(&self) -> StatusReport {
        let LoadOutcome { record, warning } = self.store.load();
        let verification = record.as_ref().map(|record| self.verify(record));
        StatusReport {
            state: InstallState::of(record.as_ref()),
            record,
            verification,
            warnings: warning.into_iter().collect(),
        }
    }

    /// Best-effort check that the recorded files are still on disk unchanged.
    pub fn verify(&self, record: &InstallRecord) -> Verification {
        let mut verification = Verification::default();
        for rel in &record.files {
            let path = self.target.root().join(rel);
            match fs::read(&path) {
                Ok(contents) => {
                    if let Some(expected) = record.checksums.get(rel) {
                        if &sha256_hex(&contents) != expected {
                            verification.modified.push(rel.clone());
                        }
                    }
                }
                Err(_) => verification.missing.push(rel.clone()),
            }
        }
        verification
    }

    pub fn install(
        &self,
        bundle: &ResourceBundle,
        options: &InstallOptions,
        status: &OperationStatus,
    ) -> Result<InstallReport, PatchError> {
        self.ensure_target()?;
        let plan = self.plan(bundle, options)?;
        let _lock = self.store.lock()?;
        let LoadOutcome { record, warning } = self.store.load();
        let warnings: Vec<PatchError> = warning.into_iter().collect();

        if let Some(old) = &record {
            let same_version = !old.is_degraded() && old.version == bundle.version();
            if same_version && old.checksums != plan.checksums {
                tracing::info!(version = %old.version, "bundle contents changed, reinstalling");
            } else if same_version && !options.force {
                tracing::info!(version = %old.version, "already up to date");
                status.set_phase(Phase::Done);
                return Ok(InstallReport {
                    outcome: InstallOutcome::UpToDate {
                        version: old.version.clone(),
                    },
                    written: 0,
                    removed: 0,
                    backed_up: 0,
                    warnings,
                });
            }
        }

        tracing::info!(
            game = %self.target.root().display(),
            from = record.as_ref().map(|r| r.version.as_str()).unwrap_or("none"),
            to = %bundle.version(),
            files = bundle.entries().len(),
            force = options.force,
            "installing localization bundle"
        );

        let mut report = self.apply(bundle, &plan, record.as_ref(), status)?;
        report.warnings = warnings;
        status.set_phase(Phase::Done);
        Ok(report)
    }

    pub fn uninstall(&self, status: &OperationStatus) -> Result<UninstallReport, PatchError> {
        let _lock = self.store.lock()?;
        let LoadOutcome { record, warning } = self.store.load();
        let warnings: Vec<PatchError> = warning.into_iter().collect();
        let Some(mut record) = record else {
            tracing::info!("nothing installed, uninstall is a no-op");
            status.set_phase(Phase::Done);
            return Ok(UninstallReport {
                version: None,
                removed: 0,
                missing: Vec::new(),
                warnings,
            });
        };

        tracing::info!(version = %record.version, files = record.files.len(), "uninstalling");
        status.start_files(Phase::Uninstalling, record.files.len());
        let root = self.target.root().to_path_buf();
        let mut removed = 0;
        let mut missing = Vec::new();

        for index in 0..record.files.len() {
            let rel = record.files[index].clone();
            let path = root.join(&rel);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => missing.push(rel.clone()),
                Err(err) => {
                    let remaining = record.files[index..].to_vec();
                    tracing::error!(path = %path.display(), error = %err, remaining = remaining.len(), "uninstall stopped");
                    record.files = remaining.clone();
                    record.mark_degraded(format!("uninstall stopped at {rel}"), remaining.clone());
                    self.store.save(&record)?;
                    return Err(PatchError::FileAccess {
                        path,
                        action: "remove",
                        source: err,
                        remaining,
                        rolled_back: false,
                    });
                }
            }
            status.file_done(&rel);
        }
        record.files.clear();

        let mut pending_originals = Vec::new();
        let mut first_error = None;
        for rel in &record.backups {
            if let Err(err) = self.backups.restore_original(&root, rel) {
                tracing::error!(path = %rel, error = %err, "failed to restore original game file");
                pending_originals.push(rel.clone());
                first_error.get_or_insert((root.join(rel), err));
            }
        }
        if let Some((path, err)) = first_error {
            record.backups = pending_originals.clone();
            record.mark_degraded("original game files not restored", pending_originals.clone());
            self.store.save(&record)?;
            return Err(PatchError::FileAccess {
                path,
                action: "restore",
                source: err,
                remaining: pending_originals,
                rolled_back: false,
            });
        }

        if let Some(snapshot) = &record.config {
            if let Err(err) = self.toggler.restore(snapshot) {
                record.backups.clear();
                record.mark_degraded("game config not restored", Vec::new());
                self.store.save(&record)?;
                return Err(err);
            }
        }

        prune_created_dirs(&root, &record.created_dirs);
        if let Err(err) = self.backups.discard_all() {
            tracing::warn!(path = %self.backups.root().display(), error = %err, "failed to remove backups");
        }
        self.store.clear()?;
        status.set_phase(Phase::Done);
        tracing::info!(version = %record.version, removed, missing = missing.len(), "uninstall complete");

        Ok(UninstallReport {
            version: Some(record.version),
            removed,
            missing,
            warnings,
        })
    }

    fn ensure_target(&self) -> Result<(), PatchError> {
        if self.target.is_valid() {
            return Ok(());
        }
        Err(PatchError::InvalidTarget {
            path: self.target.root().to_path_buf(),
            reason: "game directory no longer looks valid".to_string(),
        })
    }

    fn plan<'a>(
        &self,
        bundle: &'a ResourceBundle,
        options: &InstallOptions,
    ) -> Result<Plan<'a>, PatchError> {
        let config_rel = self
            .toggler
            .path()
            .strip_prefix(self.target.root())
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        let mut files = Vec::with_capacity(bundle.entries().len());
        let mut settings = BTreeMap::new();
        for entry in bundle.entries() {
            if entry.path != config_rel {
                files.push(entry);
                continue;
            }
            let raw = String::from_utf8_lossy(&entry.contents);
            let shipped = parse_object(&raw).map_err(|reason| {
                PatchError::InvalidBundle(format!("{}: {reason}", entry.path))
            })?;
            tracing::debug!(keys = shipped.len(), "bundle ships the game config, merging its keys");
            settings.extend(shipped);
        }

        match &options.language {
            Some(language) => settings.extend(lang_setting(language)),
            None => {
                settings
                    .entry(LANG_KEY.to_string())
                    .or_insert_with(|| Value::String(default_language(bundle)));
            }
        }

        let checksums = files
            .iter()
            .map(|entry| (entry.path.clone(), sha256_hex(&entry.contents)))
            .collect();
        Ok(Plan {
            files,
            settings,
            checksums,
        })
    }

    /// Shared transition for fresh installs, updates, and forced repairs.
    /// `old` files are stashed first; on failure the previous state is
    /// re-applied from that stash.
    fn apply(
        &self,
        bundle: &ResourceBundle,
        plan: &Plan<'_>,
        old: Option<&InstallRecord>,
        status: &OperationStatus,
    ) -> Result<InstallReport, PatchError> {
        let root = self.target.root();
        let old_paths: HashSet<&str> = old
            .map(|record| record.files.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let new_paths: HashSet<String> = plan.paths().into_iter().collect();

        // Without a record nothing in the originals area is trustworthy; the
        // files on disk now are what uninstall must come back to.
        if old.is_none() {
            match self.backups.discard_originals() {
                Ok(true) => tracing::warn!(
                    path = %self.backups.root().display(),
                    "dropped originals left over from an unrecorded install"
                ),
                Ok(false) => {}
                Err(err) => {
                    return Err(PatchError::file_access("clear", self.backups.root(), err))
                }
            }
        }

        let mut stash = None;
        if let Some(old) = old {
            stash = Some(self.stash_files(old, bundle.version())?);
        }

        let mut journal = Journal::default();
        status.start_files(Phase::Installing, plan.files.len());
        for entry in plan.files.iter().copied() {
            if status.is_cancelled() {
                tracing::warn!(written = journal.written_new.len(), "install cancelled");
                return Err(self.abort(
                    bundle,
                    old,
                    journal,
                    stash,
                    PatchError::Cancelled { rolled_back: false },
                    status,
                ));
            }
            let result = self.write_entry(&entry.path, &entry.contents, &old_paths, &mut journal);
            if let Err(err) = result {
                tracing::error!(path = %entry.path, error = %err, "write failed");
                return Err(self.abort(bundle, old, journal, stash, err, status));
            }
            status.file_done(&entry.path);
        }

        let mut kept_backups: Vec<String> = Vec::new();
        if let Some(old) = old {
            for rel in &old.files {
                if new_paths.contains(rel) {
                    continue;
                }
                let path = root.join(rel);
                match fs::remove_file(&path) {
                    Ok(()) => journal.removed.push(rel.clone()),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => {
                        let err = PatchError::file_access("remove", path, err);
                        return Err(self.abort(bundle, Some(old), journal, stash, err, status));
                    }
                }
                if old.backups.contains(rel) {
                    if let Err(err) = self.backups.restore_original(root, rel) {
                        let err = PatchError::file_access("restore", root.join(rel), err);
                        return Err(self.abort(bundle, Some(old), journal, stash, err, status));
                    }
                    journal.restored_originals.push(rel.clone());
                }
            }
            prune_created_dirs(root, &old.created_dirs);
            kept_backups = old
                .backups
                .iter()
                .filter(|rel| !journal.restored_originals.contains(rel))
                .cloned()
                .collect();
        }

        let snapshot = match self.toggler.apply(&plan.settings) {
            Ok(snapshot) => snapshot,
            Err(err) => return Err(self.abort(bundle, old, journal, stash, err, status)),
        };
        journal.config = Some(snapshot.clone());
        let config = match old.and_then(|record| record.config.clone()) {
            Some(original) => original,
            None => snapshot,
        };

        let mut record = InstallRecord::new(bundle.version(), bundle.name(), root);
        record.files = plan.paths();
        record.checksums = plan.checksums.clone();
        record.backups = kept_backups;
        for rel in &journal.backed_up {
            if !record.backups.contains(rel) {
                record.backups.push(rel.clone());
            }
        }
        record.created_dirs = merge_created_dirs(root, old, &journal.created_dirs);
        record.config = Some(config);

        if let Err(err) = self.store.save(&record) {
            return Err(self.abort(bundle, old, journal, stash, err, status));
        }

        for rel in &journal.restored_originals {
            self.backups.drop_original(rel);
        }
        if let Some(stash) = stash {
            stash.discard();
        }

        tracing::info!(
            version = %record.version,
            written = plan.files.len(),
            removed = journal.removed.len(),
            backed_up = journal.backed_up.len(),
            "install complete"
        );

        Ok(InstallReport {
            outcome: InstallOutcome::Installed {
                version: record.version.clone(),
                previous: old.map(|record| record.version.clone()),
            },
            written: plan.files.len(),
            removed: journal.removed.len(),
            backed_up: journal.backed_up.len(),
            warnings: Vec::new(),
        })
    }

    fn stash_files(&self, old: &InstallRecord, next: &str) -> Result<Stash, PatchError> {
        let root = self.target.root();
        let reason = format!("update {} -> {next}", old.version);
        let mut stash = self
            .backups
            .open_stash(&old.version, Some(&reason))
            .map_err(|err| PatchError::file_access("create", self.backups.root(), err))?;
        for rel in &old.files {
            let path = root.join(rel);
            if !path.is_file() {
                continue;
            }
            if let Err(err) = stash.store(root, rel) {
                stash.discard();
                return Err(PatchError::file_access("stash", path, err));
            }
        }
        tracing::debug!(stash = %stash.dir().display(), files = stash.entries().len(), "stashed installed files");
        Ok(stash)
    }

    fn write_entry(
        &self,
        rel: &str,
        contents: &[u8],
        old_paths: &HashSet<&str>,
        journal: &mut Journal,
    ) -> Result<(), PatchError> {
        let root = self.target.root();
        let dest = root.join(rel);
        let is_new = !old_paths.contains(rel);

        if is_new && dest.is_file() && !self.backups.has_original(rel) {
            self.backups
                .save_original(root, rel)
                .map_err(|err| PatchError::file_access("back up", &dest, err))?;
            journal.backed_up.push(rel.to_string());
        }

        let created = create_parents(&dest).map_err(|err| {
            PatchError::file_access("create directory for", &dest, err)
        })?;
        journal.created_dirs.extend(created);

        write_file(&dest, contents).map_err(|err| PatchError::file_access("write", &dest, err))?;
        if is_new {
            journal.written_new.push(rel.to_string());
        }
        Ok(())
    }

    /// Undoes a failed transition. Returns the original error marked as rolled
    /// back, or a `PartialUpdate` after saving a degraded record when the
    /// previous state could not be fully restored.
    fn abort(
        &self,
        bundle: &ResourceBundle,
        old: Option<&InstallRecord>,
        journal: Journal,
        stash: Option<Stash>,
        err: PatchError,
        status: &OperationStatus,
    ) -> PatchError {
        status.set_phase(Phase::RollingBack);
        let root = self.target.root();
        let mut failed = Vec::new();

        if let Some(snapshot) = &journal.config {
            if let Err(restore_err) = self.toggler.restore(snapshot) {
                tracing::error!(error = %restore_err, "failed to roll back game config");
                failed.push(self.toggler.path().to_string_lossy().to_string());
            }
        }

        for rel in journal.written_new.iter().rev() {
            match fs::remove_file(root.join(rel)) {
                Err(remove_err) if remove_err.kind() != io::ErrorKind::NotFound => {
                    tracing::error!(path = %rel, error = %remove_err, "rollback could not remove file");
                    failed.push(rel.clone());
                }
                _ => {}
            }
        }
        for rel in &journal.backed_up {
            match self.backups.restore_original(root, rel) {
                Ok(()) => self.backups.drop_original(rel),
                Err(restore_err) => {
                    tracing::error!(path = %rel, error = %restore_err, "rollback could not restore original");
                    failed.push(rel.clone());
                }
            }
        }
        if let Some(stash) = &stash {
            for rel in stash.entries() {
                if let Err(restore_err) = stash.restore(root, rel) {
                    tracing::error!(path = %rel, error = %restore_err, "rollback could not restore stashed file");
                    failed.push(rel.clone());
                }
            }
        }
        let mut created = journal.created_dirs.clone();
        created.reverse();
        for dir in created {
            let _ = fs::remove_dir(dir);
        }

        if failed.is_empty() {
            if let Some(stash) = stash {
                stash.discard();
            }
            tracing::info!(version = %bundle.version(), "rolled back");
            return err.rolled_back();
        }

        let mut degraded = match old {
            Some(old) => old.clone(),
            None => InstallRecord::new(bundle.version(), bundle.name(), root),
        };
        for rel in &journal.written_new {
            if !degraded.files.contains(rel) {
                degraded.files.push(rel.clone());
            }
        }
        for rel in &journal.backed_up {
            if !degraded.backups.contains(rel) {
                degraded.backups.push(rel.clone());
            }
        }
        if degraded.config.is_none() {
            degraded.config = journal.config.clone();
        }
        degraded.created_dirs = merge_created_dirs(root, old, &journal.created_dirs);
        degraded.mark_degraded(err.to_string(), failed.clone());
        if let Err(save_err) = self.store.save(&degraded) {
            tracing::error!(error = %save_err, "could not persist degraded marker");
        }
        if let Some(stash) = &stash {
            tracing::warn!(stash = %stash.dir().display(), "previous files kept for manual repair");
        }
        PatchError::PartialUpdate {
            version: bundle.version().to_string(),
            affected: failed,
        }
    }
}

fn default_language(bundle: &ResourceBundle) -> String {
    if bundle.name().is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        bundle.name().to_string()
    }
}

/// Creates missing parent directories of `path`, returning those created,
/// shallowest first.
fn create_parents(path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || dir.exists() {
            break;
        }
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }
    missing.reverse();
    for dir in &missing {
        fs::create_dir(dir).or_else(|err| {
            if err.kind() == io::ErrorKind::AlreadyExists {
                Ok(())
            } else {
                Err(err)
            }
        })?;
    }
    Ok(missing)
}

/// Overwrites via a sibling temp file so the destination is never briefly
/// absent or half-written.
fn write_file(dest: &Path, contents: &[u8]) -> io::Result<()> {
    let mut temp_name = dest.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".llc-part");
    let temp = dest.with_file_name(temp_name);
    fs::write(&temp, contents)?;
    if let Err(err) = fs::rename(&temp, dest) {
        let _ = fs::remove_file(&temp);
        return Err(err);
    }
    Ok(())
}

fn merge_created_dirs(root: &Path, old: Option<&InstallRecord>, created: &[PathBuf]) -> Vec<String> {
    let mut dirs: Vec<String> = old
        .map(|record| record.created_dirs.clone())
        .unwrap_or_default();
    for dir in created {
        let Ok(rel) = dir.strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if !dirs.contains(&rel) {
            dirs.push(rel);
        }
    }
    dirs.retain(|rel| root.join(rel).is_dir());
    dirs
}

/// Removes recorded directories deepest-first if they are empty.
fn prune_created_dirs(root: &Path, dirs: &[String]) {
    let mut ordered: Vec<&String> = dirs.iter().collect();
    ordered.sort_by_key(|rel| std::cmp::Reverse(rel.matches('/').count()));
    for rel in ordered {
        let _ = fs::remove_dir(root.join(rel));
    }
}

fn sha256_hex(contents: &[u8]) -> String {
    format!("{:x}", Sha256::digest(contents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::fake_game_dir;
    use std::collections::BTreeMap;
    use walkdir::WalkDir;

    struct Fixture {
        _tmp: tempfile::TempDir,
        game: PathBuf,
        manager: InstallationManager,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let game = fake_game_dir(tmp.path());
        let target = GameTarget::validate(&game).unwrap();
        let manager = InstallationManager::new(target, &tmp.path().join("state"));
        Fixture {
            game: manager.target().root().to_path_buf(),
            _tmp: tmp,
            manager,
        }
    }

    fn bundle(version: &str, files: &[(&str, &str)]) -> ResourceBundle {
        ResourceBundle::new(
            version,
            "LLC_zh-CN",
            files
                .iter()
                .map(|(path, data)| (path.to_string(), data.as_bytes().to_vec()))
                .collect(),
        )
        .unwrap()
    }

    fn snapshot_tree(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .map(|entry| entry.unwrap())
            .map(|entry| {
                let rel = entry
                    .path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/");
                let contents = entry
                    .file_type()
                    .is_file()
                    .then(|| fs::read(entry.path()).unwrap());
                (rel, contents)
            })
            .collect()
    }

    fn install(fx: &Fixture, bundle: &ResourceBundle) -> Result<InstallReport, PatchError> {
        fx.manager
            .install(bundle, &InstallOptions::default(), &OperationStatus::new())
    }

    #[test]
    fn install_records_files_then_uninstall_removes_them() {
        let fx = fixture();
        let v1 = bundle("1.0", &[("fonts/a.ttf", "font"), ("data/lang.pak", "pak")]);

        let report = install(&fx, &v1).unwrap();
        assert_eq!(
            report.outcome,
            InstallOutcome::Installed {
                version: "1.0".into(),
                previous: None
            }
        );
        let record = fx.manager.store().load().record.unwrap();
        assert_eq!(record.version, "1.0");
        assert_eq!(record.files, vec!["fonts/a.ttf", "data/lang.pak"]);
        assert!(fx.game.join("fonts/a.ttf").is_file());
        assert!(fx.game.join("data/lang.pak").is_file());

        let report = fx.manager.uninstall(&OperationStatus::new()).unwrap();
        assert_eq!(report.version.as_deref(), Some("1.0"));
        assert_eq!(report.removed, 2);
        assert!(fx.manager.store().load().record.is_none());
        assert!(!fx.game.join("fonts/a.ttf").exists());
        assert!(!fx.game.join("data/lang.pak").exists());
    }

    #[test]
    fn install_uninstall_round_trip_is_byte_identical() {
        let fx = fixture();
        let lang = fx.game.join("LimbusCompany_Data/Lang");
        fs::create_dir_all(&lang).unwrap();
        fs::write(lang.join("config.json"), "{\"lang\": \"en\", \"other\": true}").unwrap();
        fs::write(fx.game.join("LimbusCompany_Data/shipped.ttf"), "original font").unwrap();
        let before = snapshot_tree(&fx.game);

        let b = bundle(
            "1.0",
            &[
                ("LimbusCompany_Data/Lang/LLC_zh-CN/Font/font.ttf", "font"),
                ("LimbusCompany_Data/Lang/LLC_zh-CN/Story/1.json", "{}"),
                ("LimbusCompany_Data/shipped.ttf", "patched font"),
            ],
        );
        install(&fx, &b).unwrap();
        let config = ConfigToggler::for_target(fx.manager.target()).current().unwrap();
        assert_eq!(config["lang"], "LLC_zh-CN");
        assert_eq!(
            fs::read_to_string(fx.game.join("LimbusCompany_Data/shipped.ttf")).unwrap(),
            "patched font"
        );

        fx.manager.uninstall(&OperationStatus::new()).unwrap();
        assert_eq!(snapshot_tree(&fx.game), before);
        assert!(!fx.manager.store().backups().root().exists());
    }

    #[test]
    fn round_trip_without_existing_config_removes_created_files() {
        let fx = fixture();
        let before = snapshot_tree(&fx.game);
        install(&fx, &bundle("1.0", &[("a/b/c.txt", "c")])).unwrap();
        assert!(fx.game.join("LimbusCompany_Data/Lang/config.json").is_file());
        fx.manager.uninstall(&OperationStatus::new()).unwrap();
        assert_eq!(snapshot_tree(&fx.game), before);
    }

    #[test]
    fn update_sequence_leaves_exactly_latest_files() {
        let fx = fixture();
        let v1 = bundle("1.0", &[("shared.txt", "v1"), ("only_v1/a.txt", "a")]);
        let v2 = bundle("2.0", &[("shared.txt", "v2"), ("only_v2/b.txt", "b")]);

        install(&fx, &v1).unwrap();
        let after_v1 = snapshot_tree(&fx.game);

        let report = install(&fx, &v2).unwrap();
        assert_eq!(report.removed, 1);
        assert!(!fx.game.join("only_v1").exists());
        assert_eq!(fs::read_to_string(fx.game.join("shared.txt")).unwrap(), "v2");

        install(&fx, &v1).unwrap();
        assert_eq!(snapshot_tree(&fx.game), after_v1);
        assert!(!fx.game.join("only_v2").exists());
        assert_eq!(fx.manager.state(), InstallState::Installed { version: "1.0".into() });
    }

    #[test]
    fn uninstall_when_absent_is_noop() {
        let fx = fixture();
        let report = fx.manager.uninstall(&OperationStatus::new()).unwrap();
        assert!(report.version.is_none());
        assert_eq!(fx.manager.state(), InstallState::Absent);
    }

    #[test]
    fn failed_write_rolls_back_fresh_install() {
        let fx = fixture();
        let before = snapshot_tree(&fx.game);
        // A directory where the third file should go makes that write fail.
        fs::create_dir_all(fx.game.join("data/c.txt/blocker")).unwrap();
        let with_blocker = snapshot_tree(&fx.game);
        assert_ne!(before, with_blocker);

        let b = bundle(
            "1.0",
            &[("data/a.txt", "a"), ("new_dir/b.txt", "b"), ("data/c.txt", "c"), ("d.txt", "d")],
        );
        let err = install(&fx, &b).unwrap_err();
        match &err {
            PatchError::FileAccess {
                path, rolled_back, ..
            } => {
                assert!(rolled_back);
                assert!(path.ends_with("data/c.txt"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(snapshot_tree(&fx.game), with_blocker);
        assert_eq!(fx.manager.state(), InstallState::Absent);
    }

    #[test]
    fn failed_update_restores_previous_version() {
        let fx = fixture();
        let v1 = bundle("1.0", &[("shared.txt", "v1"), ("only_v1.txt", "old")]);
        install(&fx, &v1).unwrap();
        let after_v1 = snapshot_tree(&fx.game);

        fs::create_dir_all(fx.game.join("blocked.txt/x")).unwrap();
        let v2 = bundle(
            "2.0",
            &[("shared.txt", "v2"), ("fresh.txt", "new"), ("blocked.txt", "nope")],
        );
        let err = install(&fx, &v2).unwrap_err();
        assert!(matches!(err, PatchError::FileAccess { rolled_back: true, .. }));

        fs::remove_dir_all(fx.game.join("blocked.txt")).unwrap();
        assert_eq!(snapshot_tree(&fx.game), after_v1);
        let record = fx.manager.store().load().record.unwrap();
        assert_eq!(record.version, "1.0");
        assert!(!record.is_degraded());
    }

    #[test]
    fn cancelled_install_writes_nothing() {
        let fx = fixture();
        let before = snapshot_tree(&fx.game);
        let status = OperationStatus::new();
        status.cancel();
        let err = fx
            .manager
            .install(&bundle("1.0", &[("a.txt", "a")]), &InstallOptions::default(), &status)
            .unwrap_err();
        assert!(matches!(err, PatchError::Cancelled { rolled_back: true }));
        assert_eq!(snapshot_tree(&fx.game), before);
        assert_eq!(status.snapshot().phase, Phase::RollingBack);
    }

    #[test]
    fn same_version_is_up_to_date_unless_forced() {
        let fx = fixture();
        let v1 = bundle("1.0", &[("a.txt", "a")]);
        install(&fx, &v1).unwrap();
        fs::write(fx.game.join("a.txt"), "tampered").unwrap();

        let report = install(&fx, &v1).unwrap();
        assert_eq!(report.outcome, InstallOutcome::UpToDate { version: "1.0".into() });
        let status = fx.manager.status();
        assert_eq!(status.verification.unwrap().modified, vec!["a.txt"]);

        let forced = InstallOptions {
            force: true,
            ..InstallOptions::default()
        };
        fx.manager
            .install(&v1, &forced, &OperationStatus::new())
            .unwrap();
        assert_eq!(fs::read_to_string(fx.game.join("a.txt")).unwrap(), "a");
        assert!(fx.manager.status().verification.unwrap().is_clean());
    }

    #[test]
    fn degraded_record_forces_reinstall() {
        let fx = fixture();
        let v1 = bundle("1.0", &[("a.txt", "a")]);
        install(&fx, &v1).unwrap();

        let mut record = fx.manager.store().load().record.unwrap();
        record.files.push("leftover.txt".into());
        record.mark_degraded("test", vec!["leftover.txt".into()]);
        fx.manager.store().save(&record).unwrap();
        fs::write(fx.game.join("leftover.txt"), "junk").unwrap();
        assert!(matches!(fx.manager.state(), InstallState::Degraded { .. }));

        let report = install(&fx, &v1).unwrap();
        assert!(matches!(report.outcome, InstallOutcome::Installed { .. }));
        assert!(!fx.game.join("leftover.txt").exists());
        assert_eq!(fx.manager.state(), InstallState::Installed { version: "1.0".into() });
    }

    #[test]
    fn second_instance_fails_fast_while_lock_is_held() {
        let fx = fixture();
        let v1 = bundle("1.0", &[("a.txt", "a")]);
        let held = fx.manager.store().lock().unwrap();

        let err = install(&fx, &v1).unwrap_err();
        assert!(matches!(err, PatchError::ConcurrentOperation { .. }));
        assert!(!fx.game.join("a.txt").exists());

        drop(held);
        install(&fx, &v1).unwrap();
        assert!(fx.game.join("a.txt").exists());
    }

    #[test]
    fn corrupt_record_is_reported_and_treated_as_absent() {
        let fx = fixture();
        fs::create_dir_all(fx.manager.store().dir()).unwrap();
        fs::write(fx.manager.store().record_path(), "garbage").unwrap();

        let report = install(&fx, &bundle("1.0", &[("a.txt", "a")])).unwrap();
        assert!(matches!(
            report.warnings.as_slice(),
            [PatchError::CorruptState { .. }]
        ));
        assert_eq!(fx.manager.state(), InstallState::Installed { version: "1.0".into() });
    }

    #[test]
    fn uninstall_skips_files_deleted_by_user() {
        let fx = fixture();
        install(&fx, &bundle("1.0", &[("a.txt", "a"), ("b.txt", "b")])).unwrap();
        fs::remove_file(fx.game.join("a.txt")).unwrap();

        let status = fx.manager.status();
        assert_eq!(status.verification.unwrap().missing, vec!["a.txt"]);

        let report = fx.manager.uninstall(&OperationStatus::new()).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.missing, vec!["a.txt"]);
        assert_eq!(fx.manager.state(), InstallState::Absent);
    }

    #[test]
    fn uninstall_stops_on_undeletable_file_and_keeps_record() {
        let fx = fixture();
        install(&fx, &bundle("1.0", &[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")])).unwrap();
        fs::remove_file(fx.game.join("b.txt")).unwrap();
        fs::create_dir_all(fx.game.join("b.txt/inner")).unwrap();

        let err = fx.manager.uninstall(&OperationStatus::new()).unwrap_err();
        assert_eq!(err.affected_files(), ["b.txt".to_string(), "c.txt".to_string()]);
        assert!(!fx.game.join("a.txt").exists());
        assert!(fx.game.join("c.txt").exists());

        let record = fx.manager.store().load().record.unwrap();
        assert_eq!(record.files, vec!["b.txt", "c.txt"]);
        assert!(record.is_degraded());

        fs::remove_dir_all(fx.game.join("b.txt")).unwrap();
        fx.manager.uninstall(&OperationStatus::new()).unwrap();
        assert!(!fx.game.join("c.txt").exists());
        assert_eq!(fx.manager.state(), InstallState::Absent);
    }

    #[test]
    fn invalid_target_is_rejected_before_writing() {
        let fx = fixture();
        fs::remove_file(fx.game.join("LimbusCompany.exe")).unwrap();
        let err = install(&fx, &bundle("1.0", &[("a.txt", "a")])).unwrap_err();
        assert!(matches!(err, PatchError::InvalidTarget { .. }));
        assert!(!fx.game.join("a.txt").exists());
    }

    #[test]
    fn language_override_is_written() {
        let fx = fixture();
        let options = InstallOptions {
            language: Some("LLC_custom".into()),
            ..InstallOptions::default()
        };
        fx.manager
            .install(&bundle("1.0", &[("a.txt", "a")]), &options, &OperationStatus::new())
            .unwrap();
        let config = ConfigToggler::for_target(fx.manager.target()).current().unwrap();
        assert_eq!(config["lang"], "LLC_custom");
    }

    #[test]
    fn shipped_game_config_is_merged_and_restored_on_uninstall() {
        let fx = fixture();
        let lang = fx.game.join("LimbusCompany_Data/Lang");
        fs::create_dir_all(&lang).unwrap();
        fs::write(lang.join("config.json"), "{\"lang\": \"en\"}").unwrap();
        let before = snapshot_tree(&fx.game);

        let b = bundle(
            "1.0",
            &[
                ("LimbusCompany_Data/Lang/LLC_zh-CN/Font/font.ttf", "font"),
                ("LimbusCompany_Data/Lang/config.json", "{\"lang\": \"LLC_zh-CN\", \"titleFont\": \"x\"}"),
            ],
        );
        let report = install(&fx, &b).unwrap();
        assert_eq!(report.written, 1);
        let record = fx.manager.store().load().record.unwrap();
        assert_eq!(record.files, vec!["LimbusCompany_Data/Lang/LLC_zh-CN/Font/font.ttf"]);
        assert!(!record.checksums.contains_key("LimbusCompany_Data/Lang/config.json"));

        let config = ConfigToggler::for_target(fx.manager.target()).current().unwrap();
        assert_eq!(config["lang"], "LLC_zh-CN");
        assert_eq!(config["titleFont"], "x");
        assert!(fx.manager.status().verification.unwrap().is_clean());

        fx.manager.uninstall(&OperationStatus::new()).unwrap();
        assert_eq!(snapshot_tree(&fx.game), before);
        assert_eq!(
            fs::read_to_string(lang.join("config.json")).unwrap(),
            "{\"lang\": \"en\"}"
        );
    }

    #[test]
    fn shipped_game_config_is_removed_when_none_existed() {
        let fx = fixture();
        let before = snapshot_tree(&fx.game);
        let b = bundle(
            "1.0",
            &[
                ("a.txt", "a"),
                ("LimbusCompany_Data/Lang/config.json", "{\"lang\": \"LLC_zh-CN\"}"),
            ],
        );
        install(&fx, &b).unwrap();
        assert!(fx.game.join("LimbusCompany_Data/Lang/config.json").is_file());

        fx.manager.uninstall(&OperationStatus::new()).unwrap();
        assert_eq!(snapshot_tree(&fx.game), before);
    }

    #[test]
    fn language_option_beats_shipped_game_config() {
        let fx = fixture();
        let options = InstallOptions {
            language: Some("LLC_custom".into()),
            ..InstallOptions::default()
        };
        let b = bundle(
            "1.0",
            &[("LimbusCompany_Data/Lang/config.json", "{\"lang\": \"LLC_zh-CN\"}")],
        );
        fx.manager.install(&b, &options, &OperationStatus::new()).unwrap();
        let config = ConfigToggler::for_target(fx.manager.target()).current().unwrap();
        assert_eq!(config["lang"], "LLC_custom");
    }

    #[test]
    fn malformed_shipped_game_config_is_rejected() {
        let fx = fixture();
        let before = snapshot_tree(&fx.game);
        let b = bundle(
            "1.0",
            &[("a.txt", "a"), ("LimbusCompany_Data/Lang/config.json", "[1, 2]")],
        );
        let err = install(&fx, &b).unwrap_err();
        assert!(matches!(err, PatchError::InvalidBundle(_)));
        assert_eq!(snapshot_tree(&fx.game), before);
        assert_eq!(fx.manager.state(), InstallState::Absent);
    }

    #[test]
    fn same_version_with_changed_contents_is_reinstalled() {
        let fx = fixture();
        let font_a = bundle("1.0", &[("story.json", "{}"), ("Font/font.ttf", "font a")]);
        let font_b = bundle("1.0", &[("story.json", "{}"), ("Font/font.ttf", "font b")]);
        install(&fx, &font_a).unwrap();

        let report = install(&fx, &font_b).unwrap();
        assert_eq!(
            report.outcome,
            InstallOutcome::Installed {
                version: "1.0".into(),
                previous: Some("1.0".into())
            }
        );
        assert_eq!(fs::read_to_string(fx.game.join("Font/font.ttf")).unwrap(), "font b");
        assert!(fx.manager.status().verification.unwrap().is_clean());

        let report = install(&fx, &font_b).unwrap();
        assert_eq!(report.outcome, InstallOutcome::UpToDate { version: "1.0".into() });
    }

    #[test]
    fn unrestorable_rollback_saves_degraded_record() {
        let fx = fixture();
        let v1 = bundle("1.0", &[("a.txt", "v1")]);
        install(&fx, &v1).unwrap();
        let old = fx.manager.store().load().record.unwrap();

        let mut stash = fx.manager.backups.open_stash("1.0", None).unwrap();
        stash.store(&fx.game, "a.txt").unwrap();
        // Update got as far as overwriting a.txt and writing stuck.txt, which
        // has since been replaced by a directory rollback cannot remove.
        fs::write(fx.game.join("a.txt"), "v2").unwrap();
        fs::create_dir_all(fx.game.join("stuck.txt/inner")).unwrap();
        let journal = Journal {
            written_new: vec!["stuck.txt".into()],
            ..Journal::default()
        };

        let v2 = bundle("2.0", &[("a.txt", "v2"), ("stuck.txt", "s")]);
        let cause = PatchError::file_access(
            "write",
            fx.game.join("b.txt"),
            io::Error::other("disk full"),
        );
        let err = fx.manager.abort(
            &v2,
            Some(&old),
            journal,
            Some(stash),
            cause,
            &OperationStatus::new(),
        );
        match &err {
            PatchError::PartialUpdate { version, affected } => {
                assert_eq!(version, "2.0");
                assert_eq!(affected, &vec!["stuck.txt".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fs::read_to_string(fx.game.join("a.txt")).unwrap(), "v1");

        let record = fx.manager.store().load().record.unwrap();
        assert!(record.is_degraded());
        assert_eq!(record.version, "1.0");
        assert_eq!(record.files, vec!["a.txt", "stuck.txt"]);
        assert!(matches!(fx.manager.state(), InstallState::Degraded { .. }));

        fs::remove_dir_all(fx.game.join("stuck.txt")).unwrap();
        let report = install(&fx, &v1).unwrap();
        assert!(matches!(report.outcome, InstallOutcome::Installed { .. }));
        assert_eq!(fx.manager.state(), InstallState::Installed { version: "1.0".into() });
        assert_eq!(fx.manager.store().load().record.unwrap().files, vec!["a.txt"]);
    }

    #[test]
    fn stale_originals_without_record_are_not_restored() {
        let fx = fixture();
        let shipped = fx.game.join("LimbusCompany_Data/shipped.ttf");
        fs::write(&shipped, "stale").unwrap();
        fx.manager
            .backups
            .save_original(&fx.game, "LimbusCompany_Data/shipped.ttf")
            .unwrap();
        fs::write(&shipped, "current").unwrap();
        fs::create_dir_all(fx.manager.store().dir()).unwrap();
        fs::write(fx.manager.store().record_path(), "garbage").unwrap();

        let b = bundle("1.0", &[("LimbusCompany_Data/shipped.ttf", "patched")]);
        install(&fx, &b).unwrap();
        assert_eq!(fs::read_to_string(&shipped).unwrap(), "patched");

        fx.manager.uninstall(&OperationStatus::new()).unwrap();
        assert_eq!(fs::read_to_string(&shipped).unwrap(), "current");
    }
}
