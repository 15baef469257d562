use crate::{
    error::EntryError,
    fingerprint::{same_file, Fingerprint, LinkMode},
    origin::ResolveError,
    state::DeployedRecord,
    walker::{RootCategory, VirtualFile},
};
use serde::Serialize;
use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};
use time::{macros::format_description, OffsetDateTime};

pub const ORIGINAL_BACKUP_SUFFIX: &str = ".mo2_original";
pub const BACKUP_PREFIX: &str = ".mo2_";

/// One virtual file prepared for this cycle.
#[derive(Debug, Clone)]
pub struct DeploymentEntry {
    pub file: VirtualFile,
    pub source: Result<PathBuf, ResolveError>,
    pub target: PathBuf,
    pub prior: Option<DeployedRecord>,
    pub source_fingerprint: Option<Fingerprint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Linked,
    AlreadyDeployed,
    Skipped,
    Failed,
    Canceled,
    Removed,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Linked => "linked",
            Outcome::AlreadyDeployed => "already deployed",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
            Outcome::Canceled => "canceled",
            Outcome::Removed => "removed",
        }
    }

    /// Whether the target now points at the source.
    pub fn is_deployed(self) -> bool {
        matches!(self, Outcome::Linked | Outcome::AlreadyDeployed)
    }
}

/// What happened to an entry.
#[derive(Debug)]
pub enum LinkAction {
    Linked,
    /// Replaced a link this engine created on an earlier cycle.
    Refreshed,
    BackedUpAndLinked { backup: PathBuf },
    AlreadyDeployed { source_changed: bool },
    Skipped(&'static str),
    Removed { restored: Option<PathBuf> },
    Failed(EntryError),
    Canceled,
}

impl LinkAction {
    pub fn outcome(&self) -> Outcome {
        match self {
            LinkAction::Linked | LinkAction::Refreshed | LinkAction::BackedUpAndLinked { .. } => {
                Outcome::Linked
            }
            LinkAction::AlreadyDeployed { .. } => Outcome::AlreadyDeployed,
            LinkAction::Skipped(_) => Outcome::Skipped,
            LinkAction::Removed { .. } => Outcome::Removed,
            LinkAction::Failed(_) => Outcome::Failed,
            LinkAction::Canceled => Outcome::Canceled,
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            LinkAction::Linked | LinkAction::Canceled => None,
            LinkAction::AlreadyDeployed { source_changed } => source_changed
                .then(|| "source changed since last deployment".to_string()),
            LinkAction::Refreshed => Some("refreshed stale link".to_string()),
            LinkAction::BackedUpAndLinked { backup } => {
                Some(format!("existing file moved to {}", backup.display()))
            }
            LinkAction::Skipped(reason) => Some(reason.to_string()),
            LinkAction::Removed { restored } => restored
                .as_ref()
                .map(|path| format!("restored original from {}", path.display())),
            LinkAction::Failed(err) => Some(err.to_string()),
        }
    }
}

/// Plans and performs the link for a single entry.
#[derive(Debug, Clone)]
pub struct Linker {
    mode: LinkMode,
    cancel: Arc<AtomicBool>,
}

impl Linker {
    pub fn new(mode: LinkMode, cancel: Arc<AtomicBool>) -> Self {
        Self { mode, cancel }
    }

    pub fn plan_and_execute(&self, entry: &DeploymentEntry) -> LinkAction {
        if self.cancel.load(Ordering::SeqCst) {
            return LinkAction::Canceled;
        }
        if matches!(entry.file.category, RootCategory::Data | RootCategory::Game) {
            return LinkAction::Skipped("already part of the game directory");
        }
        let source = match &entry.source {
            Ok(source) => source,
            Err(err) => return LinkAction::Failed(err.clone().into()),
        };
        if !source.exists() {
            return LinkAction::Failed(EntryError::SourceMissing(source.clone()));
        }
        if let Some(parent) = entry.target.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                if !(err.kind() == io::ErrorKind::AlreadyExists && parent.is_dir()) {
                    return LinkAction::Failed(EntryError::DirectoryCreateFailed {
                        path: parent.to_path_buf(),
                        err,
                    });
                }
            }
        }

        match create_link(source, &entry.target, self.mode) {
            Ok(()) => LinkAction::Linked,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                self.resolve_existing(entry, source)
            }
            Err(err) => LinkAction::Failed(EntryError::LinkCreateFailed { err }),
        }
    }

    fn resolve_existing(&self, entry: &DeploymentEntry, source: &Path) -> LinkAction {
        let target = &entry.target;
        // A dangling soft link cannot be followed; treat it like any other mismatch.
        if same_file(source, target, self.mode).unwrap_or(false) {
            let source_changed = match (&entry.prior, &entry.source_fingerprint) {
                (Some(prior), Some(current)) => prior.source_fingerprint != *current,
                _ => false,
            };
            return LinkAction::AlreadyDeployed { source_changed };
        }

        if self.is_own_stale_link(entry) {
            if let Err(err) = fs::remove_file(target) {
                return LinkAction::Failed(EntryError::RemoveFailed { err });
            }
            return match create_link(source, target, self.mode) {
                Ok(()) => LinkAction::Refreshed,
                Err(err) => LinkAction::Failed(EntryError::LinkCreateFailed { err }),
            };
        }

        let backup = backup_path(target);
        if let Err(err) = fs::rename(target, &backup) {
            return LinkAction::Failed(EntryError::BackupRenameFailed { backup, err });
        }
        match create_link(source, target, self.mode) {
            Ok(()) => LinkAction::BackedUpAndLinked { backup },
            Err(err) => LinkAction::Failed(EntryError::RelinkFailed { err }),
        }
    }

    fn is_own_stale_link(&self, entry: &DeploymentEntry) -> bool {
        let Some(prior) = entry.prior.as_ref() else {
            return false;
        };
        if prior.target != entry.target {
            return false;
        }
        match Fingerprint::of(&entry.target, self.mode) {
            Ok(current) => current == prior.target_fingerprint,
            Err(_) => self.mode == LinkMode::Symlink && is_symlink(&entry.target),
        }
    }
}

/// Undo a link recorded on an earlier cycle whose file left the overlay.
///
/// The target is only removed while it is still the link that was recorded;
/// a `.mo2_original` backup next to it is moved back into place.
pub fn remove_stale_link(record: &DeployedRecord, mode: LinkMode) -> LinkAction {
    let target = &record.target;
    let meta = match fs::symlink_metadata(target) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return LinkAction::Skipped("target already gone")
        }
        Err(err) => return LinkAction::Failed(EntryError::RemoveFailed { err }),
    };
    let ours = match mode {
        LinkMode::Symlink => meta.file_type().is_symlink(),
        LinkMode::Hardlink => {
            Fingerprint::from_metadata(&meta, mode) == record.target_fingerprint
        }
    };
    if !ours {
        return LinkAction::Skipped("target changed since deployment, left in place");
    }
    if let Err(err) = fs::remove_file(target) {
        return LinkAction::Failed(EntryError::RemoveFailed { err });
    }

    let original = with_suffix(target, ORIGINAL_BACKUP_SUFFIX);
    if !path_taken(&original) {
        return LinkAction::Removed { restored: None };
    }
    match fs::rename(&original, target) {
        Ok(()) => LinkAction::Removed {
            restored: Some(original),
        },
        Err(err) => LinkAction::Failed(EntryError::BackupRenameFailed {
            backup: original,
            err,
        }),
    }
}

/// Free name to move a foreign file at `target` to.
///
/// The first backup is `<target>.mo2_original`; later ones carry a
/// microsecond timestamp so an earlier backup is never overwritten.
pub fn backup_path(target: &Path) -> PathBuf {
    let original = with_suffix(target, ORIGINAL_BACKUP_SUFFIX);
    if !path_taken(&original) {
        return original;
    }
    let stamp = backup_stamp();
    let mut candidate = with_suffix(target, &format!("{BACKUP_PREFIX}{stamp}"));
    let mut counter = 1u32;
    while path_taken(&candidate) {
        candidate = with_suffix(target, &format!("{BACKUP_PREFIX}{stamp}_{counter}"));
        counter += 1;
    }
    candidate
}

fn backup_stamp() -> String {
    let format = format_description!(
        "[year][month][day][hour][minute][second][subsecond digits:6]"
    );
    match OffsetDateTime::now_utc().format(format) {
        Ok(stamp) => stamp,
        Err(_) => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros()
            .to_string(),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn path_taken(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

fn create_link(source: &Path, dest: &Path, mode: LinkMode) -> io::Result<()> {
    match mode {
        LinkMode::Hardlink => fs::hard_link(source, dest),
        LinkMode::Symlink => create_symlink(source, dest),
    }
}

#[cfg(unix)]
fn create_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(windows)]
fn create_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(source, dest)
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_source: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlink unavailable on this platform",
    ))
}
