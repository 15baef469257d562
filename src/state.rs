use crate::{
    error::StateError,
    fingerprint::{Fingerprint, LinkMode},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

pub const STATE_VERSION: u32 = 1;

/// What was deployed for one virtual path on the last successful cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedRecord {
    pub target: PathBuf,
    pub source: PathBuf,
    pub target_fingerprint: Fingerprint,
    pub source_fingerprint: Fingerprint,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    mode: LinkMode,
    #[serde(default)]
    entries: BTreeMap<String, DeployedRecord>,
}

/// Deployment state for a single target tree.
///
/// Not meant to be shared between threads; the driver stages every update
/// from its coordinating thread once the link workers are done.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    mode: LinkMode,
    entries: BTreeMap<String, DeployedRecord>,
}

impl StateStore {
    pub fn empty(path: impl Into<PathBuf>, mode: LinkMode) -> Self {
        Self {
            path: path.into(),
            mode,
            entries: BTreeMap::new(),
        }
    }

    /// Load the persisted mapping. Any problem yields an empty store.
    pub fn load(path: impl Into<PathBuf>, mode: LinkMode) -> Self {
        let path = path.into();
        match read_entries(&path, mode) {
            Ok(entries) => Self {
                path,
                mode,
                entries,
            },
            Err(err) => {
                warn!("{err}; starting with empty deployment state");
                Self::empty(path, mode)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    pub fn get(&self, virtual_path: &str) -> Option<&DeployedRecord> {
        self.entries.get(virtual_path)
    }

    pub fn put(&mut self, virtual_path: impl Into<String>, record: DeployedRecord) {
        self.entries.insert(virtual_path.into(), record);
    }

    pub fn remove(&mut self, virtual_path: &str) -> Option<DeployedRecord> {
        self.entries.remove(virtual_path)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeployedRecord)> {
        self.entries
            .iter()
            .map(|(key, record)| (key.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the whole mapping via a temp file and rename.
    pub fn save(&self) -> Result<(), StateError> {
        self.write().map_err(|err| StateError::StateSaveFailed {
            path: self.path.clone(),
            reason: err.to_string(),
        })
    }

    fn write(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = StateFile {
            version: STATE_VERSION,
            mode: self.mode,
            entries: self.entries.clone(),
        };
        let raw = serde_json::to_string_pretty(&file)?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, raw)?;
        fs::rename(&temp, &self.path)
    }
}

fn read_entries(
    path: &Path,
    mode: LinkMode,
) -> Result<BTreeMap<String, DeployedRecord>, StateError> {
    let fail = |reason: String| StateError::StateLoadFailed {
        path: path.to_path_buf(),
        reason,
    };
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no deployment state yet");
            return Ok(BTreeMap::new());
        }
        Err(err) => return Err(fail(err.to_string())),
    };
    let file: StateFile = serde_json::from_str(&raw).map_err(|err| fail(err.to_string()))?;
    if file.version != STATE_VERSION {
        return Err(fail(format!("unsupported version {}", file.version)));
    }
    if file.mode != mode {
        return Err(fail(format!(
            "recorded with {} but deploying with {}",
            file.mode.label(),
            mode.label()
        )));
    }
    Ok(file.entries)
}

/// State file for a deployment target, keyed by a hash of its path.
pub fn state_file_for(state_dir: &Path, target_root: &Path) -> PathBuf {
    let hash = blake3::hash(target_root.to_string_lossy().as_bytes());
    let hex = hash.to_hex();
    state_dir.join(format!("{}.json", &hex.as_str()[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(ino: u64) -> DeployedRecord {
        DeployedRecord {
            target: PathBuf::from("/Game/Data/armor/plate.esp"),
            source: PathBuf::from("/MO2/mods/ArmorMod/armor/plate.esp"),
            target_fingerprint: Fingerprint::Inode { dev: 1, ino },
            source_fingerprint: Fingerprint::Inode { dev: 1, ino },
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path().join("absent.json"), LinkMode::Hardlink);
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let store = StateStore::load(&path, LinkMode::Hardlink);
        assert!(store.is_empty());
    }

    #[test]
    fn save_creates_parents_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut store = StateStore::empty(&path, LinkMode::Hardlink);
        store.put("armor/plate.esp", record(7));
        store.save().unwrap();

        let loaded = StateStore::load(&path, LinkMode::Hardlink);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("armor/plate.esp"), Some(&record(7)));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn state_from_other_link_mode_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::empty(&path, LinkMode::Hardlink);
        store.put("armor/plate.esp", record(7));
        store.save().unwrap();

        let loaded = StateStore::load(&path, LinkMode::Symlink);
        assert!(loaded.is_empty());
        assert_eq!(loaded.mode(), LinkMode::Symlink);
    }

    #[test]
    fn saving_unchanged_state_is_byte_identical() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::empty(&path, LinkMode::Hardlink);
        store.put("b.esp", record(2));
        store.put("a.esp", record(1));
        store.save().unwrap();
        let first = fs::read(&path).unwrap();

        StateStore::load(&path, LinkMode::Hardlink).save().unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn state_files_differ_per_target() {
        let dir = Path::new("/state");
        let a = state_file_for(dir, Path::new("/Game/Data"));
        let b = state_file_for(dir, Path::new("/Other/Data"));
        assert_ne!(a, b);
        assert_eq!(a, state_file_for(dir, Path::new("/Game/Data")));
        assert_eq!(a.extension().and_then(|ext| ext.to_str()), Some("json"));
    }
}
