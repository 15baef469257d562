use crate::{
    host::{Host, HostRoots, OVERWRITE_ORIGIN},
    walker::join_virtual_dir,
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Origin name for files that ship with the game itself.
pub const DATA_ORIGIN: &str = "data";

const BASE_DIR_TOKEN: &str = "%BASE_DIR%";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModState {
    Enabled,
    Disabled,
    Unmanaged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModListEntry {
    pub name: String,
    pub state: ModState,
}

/// Parse a profile's `modlist.txt`. The first line is the highest priority.
pub fn parse_modlist(raw: &str) -> Vec<ModListEntry> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut chars = line.chars();
            let state = match chars.next()? {
                '+' => ModState::Enabled,
                '-' => ModState::Disabled,
                '*' => ModState::Unmanaged,
                _ => return None,
            };
            let name = chars.as_str().trim();
            if name.is_empty() {
                return None;
            }
            Some(ModListEntry {
                name: name.to_string(),
                state,
            })
        })
        .collect()
}

/// The bits of `ModOrganizer.ini` that locate the game and the instance folders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceIni {
    pub game_path: Option<PathBuf>,
    pub selected_profile: Option<String>,
    pub mod_directory: Option<String>,
    pub overwrite_directory: Option<String>,
    pub profiles_directory: Option<String>,
}

pub fn parse_instance_ini(raw: &str) -> InstanceIni {
    let mut ini = InstanceIni::default();
    let mut section = String::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            section = name.to_ascii_lowercase();
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = ini_value(value);
        if value.is_empty() {
            continue;
        }
        match (section.as_str(), key.trim()) {
            ("general", "gamePath") => ini.game_path = Some(PathBuf::from(value)),
            ("general", "selected_profile") => ini.selected_profile = Some(value),
            ("settings", "mod_directory") => ini.mod_directory = Some(value),
            ("settings", "overwrite_directory") => ini.overwrite_directory = Some(value),
            ("settings", "profiles_directory") => ini.profiles_directory = Some(value),
            _ => {}
        }
    }
    ini
}

fn ini_value(raw: &str) -> String {
    let value = raw.trim();
    let value = value
        .strip_prefix("@ByteArray(")
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(value);
    value.replace("\\\\", "\\")
}

#[derive(Debug, Clone)]
pub struct InstanceOptions {
    pub instance_dir: PathBuf,
    pub profile: Option<String>,
    pub game_dir: Option<PathBuf>,
    pub data_dir_name: String,
}

#[derive(Debug, Default)]
struct OverlayIndex {
    subdirs: HashMap<String, BTreeSet<String>>,
    files: HashMap<String, BTreeMap<String, PathBuf>>,
    origins: HashMap<String, Vec<String>>,
}

impl OverlayIndex {
    fn add_layer(&mut self, origin: &str, root: &Path) {
        for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(origin, "skipping unreadable entry: {err}");
                    continue;
                }
            };
            let file_type = entry.file_type();
            if !(file_type.is_file() || (file_type.is_symlink() && entry.path().is_file())) {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let segments: Vec<String> = rel
                .components()
                .filter_map(|component| match component {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect();
            let Some((name, dirs)) = segments.split_last() else {
                continue;
            };

            let mut dir = String::new();
            for segment in dirs {
                self.subdirs
                    .entry(dir.clone())
                    .or_default()
                    .insert(segment.clone());
                dir = join_virtual_dir(&dir, segment);
            }
            let virtual_path = join_virtual_dir(&dir, name);
            // Layers arrive highest priority first, so the first file seen wins.
            self.files
                .entry(dir)
                .or_default()
                .entry(name.clone())
                .or_insert_with(|| entry.path().to_path_buf());
            self.origins
                .entry(virtual_path)
                .or_default()
                .push(origin.to_string());
        }
    }
}

/// A portable mod manager instance read straight from disk.
pub struct InstanceHost {
    roots: HostRoots,
    profile: String,
    mod_paths: HashMap<String, PathBuf>,
    index: OverlayIndex,
}

impl InstanceHost {
    pub fn open(options: InstanceOptions) -> Result<Self> {
        let instance_dir = options.instance_dir;
        let ini_path = instance_dir.join("ModOrganizer.ini");
        let ini = if ini_path.exists() {
            let raw = fs::read_to_string(&ini_path).context("read ModOrganizer.ini")?;
            parse_instance_ini(&raw)
        } else {
            InstanceIni::default()
        };

        let resolve = |configured: &Option<String>, default: &str| -> PathBuf {
            match configured {
                Some(value) => PathBuf::from(value.replace(
                    BASE_DIR_TOKEN,
                    &instance_dir.to_string_lossy(),
                )),
                None => instance_dir.join(default),
            }
        };
        let mods = resolve(&ini.mod_directory, "mods");
        let overwrite = resolve(&ini.overwrite_directory, "overwrite");
        let profiles = resolve(&ini.profiles_directory, "profiles");

        let profile = options
            .profile
            .or(ini.selected_profile)
            .unwrap_or_else(|| "Default".to_string());
        let Some(game) = options.game_dir.or(ini.game_path) else {
            bail!(
                "game directory unknown: no gamePath in {} (pass --game)",
                ini_path.display()
            );
        };
        let data = game.join(&options.data_dir_name);

        let modlist_path = profiles.join(&profile).join("modlist.txt");
        let raw = fs::read_to_string(&modlist_path)
            .with_context(|| format!("read {}", modlist_path.display()))?;
        let modlist = parse_modlist(&raw);

        let roots = HostRoots {
            mods,
            overwrite,
            data,
            game,
        };
        Ok(Self::build(roots, profile, &modlist))
    }

    /// Assemble the overlay: overwrite, then enabled mods by priority, then game data.
    pub fn build(roots: HostRoots, profile: String, modlist: &[ModListEntry]) -> Self {
        let mut mod_paths = HashMap::new();
        let mut index = OverlayIndex::default();

        mod_paths.insert(OVERWRITE_ORIGIN.to_string(), roots.overwrite.clone());
        if roots.overwrite.is_dir() {
            index.add_layer(OVERWRITE_ORIGIN, &roots.overwrite);
        }

        for entry in modlist.iter().filter(|entry| entry.state == ModState::Enabled) {
            let path = roots.mods.join(&entry.name);
            if !path.is_dir() {
                warn!(name = %entry.name, "enabled mod has no folder, skipping");
                continue;
            }
            index.add_layer(&entry.name, &path);
            mod_paths.insert(entry.name.clone(), path);
        }

        mod_paths.insert(DATA_ORIGIN.to_string(), roots.data.clone());
        if roots.data.is_dir() {
            index.add_layer(DATA_ORIGIN, &roots.data);
        }

        debug!(
            profile = %profile,
            files = index.origins.len(),
            "overlay assembled"
        );
        Self {
            roots,
            profile,
            mod_paths,
            index,
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }
}

impl Host for InstanceHost {
    fn list_virtual_subdirectories(&self, path: &str) -> Vec<String> {
        self.index
            .subdirs
            .get(path)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn list_virtual_files(&self, directory: &str, filter: &dyn Fn(&Path) -> bool) -> Vec<PathBuf> {
        self.index
            .files
            .get(directory)
            .map(|files| {
                files
                    .values()
                    .filter(|path| filter(path))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn resolve_origins(&self, virtual_path: &str) -> Vec<String> {
        self.index
            .origins
            .get(virtual_path)
            .cloned()
            .unwrap_or_default()
    }

    fn locate_mod(&self, origin: &str) -> Option<PathBuf> {
        self.mod_paths.get(origin).cloned()
    }

    fn roots(&self) -> &HostRoots {
        &self.roots
    }
}
