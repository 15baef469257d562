use crate::host::{Host, HostRoots};
use serde::{Deserialize, Serialize};
use std::{
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    vec,
};
use tracing::{debug, warn};

/// Marker the mod manager appends to files and folders it hides.
pub const HIDDEN_MARKER: &str = "mohidden";

/// Virtual path segment whose contents belong in the game directory.
pub const ROOT_SEGMENT: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCategory {
    Mods,
    Overwrite,
    Data,
    Game,
}

impl RootCategory {
    pub fn label(self) -> &'static str {
        match self {
            RootCategory::Mods => "mods",
            RootCategory::Overwrite => "overwrite",
            RootCategory::Data => "data",
            RootCategory::Game => "game",
        }
    }
}

/// A file of the overlay, addressed relative to its root category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VirtualFile {
    pub path: String,
    pub category: RootCategory,
}

impl VirtualFile {
    pub fn new(path: impl Into<String>, category: RootCategory) -> Self {
        Self {
            path: path.into(),
            category,
        }
    }

    /// Where this file is deployed to.
    pub fn target_path(&self, roots: &HostRoots, redirect_root_to_game_dir: bool) -> PathBuf {
        match self.category {
            RootCategory::Game => join_virtual_path(&roots.game, &self.path),
            RootCategory::Mods | RootCategory::Overwrite | RootCategory::Data => {
                if redirect_root_to_game_dir {
                    if let Some(rest) = strip_root_segment(&self.path) {
                        return join_virtual_path(&roots.game, rest);
                    }
                }
                join_virtual_path(&roots.data, &self.path)
            }
        }
    }
}

/// Classify an absolute real path by the root it lives under.
///
/// Roots are tried in the order mods, overwrite, data, game; the data root
/// usually sits inside the game root. Under the mods root the leading mod
/// folder is dropped since it is not part of the deployed layout.
pub fn classify(roots: &HostRoots, real: &Path) -> Option<VirtualFile> {
    if let Some(rel) = strip_root(real, &roots.mods) {
        let mut components = rel.components();
        components.next()?;
        return relative_virtual_path(components.as_path())
            .map(|path| VirtualFile::new(path, RootCategory::Mods));
    }
    let ordered = [
        (&roots.overwrite, RootCategory::Overwrite),
        (&roots.data, RootCategory::Data),
        (&roots.game, RootCategory::Game),
    ];
    for (root, category) in ordered {
        if let Some(rel) = strip_root(real, root) {
            return relative_virtual_path(rel).map(|path| VirtualFile::new(path, category));
        }
    }
    None
}

pub fn join_virtual_path(base: &Path, virtual_path: &str) -> PathBuf {
    virtual_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(base.to_path_buf(), |path, segment| path.join(segment))
}

pub fn join_virtual_dir(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn strip_root<'a>(real: &'a Path, root: &Path) -> Option<&'a Path> {
    if root.as_os_str().is_empty() {
        return None;
    }
    real.strip_prefix(root).ok()
}

fn relative_virtual_path(rel: &Path) -> Option<String> {
    let segments: Vec<String> = rel
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

fn strip_root_segment(path: &str) -> Option<&str> {
    let (head, rest) = path.split_once('/')?;
    if head.eq_ignore_ascii_case(ROOT_SEGMENT) && !rest.is_empty() {
        Some(rest)
    } else {
        None
    }
}

/// Depth-first walk over the host's virtual directory tree.
///
/// Lazy and single-pass: directories are listed only as the iterator reaches
/// them. Stops early once the cancellation flag is raised.
pub struct VirtualTreeWalker<'a> {
    host: &'a dyn Host,
    pending_dirs: Vec<String>,
    pending_files: vec::IntoIter<PathBuf>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> VirtualTreeWalker<'a> {
    pub fn new(host: &'a dyn Host) -> Self {
        Self {
            host,
            pending_dirs: vec![String::new()],
            pending_files: Vec::new().into_iter(),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn canceled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn accept(&self, real: &Path) -> Option<VirtualFile> {
        if real.to_string_lossy().contains(HIDDEN_MARKER) {
            debug!(path = %real.display(), "skipping hidden file");
            return None;
        }
        if !real.exists() {
            debug!(path = %real.display(), "skipping vanished file");
            return None;
        }
        let file = classify(self.host.roots(), real);
        if file.is_none() {
            warn!(path = %real.display(), "file is outside every managed root, ignoring");
        }
        file
    }
}

impl Iterator for VirtualTreeWalker<'_> {
    type Item = VirtualFile;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.canceled() {
                return None;
            }
            if let Some(real) = self.pending_files.next() {
                match self.accept(&real) {
                    Some(file) => return Some(file),
                    None => continue,
                }
            }
            let dir = self.pending_dirs.pop()?;
            let subdirs = self.host.list_virtual_subdirectories(&dir);
            for name in subdirs.iter().rev() {
                self.pending_dirs.push(join_virtual_dir(&dir, name));
            }
            self.pending_files = self
                .host
                .list_virtual_files(&dir, &|_| true)
                .into_iter();
        }
    }
}
