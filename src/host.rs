use serde::Serialize;
use std::path::{Path, PathBuf};

/// Origin name the mod manager uses for its overwrite area.
pub const OVERWRITE_ORIGIN: &str = "overwrite";

/// Real directories the overlay is assembled from and deployed into.
#[derive(Debug, Clone, Serialize)]
pub struct HostRoots {
    pub mods: PathBuf,
    pub overwrite: PathBuf,
    pub data: PathBuf,
    pub game: PathBuf,
}

/// The capabilities the engine needs from the mod manager.
///
/// Virtual directories and files are addressed by `/`-separated paths relative
/// to the overlay root; the root itself is the empty string.
pub trait Host: Send + Sync {
    /// Immediate subdirectory names of a virtual directory.
    fn list_virtual_subdirectories(&self, path: &str) -> Vec<String>;

    /// Absolute real paths of the files inside a virtual directory that pass `filter`.
    fn list_virtual_files(&self, directory: &str, filter: &dyn Fn(&Path) -> bool) -> Vec<PathBuf>;

    /// Origins providing `virtual_path`, highest priority first.
    fn resolve_origins(&self, virtual_path: &str) -> Vec<String>;

    /// Absolute directory of an origin, if the host knows it.
    fn locate_mod(&self, origin: &str) -> Option<PathBuf>;

    fn roots(&self) -> &HostRoots;
}
