use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::{
    fs, io,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    Hardlink,
    Symlink,
}

impl LinkMode {
    pub fn from_symlink_flag(symlink: bool) -> Self {
        if symlink {
            LinkMode::Symlink
        } else {
            LinkMode::Hardlink
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LinkMode::Hardlink => "hardlink",
            LinkMode::Symlink => "symlink",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            LinkMode::Hardlink => "hard links",
            LinkMode::Symlink => "soft links",
        }
    }
}

/// Lightweight identity of a file.
///
/// Hard links share an inode with their source, so `Inode` identifies the file
/// exactly. A soft link has its own inode; following it yields the source's
/// timestamps and size, which is what `Stamp` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fingerprint {
    Inode { dev: u64, ino: u64 },
    Stamp { mtime: i64, ctime: i64, size: u64 },
}

impl Fingerprint {
    /// Fingerprint of the file at `path`, following soft links.
    pub fn of(path: &Path, mode: LinkMode) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self::from_metadata(&meta, mode))
    }

    pub fn from_metadata(meta: &fs::Metadata, mode: LinkMode) -> Self {
        match mode {
            LinkMode::Hardlink => inode_fingerprint(meta),
            LinkMode::Symlink => stamp_fingerprint(meta),
        }
    }

    pub fn mode(&self) -> LinkMode {
        match self {
            Fingerprint::Inode { .. } => LinkMode::Hardlink,
            Fingerprint::Stamp { .. } => LinkMode::Symlink,
        }
    }
}

/// Whether `a` and `b` are the same file under `mode`'s notion of identity.
pub fn same_file(a: &Path, b: &Path, mode: LinkMode) -> io::Result<bool> {
    Ok(Fingerprint::of(a, mode)? == Fingerprint::of(b, mode)?)
}

#[cfg(unix)]
fn inode_fingerprint(meta: &fs::Metadata) -> Fingerprint {
    Fingerprint::Inode {
        dev: meta.dev(),
        ino: meta.ino(),
    }
}

// No stable inode accessor off unix; timestamps are the best proxy there.
#[cfg(not(unix))]
fn inode_fingerprint(meta: &fs::Metadata) -> Fingerprint {
    stamp_fingerprint(meta)
}

fn stamp_fingerprint(meta: &fs::Metadata) -> Fingerprint {
    let mtime = meta.modified().map(system_time_nanos).unwrap_or(0);
    Fingerprint::Stamp {
        mtime,
        ctime: change_time_nanos(meta),
        size: meta.len(),
    }
}

#[cfg(unix)]
fn change_time_nanos(meta: &fs::Metadata) -> i64 {
    meta.ctime()
        .saturating_mul(1_000_000_000)
        .saturating_add(meta.ctime_nsec())
}

#[cfg(not(unix))]
fn change_time_nanos(meta: &fs::Metadata) -> i64 {
    meta.created().map(system_time_nanos).unwrap_or(0)
}

fn system_time_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX),
        Err(err) => i64::try_from(err.duration().as_nanos())
            .map(|nanos| -nanos)
            .unwrap_or(i64::MIN),
    }
}
