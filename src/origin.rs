use crate::{
    host::Host,
    walker::{join_virtual_path, VirtualFile},
};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no origin found")]
    OriginMissing,

    #[error("mod lookup failed: {0}")]
    ModLookupFailed(String),
}

/// Absolute source of a virtual file: the winning origin joined with its path.
///
/// Precedence is whatever order the host reports; the first origin wins.
pub fn resolve_source(host: &dyn Host, file: &VirtualFile) -> Result<PathBuf, ResolveError> {
    let origins = host.resolve_origins(&file.path);
    let origin = origins.first().ok_or(ResolveError::OriginMissing)?;
    let mod_path = host
        .locate_mod(origin)
        .ok_or_else(|| ResolveError::ModLookupFailed(origin.clone()))?;
    Ok(join_virtual_path(&mod_path, &file.path))
}
