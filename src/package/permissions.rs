//! Final permission pass over the staging tree.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use walkdir::WalkDir;

use super::install::{IoContext, IoFailure};

pub(crate) const DIR_MODE: u32 = 0o755;
pub(crate) const EXEC_MODE: u32 = 0o755;
pub(crate) const FILE_MODE: u32 = 0o644;

/// Mode a node should have after normalization.
pub(crate) fn normalized_mode(is_dir: bool, current: u32) -> u32 {
    match (is_dir, current & 0o111 != 0) {
        (true, _) => DIR_MODE,
        (false, true) => EXEC_MODE,
        (false, false) => FILE_MODE,
    }
}

/// Set directories and executables to 0755 and every other file to 0644.
///
/// Symlinks are left alone. Returns the number of entries changed.
pub(crate) fn normalize_permissions(root: &Path) -> Result<usize, IoFailure> {
    let mut changed = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        let meta = entry.metadata()?;
        let current = meta.permissions().mode() & 0o7777;
        let wanted = normalized_mode(file_type.is_dir(), current);
        if current != wanted {
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(wanted))
                .at(entry.path())?;
            changed += 1;
        }
    }
    Ok(changed)
}
