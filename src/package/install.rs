//! Filesystem helpers for populating the staging tree.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// An I/O error together with the path it happened on.
#[derive(Debug)]
pub(crate) struct IoFailure {
    pub(crate) path: PathBuf,
    pub(crate) source: io::Error,
}

pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T, IoFailure>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T, IoFailure> {
        self.map_err(|source| IoFailure {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl From<walkdir::Error> for IoFailure {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        let source = err
            .into_io_error()
            .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
        IoFailure { path, source }
    }
}

pub(crate) fn create_dir(path: &Path) -> Result<(), IoFailure> {
    fs::create_dir_all(path).at(path)
}

/// Copy one file, creating the destination's parent directories.
pub(crate) fn copy_file(src: &Path, dst: &Path) -> Result<(), IoFailure> {
    if let Some(parent) = dst.parent() {
        create_dir(parent)?;
    }
    fs::copy(src, dst).at(src)?;
    Ok(())
}

pub(crate) fn write_file(path: &Path, contents: &str) -> Result<(), IoFailure> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).at(path)
}

/// Recursively copy a directory tree. Symlinks are recreated, not followed.
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), IoFailure> {
    create_dir(dst)?;

    for entry in fs::read_dir(src).at(src)? {
        let entry = entry.at(src)?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type().at(&src_path)?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path).at(&src_path)?;
            if dst_path.is_symlink() || dst_path.exists() {
                fs::remove_file(&dst_path).at(&dst_path)?;
            }
            std::os::unix::fs::symlink(target, &dst_path).at(&dst_path)?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).at(&src_path)?;
        }
    }

    Ok(())
}

/// Remove the `source` and `build` links `modules_install` leaves behind.
///
/// Returns the names that were removed.
pub(crate) fn remove_module_links(modules_dir: &Path) -> Result<Vec<&'static str>, IoFailure> {
    let mut removed = Vec::new();
    for name in ["source", "build"] {
        let path = modules_dir.join(name);
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };
        if meta.is_dir() {
            fs::remove_dir_all(&path).at(&path)?;
        } else {
            fs::remove_file(&path).at(&path)?;
        }
        removed.push(name);
    }
    Ok(removed)
}

/// Number of kernel modules (compressed or not) under `modules_dir`.
pub(crate) fn count_modules(modules_dir: &Path) -> usize {
    let mut module_count = 0;
    let mut walk_errors = 0;
    for entry in WalkDir::new(modules_dir) {
        match entry {
            Ok(e) => {
                let name = e.file_name().to_string_lossy();
                if [".ko", ".ko.xz", ".ko.gz", ".ko.zst"]
                    .iter()
                    .any(|ext| name.ends_with(ext))
                {
                    module_count += 1;
                }
            }
            Err(e) => {
                walk_errors += 1;
                log::warn!("error reading module entry: {e}");
            }
        }
    }
    if walk_errors > 0 {
        log::warn!("{walk_errors} errors while counting modules (count may be inaccurate)");
    }
    module_count
}

/// Hex SHA-256 of a file.
pub(crate) fn sha256_file(path: &Path) -> Result<String, IoFailure> {
    let file = File::open(path).at(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).at(path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
