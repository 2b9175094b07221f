//! `.tar.zst` archive of a finished staging tree.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tar::Builder as TarBuilder;
use walkdir::WalkDir;

use super::install::{IoContext, IoFailure};

const ZSTD_LEVEL: i32 = 3;

/// Write `staging` to `out_path` as a deterministic tar.zst.
///
/// Entries are sorted, owned by root and carry a zero mtime so that the same
/// tree always produces the same archive.
pub(crate) fn create_tar_zst(staging: &Path, out_path: &Path) -> Result<(), IoFailure> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    let out = File::create(out_path).at(out_path)?;
    let encoder = zstd::stream::Encoder::new(out, ZSTD_LEVEL).at(out_path)?;
    let mut builder = TarBuilder::new(encoder);

    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(staging).follow_links(false) {
        let entry = entry?;
        if entry.path() != staging {
            entries.push(entry.into_path());
        }
    }
    entries.sort_by(|a, b| {
        let ra = a.strip_prefix(staging).unwrap_or(a);
        let rb = b.strip_prefix(staging).unwrap_or(b);
        ra.cmp(rb)
    });

    for path in entries {
        let rel = path.strip_prefix(staging).unwrap_or(&path).to_path_buf();
        append_entry(&mut builder, &path, &rel).at(&path)?;
    }

    let encoder = builder.into_inner().at(out_path)?;
    encoder.finish().at(out_path)?;
    Ok(())
}

fn append_entry<W: std::io::Write>(
    builder: &mut TarBuilder<W>,
    path: &Path,
    rel: &Path,
) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let md = fs::symlink_metadata(path)?;
    let mut header = tar::Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(md.permissions().mode());

    if md.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, rel, target)?;
    } else if md.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        builder.append_data(&mut header, rel, std::io::empty())?;
    } else if md.is_file() {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(md.len());
        builder.append_data(&mut header, rel, File::open(path)?)?;
    }
    Ok(())
}
