//! Zip packaging of a text repository directory.
//!
//! The archive is opaque to the copy engine: a directory goes in, the same
//! tree comes out.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{CopyError, Result};

/// Pack every file under `dir` into `zip_path`, with `/`-separated names
/// relative to `dir`.
pub fn pack_dir(dir: &Path, zip_path: &Path) -> Result<usize> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut zip = ZipWriter::new(File::create(zip_path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for rel in &files {
        zip.start_file(rel.as_str(), options)?;
        let bytes = fs::read(dir.join(rel))?;
        zip.write_all(&bytes)?;
    }
    zip.finish()?;
    debug!(files = files.len(), zip = %zip_path.display(), "packed");
    Ok(files.len())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path.strip_prefix(root).map_err(|_| {
                CopyError::Config(format!("{} is outside {}", path.display(), root.display()))
            })?;
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(name);
        }
    }
    Ok(())
}

/// Unpack `zip_path` into `dest`. Entries that would land outside `dest`
/// are rejected.
pub fn unpack(zip_path: &Path, dest: &Path) -> Result<usize> {
    let mut archive = ZipArchive::new(File::open(zip_path)?)?;
    fs::create_dir_all(dest)?;
    let mut count = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let rel = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
            CopyError::Config(format!("unsafe path in archive: {}", entry.name()))
        })?;
        let out_path = dest.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        count += 1;
    }
    debug!(files = count, dest = %dest.display(), "unpacked");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_tree() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("run.R1/param")).unwrap();
        fs::write(src.path().join("M1.model.json"), b"{}").unwrap();
        fs::write(src.path().join("run.R1/param/P1.csv"), b"sub_id,param_value\n0,1\n").unwrap();

        let out = tempfile::tempdir().unwrap();
        let zip_path = out.path().join("M1.zip");
        assert_eq!(pack_dir(src.path(), &zip_path).unwrap(), 2);

        let dest = out.path().join("unpacked");
        assert_eq!(unpack(&zip_path, &dest).unwrap(), 2);
        assert_eq!(
            fs::read(dest.join("run.R1/param/P1.csv")).unwrap(),
            b"sub_id,param_value\n0,1\n"
        );
        assert_eq!(fs::read(dest.join("M1.model.json")).unwrap(), b"{}");
    }
}
