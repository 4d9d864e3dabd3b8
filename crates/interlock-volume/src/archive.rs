//! Zip archive codec.
//!
//! The writer streams regular files only, preserving mount-relative entry
//! names and file mtimes (directory mtimes are intentionally not
//! preserved). The reader refuses traversal entries before materializing
//! anything, honors mode bits and writes entry mtimes back after copy.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::sync::Arc;

use filetime::FileTime;
use time::OffsetDateTime;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use interlock_core::sandbox::Sandbox;
use interlock_core::status::{Notification, Severity, StatusLog};
use interlock_core::{Error, Result, TRAVERSAL_PATTERN};

fn zip_err(err: zip::result::ZipError) -> Error {
    Error::Other(format!("zip: {err}"))
}

/// Build a zip archive of `sources` into `output`. Returns the number of
/// payload bytes archived.
pub fn zip_write<W>(
    sources: &[std::path::PathBuf],
    output: W,
    sandbox: &Sandbox,
    status: &Arc<StatusLog>,
) -> Result<u64>
where
    W: Write + Seek,
{
    let mut writer = ZipWriter::new(output);
    let mut written: u64 = 0;

    for source in sources {
        let _n = Notification::new(
            status.clone(),
            Severity::Notice,
            format!(
                "compressing {}",
                source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
        );

        for entry in walkdir::WalkDir::new(source)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let _n = Notification::new(
                status.clone(),
                Severity::Notice,
                format!(
                    "adding {} to archive",
                    entry.file_name().to_string_lossy()
                ),
            );

            let meta = entry.metadata().map_err(|e| Error::Other(e.to_string()))?;

            let mut options = FileOptions::default()
                .unix_permissions(meta.permissions().mode() & 0o7777);

            if let Ok(modified) = meta.modified() {
                let odt = OffsetDateTime::from(modified);
                if let Ok(dt) = zip::DateTime::try_from(odt) {
                    options = options.last_modified_time(dt);
                }
            }

            let name = sandbox
                .relative(entry.path())
                .trim_start_matches('/')
                .to_string();

            writer.start_file(name, options).map_err(zip_err)?;

            let mut input = File::open(entry.path())?;
            written += io::copy(&mut input, &mut writer)?;
        }
    }

    writer.finish().map_err(zip_err)?;

    Ok(written)
}

/// Extract `src` into the `dst` directory.
pub fn unzip(src: &Path, dst: &Path, status: &Arc<StatusLog>) -> Result<()> {
    let mut archive = ZipArchive::new(File::open(src)?).map_err(zip_err)?;

    fs::DirBuilder::new().recursive(true).mode(0o700).create(dst)?;

    // every entry name is vetted before anything is written out
    for i in 0..archive.len() {
        let name = archive.by_index(i).map_err(zip_err)?.name().to_string();

        if name.contains(TRAVERSAL_PATTERN) {
            return Err(Error::InvalidPath);
        }
    }

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_err)?;
        let path = dst.join(entry.name());

        if entry.is_dir() {
            fs::DirBuilder::new().recursive(true).mode(0o700).create(&path)?;
            continue;
        }

        if let Some(parent) = path.parent() {
            fs::DirBuilder::new().recursive(true).mode(0o700).create(parent)?;
        }

        let _n = Notification::new(
            status.clone(),
            Severity::Notice,
            format!("extracting {} from archive", entry.name()),
        );

        let mode = entry.unix_mode().unwrap_or(0o600) & 0o7777;

        let mut output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&path)?;

        let mut buf = [0u8; 32 * 1024];
        loop {
            let n = entry.read(&mut buf)?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n])?;
        }
        drop(output);

        if let Ok(odt) = entry.last_modified().to_time() {
            let mtime = FileTime::from_unix_time(odt.unix_timestamp(), 0);
            let _ = filetime::set_file_times(&path, mtime, mtime);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn setup() -> (tempfile::TempDir, Sandbox, Arc<StatusLog>) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), "keys");
        (dir, sandbox, StatusLog::new())
    }

    #[test]
    fn test_zip_roundtrip_preserves_layout_and_contents() {
        let (dir, sandbox, status) = setup();

        let tree = dir.path().join("docs");
        fs::create_dir_all(tree.join("nested")).unwrap();
        fs::write(tree.join("a.txt"), b"alpha").unwrap();
        fs::write(tree.join("nested/b.txt"), b"beta").unwrap();

        let mut buf = Cursor::new(Vec::new());
        let written = zip_write(&[tree.clone()], &mut buf, &sandbox, &status).unwrap();
        assert_eq!(written, 9);

        let archive_path = dir.path().join("docs.zip");
        fs::write(&archive_path, buf.into_inner()).unwrap();

        let out = dir.path().join("out");
        unzip(&archive_path, &out, &status).unwrap();

        assert_eq!(fs::read(out.join("docs/a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(out.join("docs/nested/b.txt")).unwrap(), b"beta");
    }

    #[test]
    fn test_zip_entries_use_mount_relative_names() {
        let (dir, sandbox, status) = setup();

        fs::write(dir.path().join("top.txt"), b"x").unwrap();

        let mut buf = Cursor::new(Vec::new());
        zip_write(
            &[dir.path().join("top.txt")],
            &mut buf,
            &sandbox,
            &status,
        )
        .unwrap();

        let mut archive = ZipArchive::new(Cursor::new(buf.into_inner())).unwrap();
        let entry = archive.by_index(0).unwrap();
        assert_eq!(entry.name(), "top.txt");
    }

    #[test]
    fn test_unzip_rejects_traversal_entries() {
        let (dir, _, status) = setup();

        // hand-build an archive carrying a traversal entry name
        let mut buf = Cursor::new(Vec::new());
        let mut writer = ZipWriter::new(&mut buf);
        writer
            .start_file("../evil.txt", FileOptions::default())
            .unwrap();
        writer.write_all(b"payload").unwrap();
        writer.finish().unwrap();
        drop(writer);

        let archive_path = dir.path().join("evil.zip");
        fs::write(&archive_path, buf.into_inner()).unwrap();

        let out = dir.path().join("out");
        match unzip(&archive_path, &out, &status) {
            Err(Error::InvalidPath) => {}
            other => panic!("expected InvalidPath, got {other:?}"),
        }

        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn test_unzip_honors_mode_bits() {
        let (dir, sandbox, status) = setup();

        let script = dir.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut buf = Cursor::new(Vec::new());
        zip_write(&[script], &mut buf, &sandbox, &status).unwrap();

        let archive_path = dir.path().join("script.zip");
        fs::write(&archive_path, buf.into_inner()).unwrap();

        let out = dir.path().join("out");
        unzip(&archive_path, &out, &status).unwrap();

        let mode = fs::metadata(out.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
