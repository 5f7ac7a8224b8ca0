use crate::mount::{writable_dir, Mount};
use crate::{Context, Error, Result};
use nix::sys::stat::{mknod, Mode, SFlag};
use std::fs::{self, DirBuilder, OpenOptions};
use std::io;
use std::os::unix::fs::{symlink, DirBuilderExt, MetadataExt, OpenOptionsExt};
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Copy `src_dir` into the writable directory of `dst_mounts`.
///
/// The destination is cleared first so that files deleted in the source do not survive
/// through content the destination inherited from its parent.
pub(crate) fn copy_writable_layer(
    src_dir: &Path,
    dst_mounts: &[Mount],
    ctx: &Context,
) -> Result<()> {
    let dst_dir = writable_dir(dst_mounts).map_err(|e| e.context("destination"))?;

    log::debug!(
        "replicating writable layer {} into {}",
        src_dir.display(),
        dst_dir.display()
    );

    clear_dir(&dst_dir).map_err(|e| e.context("clear destination directory"))?;
    copy_dir(src_dir, &dst_dir, ctx)
}

/// Remove every entry inside `dir`, keeping `dir` itself.
///
/// A missing directory is already empty.
pub(crate) fn clear_dir(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::ClearDirectory(dir.to_path_buf(), e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| Error::ClearDirectory(dir.to_path_buf(), e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| Error::ClearDirectory(path.clone(), e))?;

        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| Error::ClearDirectory(path, e))?;
    }
    Ok(())
}

/// Recursively copy the content of `src_dir` into the existing `dst_dir`.
///
/// Symlinks are recreated with the same target, directories and files keep their
/// permission bits, other file types are recreated with `mknod`.
pub(crate) fn copy_dir(src_dir: &Path, dst_dir: &Path, ctx: &Context) -> Result<()> {
    for entry in WalkDir::new(src_dir).follow_links(false) {
        ctx.check()?;

        let entry = entry.map_err(|e| Error::Copy {
            src: e.path().unwrap_or(src_dir).to_path_buf(),
            dst: dst_dir.to_path_buf(),
            source: e.into(),
        })?;

        // The root entry is `dst_dir` itself, which already exists.
        let rel = match entry.path().strip_prefix(src_dir) {
            Ok(rel) if rel.as_os_str().is_empty() => continue,
            Ok(rel) => rel,
            Err(_) => {
                return Err(Error::Internal(format!(
                    "{} is outside of {}",
                    entry.path().display(),
                    src_dir.display()
                )))
            }
        };

        let dst = dst_dir.join(rel);
        copy_entry(&entry, &dst).map_err(|source| Error::Copy {
            src: entry.path().to_path_buf(),
            dst,
            source,
        })?;
    }
    Ok(())
}

fn copy_entry(entry: &DirEntry, dst: &Path) -> io::Result<()> {
    let file_type = entry.file_type();
    if file_type.is_symlink() {
        return copy_symlink(entry.path(), dst);
    }

    let metadata = entry.metadata()?;
    let perm = metadata.mode() & 0o777;
    if file_type.is_dir() {
        DirBuilder::new().recursive(true).mode(perm).create(dst)
    } else if file_type.is_file() {
        copy_file(entry.path(), dst, perm)
    } else {
        // Devices, fifos and sockets. Overlay whiteouts are 0:0 character devices.
        let kind = SFlag::from_bits_truncate(metadata.mode() & SFlag::S_IFMT.bits());
        mknod(dst, kind, Mode::from_bits_truncate(perm), metadata.rdev())
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))
    }
}

/// Create a symlink at `dst` pointing to the same target as `src`.
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    symlink(target, dst)
}

/// Copy a regular file, creating or truncating `dst` with the provided mode bits.
fn copy_file(src: &Path, dst: &Path, perm: u32) -> io::Result<()> {
    let mut input = fs::File::open(src)?;
    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(perm)
        .open(dst)?;
    io::copy(&mut input, &mut output)?;
    output.sync_all()
}

#[cfg(test)]
mod tests {
    use crate::copy::{clear_dir, copy_dir, copy_writable_layer};
    use crate::mount::Mount;
    use crate::{CancellationToken, Context, Error, ErrorKind};
    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;
    use std::fs;
    use std::os::unix::fs::{symlink, FileTypeExt, PermissionsExt};
    use tempdir::TempDir;

    #[test]
    fn test_clear_dir_keeps_the_directory() {
        let tmp = TempDir::new("clone_clear").unwrap();
        let dir = tmp.path().join("upper");
        fs::create_dir_all(dir.join("nested/deeper")).unwrap();
        fs::write(dir.join("a.txt"), "a").unwrap();
        fs::write(dir.join("nested/deeper/b.txt"), "b").unwrap();
        symlink("/does/not/exist", dir.join("dangling")).unwrap();

        clear_dir(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_clear_missing_dir_is_ok() {
        let tmp = TempDir::new("clone_clear_missing").unwrap();
        assert!(clear_dir(&tmp.path().join("nope")).is_ok());
    }

    #[test]
    fn test_copy_dir_preserves_tree() {
        let tmp = TempDir::new("clone_copy").unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("etc/app")).unwrap();
        fs::create_dir_all(&dst).unwrap();

        fs::write(src.join("data.txt"), "hello").unwrap();
        fs::write(src.join("etc/app/run.sh"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(src.join("etc/app/run.sh"), fs::Permissions::from_mode(0o750))
            .unwrap();
        fs::set_permissions(src.join("etc/app"), fs::Permissions::from_mode(0o700)).unwrap();
        symlink("../data.txt", src.join("etc/link")).unwrap();

        copy_dir(&src, &dst, &Context::default()).unwrap();

        assert_eq!(fs::read_to_string(dst.join("data.txt")).unwrap(), "hello");
        let mode = fs::metadata(dst.join("etc/app/run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o750);
        let mode = fs::metadata(dst.join("etc/app")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let link = dst.join("etc/link");
        assert!(fs::symlink_metadata(&link)
            .unwrap()
            .file_type()
            .is_symlink());
        assert_eq!(
            fs::read_link(&link).unwrap().to_str().unwrap(),
            "../data.txt"
        );
    }

    #[test]
    fn test_copy_dir_recreates_fifo() {
        let tmp = TempDir::new("clone_copy_fifo").unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        mkfifo(&src.join("pipe"), Mode::from_bits_truncate(0o640)).unwrap();

        copy_dir(&src, &dst, &Context::default()).unwrap();

        let metadata = fs::symlink_metadata(dst.join("pipe")).unwrap();
        assert!(metadata.file_type().is_fifo());
        assert_eq!(metadata.permissions().mode() & 0o777, 0o640);
    }

    #[test]
    fn test_copy_dir_overwrites_existing_file() {
        let tmp = TempDir::new("clone_copy_overwrite").unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("f"), "new").unwrap();
        fs::write(dst.join("f"), "much older content").unwrap();

        copy_dir(&src, &dst, &Context::default()).unwrap();

        assert_eq!(fs::read_to_string(dst.join("f")).unwrap(), "new");
    }

    #[test]
    fn test_copy_missing_source_fails_with_paths() {
        let tmp = TempDir::new("clone_copy_missing").unwrap();
        let src = tmp.path().join("gone");

        let err = copy_dir(&src, tmp.path(), &Context::default()).unwrap_err();
        match &err {
            Error::Copy { src: path, .. } => assert_eq!(path, &src),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_copy_stops_when_canceled() {
        let tmp = TempDir::new("clone_copy_cancel").unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("f"), "data").unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let ctx = Context::with_cancellation("default", token);

        assert!(matches!(copy_dir(&src, &dst, &ctx), Err(Error::Canceled)));
        assert!(!dst.join("f").exists());
    }

    #[test]
    fn test_copy_writable_layer_reflects_deletions() {
        let tmp = TempDir::new("clone_layer").unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("kept.txt"), "kept").unwrap();
        fs::write(dst.join("kept.txt"), "inherited").unwrap();
        fs::write(dst.join("will-be-deleted.txt"), "inherited").unwrap();

        let dst_mounts = vec![Mount::overlay(vec![
            format!("upperdir={}", dst.display()),
            "lowerdir=/unused".to_string(),
        ])];

        copy_writable_layer(&src, &dst_mounts, &Context::default()).unwrap();

        assert_eq!(fs::read_to_string(dst.join("kept.txt")).unwrap(), "kept");
        assert!(!dst.join("will-be-deleted.txt").exists());
    }

    #[test]
    fn test_copy_writable_layer_unsupported_destination() {
        let tmp = TempDir::new("clone_layer_unsupported").unwrap();
        let dst_mounts = vec![Mount::overlay(vec!["lowerdir=/a".to_string()])];

        let err = copy_writable_layer(tmp.path(), &dst_mounts, &Context::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedMounts);
        assert!(err.to_string().starts_with("destination: "));
    }
}
