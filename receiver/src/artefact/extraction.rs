//! Directory replacement and tarball extraction for verified payloads.
//!
//! [`apply`] discards the previous deployment at a target directory and
//! unpacks a `.tar.gz` payload in its place. Only directories and regular
//! files are materialised; symlinks, hard links, and device or FIFO entries
//! are skipped so archive content can never create links out of the target.
//! Every entry path is validated against traversal before anything is
//! removed, and re-checked against the canonical target while unpacking.
//!
//! The replacement is not crash-atomic: if the process dies after the old
//! tree is removed, the target may be left empty or partially populated.

use flate2::read::GzDecoder;
use log::debug;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Errors arising from applying a payload to a target directory.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// A path in the archive attempts to traverse outside the target.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },

    /// The payload is not a readable gzip-compressed tarball.
    #[error("invalid tarball: {0}")]
    Archive(#[source] io::Error),

    /// The previous deployment could not be removed.
    #[error("cannot remove {path}: {source}")]
    CleanupFailed {
        /// The target directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The empty target directory could not be created.
    #[error("cannot create {path}: {source}")]
    CreateFailed {
        /// The target directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Writing an entry into the target failed.
    #[error("cannot write {path}: {source}")]
    Extract {
        /// The destination of the failed entry.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Counts reported after a successful [`apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Regular files written.
    pub files: usize,
    /// Directory entries created.
    pub directories: usize,
    /// Entries skipped because of their kind.
    pub skipped: usize,
}

/// Replace the contents of `target` with the tarball at `payload`.
///
/// # Errors
///
/// Returns [`ApplyError::Archive`] or [`ApplyError::PathTraversal`] from the
/// pre-scan, leaving `target` untouched. After that point returns
/// [`ApplyError::CleanupFailed`], [`ApplyError::CreateFailed`], or
/// [`ApplyError::Extract`], and `target` may be empty or partially
/// populated.
pub fn apply(target: &Path, payload: &Path) -> Result<ApplySummary, ApplyError> {
    inspect(payload)?;
    remove_existing(target)?;
    fs::create_dir_all(target).map_err(|source| ApplyError::CreateFailed {
        path: target.to_path_buf(),
        source,
    })?;
    let canonical_target =
        fs::canonicalize(target).map_err(|source| ApplyError::CreateFailed {
            path: target.to_path_buf(),
            source,
        })?;
    unpack(payload, &canonical_target)
}

/// Open the payload as a streaming gzip tarball.
fn open_archive(payload: &Path) -> io::Result<tar::Archive<GzDecoder<File>>> {
    Ok(tar::Archive::new(GzDecoder::new(File::open(payload)?)))
}

/// Return true for the entry kinds that are written to disk.
fn is_materialised(kind: tar::EntryType) -> bool {
    kind.is_dir() || kind.is_file()
}

/// Decode the whole payload and validate every materialised entry path.
fn inspect(payload: &Path) -> Result<(), ApplyError> {
    let mut archive = open_archive(payload).map_err(ApplyError::Archive)?;
    for entry in archive.entries().map_err(ApplyError::Archive)? {
        let entry = entry.map_err(ApplyError::Archive)?;
        if is_materialised(entry.header().entry_type()) {
            validate_entry_path(&entry.path().map_err(ApplyError::Archive)?)?;
        }
    }
    Ok(())
}

/// Remove whatever currently sits at `target`.
fn remove_existing(target: &Path) -> Result<(), ApplyError> {
    let cleanup = |source| ApplyError::CleanupFailed {
        path: target.to_path_buf(),
        source,
    };
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(target).map_err(cleanup),
        Ok(_) => fs::remove_file(target).map_err(cleanup),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(cleanup(e)),
    }
}

/// Unpack directories and regular files beneath `canonical_target`.
fn unpack(payload: &Path, canonical_target: &Path) -> Result<ApplySummary, ApplyError> {
    let extract = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ApplyError::Extract { path, source }
    };

    let mut summary = ApplySummary::default();
    let mut archive = open_archive(payload).map_err(extract(canonical_target))?;
    for entry in archive.entries().map_err(extract(canonical_target))? {
        let mut entry = entry.map_err(extract(canonical_target))?;
        let kind = entry.header().entry_type();
        let relative = entry.path().map_err(extract(canonical_target))?.into_owned();

        if !is_materialised(kind) {
            debug!("skipping {kind:?} entry {}", relative.display());
            summary.skipped += 1;
            continue;
        }

        validate_entry_path(&relative)?;
        let dest = canonical_target.join(&relative);

        if kind.is_dir() {
            fs::create_dir_all(&dest).map_err(extract(&dest))?;
            ensure_contained(&dest, canonical_target)?;
            summary.directories += 1;
            continue;
        }

        let parent = dest.parent().unwrap_or(canonical_target);
        fs::create_dir_all(parent).map_err(extract(parent))?;
        ensure_contained(parent, canonical_target)?;
        let mut file = File::create(&dest).map_err(extract(&dest))?;
        io::copy(&mut entry, &mut file).map_err(extract(&dest))?;
        summary.files += 1;
    }

    Ok(summary)
}

/// Validate that a tar entry path does not escape the destination
/// directory via `..` components or absolute paths.
fn validate_entry_path(path: &Path) -> Result<(), ApplyError> {
    let escapes = path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(ApplyError::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

/// Confirm that an existing directory canonicalizes to a path inside the
/// canonical target.
fn ensure_contained(dir: &Path, canonical_target: &Path) -> Result<(), ApplyError> {
    let canonical = fs::canonicalize(dir).map_err(|source| ApplyError::Extract {
        path: dir.to_path_buf(),
        source,
    })?;
    if canonical.starts_with(canonical_target) {
        Ok(())
    } else {
        Err(ApplyError::PathTraversal {
            path: dir.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TarEntry, TreeEntry, snapshot_tree, write_tar_gz};
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn sample_entries() -> Vec<TarEntry<'static>> {
        vec![
            TarEntry::Dir("assets/"),
            TarEntry::File("index.html", b"<h1>hello</h1>"),
            TarEntry::File("assets/app.js", b"console.log(1);"),
            TarEntry::File("assets/img/logo.svg", b"<svg/>"),
            TarEntry::Symlink("escape", "/etc/passwd"),
            TarEntry::Special("pipe", tar::EntryType::Fifo),
        ]
    }

    fn expected_tree() -> BTreeMap<String, TreeEntry> {
        BTreeMap::from([
            ("assets".to_owned(), TreeEntry::Dir),
            ("assets/app.js".to_owned(), TreeEntry::File(b"console.log(1);".to_vec())),
            ("assets/img".to_owned(), TreeEntry::Dir),
            ("assets/img/logo.svg".to_owned(), TreeEntry::File(b"<svg/>".to_vec())),
            ("index.html".to_owned(), TreeEntry::File(b"<h1>hello</h1>".to_vec())),
        ])
    }

    #[test]
    fn reproduces_files_and_directories_and_skips_links() {
        let temp = tempfile::tempdir().expect("temp dir");
        let payload = temp.path().join("payload.tar.gz");
        let target = temp.path().join("site");
        write_tar_gz(&payload, &sample_entries());

        let summary = apply(&target, &payload).expect("apply");

        assert_eq!(snapshot_tree(&target), expected_tree());
        assert_eq!(
            summary,
            ApplySummary {
                files: 3,
                directories: 1,
                skipped: 2,
            }
        );
    }

    #[test]
    fn applying_twice_yields_identical_trees() {
        let temp = tempfile::tempdir().expect("temp dir");
        let payload = temp.path().join("payload.tar.gz");
        let target = temp.path().join("site");
        write_tar_gz(&payload, &sample_entries());

        apply(&target, &payload).expect("first apply");
        let first = snapshot_tree(&target);
        apply(&target, &payload).expect("second apply");

        assert_eq!(snapshot_tree(&target), first);
    }

    #[test]
    fn previous_contents_are_discarded() {
        let temp = tempfile::tempdir().expect("temp dir");
        let payload = temp.path().join("payload.tar.gz");
        let target = temp.path().join("site");
        fs::create_dir_all(target.join("old/nested")).expect("old tree");
        fs::write(target.join("old/nested/stale.txt"), b"stale").expect("stale file");
        write_tar_gz(&payload, &[TarEntry::File("fresh.txt", b"fresh")]);

        apply(&target, &payload).expect("apply");

        assert_eq!(
            snapshot_tree(&target),
            BTreeMap::from([("fresh.txt".to_owned(), TreeEntry::File(b"fresh".to_vec()))])
        );
    }

    #[test]
    fn target_file_is_replaced_by_directory() {
        let temp = tempfile::tempdir().expect("temp dir");
        let payload = temp.path().join("payload.tar.gz");
        let target = temp.path().join("site");
        fs::write(&target, b"not a directory").expect("file at target");
        write_tar_gz(&payload, &[TarEntry::File("a.txt", b"a")]);

        apply(&target, &payload).expect("apply");
        assert!(target.join("a.txt").is_file());
    }

    #[test]
    fn dot_prefixed_entries_land_in_target() {
        let temp = tempfile::tempdir().expect("temp dir");
        let payload = temp.path().join("payload.tar.gz");
        let target = temp.path().join("site");
        write_tar_gz(
            &payload,
            &[TarEntry::Dir("./"), TarEntry::File("./docs/readme.md", b"# hi")],
        );

        apply(&target, &payload).expect("apply");
        assert_eq!(fs::read(target.join("docs/readme.md")).expect("read"), b"# hi");
    }

    #[rstest]
    #[case::parent_dir("../escape.txt")]
    #[case::nested_parent("foo/../../escape.txt")]
    #[case::absolute("/tmp/escape.txt")]
    fn traversal_entries_abort_before_touching_target(#[case] name: &str) {
        let temp = tempfile::tempdir().expect("temp dir");
        let payload = temp.path().join("payload.tar.gz");
        let target = temp.path().join("area/site");
        fs::create_dir_all(&target).expect("target");
        fs::write(target.join("current.txt"), b"live").expect("live file");
        write_tar_gz(
            &payload,
            &[TarEntry::File("ok.txt", b"ok"), TarEntry::RawFile(name, b"evil")],
        );

        let err = apply(&target, &payload).expect_err("traversal");

        assert!(matches!(err, ApplyError::PathTraversal { .. }), "got {err:?}");
        assert_eq!(
            snapshot_tree(&target),
            BTreeMap::from([("current.txt".to_owned(), TreeEntry::File(b"live".to_vec()))])
        );
        assert!(!temp.path().join("area/escape.txt").exists());
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[test]
    fn corrupt_payload_leaves_previous_deployment() {
        let temp = tempfile::tempdir().expect("temp dir");
        let payload = temp.path().join("payload.tar.gz");
        let target = temp.path().join("site");
        fs::create_dir_all(&target).expect("target");
        fs::write(target.join("current.txt"), b"live").expect("live file");
        fs::write(&payload, b"this is not gzip").expect("payload");

        let err = apply(&target, &payload).expect_err("corrupt payload");

        assert!(matches!(err, ApplyError::Archive(_)), "got {err:?}");
        assert!(target.join("current.txt").is_file());
    }

    #[rstest]
    #[case::plain("lib/libfoo.so")]
    #[case::current_dir("./index.html")]
    #[case::dotted_name("..hidden/file")]
    fn accepts_normal_paths(#[case] path: &str) {
        assert!(validate_entry_path(Path::new(path)).is_ok());
    }
}
