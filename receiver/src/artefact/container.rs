//! Payload lookup inside GitHub's zip artefact exports.
//!
//! GitHub wraps every uploaded workflow artefact in a zip archive. Deploy
//! artefacts carry a single `.tar.gz` payload inside that wrapper; this
//! module finds it and copies it out to its own file.

use log::debug;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// File name suffix identifying the deploy payload.
pub const PAYLOAD_SUFFIX: &str = ".tar.gz";

/// Local file header signature that starts a non-empty zip archive.
const ZIP_LOCAL_HEADER: [u8; 4] = *b"PK\x03\x04";

/// End-of-central-directory signature that starts an empty zip archive.
const ZIP_EMPTY_ARCHIVE: [u8; 4] = *b"PK\x05\x06";

/// Errors arising from container unwrapping.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// No entry with the payload suffix exists in the container.
    #[error(".tar.gz not found in ZIP")]
    PayloadNotFound,

    /// The container is not a readable zip archive.
    #[error("invalid ZIP container: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error reading the container or writing the payload.
    #[error("container I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Return true when the file at `path` starts with a zip signature.
///
/// Files shorter than a signature are not containers.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub fn is_zip_container(path: &Path) -> io::Result<bool> {
    let mut magic = [0u8; 4];
    match File::open(path)?.read_exact(&mut magic) {
        Ok(()) => Ok(magic == ZIP_LOCAL_HEADER || magic == ZIP_EMPTY_ARCHIVE),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Copy the first `.tar.gz` entry of the zip at `container` to `dest`.
///
/// Entries are scanned in their stored order and the first regular file
/// whose name ends in [`PAYLOAD_SUFFIX`] wins, even if later entries match
/// too. Returns the name of the extracted entry.
///
/// # Errors
///
/// Returns [`ContainerError::PayloadNotFound`] when no entry matches,
/// [`ContainerError::Zip`] for malformed archives, and
/// [`ContainerError::Io`] on I/O failures.
pub fn unwrap_tar_gz(container: &Path, dest: &Path) -> Result<String, ContainerError> {
    let mut archive = zip::ZipArchive::new(File::open(container)?)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if !entry.is_file() || !entry.name().ends_with(PAYLOAD_SUFFIX) {
            continue;
        }
        let name = entry.name().to_owned();
        let mut out = File::create(dest)?;
        let copied = io::copy(&mut entry, &mut out)?;
        debug!("unwrapped payload {name} ({copied} bytes)");
        return Ok(name);
    }

    Err(ContainerError::PayloadNotFound)
}
