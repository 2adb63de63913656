//! Shared test utilities for the receiver crate.
//!
//! Builds `.tar.gz` payloads, wraps them in zip containers the way GitHub
//! exports artefacts, and signs them with a deterministic minisign key.
#![allow(
    clippy::expect_used,
    reason = "test fixtures abort the test on setup failure"
)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use blake2::{Blake2b512, Digest};
use ed25519_dalek::{Signer, SigningKey};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tar::{EntryType, Header};

/// Trusted comment embedded in every test signature.
pub const TRUSTED_COMMENT: &str = "timestamp:1760000000\tfile:payload.tar.gz\thashed";

/// An entry to place in a test tarball.
#[derive(Debug, Clone, Copy)]
pub enum TarEntry<'a> {
    /// A directory.
    Dir(&'a str),
    /// A regular file with the given content.
    File(&'a str, &'a [u8]),
    /// A symbolic link pointing at the second field.
    Symlink(&'a str, &'a str),
    /// A non-file, non-directory entry such as a FIFO or device node.
    Special(&'a str, EntryType),
    /// A regular file whose name is written verbatim, bypassing the `tar`
    /// crate's path sanitisation, so traversal names can be produced.
    RawFile(&'a str, &'a [u8]),
}

/// Write a gzip-compressed tarball containing `entries` to `path`.
///
/// # Panics
///
/// Panics if the archive cannot be written.
pub fn write_tar_gz(path: &Path, entries: &[TarEntry<'_>]) {
    let file = File::create(path).expect("create tarball");
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for entry in entries {
        append_entry(&mut builder, *entry);
    }
    let encoder = builder.into_inner().expect("tar finish");
    encoder.finish().expect("gzip finish");
}

fn append_entry<W: Write>(builder: &mut tar::Builder<W>, entry: TarEntry<'_>) {
    let mut header = Header::new_gnu();
    match entry {
        TarEntry::Dir(name) => {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder
                .append_data(&mut header, name, io::empty())
                .expect("append dir");
        }
        TarEntry::File(name, data) => {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(data.len() as u64);
            builder
                .append_data(&mut header, name, data)
                .expect("append file");
        }
        TarEntry::Symlink(name, target) => {
            header.set_entry_type(EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            header.set_link_name(target).expect("link name");
            builder
                .append_data(&mut header, name, io::empty())
                .expect("append symlink");
        }
        TarEntry::Special(name, kind) => {
            header.set_entry_type(kind);
            header.set_mode(0o644);
            header.set_size(0);
            builder
                .append_data(&mut header, name, io::empty())
                .expect("append special");
        }
        TarEntry::RawFile(name, data) => {
            let mut header = Header::new_old();
            let raw_name = name.as_bytes();
            header
                .as_old_mut()
                .name
                .get_mut(..raw_name.len())
                .expect("name fits in header")
                .copy_from_slice(raw_name);
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder.append(&header, data).expect("append raw file");
        }
    }
}

/// Write a zip archive containing `entries` to `path`.
///
/// # Panics
///
/// Panics if the archive cannot be written.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(File::create(path).expect("create zip"));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).expect("start zip entry");
        writer.write_all(data).expect("write zip entry");
    }
    writer.finish().expect("finish zip");
}

/// A deterministic minisign key pair for tests.
pub struct TestSigner {
    signing_key: SigningKey,
    key_id: [u8; 8],
}

impl TestSigner {
    /// Derive a key pair and key id from `seed`.
    #[must_use]
    pub fn from_seed(seed: u8) -> Self {
        Self::with_key_id(seed, [seed; 8])
    }

    /// Derive a key pair from `seed` but advertise `key_id`.
    #[must_use]
    pub fn with_key_id(seed: u8, key_id: [u8; 8]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&[seed; 32]),
            key_id,
        }
    }

    /// Render the `minisign.pub` file for this key.
    #[must_use]
    pub fn public_key_file(&self) -> String {
        let mut raw = b"Ed".to_vec();
        raw.extend_from_slice(&self.key_id);
        raw.extend_from_slice(&self.signing_key.verifying_key().to_bytes());
        format!(
            "untrusted comment: minisign public key\n{}\n",
            STANDARD.encode(raw)
        )
    }

    /// Render the `.minisig` text for `data`.
    ///
    /// `prehashed` selects the `ED` algorithm (BLAKE2b-512 digest) over the
    /// legacy `Ed` algorithm (raw bytes).
    #[must_use]
    pub fn minisig(&self, data: &[u8], prehashed: bool) -> String {
        let (algorithm, message) = if prehashed {
            (b"ED", Blake2b512::digest(data).to_vec())
        } else {
            (b"Ed", data.to_vec())
        };
        let signature = self.signing_key.sign(&message);

        let mut blob = algorithm.to_vec();
        blob.extend_from_slice(&self.key_id);
        blob.extend_from_slice(&signature.to_bytes());

        let mut global_message = signature.to_bytes().to_vec();
        global_message.extend_from_slice(TRUSTED_COMMENT.as_bytes());
        let global = self.signing_key.sign(&global_message);

        format!(
            "untrusted comment: signature from minisign secret key\n{}\ntrusted comment: {TRUSTED_COMMENT}\n{}\n",
            STANDARD.encode(blob),
            STANDARD.encode(global.to_bytes())
        )
    }

    /// Return the base64 request field for a prehashed signature of `data`.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> String {
        STANDARD.encode(self.minisig(data, true))
    }

    /// Return the base64 request field for the file at `path`.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be read.
    #[must_use]
    pub fn sign_file(&self, path: &Path) -> String {
        self.sign(&fs::read(path).expect("read file to sign"))
    }
}

/// A zip artefact wrapping a signed tarball.
#[derive(Debug, Clone)]
pub struct SignedArtefact {
    /// The zip container as GitHub would serve it.
    pub container: PathBuf,
    /// The `.tar.gz` payload inside the container.
    pub payload: PathBuf,
    /// Base64 request field signing the payload.
    pub signature: String,
}

/// Build `payload.tar.gz` from `entries`, sign it, and wrap it in
/// `artefact.zip`, all inside `dir`.
///
/// # Panics
///
/// Panics if any file cannot be written.
#[must_use]
pub fn signed_artefact(
    dir: &Path,
    signer: &TestSigner,
    entries: &[TarEntry<'_>],
) -> SignedArtefact {
    let payload = dir.join("payload.tar.gz");
    let container = dir.join("artefact.zip");
    write_tar_gz(&payload, entries);
    let bytes = fs::read(&payload).expect("read payload");
    write_zip(&container, &[("site.tar.gz", bytes.as_slice())]);
    SignedArtefact {
        container,
        payload,
        signature: signer.sign(&bytes),
    }
}

/// A node observed by [`snapshot_tree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEntry {
    /// A directory.
    Dir,
    /// A regular file and its content.
    File(Vec<u8>),
    /// Anything else, including symlinks.
    Other,
}

/// Record every path beneath `root`, keyed by `/`-separated relative path.
///
/// Symlinks are reported as [`TreeEntry::Other`] and never followed.
///
/// # Panics
///
/// Panics if the tree cannot be read.
#[must_use]
pub fn snapshot_tree(root: &Path) -> BTreeMap<String, TreeEntry> {
    let mut entries = BTreeMap::new();
    walk(root, "", &mut entries);
    entries
}

fn walk(dir: &Path, prefix: &str, entries: &mut BTreeMap<String, TreeEntry>) {
    for item in fs::read_dir(dir).expect("read dir") {
        let item = item.expect("dir entry");
        let name = item.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        let file_type = item.file_type().expect("file type");
        if file_type.is_dir() {
            entries.insert(relative.clone(), TreeEntry::Dir);
            walk(&item.path(), &relative, entries);
        } else if file_type.is_file() {
            let content = fs::read(item.path()).expect("read file");
            entries.insert(relative, TreeEntry::File(content));
        } else {
            entries.insert(relative, TreeEntry::Other);
        }
    }
}
