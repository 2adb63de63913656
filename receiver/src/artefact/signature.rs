//! Minisign detached signature verification.
//!
//! Deploy requests carry a base64-encoded minisign signature file for the
//! `.tar.gz` payload. Verification is the only trust boundary in the
//! pipeline: nothing is extracted unless the payload was signed by the key
//! the operator installed locally.
//!
//! Both signature algorithms minisign emits are understood. `Ed` signs the
//! payload bytes directly; `ED` signs their BLAKE2b-512 digest. The global
//! signature over the trusted comment is always checked as well.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use blake2::Blake2b512;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Algorithm identifier for keys and legacy signatures over raw bytes.
const ALG_LEGACY: [u8; 2] = *b"Ed";

/// Algorithm identifier for signatures over the BLAKE2b-512 digest.
const ALG_PREHASHED: [u8; 2] = *b"ED";

const UNTRUSTED_PREFIX: &str = "untrusted comment:";
const TRUSTED_PREFIX: &str = "trusted comment: ";

/// Errors arising from signature verification.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The request's signature field is not valid base64.
    #[error("invalid base64 signature: {0}")]
    BadSignatureEncoding(#[from] base64::DecodeError),

    /// The locally configured public key could not be parsed.
    #[error("invalid public key: {reason}")]
    BadPublicKey {
        /// Description of the parse failure.
        reason: String,
    },

    /// The decoded signature is not a minisign signature file.
    #[error("invalid signature format: {reason}")]
    BadSignatureFormat {
        /// Description of the parse failure.
        reason: String,
    },

    /// The signature does not match the payload or trusted comment.
    #[error("signature does not match payload")]
    SignatureInvalid,

    /// The signature cannot be checked against the configured key.
    #[error("signature verification error: {reason}")]
    VerificationError {
        /// Description of the incompatibility.
        reason: String,
    },

    /// The payload could not be read.
    #[error("failed to read payload: {0}")]
    Io(#[from] io::Error),
}

/// Eight-byte identifier minisign attaches to keys and signatures.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyId([u8; 8]);

impl fmt::Display for KeyId {
    /// Format the identifier the way `minisign` prints it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // minisign stores the id little-endian and prints it as a u64.
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({self})")
    }
}

/// A trusted minisign public key.
#[derive(Debug, Clone)]
pub struct PublicKey {
    key_id: KeyId,
    key: VerifyingKey,
}

impl PublicKey {
    /// Parse the contents of a `minisign.pub` file.
    ///
    /// The leading `untrusted comment:` line is optional, so a bare base64
    /// key line is accepted too.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::BadPublicKey`] when the material is not a
    /// base64 Ed25519 minisign key.
    pub fn parse(material: &[u8]) -> Result<Self, SignatureError> {
        let text = std::str::from_utf8(material).map_err(|_| bad_key("key is not UTF-8"))?;
        let line = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with(UNTRUSTED_PREFIX))
            .ok_or_else(|| bad_key("no key line found"))?;
        let raw = STANDARD
            .decode(line)
            .map_err(|e| bad_key(format!("key is not base64: {e}")))?;

        let (algorithm, rest) = raw
            .split_first_chunk::<2>()
            .ok_or_else(|| bad_key("key is truncated"))?;
        if *algorithm != ALG_LEGACY {
            return Err(bad_key("unsupported key algorithm"));
        }
        let (key_id, key) = rest
            .split_first_chunk::<8>()
            .ok_or_else(|| bad_key("key is truncated"))?;
        let key: &[u8; 32] = key
            .try_into()
            .map_err(|_| bad_key(format!("expected 32 key bytes, found {}", key.len())))?;
        let key = VerifyingKey::from_bytes(key).map_err(|e| bad_key(e.to_string()))?;

        Ok(Self {
            key_id: KeyId(*key_id),
            key,
        })
    }

    /// Return the key identifier.
    #[must_use]
    pub fn key_id(&self) -> KeyId {
        self.key_id
    }
}

/// A parsed minisign signature file.
#[derive(Debug, Clone)]
pub struct MinisignSignature {
    algorithm: [u8; 2],
    key_id: KeyId,
    signature: Signature,
    trusted_comment: String,
    global_signature: Signature,
}

impl MinisignSignature {
    /// Parse the four-line text of a `.minisig` file.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::BadSignatureFormat`] when a line is missing
    /// or malformed.
    pub fn parse(raw: &[u8]) -> Result<Self, SignatureError> {
        let text =
            std::str::from_utf8(raw).map_err(|_| bad_format("signature is not UTF-8 text"))?;
        let mut lines = text.lines().map(|line| line.trim_end_matches('\r'));

        let untrusted = lines.next().unwrap_or_default();
        if !untrusted.starts_with(UNTRUSTED_PREFIX) {
            return Err(bad_format("missing untrusted comment"));
        }

        let blob = decode_line(lines.next(), "signature")?;
        let (algorithm, rest) = blob
            .split_first_chunk::<2>()
            .ok_or_else(|| bad_format("signature is truncated"))?;
        let (key_id, signature) = rest
            .split_first_chunk::<8>()
            .ok_or_else(|| bad_format("signature is truncated"))?;
        let signature = signature_from(signature, "signature")?;

        let trusted_comment = lines
            .next()
            .and_then(|line| line.strip_prefix(TRUSTED_PREFIX))
            .ok_or_else(|| bad_format("missing trusted comment"))?
            .to_owned();

        let global = decode_line(lines.next(), "global signature")?;
        let global_signature = signature_from(&global, "global signature")?;

        Ok(Self {
            algorithm: *algorithm,
            key_id: KeyId(*key_id),
            signature,
            trusted_comment,
            global_signature,
        })
    }

    /// Return the trusted comment the signer attached.
    #[must_use]
    pub fn trusted_comment(&self) -> &str {
        &self.trusted_comment
    }
}

/// Facts about a payload that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayload {
    /// Lowercase hex SHA-256 digest of the payload, for audit logs.
    pub sha256: String,
    /// The signer's trusted comment.
    pub trusted_comment: String,
}

/// Verify `base64_signature` over the file at `payload` against
/// `public_key_material`.
///
/// Checks run in a fixed order: signature encoding, public key, signature
/// format, then the cryptographic checks over the complete payload bytes.
///
/// # Errors
///
/// Returns the [`SignatureError`] variant for the first check that fails.
pub fn verify_file(
    payload: &Path,
    base64_signature: &str,
    public_key_material: &[u8],
) -> Result<VerifiedPayload, SignatureError> {
    let decoded = STANDARD.decode(base64_signature.trim())?;
    let key = PublicKey::parse(public_key_material)?;
    let signature = MinisignSignature::parse(&decoded)?;
    verify_payload(payload, &key, &signature)
}

/// Check a parsed signature against the payload file.
///
/// # Errors
///
/// Returns [`SignatureError::VerificationError`] for an unknown algorithm or
/// a key id mismatch, [`SignatureError::SignatureInvalid`] when either
/// Ed25519 check fails, and [`SignatureError::Io`] if the payload cannot be
/// read.
pub fn verify_payload(
    payload: &Path,
    key: &PublicKey,
    signature: &MinisignSignature,
) -> Result<VerifiedPayload, SignatureError> {
    if signature.key_id != key.key_id {
        return Err(SignatureError::VerificationError {
            reason: format!(
                "signature made with key {}, trusted key is {}",
                signature.key_id, key.key_id
            ),
        });
    }

    let (message, sha256) = match signature.algorithm {
        ALG_LEGACY => {
            let data = std::fs::read(payload)?;
            let sha256 = format!("{:x}", Sha256::digest(&data));
            (data, sha256)
        }
        ALG_PREHASHED => {
            let (blake, sha256) = hash_file(payload)?;
            (blake, sha256)
        }
        other => {
            return Err(SignatureError::VerificationError {
                reason: format!(
                    "unsupported signature algorithm {:?}",
                    String::from_utf8_lossy(&other)
                ),
            });
        }
    };

    key.key
        .verify(&message, &signature.signature)
        .map_err(|_| SignatureError::SignatureInvalid)?;

    let mut global_message = signature.signature.to_bytes().to_vec();
    global_message.extend_from_slice(signature.trusted_comment.as_bytes());
    key.key
        .verify(&global_message, &signature.global_signature)
        .map_err(|_| SignatureError::SignatureInvalid)?;

    Ok(VerifiedPayload {
        sha256,
        trusted_comment: signature.trusted_comment.clone(),
    })
}

/// Stream the file once, returning its BLAKE2b-512 digest and SHA-256 hex.
fn hash_file(path: &Path) -> io::Result<(Vec<u8>, String)> {
    let mut file = File::open(path)?;
    let mut blake = Blake2b512::new();
    let mut sha = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        let chunk = buffer.get(..bytes_read).unwrap_or_default();
        blake.update(chunk);
        sha.update(chunk);
    }
    Ok((blake.finalize().to_vec(), format!("{:x}", sha.finalize())))
}

fn decode_line(line: Option<&str>, what: &str) -> Result<Vec<u8>, SignatureError> {
    let line = line.ok_or_else(|| bad_format(format!("missing {what} line")))?;
    STANDARD
        .decode(line.trim())
        .map_err(|e| bad_format(format!("{what} is not base64: {e}")))
}

fn signature_from(bytes: &[u8], what: &str) -> Result<Signature, SignatureError> {
    let bytes: &[u8; 64] = bytes
        .try_into()
        .map_err(|_| bad_format(format!("{what} must be 64 bytes, found {}", bytes.len())))?;
    Ok(Signature::from_bytes(bytes))
}

fn bad_key(reason: impl Into<String>) -> SignatureError {
    SignatureError::BadPublicKey {
        reason: reason.into(),
    }
}

fn bad_format(reason: impl Into<String>) -> SignatureError {
    SignatureError::BadSignatureFormat {
        reason: reason.into(),
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
