//! The deploy pipeline.
//!
//! A deploy runs strictly in sequence: resolve the target path, fetch the
//! artefact, unwrap the `.tar.gz` payload from its zip container, verify the
//! payload's minisign signature, and replace the target directory with the
//! payload's contents. The first failing stage ends the run and is reported
//! as a [`DeployError`] tagged with that stage.
//!
//! Intermediate files live in a per-request scratch directory that is
//! removed when [`run_deploy`] returns, whatever the outcome. Nothing under
//! the target is touched unless verification succeeded.

use log::{debug, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::area::{AreaTable, ResolveError};
use crate::artefact::container::{self, ContainerError};
use crate::artefact::download::{ArtefactFetcher, FetchError};
use crate::artefact::extraction::{self, ApplyError};
use crate::artefact::signature::{self, SignatureError};
use crate::locks::TargetLocks;
use crate::request::DeployRequest;

/// File name of the raw download inside the scratch directory.
const DOWNLOAD_NAME: &str = "artefact.zip";

/// File name of the unwrapped payload inside the scratch directory.
const PAYLOAD_NAME: &str = "payload.tar.gz";

/// Stages a deploy request passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStage {
    /// The request body was parsed.
    Received,
    /// The target directory was resolved inside its area.
    PathResolved,
    /// The artefact was downloaded to scratch.
    Fetched,
    /// The `.tar.gz` payload is available on its own.
    Unwrapped,
    /// The payload's signature was accepted.
    Verified,
    /// The target directory holds the new deployment.
    Applied,
    /// The deploy finished.
    Succeeded,
}

impl fmt::Display for DeployStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::PathResolved => "path resolved",
            Self::Fetched => "fetched",
            Self::Unwrapped => "unwrapped",
            Self::Verified => "verified",
            Self::Applied => "applied",
            Self::Succeeded => "succeeded",
        };
        f.write_str(name)
    }
}

/// A deploy failure, tagged with the stage that produced it.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The target path could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The artefact could not be downloaded.
    #[error("failed to download artifact: {0}")]
    Fetch(#[from] FetchError),

    /// The payload could not be taken out of its container.
    #[error("failed to unwrap artifact: {0}")]
    Unwrap(#[from] ContainerError),

    /// The payload signature was rejected.
    #[error("signature verification failed: {0}")]
    Verify(#[from] SignatureError),

    /// The payload could not be applied to the target.
    #[error("{}: {source}", apply_prefix(.source))]
    Apply {
        /// The underlying applier error.
        #[from]
        source: ApplyError,
    },
}

impl DeployError {
    /// Return the last stage that completed before the failure.
    #[must_use]
    pub fn stage(&self) -> DeployStage {
        match self {
            Self::Resolve(_) => DeployStage::Received,
            Self::Fetch(_) => DeployStage::PathResolved,
            Self::Unwrap(_) => DeployStage::Fetched,
            Self::Verify(_) => DeployStage::Unwrapped,
            Self::Apply { .. } => DeployStage::Verified,
        }
    }

    /// Return the HTTP status code reported for this failure.
    ///
    /// Resolution failures are the caller's fault (400) and rejected
    /// signatures are refused (403). Reading the payload during
    /// verification and every other stage fail as server errors (500).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Resolve(_) => 400,
            Self::Verify(SignatureError::Io(_)) => 500,
            Self::Verify(_) => 403,
            Self::Fetch(_) | Self::Unwrap(_) | Self::Apply { .. } => 500,
        }
    }
}

fn apply_prefix(error: &ApplyError) -> &'static str {
    match error {
        ApplyError::CleanupFailed { .. } => "failed to remove old project folder",
        ApplyError::CreateFailed { .. } => "failed to create project folder",
        ApplyError::PathTraversal { .. }
        | ApplyError::Archive(_)
        | ApplyError::Extract { .. } => "failed to extract artifact",
    }
}

/// Configuration shared by every deploy.
///
/// Built once at startup and never mutated afterwards, apart from the lock
/// registry's internal bookkeeping.
#[derive(Debug, Default)]
pub struct DeployContext {
    /// Areas deploys may write beneath.
    pub areas: AreaTable,
    /// Contents of the trusted `minisign.pub` file.
    pub public_key: Vec<u8>,
    /// Parent directory for per-request scratch directories. `None` uses
    /// the system temporary directory.
    pub scratch_root: Option<PathBuf>,
    /// Serializes directory replacement per target.
    pub locks: TargetLocks,
}

impl DeployContext {
    /// Create a context with the system temporary directory as scratch root.
    #[must_use]
    pub fn new(areas: AreaTable, public_key: Vec<u8>) -> Self {
        Self {
            areas,
            public_key,
            scratch_root: None,
            locks: TargetLocks::new(),
        }
    }

    /// Place per-request scratch directories beneath `root`.
    #[must_use]
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    fn scratch_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("deployhook-");
        match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

/// Run one deploy request through every stage.
///
/// Returns the resolved target directory on success.
///
/// # Errors
///
/// Returns the [`DeployError`] of the first failing stage. Failures before
/// the apply stage leave the target directory untouched.
pub fn run_deploy(
    ctx: &DeployContext,
    fetcher: &dyn ArtefactFetcher,
    request: &DeployRequest,
) -> Result<PathBuf, DeployError> {
    debug!("deploy {}: {request:?}", DeployStage::Received);

    // Step 1: Resolve the target inside its area.
    let target = ctx.areas.resolve(&request.area, &request.project)?;
    info!(
        "deploying project '{}' to '{}'",
        request.project,
        target.display()
    );
    transition(DeployStage::PathResolved, &target);

    // Step 2: Download into a scratch directory removed on every return.
    let scratch = ctx.scratch_dir().map_err(FetchError::Io)?;
    let download = scratch.path().join(DOWNLOAD_NAME);
    fetcher.fetch(&request.coordinates(), &request.github_token, &download)?;
    transition(DeployStage::Fetched, &target);

    // Step 3: Take the payload out of its zip wrapper when there is one.
    let payload = unwrap_payload(&download, scratch.path())?;
    transition(DeployStage::Unwrapped, &target);

    // Step 4: Verify the payload against the trusted key.
    let verified = signature::verify_file(&payload, &request.signature, &ctx.public_key)
        .inspect_err(|e| warn!("rejected artefact {}: {e}", request.artifact_id))?;
    info!(
        "verified artefact {} sha256={} comment={:?}",
        request.artifact_id, verified.sha256, verified.trusted_comment
    );
    transition(DeployStage::Verified, &target);

    // Step 5: Replace the target while holding its lock.
    let summary = ctx
        .locks
        .with_lock(&target, || extraction::apply(&target, &payload))?;
    debug!(
        "applied {} files and {} directories, skipped {} entries",
        summary.files, summary.directories, summary.skipped
    );
    transition(DeployStage::Applied, &target);

    info!("deployment complete: {}", target.display());
    transition(DeployStage::Succeeded, &target);
    Ok(target)
}

fn transition(stage: DeployStage, target: &Path) {
    debug!("deploy {stage}: {}", target.display());
}

/// Return the path of the `.tar.gz` payload for a fetched artefact.
fn unwrap_payload(download: &Path, scratch: &Path) -> Result<PathBuf, ContainerError> {
    if !container::is_zip_container(download)? {
        debug!("artefact is not a zip container; using it as the payload");
        return Ok(download.to_path_buf());
    }
    let payload = scratch.join(PAYLOAD_NAME);
    container::unwrap_tar_gz(download, &payload)?;
    Ok(payload)
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
