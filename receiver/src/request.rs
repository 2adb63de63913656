//! Deploy request payload.

use crate::artefact::download::ArtefactCoordinates;
use serde::Deserialize;
use std::fmt;

/// JSON body of a `POST /deploy` request.
///
/// Absent fields deserialize as empty strings; each pipeline stage decides
/// whether an empty value is acceptable.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeployRequest {
    /// Name of the configured area to deploy into.
    pub area: String,
    /// Project path relative to the area base.
    pub project: String,
    /// Repository owner on GitHub.
    pub owner: String,
    /// Repository name on GitHub.
    pub repo: String,
    /// Numeric workflow artefact identifier.
    pub artifact_id: String,
    /// Token authorising the artefact download.
    pub github_token: String,
    /// Base64-encoded minisign signature of the `.tar.gz` payload.
    pub signature: String,
}

impl DeployRequest {
    /// Return the artefact coordinates named by this request.
    #[must_use]
    pub fn coordinates(&self) -> ArtefactCoordinates {
        ArtefactCoordinates {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            artifact_id: self.artifact_id.clone(),
        }
    }
}

impl fmt::Debug for DeployRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployRequest")
            .field("area", &self.area)
            .field("project", &self.project)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("artifact_id", &self.artifact_id)
            .field("github_token", &redacted(&self.github_token))
            .field("signature", &redacted(&self.signature))
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "<empty>" } else { "<redacted>" }
}
