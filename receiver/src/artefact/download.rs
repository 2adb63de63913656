//! Artefact download from the GitHub Actions REST API.
//!
//! Provides a trait-based abstraction for fetching workflow artefacts so the
//! pipeline can be tested without network access. The HTTP implementation
//! follows the single `302 Found` hop GitHub issues towards its signed blob
//! storage URL and streams the body straight to disk.

use log::debug;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

/// Media type GitHub expects on REST API requests.
const GITHUB_ACCEPT: &str = "application/vnd.github+json";

/// Largest error body kept for diagnostics.
const MAX_ERROR_BODY: u64 = 16 * 1024;

/// Repository coordinates and identifier of a workflow artefact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtefactCoordinates {
    /// Repository owner (user or organisation).
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Numeric artefact identifier.
    pub artifact_id: String,
}

/// Trait for fetching an artefact into a local file.
///
/// Abstractions allow tests to mock HTTP behaviour without network access.
#[cfg_attr(test, mockall::automock)]
pub trait ArtefactFetcher {
    /// Fetch the artefact at `coordinates` and write its bytes to `dest`.
    ///
    /// The caller owns `dest` and is responsible for removing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is incomplete, the host refuses it,
    /// or the body cannot be written.
    fn fetch(
        &self,
        coordinates: &ArtefactCoordinates,
        token: &str,
        dest: &Path,
    ) -> Result<(), FetchError>;
}

/// Errors arising from artefact download operations.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// A required credential or coordinate was empty.
    #[error("missing {field}")]
    MissingCredential {
        /// Name of the empty field.
        field: &'static str,
    },

    /// A coordinate contains characters that cannot appear in a URL path.
    #[error("invalid {field}: {value:?}")]
    InvalidCoordinate {
        /// Name of the rejected field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The host answered with a status other than the expected ones.
    #[error("HTTP {status} from {url}: {body}")]
    FetchFailed {
        /// The URL that was requested, without its query string.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The (possibly truncated) response body.
        body: String,
    },

    /// The host redirected without a `Location` header.
    #[error("artefact redirect location missing from {url}")]
    RedirectLocationMissing {
        /// The URL that issued the redirect.
        url: String,
    },

    /// The redirect target redirected again; only one hop is supported.
    #[error("unsupported second redirect from {url}")]
    TooManyRedirects {
        /// The redirect target that answered with another redirect.
        url: String,
    },

    /// The HTTP exchange failed before a status was received.
    #[error("request to {url} failed: {reason}")]
    Http {
        /// The URL that was requested, without its query string.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// I/O error writing the downloaded file.
    #[error("I/O error writing download: {0}")]
    Io(#[from] io::Error),
}

/// HTTP-based fetcher using `ureq` against the GitHub REST API.
#[derive(Clone)]
pub struct GithubFetcher {
    api_base: String,
    agent: ureq::Agent,
}

impl GithubFetcher {
    /// Public GitHub REST API endpoint.
    pub const DEFAULT_API_BASE: &'static str = "https://api.github.com";

    /// Create a fetcher for the API rooted at `api_base`.
    ///
    /// Every request, including the redirected download, is bounded by
    /// `timeout`.
    #[must_use]
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .max_redirects(0)
            .max_redirects_will_error(false)
            .http_status_as_error(false)
            .build();
        Self {
            api_base: api_base.into(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    /// Construct the artefact download URL for `coordinates`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use deployhook_receiver::artefact::download::{ArtefactCoordinates, GithubFetcher};
    ///
    /// let fetcher = GithubFetcher::new("https://api.github.com/", Duration::from_secs(5));
    /// let coordinates = ArtefactCoordinates {
    ///     owner: "acme".to_owned(),
    ///     repo: "site".to_owned(),
    ///     artifact_id: "42".to_owned(),
    /// };
    /// assert_eq!(
    ///     fetcher.artefact_url(&coordinates),
    ///     "https://api.github.com/repos/acme/site/actions/artifacts/42/zip"
    /// );
    /// ```
    #[must_use]
    pub fn artefact_url(&self, coordinates: &ArtefactCoordinates) -> String {
        format!(
            "{}/repos/{}/{}/actions/artifacts/{}/zip",
            self.api_base.trim_end_matches('/'),
            coordinates.owner,
            coordinates.repo,
            coordinates.artifact_id
        )
    }

    /// Issue the unauthenticated request to the redirect target.
    fn follow_redirect(
        &self,
        origin: &str,
        response: &ureq::http::Response<ureq::Body>,
    ) -> Result<ureq::http::Response<ureq::Body>, FetchError> {
        let location = response
            .headers()
            .get("location")
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| FetchError::RedirectLocationMissing {
                url: without_query(origin).to_owned(),
            })?;

        debug!("following artefact redirect from {}", without_query(origin));
        let redirected = self
            .agent
            .get(location)
            .call()
            .map_err(|e| map_ureq_error(location, &e))?;

        match redirected.status().as_u16() {
            200 => Ok(redirected),
            300..=399 => Err(FetchError::TooManyRedirects {
                url: without_query(location).to_owned(),
            }),
            status => Err(unexpected_status(location, status, redirected)),
        }
    }
}

impl ArtefactFetcher for GithubFetcher {
    fn fetch(
        &self,
        coordinates: &ArtefactCoordinates,
        token: &str,
        dest: &Path,
    ) -> Result<(), FetchError> {
        validate_request(coordinates, token)?;

        let url = self.artefact_url(coordinates);
        debug!("requesting artefact {} from {url}", coordinates.artifact_id);
        let response = self
            .agent
            .get(url.as_str())
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", GITHUB_ACCEPT)
            .call()
            .map_err(|e| map_ureq_error(&url, &e))?;

        let response = match response.status().as_u16() {
            200 => response,
            302 => self.follow_redirect(&url, &response)?,
            status => return Err(unexpected_status(&url, status, response)),
        };

        let mut file = File::create(dest)?;
        let written = io::copy(&mut response.into_body().as_reader(), &mut file)?;
        debug!("downloaded artefact {} ({written} bytes)", coordinates.artifact_id);
        Ok(())
    }
}

/// Reject empty credentials and coordinates unsafe for URL interpolation.
fn validate_request(coordinates: &ArtefactCoordinates, token: &str) -> Result<(), FetchError> {
    if token.is_empty() {
        return Err(FetchError::MissingCredential {
            field: "GitHub token",
        });
    }
    for (field, value) in [("owner", &coordinates.owner), ("repo", &coordinates.repo)] {
        if value.is_empty() {
            return Err(FetchError::MissingCredential { field });
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            || value == "."
            || value == ".."
        {
            return Err(FetchError::InvalidCoordinate {
                field,
                value: value.clone(),
            });
        }
    }
    let id = &coordinates.artifact_id;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(FetchError::InvalidCoordinate {
            field: "artifact id",
            value: id.clone(),
        });
    }
    Ok(())
}

/// Build a [`FetchError::FetchFailed`], keeping a bounded slice of the body.
fn unexpected_status(
    url: &str,
    status: u16,
    response: ureq::http::Response<ureq::Body>,
) -> FetchError {
    let mut raw = Vec::new();
    let body = match response
        .into_body()
        .as_reader()
        .take(MAX_ERROR_BODY)
        .read_to_end(&mut raw)
    {
        Ok(_) => String::from_utf8_lossy(&raw).trim().to_owned(),
        Err(e) => format!("<unreadable body: {e}>"),
    };
    FetchError::FetchFailed {
        url: without_query(url).to_owned(),
        status,
        body,
    }
}

/// Map a ureq transport error to a [`FetchError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> FetchError {
    match err {
        ureq::Error::StatusCode(status) => FetchError::FetchFailed {
            url: without_query(url).to_owned(),
            status: *status,
            body: String::new(),
        },
        other => FetchError::Http {
            url: without_query(url).to_owned(),
            reason: other.to_string(),
        },
    }
}

/// Strip the query string, which carries the signed blob credentials.
fn without_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(head, _)| head)
}
