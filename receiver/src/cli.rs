//! CLI argument definitions for the deployhook receiver.
//!
//! Kept apart from the binary so the flag surface can be unit tested.

use camino::Utf8PathBuf;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::artefact::download::GithubFetcher;

/// Receive signed deploy webhooks and apply GitHub Actions artefacts.
#[derive(Parser, Debug, Clone)]
#[command(name = "deployhook-receiver")]
#[command(version, about)]
#[command(long_about = concat!(
    "Receive signed deploy webhooks and apply GitHub Actions artefacts.\n\n",
    "Each POST /deploy request names an area from the area table, a project ",
    "below it, and a workflow artefact. The artefact is downloaded, its ",
    "minisign signature checked against the trusted public key, and the ",
    "project directory replaced with the artefact's contents.\n\n",
    "Set RUST_LOG to adjust log verbosity (default: info).",
))]
pub struct Cli {
    /// Socket address to listen on.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// JSON file mapping area names to absolute base directories.
    #[arg(long, value_name = "FILE", default_value = "areas.json")]
    pub areas: Utf8PathBuf,

    /// Trusted minisign public key.
    #[arg(long, value_name = "FILE", default_value = "minisign.pub")]
    pub public_key: Utf8PathBuf,

    /// Base URL of the GitHub REST API.
    #[arg(long, value_name = "URL", default_value = GithubFetcher::DEFAULT_API_BASE)]
    pub api_url: String,

    /// Timeout for each outbound request, in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub timeout: u64,

    /// Directory for per-request scratch files [default: system temp dir].
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<Utf8PathBuf>,
}

impl Cli {
    /// Return the outbound request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}
