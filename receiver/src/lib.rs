//! Deployhook receiver library.
//!
//! This crate implements a continuous-deployment webhook receiver: it accepts
//! a signed deploy request, downloads the referenced GitHub Actions artefact,
//! verifies its minisign signature, and replaces a sandboxed directory with
//! the artefact's contents. The `deployhook-receiver` binary wires these
//! pieces to an HTTP listener; tests drive them directly.
//!
//! # Modules
//!
//! - [`area`] - Area table lookup and canonical path containment
//! - [`artefact`] - Artefact download, unwrapping, verification, and extraction
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - Startup configuration loading
//! - [`locks`] - Per-target mutual exclusion for directory replacement
//! - [`pipeline`] - The sequential deploy pipeline and its error taxonomy
//! - [`request`] - Deploy request payload
//! - [`server`] - HTTP routing and response mapping

pub mod area;
pub mod artefact;
pub mod cli;
pub mod config;
pub mod locks;
pub mod pipeline;
pub mod request;
pub mod server;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
