//! Artefact retrieval, unwrapping, verification, and extraction.
//!
//! These modules implement the per-stage operations of the deploy pipeline.
//! Each stage owns its error type so the pipeline can report which step
//! failed and map it to an HTTP status.
//!
//! # Sub-modules
//!
//! - [`download`]: Artefact fetch trait and GitHub REST implementation.
//! - [`container`]: Locate the `.tar.gz` payload inside a zip export.
//! - [`signature`]: Minisign detached signature verification.
//! - [`extraction`]: Directory replacement and safe tarball unpacking.

pub mod container;
pub mod download;
pub mod extraction;
pub mod signature;
