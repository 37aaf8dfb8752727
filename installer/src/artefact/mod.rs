//! Archive retrieval primitives: transport, digests, and extraction.
//!
//! # Sub-modules
//!
//! - [`extraction`] - Archive extraction with path traversal protection.
//! - [`sha256_digest`] - SHA-256 digest newtype (`Sha256Digest`).
//! - [`transport`] - Transport trait and HTTP implementation.

pub mod extraction;
pub mod sha256_digest;
pub mod transport;
