// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pluggable body signature computation and verification.
//!
//! When a signer is configured on the protocol, the encoder attaches a
//! signature of the (serialized, compressed) body to the header and the
//! decoder verifies it before the body is handed to the application. A
//! verification mismatch is terminal for that message and never retried.

use md5::{Digest, Md5};

/// Computes and verifies body signatures.
///
/// Implementations must be deterministic: verifying the same
/// (body, signature) pair repeatedly yields the same answer.
pub trait BodySigner: Send + Sync {
    /// Signer name used for registration and diagnostics.
    fn name(&self) -> &str;

    /// Compute the signature of `body`.
    fn sign(&self, body: &[u8]) -> Vec<u8>;

    /// Verify `signature` against `body`.
    fn verify(&self, body: &[u8], signature: &[u8]) -> bool {
        self.sign(body) == signature
    }
}

/// Default signer: MD5 digest of the body.
///
/// An integrity check against corruption, not an authenticity mechanism;
/// deployments needing keyed signatures register their own [`BodySigner`].
#[derive(Debug, Default)]
pub struct Md5Signer;

impl BodySigner for Md5Signer {
    fn name(&self) -> &str {
        "md5"
    }

    fn sign(&self, body: &[u8]) -> Vec<u8> {
        let mut hasher = Md5::new();
        hasher.update(body);
        hasher.finalize().to_vec()
    }
}
