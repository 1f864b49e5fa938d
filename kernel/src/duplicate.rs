//! Duplicate-suppression fingerprints and the store client.
//!
//! A fingerprint is a SHA-256 over a domain-separated concatenation of the
//! inputs, so fingerprints from different users of the store (the
//! `duplicate` test, vacation reply tracking) never collide.
//!
//! The store itself belongs to the host. [`DuplicateTracker`] is the thin
//! client the interpreter and commit callbacks use: checks happen while
//! the script runs, marks are deferred until commit succeeds.

use std::fmt;
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tracing::debug;

/// Namespace prefix of `duplicate` test fingerprints.
pub const DUPLICATE_NAMESPACE: &[u8] = b"sieve duplicate";

/// 32-byte content fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// SHA-256 over the parts, each fed as-is in order.
    #[must_use]
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Fingerprint of one `duplicate` test evaluation.
///
/// Layout: `"sieve duplicate"`, then `'0'` for a last check or `'+'` when
/// more checks may follow, then `"h-" + handle` or `"default"`, then the
/// tracked value.
#[must_use]
pub fn fingerprint(last: bool, handle: Option<&str>, value: &[u8]) -> Fingerprint {
    let marker: &[u8] = if last { b"0" } else { b"+" };
    match handle {
        Some(handle) => Fingerprint::of_parts(&[
            DUPLICATE_NAMESPACE,
            marker,
            b"h-",
            handle.as_bytes(),
            value,
        ]),
        None => Fingerprint::of_parts(&[DUPLICATE_NAMESPACE, marker, b"default", value]),
    }
}

/// Host-side duplicate record store.
///
/// `check` returns true while an unexpired record exists. Expiry is judged
/// by the store's own clock.
pub trait DuplicateStore {
    fn check(&self, fp: &Fingerprint) -> bool;
    fn mark(&self, fp: &Fingerprint, expires_at: SystemTime);
}

/// Client wrapper used by extensions.
#[derive(Clone, Copy)]
pub struct DuplicateTracker<'s> {
    store: &'s dyn DuplicateStore,
}

impl<'s> DuplicateTracker<'s> {
    #[must_use]
    pub fn new(store: &'s dyn DuplicateStore) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn check(&self, fp: &Fingerprint) -> bool {
        let seen = self.store.check(fp);
        debug!(fingerprint = %fp, seen, "duplicate check");
        seen
    }

    /// Record `fp` until `now + period`.
    pub fn mark(&self, fp: &Fingerprint, now: SystemTime, period: Duration) {
        let expires_at = now.checked_add(period).unwrap_or(now);
        debug!(fingerprint = %fp, period_secs = period.as_secs(), "duplicate mark");
        self.store.mark(fp, expires_at);
    }
}

impl fmt::Debug for DuplicateTracker<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplicateTracker").finish_non_exhaustive()
    }
}
