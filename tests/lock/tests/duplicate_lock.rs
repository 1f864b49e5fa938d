//! Duplicate-suppression lock tests.
//!
//! Proves:
//! 1. Fingerprint layout: SHA-256 over namespace, finality marker, handle part, value
//! 2. Vacation reply fingerprints live in their own namespace
//! 3. A mark with expiry E is seen before E and not at or after E
//! 4. Repeated tests with one handle and finality consult the store once per message
//! 5. `:seconds` beyond the configured maximum is capped

use std::cell::Cell;
use std::time::{Duration, SystemTime};

use lock_tests::fixtures::{compile_with, epoch, message, registry};
use sha2::{Digest, Sha256};
use sieve_deliver::{MemoryDuplicateStore, MemoryMailStore};
use sieve_extensions::vacation::reply_fingerprint;
use sieve_kernel::ast::AstNode;
use sieve_kernel::duplicate::{fingerprint, DuplicateStore, DuplicateTracker, Fingerprint};
use sieve_kernel::runtime::{run, ExecEnv, ExecStatus};

fn sha(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// 1-2. Layout
// ---------------------------------------------------------------------------

#[test]
fn fingerprint_layout_is_locked() {
    assert_eq!(
        fingerprint(false, Some("h1"), b"body-A").to_hex(),
        sha(&[b"sieve duplicate", b"+", b"h-", b"h1", b"body-A"])
    );
    assert_eq!(
        fingerprint(true, Some("h1"), b"body-A").to_hex(),
        sha(&[b"sieve duplicate", b"0", b"h-", b"h1", b"body-A"])
    );
    assert_eq!(
        fingerprint(false, None, b"<id@x>").to_hex(),
        sha(&[b"sieve duplicate", b"+", b"default", b"<id@x>"])
    );
}

#[test]
fn finality_and_handle_separate_records() {
    let value = b"value";
    let all = [
        fingerprint(false, None, value),
        fingerprint(true, None, value),
        fingerprint(false, Some("a"), value),
        fingerprint(true, Some("a"), value),
        fingerprint(false, Some("b"), value),
    ];
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn reply_fingerprint_layout_is_locked() {
    assert_eq!(
        reply_fingerprint("bob@example.com", "h").to_hex(),
        sha(&[b"sieve vacation", b"bob@example.com", b"\0", b"h"])
    );
    assert_ne!(
        reply_fingerprint("bob@example.com", "h"),
        fingerprint(false, Some("h"), b"bob@example.com")
    );
}

// ---------------------------------------------------------------------------
// 3. Expiry
// ---------------------------------------------------------------------------

#[test]
fn mark_is_seen_until_expiry() {
    let store = MemoryDuplicateStore::new();
    let tracker = DuplicateTracker::new(&store);
    let t0 = epoch();
    for (i, period) in [1u64, 60, 43_200, 172_800].into_iter().enumerate() {
        let fp = fingerprint(false, Some("expiry"), format!("v{i}").as_bytes());
        store.set_now(t0);
        tracker.mark(&fp, t0, Duration::from_secs(period));

        store.set_now(t0 + Duration::from_secs(period - 1));
        assert!(store.check(&fp), "period {period}: seen before expiry");
        store.set_now(t0 + Duration::from_secs(period));
        assert!(!store.check(&fp), "period {period}: gone at expiry");
        store.set_now(t0 + Duration::from_secs(period * 2));
        assert!(!store.check(&fp), "period {period}: gone after expiry");
    }
}

// ---------------------------------------------------------------------------
// 4. Memoization
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CountingStore {
    inner: MemoryDuplicateStore,
    checks: Cell<usize>,
}

impl DuplicateStore for CountingStore {
    fn check(&self, fp: &Fingerprint) -> bool {
        self.checks.set(self.checks.get() + 1);
        self.inner.check(fp)
    }

    fn mark(&self, fp: &Fingerprint, expires_at: SystemTime) {
        self.inner.mark(fp, expires_at);
    }
}

fn duplicate_if(line: u32, handle: &str, mailbox: &str) -> AstNode {
    AstNode::command("if", line)
        .with_test(AstNode::test("duplicate", line).tag("handle").string(handle))
        .with_block(vec![AstNode::command("fileinto", line).string(mailbox)])
}

#[test]
fn repeated_tests_consult_the_store_once() {
    let registry = registry();
    let program = compile_with(
        &registry,
        vec![
            AstNode::command("require", 1).string_list(["duplicate", "fileinto"]),
            duplicate_if(2, "h", "A"),
            duplicate_if(3, "h", "B"),
            duplicate_if(4, "h", "C"),
            duplicate_if(5, "other", "D"),
        ],
    );
    let store = CountingStore::default();
    store.inner.set_now(epoch());
    let mailboxes = MemoryMailStore::new();
    let msg = message();
    let env = ExecEnv::new(&msg)
        .with_now(epoch())
        .with_mail_store(&mailboxes)
        .with_duplicates(&store);

    let (first, _) = run(&program, &registry, &env);
    assert_eq!(first.status, ExecStatus::Ok);
    assert_eq!(store.checks.get(), 2, "one check per distinct handle");
    assert_eq!(mailboxes.mailboxes(), vec!["INBOX"]);

    let (second, _) = run(&program, &registry, &env);
    assert_eq!(second.status, ExecStatus::Ok);
    assert_eq!(store.checks.get(), 4);
    assert_eq!(mailboxes.mailboxes(), vec!["INBOX", "A", "B", "C", "D"]);
}

// ---------------------------------------------------------------------------
// 5. Period cap
// ---------------------------------------------------------------------------

#[test]
fn seconds_are_capped_at_max_period() {
    let registry = registry();
    let max = registry.config().duplicate.max_period;
    let program = compile_with(
        &registry,
        vec![
            AstNode::command("require", 1).string("duplicate"),
            AstNode::command("if", 2)
                .with_test(
                    AstNode::test("duplicate", 2)
                        .tag("seconds")
                        .number(max * 10)
                        .tag("uniqueid")
                        .string("capped"),
                )
                .with_block(vec![AstNode::command("discard", 3)]),
        ],
    );
    let store = MemoryDuplicateStore::new();
    let mailboxes = MemoryMailStore::new();
    let msg = message();
    let env = ExecEnv::new(&msg)
        .with_now(epoch())
        .with_mail_store(&mailboxes)
        .with_duplicates(&store);
    let _ = run(&program, &registry, &env);

    let fp = fingerprint(false, None, b"capped");
    store.set_now(epoch() + Duration::from_secs(max - 1));
    assert!(store.check(&fp));
    store.set_now(epoch() + Duration::from_secs(max));
    assert!(!store.check(&fp));
}
