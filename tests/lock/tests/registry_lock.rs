//! Registry lock tests.
//!
//! Extension ids are written into every compiled program, so the standard
//! registration order is part of the on-disk format.

use lock_tests::fixtures::registry;
use sieve_extensions::capabilities;
use sieve_kernel::registry::ExtensionId;

#[test]
fn extension_ids_are_locked() {
    let registry = registry();
    let ids: Vec<(u16, &str)> = registry.extensions().map(|e| (e.id.0, e.name)).collect();
    assert_eq!(
        ids,
        vec![
            (0, "core"),
            (1, "fileinto"),
            (2, "vacation"),
            (3, "duplicate"),
            (4, "imap4flags"),
            (5, "relational"),
            (6, "comparator-i;ascii-numeric"),
        ]
    );
    assert!(registry.extension(ExtensionId::CORE).is_some());
    assert!(registry.extension(ExtensionId(7)).is_none());
}

#[test]
fn two_builds_agree() {
    let a = registry();
    let b = registry();
    assert_eq!(a.command_count(), b.command_count());
    assert_eq!(capabilities(&a), capabilities(&b));
    for (x, y) in a.extensions().zip(b.extensions()) {
        assert_eq!((x.id, x.name), (y.id, y.name));
    }
}

#[test]
fn capabilities_announce_the_configured_limits() {
    let registry = registry();
    let caps = capabilities(&registry);
    let config = registry.config();
    assert_eq!(caps["vacation"]["min_days"], config.vacation.min_days);
    assert_eq!(caps["vacation"]["max_days"], config.vacation.max_days);
    assert_eq!(caps["duplicate"]["max_period"], config.duplicate.max_period);
    assert!(!caps["sieve"]
        .as_array()
        .unwrap()
        .iter()
        .any(|name| name == "core"));
}
