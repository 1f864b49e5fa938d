//! Vacation lock tests.
//!
//! Proves:
//! 1. A message whose originator is its own recipient never stages a reply,
//!    whatever the script's tags, the address spelling or the configured user
//! 2. One reply per sender and handle within the interval, across deliveries
//! 3. The reply carries the auto-reply markers

use std::time::Duration;

use lock_tests::fixtures::{compile_with, epoch, message, message_with, registry, World};
use mailparse::MailHeaderMap;
use sieve_deliver::{Agent, DeliverConfig, Message};
use sieve_kernel::ast::{Ast, AstNode};

fn vacation_variants() -> Vec<AstNode> {
    vec![
        AstNode::command("vacation", 2).string("Out"),
        AstNode::command("vacation", 2)
            .tag("days")
            .number(1)
            .string("Out"),
        AstNode::command("vacation", 2)
            .tag("subject")
            .string("Away")
            .tag("from")
            .string("alice@example.org")
            .string("Out"),
        AstNode::command("vacation", 2)
            .tag("addresses")
            .string_list(["ALICE@example.org", "a.smith@example.org"])
            .tag("handle")
            .string("away")
            .string("Out"),
        AstNode::command("vacation", 2)
            .tag("mime")
            .string("Content-Type: text/plain\r\n\r\nOut"),
    ]
}

fn self_messages() -> Vec<Message> {
    ["alice@example.org", "Alice@Example.ORG", "ALICE@EXAMPLE.ORG"]
        .into_iter()
        .map(|addr| message().with_envelope(addr, "alice@example.org"))
        .collect()
}

/// No configured user, the recipient itself, and an unrelated owner.
const USERS: [Option<&str>; 3] = [None, Some("alice@example.org"), Some("owner@example.net")];

// ---------------------------------------------------------------------------
// 1. Never reply to self
// ---------------------------------------------------------------------------

#[test]
fn never_replies_to_self() {
    let registry = registry();
    for variant in vacation_variants() {
        let program = compile_with(
            &registry,
            vec![AstNode::command("require", 1).string("vacation"), variant],
        );
        for msg in self_messages() {
            for user in USERS {
                let world = World::new();
                let (_, report) = world.run_as(&program, &registry, &msg, user);
                let report = report.expect("clean run");
                assert!(report.outcomes.is_empty(), "reply staged for {msg:?} as {user:?}");
                assert!(world.sender.sent().is_empty(), "replied to {msg:?} as {user:?}");
                assert_eq!(world.store.mailboxes(), vec!["INBOX"]);
            }
        }
    }
}

#[test]
fn alias_addressed_to_itself_is_not_answered_for_another_user() {
    let registry = registry();
    let program = compile_with(
        &registry,
        vec![
            AstNode::command("require", 1).string("vacation"),
            AstNode::command("vacation", 2)
                .tag("addresses")
                .string("alias@example.com")
                .string("Out"),
        ],
    );
    let msg = Message::parse("To: alias@example.com\r\nSubject: loop\r\n\r\nbody\r\n")
        .unwrap()
        .with_envelope("alias@example.com", "alias@example.com");
    let world = World::new();
    let (_, report) = world.run_as(&program, &registry, &msg, Some("bob@example.com"));
    assert!(report.expect("clean run").outcomes.is_empty());
    assert!(world.sender.sent().is_empty());
}

// ---------------------------------------------------------------------------
// 2. Once per interval, across deliveries
// ---------------------------------------------------------------------------

#[test]
fn one_reply_per_interval() {
    let mut agent = Agent::new(DeliverConfig::default()).unwrap();
    agent
        .compile_stage(
            "user",
            &Ast::new(vec![
                AstNode::command("require", 1).string("vacation"),
                AstNode::command("vacation", 2)
                    .tag("days")
                    .number(2)
                    .string("Out"),
            ]),
        )
        .unwrap();
    let world = World::new();
    let day = Duration::from_secs(24 * 60 * 60);

    for offset in [Duration::ZERO, day, day * 2 - Duration::from_secs(1)] {
        world.duplicates.set_now(epoch() + offset);
        let delivery = agent.deliver_at(&message(), world.host(), epoch() + offset);
        assert!(delivery.succeeded());
    }
    assert_eq!(world.sender.sent().len(), 1);

    world.duplicates.set_now(epoch() + day * 2);
    let delivery = agent.deliver_at(&message(), world.host(), epoch() + day * 2);
    assert!(delivery.succeeded());
    assert_eq!(world.sender.sent().len(), 2);
    assert_eq!(world.store.mailboxes().len(), 4);
}

// ---------------------------------------------------------------------------
// 3. Reply markers
// ---------------------------------------------------------------------------

#[test]
fn reply_carries_auto_reply_markers() {
    let registry = registry();
    let program = compile_with(
        &registry,
        vec![
            AstNode::command("require", 1).string("vacation"),
            AstNode::command("vacation", 2).string("Back on Monday."),
        ],
    );
    let world = World::new();
    let msg = message_with("References: <thread-0@example.com>\r\n");
    let _ = world.run(&program, &registry, &msg);

    let sent = world.sender.sent();
    assert_eq!(sent.len(), 1);
    let reply = &sent[0];
    assert_eq!(reply.to, "bob@example.com");
    assert_eq!(reply.from, None, "replies go out with a null return path");

    let parsed = mailparse::parse_mail(reply.data.as_bytes()).expect("reply parses");
    let header = |name: &str| parsed.headers.get_first_value(name).unwrap_or_default();
    assert!(header("To").contains("bob@example.com"));
    assert_eq!(header("Subject"), "Auto: status");
    assert_eq!(header("In-Reply-To"), "<status-1@example.com>");
    assert_eq!(
        header("References"),
        "<thread-0@example.com> <status-1@example.com>"
    );
    assert_eq!(header("Auto-Submitted"), "auto-replied (vacation)");
    assert_eq!(header("Precedence"), "bulk");
    assert_eq!(parsed.get_body().unwrap().trim_end(), "Back on Monday.");
}
