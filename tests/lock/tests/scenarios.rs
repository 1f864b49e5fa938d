//! End-to-end scenarios across compiler, interpreter, commit and host.
//!
//! 1. `duplicate :handle "h1" :uniqueid "body-A"`: first run marks, second
//!    run files into `Dup`.
//! 2. Vacation to a sender that is the recipient itself stages nothing.
//! 3. Vacation `:days 0` is coerced to 1 in the generated program.
//! 4. Two responding actions fail before any commit, naming both lines.
//! 5. A configured agent reloads its stages from disk and delivers.

use lock_tests::fixtures::{compile_with, epoch, message, registry, script, World};
use sieve_deliver::{load_config, write_config, Agent, DeliverConfig, MemoryMailStore, Message};
use sieve_kernel::ast::Ast;
use sieve_kernel::ast::AstNode;
use sieve_kernel::binary::dump::dump;
use sieve_kernel::duplicate::{fingerprint, DuplicateStore};
use sieve_kernel::error::{ActionConflict, RuntimeError};
use sieve_kernel::result::ActionStatus;
use sieve_kernel::runtime::ExecStatus;

// ---------------------------------------------------------------------------
// 1. Duplicate
// ---------------------------------------------------------------------------

#[test]
fn duplicate_second_delivery_is_filed() {
    let registry = registry();
    let program = compile_with(&registry, script("duplicate"));
    let world = World::new();
    let fp = fingerprint(false, Some("h1"), b"body-A");

    let (first, report) = world.run(&program, &registry, &message());
    assert_eq!(first.status, ExecStatus::Ok);
    assert!(report.unwrap().success);
    assert!(world.duplicates.check(&fp), "mark persisted on commit");
    assert_eq!(world.store.mailboxes(), vec!["INBOX"]);

    let (second, _) = world.run(&program, &registry, &message());
    assert_eq!(second.status, ExecStatus::Ok);
    assert_eq!(world.store.mailboxes(), vec!["INBOX", "Dup"]);
}

#[test]
fn duplicate_mark_is_dropped_when_commit_fails() {
    let registry = registry();
    let program = compile_with(&registry, script("duplicate"));
    let world = World {
        store: MemoryMailStore::new().refuse("INBOX"),
        ..World::new()
    };

    let (_, report) = world.run(&program, &registry, &message());
    let report = report.unwrap();
    assert!(!report.success);
    assert!(matches!(report.implicit_keep, Some(ActionStatus::Failed { .. })));
    assert!(world.duplicates.is_empty());
}

// ---------------------------------------------------------------------------
// 2. Vacation to self
// ---------------------------------------------------------------------------

fn self_addressed() -> Message {
    message().with_envelope("alice@example.org", "alice@example.org")
}

#[test]
fn vacation_to_self_sends_nothing() {
    let registry = registry();
    let program = compile_with(
        &registry,
        vec![
            AstNode::command("require", 1).string("vacation"),
            AstNode::command("vacation", 2).string("Out"),
        ],
    );
    let world = World::new();
    let (execution, report) = world.run(&program, &registry, &self_addressed());
    assert_eq!(execution.status, ExecStatus::Ok);

    let report = report.unwrap();
    assert!(report.success);
    assert!(report.outcomes.is_empty(), "reply was staged: {report:?}");
    assert_eq!(report.implicit_keep, Some(ActionStatus::Committed));
    assert!(world.sender.sent().is_empty());
    assert!(world.duplicates.is_empty(), "no reply, no reply record");
}

// ---------------------------------------------------------------------------
// 3. :days 0
// ---------------------------------------------------------------------------

#[test]
fn vacation_days_zero_is_generated_as_one() {
    let registry = registry();
    let program = compile_with(&registry, script("vacation"));
    let listing = dump(&program, &registry).unwrap();
    let vacation = listing["operations"]
        .as_array()
        .unwrap()
        .iter()
        .find(|op| op["op"] == "VACATION")
        .expect("vacation operation in listing");
    assert_eq!(vacation["optional"]["days"], 1);
    assert_eq!(vacation["optional"]["subject"], "Away");
    assert_eq!(vacation["line"], 2);
}

// ---------------------------------------------------------------------------
// 4. Two responding actions
// ---------------------------------------------------------------------------

#[test]
fn two_vacations_fail_before_commit() {
    let registry = registry();
    let program = compile_with(
        &registry,
        vec![
            AstNode::command("require", 1).string_list(["vacation", "fileinto"]),
            AstNode::command("fileinto", 2).string("Archive"),
            AstNode::command("vacation", 3).string("Out"),
            AstNode::command("vacation", 4).tag("days").number(2).string("Away"),
        ],
    );
    let world = World::new();
    let (execution, report) = world.run(&program, &registry, &message());

    assert_eq!(execution.status, ExecStatus::Failure);
    assert!(report.is_none());
    match execution.error {
        Some(RuntimeError::Action(ActionConflict::Duplicate {
            line, other_line, ..
        })) => {
            assert_eq!((line, other_line), (4, 3));
        }
        other => panic!("expected a duplicate vacation, got {other:?}"),
    }
    assert!(world.store.mailboxes().is_empty());
    assert!(world.sender.sent().is_empty());
}

// ---------------------------------------------------------------------------
// 5. Configured agent
// ---------------------------------------------------------------------------

#[test]
fn configured_agent_reloads_stages_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("deliver.toml");
    let config = DeliverConfig {
        user: Some("alice@example.org".into()),
        program_dir: Some(dir.path().join("programs")),
        stages: vec!["global".into(), "user".into()],
        ..DeliverConfig::default()
    };
    write_config(&config_path, &config).unwrap();

    let mut agent = Agent::new(load_config(&config_path).unwrap()).unwrap();
    agent
        .compile_stage("global", &Ast::new(script("flags")))
        .unwrap();
    agent
        .compile_stage("user", &Ast::new(script("duplicate")))
        .unwrap();
    agent.save_stages().unwrap();

    let reloaded = Agent::from_config(load_config(&config_path).unwrap()).unwrap();
    let names: Vec<&str> = reloaded.stages().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["global", "user"]);

    let world = World::new();
    let delivery = reloaded.deliver_at(&message(), world.host(), epoch());
    assert!(delivery.succeeded());
    assert_eq!(world.store.mailboxes(), vec!["Archive"], "an earlier fileinto cancels the keep");
    assert!(world
        .duplicates
        .check(&fingerprint(false, Some("h1"), b"body-A")));
}
