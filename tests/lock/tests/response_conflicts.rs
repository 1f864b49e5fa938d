//! Responding actions lock: two actions that send a response may not be
//! staged in one evaluation. The error names both source lines, and nothing
//! is committed. An action executed by an earlier stage does not count.
//!
//! A second responding action, `respond`, is registered here by a test
//! extension, so the conflict is exercised across descriptors rather than
//! through vacation's own duplicate rule.

use std::io::Write as _;

use lock_tests::fixtures::{compile_with, epoch, message, World};
use sieve_kernel::ast::AstNode;
use sieve_kernel::binary::Operands;
use sieve_kernel::config::EngineConfig;
use sieve_kernel::error::{ActionConflict, ActionError, RegistryError, RuntimeError};
use sieve_kernel::registry::{
    ArgSpec, BlockRule, CommandDef, CommandKind, Extension, ExtensionRegistrar, Flow, OperandKind,
    OperationDef, Registry, RegistryBuilder, Subtests, ValueKind,
};
use sieve_kernel::result::{
    commit, commit_stage, ActionDef, ActionStatus, CommitOutcome, SieveResult, StagedAction,
};
use sieve_kernel::runtime::{execute_into, ExecEnv, ExecStatus, Runtime};

// ---------------------------------------------------------------------------
// `respond "<text>"`: a minimal responding action
// ---------------------------------------------------------------------------

fn respond_print(action: &StagedAction) -> String {
    format!(
        "send notice: {}",
        action.data::<String>().map_or("", String::as_str)
    )
}

fn respond_commit(env: &ExecEnv<'_>, action: &StagedAction) -> Result<CommitOutcome, ActionError> {
    let to = env.message.return_path().unwrap_or_default();
    let sender = env
        .sender
        .ok_or_else(|| ActionError::failed("no transport"))?;
    let mut out = sender.open(&to, None)?;
    let text = action.data::<String>().map_or("", String::as_str);
    write!(out, "Subject: notice\r\n\r\n{text}\r\n")
        .map_err(|e| ActionError::failed(e.to_string()))?;
    out.close()?;
    Ok(CommitOutcome::Committed)
}

static RESPOND: ActionDef = ActionDef {
    name: "respond",
    sends_response: true,
    cancels_keep: false,
    check_duplicate: None,
    check_conflict: None,
    print: respond_print,
    commit: Some(respond_commit),
    finish: None,
};

fn exec_respond(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let text = ops.string(0)?.to_string();
    rt.add_action(&RESPOND, Box::new(text), Vec::new())?;
    Ok(Flow::Continue)
}

static RESPOND_OP: OperationDef = OperationDef {
    mnemonic: "RESPOND",
    opcode: 1,
    source_line: true,
    positional: &[OperandKind::Value(ValueKind::String)],
    execute: exec_respond,
};

static RESPOND_CMD: CommandDef = CommandDef {
    name: "respond",
    kind: CommandKind::Command,
    positional: &[ArgSpec {
        name: "text",
        kind: ValueKind::String,
    }],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(1),
    validate: None,
    generate: None,
};

struct RespondExtension;

impl Extension for RespondExtension {
    fn name(&self) -> &'static str {
        "x-respond"
    }

    fn register(&self, r: &mut ExtensionRegistrar<'_>) -> Result<(), RegistryError> {
        r.operation(&RESPOND_OP)?;
        r.command(&RESPOND_CMD)?;
        r.action(&RESPOND)
    }
}

fn registry() -> Registry {
    let mut builder = RegistryBuilder::new(EngineConfig::default()).unwrap();
    sieve_extensions::register_all(&mut builder).unwrap();
    builder.register(RespondExtension).unwrap();
    builder.build().unwrap()
}

fn require() -> AstNode {
    AstNode::command("require", 1).string_list(["vacation", "x-respond", "fileinto"])
}

fn vacation(line: u32) -> AstNode {
    AstNode::command("vacation", line).string("Out")
}

fn respond(line: u32) -> AstNode {
    AstNode::command("respond", line).string("received")
}

fn conflict_lines(err: Option<RuntimeError>) -> (u32, u32) {
    match err {
        Some(RuntimeError::Action(ActionConflict::Conflict {
            line, other_line, ..
        })) => (line, other_line),
        other => panic!("expected a conflict, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn vacation_then_respond_conflicts() {
    let registry = registry();
    let program = compile_with(&registry, vec![require(), vacation(2), respond(3)]);
    let world = World::new();
    let (execution, report) = world.run(&program, &registry, &message());

    assert_eq!(execution.status, ExecStatus::Failure);
    assert!(report.is_none());
    let message = execution.error.as_ref().unwrap().to_string();
    assert!(message.contains("line 2") && message.contains("line 3"), "{message}");
    let (a, b) = conflict_lines(execution.error);
    assert_eq!((a.min(b), a.max(b)), (2, 3));
    assert!(world.sender.sent().is_empty());
    assert!(world.store.mailboxes().is_empty());
}

#[test]
fn respond_then_vacation_conflicts() {
    let registry = registry();
    let program = compile_with(&registry, vec![require(), respond(2), vacation(4)]);
    let (execution, _) = World::new().run(&program, &registry, &message());
    let (a, b) = conflict_lines(execution.error);
    assert_eq!((a.min(b), a.max(b)), (2, 4));
}

#[test]
fn non_responding_actions_do_not_conflict() {
    let registry = registry();
    let program = compile_with(
        &registry,
        vec![
            require(),
            respond(2),
            AstNode::command("fileinto", 3).string("Notices"),
            AstNode::command("discard", 4),
        ],
    );
    let world = World::new();
    let (execution, report) = world.run(&program, &registry, &message());
    assert_eq!(execution.status, ExecStatus::Ok);
    assert!(report.unwrap().success);
    assert_eq!(world.sender.sent().len(), 1);
    assert_eq!(world.store.mailboxes(), vec!["Notices"]);
}

#[test]
fn executed_response_allows_a_later_stage() {
    let registry = registry();
    let before = compile_with(&registry, vec![require(), respond(2)]);
    let after = compile_with(&registry, vec![require(), vacation(2)]);
    let world = World::new();
    let msg = message();
    let env = ExecEnv::new(&msg)
        .with_now(epoch())
        .with_mail_store(&world.store)
        .with_sender(&world.sender)
        .with_duplicates(&world.duplicates);

    let mut result = SieveResult::new(registry.config().max_actions);
    execute_into(&before, &registry, &env, &mut result).unwrap();
    let first = commit_stage(&mut result, &env);
    assert_eq!(first.outcomes[0].status, ActionStatus::Committed);
    assert!(first.implicit_keep.is_none());

    execute_into(&after, &registry, &env, &mut result).unwrap();
    let last = commit(&mut result, &env);
    assert!(last.success);
    assert_eq!(last.outcomes.len(), 1, "the executed notice is not committed twice");
    assert_eq!(last.outcomes[0].action, "vacation");

    assert_eq!(world.sender.sent().len(), 2);
    assert_eq!(world.store.mailboxes(), vec!["INBOX"]);
}

#[test]
fn unexecuted_response_in_shared_result_still_conflicts() {
    let registry = registry();
    let before = compile_with(&registry, vec![require(), respond(2)]);
    let after = compile_with(&registry, vec![require(), vacation(5)]);
    let world = World::new();
    let msg = message();
    let env = ExecEnv::new(&msg).with_mail_store(&world.store);

    let mut result = SieveResult::new(registry.config().max_actions);
    execute_into(&before, &registry, &env, &mut result).unwrap();
    let err = execute_into(&after, &registry, &env, &mut result).unwrap_err();
    assert_eq!(ExecStatus::of(&err), ExecStatus::Failure);
    let (a, b) = conflict_lines(Some(err));
    assert_eq!((a.min(b), a.max(b)), (2, 5));
}
