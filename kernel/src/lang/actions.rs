//! `keep`, `discard` and `fileinto`.
//!
//! `keep` and `fileinto` stage the same store action. Two stores into the
//! same mailbox merge into one, so `keep; keep;` or a `fileinto` of the
//! default mailbox next to a `keep` delivers once.

use tracing::debug;

use crate::binary::Operands;
use crate::error::{ActionError, RuntimeError};
use crate::lang::{OPT_SIDE_EFFECT, OP_DISCARD, OP_FILEINTO, OP_KEEP};
use crate::registry::{
    ArgSpec, BlockRule, CommandDef, CommandKind, Flow, OperandKind, OperationDef, Subtests,
    ValueKind,
};
use crate::result::{ActionDef, CommitOutcome, DuplicateCheck, StagedAction};
use crate::runtime::env::ExecEnv;
use crate::runtime::interpreter::Runtime;

/// Instance data of [`STORE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreData {
    pub mailbox: String,
    /// Staged by `keep` rather than `fileinto`.
    pub keep: bool,
}

fn store_duplicate(new: &StagedAction, existing: &StagedAction) -> DuplicateCheck {
    let same = match (new.data::<StoreData>(), existing.data::<StoreData>()) {
        (Some(a), Some(b)) => a.mailbox == b.mailbox,
        _ => false,
    };
    if same {
        DuplicateCheck::Supersede
    } else {
        DuplicateCheck::Distinct
    }
}

fn store_print(action: &StagedAction) -> String {
    match action.data::<StoreData>() {
        Some(data) if data.keep => format!("keep (store message in mailbox '{}')", data.mailbox),
        Some(data) => format!("store message in mailbox '{}'", data.mailbox),
        None => "store message".into(),
    }
}

fn store_commit(env: &ExecEnv<'_>, action: &StagedAction) -> Result<CommitOutcome, ActionError> {
    let data = action
        .data::<StoreData>()
        .ok_or_else(|| ActionError::failed("store action without mailbox"))?;
    let request = action.store_request(&data.mailbox);
    env.store(&request)?;
    debug!(mailbox = %request.mailbox, flags = ?request.flags, "stored message");
    Ok(CommitOutcome::Committed)
}

/// Deliver into a mailbox.
pub static STORE: ActionDef = ActionDef {
    name: "store",
    sends_response: false,
    cancels_keep: true,
    check_duplicate: Some(store_duplicate),
    check_conflict: None,
    print: store_print,
    commit: Some(store_commit),
    finish: None,
};

fn discard_duplicate(_: &StagedAction, _: &StagedAction) -> DuplicateCheck {
    DuplicateCheck::Supersede
}

fn discard_print(_: &StagedAction) -> String {
    "discard".into()
}

/// Drop the message. Only cancels the implicit keep.
pub static DISCARD: ActionDef = ActionDef {
    name: "discard",
    sends_response: false,
    cancels_keep: true,
    check_duplicate: Some(discard_duplicate),
    check_conflict: None,
    print: discard_print,
    commit: None,
    finish: None,
};

fn stage_store(rt: &mut Runtime<'_>, ops: &Operands<'_>, data: StoreData) -> Result<Flow, RuntimeError> {
    let effects = rt.side_effects(ops, OPT_SIDE_EFFECT)?;
    rt.add_action(&STORE, Box::new(data), effects)?;
    Ok(Flow::Continue)
}

fn exec_keep(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let mailbox = rt.env().default_mailbox.to_string();
    stage_store(rt, ops, StoreData { mailbox, keep: true })
}

fn exec_fileinto(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let mailbox = ops.string(0)?.to_string();
    stage_store(rt, ops, StoreData { mailbox, keep: false })
}

fn exec_discard(rt: &mut Runtime<'_>, _: &Operands<'_>) -> Result<Flow, RuntimeError> {
    rt.add_action(&DISCARD, Box::new(()), Vec::new())?;
    Ok(Flow::Continue)
}

pub(crate) static KEEP_CMD: CommandDef = CommandDef {
    name: "keep",
    kind: CommandKind::Command,
    positional: &[],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_KEEP),
    validate: None,
    generate: None,
};

pub(crate) static DISCARD_CMD: CommandDef = CommandDef {
    name: "discard",
    kind: CommandKind::Command,
    positional: &[],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_DISCARD),
    validate: None,
    generate: None,
};

pub(crate) static FILEINTO_CMD: CommandDef = CommandDef {
    name: "fileinto",
    kind: CommandKind::Command,
    positional: &[ArgSpec {
        name: "mailbox",
        kind: ValueKind::String,
    }],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_FILEINTO),
    validate: None,
    generate: None,
};

pub(crate) static KEEP_OP: OperationDef = OperationDef {
    mnemonic: "KEEP",
    opcode: OP_KEEP,
    source_line: true,
    positional: &[],
    execute: exec_keep,
};

pub(crate) static DISCARD_OP: OperationDef = OperationDef {
    mnemonic: "DISCARD",
    opcode: OP_DISCARD,
    source_line: true,
    positional: &[],
    execute: exec_discard,
};

pub(crate) static FILEINTO_OP: OperationDef = OperationDef {
    mnemonic: "FILEINTO",
    opcode: OP_FILEINTO,
    source_line: true,
    positional: &[OperandKind::Value(ValueKind::String)],
    execute: exec_fileinto,
};
