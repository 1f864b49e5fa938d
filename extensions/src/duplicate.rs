//! The `duplicate` test.
//!
//! ```text
//! duplicate [:handle <string>] [:header <string> / :uniqueid <string>]
//!           [:seconds <number>] [:last]
//! ```
//!
//! The tracked value is the `:uniqueid` string, the first value of the
//! `:header` field, or the Message-ID. The test checks the host's
//! duplicate store while the script runs. Recording the message is
//! deferred to a `duplicate_mark` action whose finish callback only marks
//! the store when the whole commit succeeded.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use sieve_kernel::binary::Operands;
use sieve_kernel::compiler::{CommandContext, Rejection};
use sieve_kernel::duplicate::{fingerprint, Fingerprint};
use sieve_kernel::error::{RegistryError, RuntimeError};
use sieve_kernel::registry::{
    BlockRule, CommandDef, CommandKind, Extension, ExtensionRegistrar, Flow, OperationDef,
    Subtests, TagDef, TagPayload, ValueKind,
};
use sieve_kernel::result::{ActionDef, StagedAction};
use sieve_kernel::runtime::{ExecEnv, Runtime};

pub const OP_DUPLICATE: u8 = 0x01;

const OPT_HANDLE: u8 = 1;
const OPT_HEADER: u8 = 2;
const OPT_UNIQUEID: u8 = 3;
const OPT_SECONDS: u8 = 4;
const OPT_LAST: u8 = 5;

/// Per-message memo: one verdict per `(handle, last)`.
#[derive(Debug, Default)]
struct DuplicateMemo {
    verdicts: BTreeMap<(Option<String>, bool), bool>,
}

/// Instance data of [`DUPLICATE_MARK`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkData {
    pub fingerprint: Fingerprint,
    pub period: Duration,
    pub handle: Option<String>,
    pub last: bool,
}

fn mark_print(action: &StagedAction) -> String {
    let Some(data) = action.data::<MarkData>() else {
        return "track duplicate".into();
    };
    let last = if data.last { " last" } else { "" };
    match &data.handle {
        Some(handle) => format!("track{last} duplicate with handle: {handle}"),
        None => format!("track{last} duplicate"),
    }
}

fn mark_finish(env: &ExecEnv<'_>, action: &StagedAction, success: bool) {
    let Some(data) = action.data::<MarkData>() else {
        return;
    };
    if !success {
        debug!(fingerprint = %data.fingerprint, "commit failed; duplicate not recorded");
        return;
    }
    if let Some(tracker) = env.tracker() {
        tracker.mark(&data.fingerprint, env.now, data.period);
    }
}

/// Records a tracked value once the commit has gone through. Never cancels
/// the implicit keep and never conflicts.
pub static DUPLICATE_MARK: ActionDef = ActionDef {
    name: "duplicate_mark",
    sends_response: false,
    cancels_keep: false,
    check_duplicate: None,
    check_conflict: None,
    print: mark_print,
    commit: None,
    finish: Some(mark_finish),
};

fn validate_duplicate(ctx: &mut CommandContext<'_>) -> Result<(), Rejection> {
    if ctx.tag("header").is_some() && ctx.tag("uniqueid").is_some() {
        return Err("duplicate test cannot take both :header and :uniqueid".into());
    }
    Ok(())
}

fn tracked_value(rt: &Runtime<'_>, ops: &Operands<'_>) -> Option<String> {
    let message = rt.env().message;
    if let Some(id) = ops.optional.string(OPT_UNIQUEID) {
        return Some(id.to_string());
    }
    let value = match ops.optional.string(OPT_HEADER) {
        Some(name) => message.header(name).into_iter().next(),
        None => message.message_id(),
    };
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn exec_duplicate(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let Some(tracker) = rt.env().tracker() else {
        rt.warning("duplicate test: no duplicate store available");
        rt.set_test_result(false);
        return Ok(Flow::Continue);
    };
    let Some(value) = tracked_value(rt, ops) else {
        debug!("duplicate test: nothing to track");
        rt.set_test_result(false);
        return Ok(Flow::Continue);
    };
    let handle = ops.optional.string(OPT_HANDLE);
    let last = ops.optional.contains(OPT_LAST);

    let key = (handle.map(str::to_string), last);
    let cached = rt
        .context(DuplicateMemo::default)?
        .verdicts
        .get(&key)
        .copied();
    if let Some(verdict) = cached {
        rt.set_test_result(verdict);
        return Ok(Flow::Continue);
    }

    let fp = fingerprint(last, handle, value.as_bytes());
    let duplicate = tracker.check(&fp);
    if !duplicate && last {
        // The plain record is looked up too, but only the :last record
        // decides.
        let plain = tracker.check(&fingerprint(false, handle, value.as_bytes()));
        debug!(plain, "duplicate test: plain record looked up for :last");
    }

    if !duplicate || last {
        let config = &rt.config().duplicate;
        let seconds = ops
            .optional
            .number(OPT_SECONDS)
            .unwrap_or(config.default_period)
            .min(config.max_period);
        let data = MarkData {
            fingerprint: fp,
            period: Duration::from_secs(seconds),
            handle: key.0.clone(),
            last,
        };
        rt.add_action(&DUPLICATE_MARK, Box::new(data), Vec::new())?;
    }

    rt.context(DuplicateMemo::default)?
        .verdicts
        .insert(key, duplicate);
    debug!(duplicate, last, handle = ?handle, "duplicate test");
    rt.set_test_result(duplicate);
    Ok(Flow::Continue)
}

static TAG_HANDLE: TagDef = TagDef {
    name: "handle",
    param: Some(ValueKind::String),
    opcode: OPT_HANDLE,
    payload: TagPayload::Param,
    validate: None,
};

static TAG_HEADER: TagDef = TagDef {
    name: "header",
    param: Some(ValueKind::String),
    opcode: OPT_HEADER,
    payload: TagPayload::Param,
    validate: None,
};

static TAG_UNIQUEID: TagDef = TagDef {
    name: "uniqueid",
    param: Some(ValueKind::String),
    opcode: OPT_UNIQUEID,
    payload: TagPayload::Param,
    validate: None,
};

static TAG_SECONDS: TagDef = TagDef {
    name: "seconds",
    param: Some(ValueKind::Number),
    opcode: OPT_SECONDS,
    payload: TagPayload::Param,
    validate: None,
};

static TAG_LAST: TagDef = TagDef {
    name: "last",
    param: None,
    opcode: OPT_LAST,
    payload: TagPayload::Flag,
    validate: None,
};

static DUPLICATE_CMD: CommandDef = CommandDef {
    name: "duplicate",
    kind: CommandKind::Test,
    positional: &[],
    tags: &[&TAG_HANDLE, &TAG_HEADER, &TAG_UNIQUEID, &TAG_SECONDS, &TAG_LAST],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_DUPLICATE),
    validate: Some(validate_duplicate),
    generate: None,
};

static DUPLICATE_OP: OperationDef = OperationDef {
    mnemonic: "DUPLICATE",
    opcode: OP_DUPLICATE,
    source_line: true,
    positional: &[],
    execute: exec_duplicate,
};

/// `require "duplicate"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateExtension;

impl Extension for DuplicateExtension {
    fn name(&self) -> &'static str {
        "duplicate"
    }

    fn register(&self, r: &mut ExtensionRegistrar<'_>) -> Result<(), RegistryError> {
        r.operation(&DUPLICATE_OP)?;
        r.command(&DUPLICATE_CMD)?;
        r.action(&DUPLICATE_MARK)
    }
}
