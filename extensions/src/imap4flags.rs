//! `imap4flags`: IMAP flags on stored messages.
//!
//! `setflag`, `addflag` and `removeflag` edit one internal flag variable per
//! evaluation. `hasflag` matches against it. Every `keep` and `fileinto`
//! stores with the variable's value at the time it ran, unless the command
//! names its own flags with `:flags`.

use std::any::Any;

use tracing::trace;

use sieve_kernel::binary::{OperandValue, Operands};
use sieve_kernel::error::{RegistryError, RuntimeError};
use sieve_kernel::lang::conditions::begin_match;
use sieve_kernel::lang::OPT_SIDE_EFFECT;
use sieve_kernel::registry::{
    ArgSpec, BlockRule, CommandDef, CommandKind, Extension, ExtensionRegistrar, Flow,
    ObjectBehavior, ObjectClass, ObjectDef, OperandKind, OperationDef, Subtests, TagDef,
    TagPayload, ValueKind,
};
use sieve_kernel::result::SideEffectDef;
use sieve_kernel::runtime::interpreter::operand_strings;
use sieve_kernel::runtime::{Runtime, StoreRequest};

pub const OP_SETFLAG: u8 = 0x01;
pub const OP_ADDFLAG: u8 = 0x02;
pub const OP_REMOVEFLAG: u8 = 0x03;
pub const OP_HASFLAG: u8 = 0x04;

/// Flag names in `items`, split on whitespace, without case-insensitive
/// repeats. First spelling wins.
#[must_use]
pub fn normalize_flags<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    let mut flags: Vec<String> = Vec::new();
    for flag in items.iter().flat_map(|s| s.as_ref().split_whitespace()) {
        if !flags.iter().any(|f| f.eq_ignore_ascii_case(flag)) {
            flags.push(flag.to_string());
        }
    }
    flags
}

/// The internal flag variable.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct FlagVariable {
    flags: Vec<String>,
}

impl FlagVariable {
    fn add(&mut self, flags: &[String]) {
        for flag in flags {
            if !self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag)) {
                self.flags.push(flag.clone());
            }
        }
    }

    fn remove(&mut self, flags: &[String]) {
        self.flags
            .retain(|f| !flags.iter().any(|r| r.eq_ignore_ascii_case(f)));
    }
}

// ---------------------------------------------------------------------------
// Flag commands
// ---------------------------------------------------------------------------

fn flag_operand(ops: &Operands<'_>) -> Result<Vec<String>, RuntimeError> {
    let items = ops.string_list(0)?.to_vec()?;
    Ok(normalize_flags(&items))
}

fn exec_setflag(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let flags = flag_operand(ops)?;
    let var = rt.context(FlagVariable::default)?;
    var.flags = flags;
    trace!(flags = ?var.flags, "setflag");
    Ok(Flow::Continue)
}

fn exec_addflag(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let flags = flag_operand(ops)?;
    let var = rt.context(FlagVariable::default)?;
    var.add(&flags);
    trace!(flags = ?var.flags, "addflag");
    Ok(Flow::Continue)
}

fn exec_removeflag(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let flags = flag_operand(ops)?;
    let var = rt.context(FlagVariable::default)?;
    var.remove(&flags);
    trace!(flags = ?var.flags, "removeflag");
    Ok(Flow::Continue)
}

fn exec_hasflag(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let keys = normalize_flags(&ops.string_list(0)?.to_vec()?);
    let current = rt
        .context_of::<FlagVariable>(rt.current_extension())
        .map(|v| v.flags.clone())
        .unwrap_or_default();
    let mut matcher = begin_match(rt, ops, keys)?;
    for flag in &current {
        matcher.feed(flag);
        if matcher.is_done() {
            break;
        }
    }
    rt.set_test_result(matcher.end());
    Ok(Flow::Continue)
}

// ---------------------------------------------------------------------------
// :flags side effect
// ---------------------------------------------------------------------------

/// Side-effect data: the flags a store carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSet(pub Vec<String>);

fn flags_build(
    _: &mut Runtime<'_>,
    param: Option<&OperandValue<'_>>,
) -> Result<Box<dyn Any + Send>, RuntimeError> {
    let items = match param {
        Some(value) => operand_strings(value)?,
        None => Vec::new(),
    };
    Ok(Box::new(FlagSet(normalize_flags(&items))))
}

fn flags_implicit(rt: &mut Runtime<'_>) -> Result<Option<Box<dyn Any + Send>>, RuntimeError> {
    let current = rt
        .context_of::<FlagVariable>(rt.current_extension())
        .filter(|v| !v.flags.is_empty())
        .map(|v| Box::new(FlagSet(v.flags.clone())) as Box<dyn Any + Send>);
    Ok(current)
}

fn flags_apply(data: &dyn Any, request: &mut StoreRequest) {
    let Some(FlagSet(flags)) = data.downcast_ref::<FlagSet>() else {
        return;
    };
    for flag in flags {
        if !request.flags.iter().any(|f| f.eq_ignore_ascii_case(flag)) {
            request.flags.push(flag.clone());
        }
    }
}

fn flags_print(data: &dyn Any) -> String {
    match data.downcast_ref::<FlagSet>() {
        Some(FlagSet(flags)) => format!("add IMAP flags: {}", flags.join(" ")),
        None => "add IMAP flags".into(),
    }
}

pub static FLAGS_EFFECT: SideEffectDef = SideEffectDef {
    name: "flags",
    build: flags_build,
    implicit: Some(flags_implicit),
    apply: flags_apply,
    print: flags_print,
};

static FLAGS_OBJECT: ObjectDef = ObjectDef {
    name: "flags",
    code: 0,
    param: Some(ValueKind::StringList),
    behavior: ObjectBehavior::SideEffect(&FLAGS_EFFECT),
};

static TAG_FLAGS: TagDef = TagDef {
    name: "flags",
    param: Some(ValueKind::StringList),
    opcode: OPT_SIDE_EFFECT,
    payload: TagPayload::Object {
        class: ObjectClass::SideEffect,
        name: "flags",
    },
    validate: None,
};

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

const FLAG_LIST: &[ArgSpec] = &[ArgSpec {
    name: "list-of-flags",
    kind: ValueKind::StringList,
}];

const FLAG_OPERANDS: &[OperandKind] = &[OperandKind::Value(ValueKind::StringList)];

const fn flag_command(name: &'static str, opcode: u8) -> CommandDef {
    CommandDef {
        name,
        kind: CommandKind::Command,
        positional: FLAG_LIST,
        tags: &[],
        tag_sets: &[],
        subtests: Subtests::None,
        block: BlockRule::Forbidden,
        operation: Some(opcode),
        validate: None,
        generate: None,
    }
}

static SETFLAG: CommandDef = flag_command("setflag", OP_SETFLAG);
static ADDFLAG: CommandDef = flag_command("addflag", OP_ADDFLAG);
static REMOVEFLAG: CommandDef = flag_command("removeflag", OP_REMOVEFLAG);

static HASFLAG: CommandDef = CommandDef {
    name: "hasflag",
    kind: CommandKind::Test,
    positional: FLAG_LIST,
    tags: &[],
    tag_sets: &["comparator", "match-type"],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_HASFLAG),
    validate: None,
    generate: None,
};

static OPERATIONS: [OperationDef; 4] = [
    OperationDef {
        mnemonic: "SETFLAG",
        opcode: OP_SETFLAG,
        source_line: false,
        positional: FLAG_OPERANDS,
        execute: exec_setflag,
    },
    OperationDef {
        mnemonic: "ADDFLAG",
        opcode: OP_ADDFLAG,
        source_line: false,
        positional: FLAG_OPERANDS,
        execute: exec_addflag,
    },
    OperationDef {
        mnemonic: "REMOVEFLAG",
        opcode: OP_REMOVEFLAG,
        source_line: false,
        positional: FLAG_OPERANDS,
        execute: exec_removeflag,
    },
    OperationDef {
        mnemonic: "HASFLAG",
        opcode: OP_HASFLAG,
        source_line: true,
        positional: FLAG_OPERANDS,
        execute: exec_hasflag,
    },
];

/// `require "imap4flags"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Imap4FlagsExtension;

impl Extension for Imap4FlagsExtension {
    fn name(&self) -> &'static str {
        "imap4flags"
    }

    fn register(&self, r: &mut ExtensionRegistrar<'_>) -> Result<(), RegistryError> {
        for op in &OPERATIONS {
            r.operation(op)?;
        }
        for command in [&SETFLAG, &ADDFLAG, &REMOVEFLAG, &HASFLAG] {
            r.command(command)?;
        }
        r.object(&FLAGS_OBJECT)?;
        r.attach_tag("keep", &TAG_FLAGS);
        r.attach_tag("fileinto", &TAG_FLAGS);
        Ok(())
    }
}
