//! Core tests: `header`, `address`, `exists`, `size`, `true`, `false`.

use crate::binary::Operands;
use crate::compiler::generator::CodeGen;
use crate::compiler::validator::{CommandContext, Rejection, ValidatedCommand};
use crate::error::{CompileError, RuntimeError};
use crate::lang::objects::{DEFAULT_ADDRESS_PART, DEFAULT_COMPARATOR, DEFAULT_MATCH_TYPE};
use crate::lang::{
    OPT_ADDRESS_PART, OPT_COMPARATOR, OPT_MATCH_TYPE, OP_ADDRESS, OP_EXISTS, OP_FALSE, OP_HEADER,
    OP_SIZE_OVER, OP_SIZE_UNDER, OP_TRUE,
};
use crate::registry::{
    ArgSpec, BlockRule, CommandDef, CommandKind, ExtensionId, Flow, ObjectBehavior, ObjectClass,
    OperandKind, OperationDef, Subtests, TagDef, TagPayload, ValueKind,
};
use crate::runtime::interpreter::Runtime;
use crate::runtime::matching::{header_addresses, AddressPart, Comparator, MatchContext};

// ---------------------------------------------------------------------------
// Match setup shared with extension tests
// ---------------------------------------------------------------------------

fn default_object(rt: &Runtime<'_>, class: ObjectClass, name: &str) -> Result<ObjectBehavior, RuntimeError> {
    rt.registry()
        .object_by_name(class, name)
        .map(|o| o.def.behavior)
        .ok_or_else(|| rt.failure(format!("default {class} '{name}' is not registered")))
}

fn comparator(rt: &Runtime<'_>, ops: &Operands<'_>) -> Result<&'static dyn Comparator, RuntimeError> {
    let behavior = match ops.optional.object(OPT_COMPARATOR) {
        Some(object) => object.def.behavior,
        None => default_object(rt, ObjectClass::Comparator, DEFAULT_COMPARATOR)?,
    };
    match behavior {
        ObjectBehavior::Comparator(c) => Ok(c),
        _ => Err(rt.failure("comparator slot holds another object class")),
    }
}

/// Address part selected by the `:all`/`:localpart`/`:domain` slot.
///
/// # Errors
///
/// An extension failure if the default part is missing.
pub fn address_part(rt: &Runtime<'_>, ops: &Operands<'_>) -> Result<&'static dyn AddressPart, RuntimeError> {
    let behavior = match ops.optional.object(OPT_ADDRESS_PART) {
        Some(object) => object.def.behavior,
        None => default_object(rt, ObjectClass::AddressPart, DEFAULT_ADDRESS_PART)?,
    };
    match behavior {
        ObjectBehavior::AddressPart(p) => Ok(p),
        _ => Err(rt.failure("address-part slot holds another object class")),
    }
}

/// Start a match from the comparator and match-type slots of `ops`.
///
/// # Errors
///
/// An extension failure if the match type refuses its parameter.
pub fn begin_match(
    rt: &Runtime<'_>,
    ops: &Operands<'_>,
    keys: Vec<String>,
) -> Result<MatchContext, RuntimeError> {
    let comparator = comparator(rt, ops)?;
    let (behavior, param) = match ops.optional.object(OPT_MATCH_TYPE) {
        Some(object) => (object.def.behavior, object.param_str()),
        None => (default_object(rt, ObjectClass::MatchType, DEFAULT_MATCH_TYPE)?, None),
    };
    let ObjectBehavior::MatchType(match_type) = behavior else {
        return Err(rt.failure("match-type slot holds another object class"));
    };
    MatchContext::begin(match_type, comparator, keys, param).map_err(|e| rt.failure(e))
}

// ---------------------------------------------------------------------------
// header / address / exists
// ---------------------------------------------------------------------------

fn exec_header(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let names = ops.string_list(0)?;
    let keys = ops.string_list(1)?.to_vec()?;
    let mut matcher = begin_match(rt, ops, keys)?;
    'outer: for name in names.iter() {
        for value in rt.env().message.header(name?) {
            matcher.feed(&value);
            if matcher.is_done() {
                break 'outer;
            }
        }
    }
    rt.set_test_result(matcher.end());
    Ok(Flow::Continue)
}

fn exec_address(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let names = ops.string_list(0)?;
    let keys = ops.string_list(1)?.to_vec()?;
    let part = address_part(rt, ops)?;
    let mut matcher = begin_match(rt, ops, keys)?;
    'outer: for name in names.iter() {
        for value in rt.env().message.header(name?) {
            for address in header_addresses(&value) {
                if let Some(selected) = part.extract(&address) {
                    matcher.feed(&selected);
                }
                if matcher.is_done() {
                    break 'outer;
                }
            }
        }
    }
    rt.set_test_result(matcher.end());
    Ok(Flow::Continue)
}

fn exec_exists(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let mut all = true;
    for name in ops.string_list(0)?.iter() {
        if rt.env().message.header(name?).is_empty() {
            all = false;
            break;
        }
    }
    rt.set_test_result(all);
    Ok(Flow::Continue)
}

// ---------------------------------------------------------------------------
// size
// ---------------------------------------------------------------------------

static TAG_OVER: TagDef = TagDef {
    name: "over",
    param: None,
    opcode: 0,
    payload: TagPayload::Flag,
    validate: None,
};

static TAG_UNDER: TagDef = TagDef {
    name: "under",
    param: None,
    opcode: 0,
    payload: TagPayload::Flag,
    validate: None,
};

fn validate_size(ctx: &mut CommandContext<'_>) -> Result<(), Rejection> {
    match (ctx.tag("over").is_some(), ctx.tag("under").is_some()) {
        (true, true) => Err("size test cannot take both :over and :under".into()),
        (false, false) => Err("size test requires either :over or :under".into()),
        _ => Ok(()),
    }
}

fn generate_size(gen: &mut CodeGen<'_>, cmd: &ValidatedCommand) -> Result<(), CompileError> {
    let opcode = if cmd.tag("over").is_some() {
        OP_SIZE_OVER
    } else {
        OP_SIZE_UNDER
    };
    gen.emit_operation(ExtensionId::CORE, opcode, cmd.line)?;
    for value in &cmd.positional {
        gen.emit_value(value)?;
    }
    Ok(())
}

fn exec_size_over(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let limit = ops.number(0)?;
    rt.set_test_result(rt.env().message.size() > limit);
    Ok(Flow::Continue)
}

fn exec_size_under(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let limit = ops.number(0)?;
    rt.set_test_result(rt.env().message.size() < limit);
    Ok(Flow::Continue)
}

// ---------------------------------------------------------------------------
// true / false
// ---------------------------------------------------------------------------

fn exec_true(rt: &mut Runtime<'_>, _: &Operands<'_>) -> Result<Flow, RuntimeError> {
    rt.set_test_result(true);
    Ok(Flow::Continue)
}

fn exec_false(rt: &mut Runtime<'_>, _: &Operands<'_>) -> Result<Flow, RuntimeError> {
    rt.set_test_result(false);
    Ok(Flow::Continue)
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

const HEADER_ARGS: &[ArgSpec] = &[
    ArgSpec {
        name: "header-names",
        kind: ValueKind::StringList,
    },
    ArgSpec {
        name: "key-list",
        kind: ValueKind::StringList,
    },
];

const LISTS: &[OperandKind] = &[
    OperandKind::Value(ValueKind::StringList),
    OperandKind::Value(ValueKind::StringList),
];

pub(crate) static HEADER: CommandDef = CommandDef {
    name: "header",
    kind: CommandKind::Test,
    positional: HEADER_ARGS,
    tags: &[],
    tag_sets: &["comparator", "match-type"],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_HEADER),
    validate: None,
    generate: None,
};

pub(crate) static ADDRESS: CommandDef = CommandDef {
    name: "address",
    kind: CommandKind::Test,
    positional: HEADER_ARGS,
    tags: &[],
    tag_sets: &["comparator", "match-type", "address-part"],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_ADDRESS),
    validate: None,
    generate: None,
};

pub(crate) static EXISTS: CommandDef = CommandDef {
    name: "exists",
    kind: CommandKind::Test,
    positional: &[ArgSpec {
        name: "header-names",
        kind: ValueKind::StringList,
    }],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_EXISTS),
    validate: None,
    generate: None,
};

pub(crate) static SIZE: CommandDef = CommandDef {
    name: "size",
    kind: CommandKind::Test,
    positional: &[ArgSpec {
        name: "limit",
        kind: ValueKind::Number,
    }],
    tags: &[&TAG_OVER, &TAG_UNDER],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: None,
    validate: Some(validate_size),
    generate: Some(generate_size),
};

pub(crate) static TRUE: CommandDef = CommandDef {
    name: "true",
    kind: CommandKind::Test,
    positional: &[],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_TRUE),
    validate: None,
    generate: None,
};

pub(crate) static FALSE: CommandDef = CommandDef {
    name: "false",
    kind: CommandKind::Test,
    positional: &[],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_FALSE),
    validate: None,
    generate: None,
};

pub(crate) static OPERATIONS: [&OperationDef; 7] = [
    &OperationDef {
        mnemonic: "HEADER",
        opcode: OP_HEADER,
        source_line: true,
        positional: LISTS,
        execute: exec_header,
    },
    &OperationDef {
        mnemonic: "ADDRESS",
        opcode: OP_ADDRESS,
        source_line: true,
        positional: LISTS,
        execute: exec_address,
    },
    &OperationDef {
        mnemonic: "EXISTS",
        opcode: OP_EXISTS,
        source_line: true,
        positional: &[OperandKind::Value(ValueKind::StringList)],
        execute: exec_exists,
    },
    &OperationDef {
        mnemonic: "SIZE_OVER",
        opcode: OP_SIZE_OVER,
        source_line: false,
        positional: &[OperandKind::Value(ValueKind::Number)],
        execute: exec_size_over,
    },
    &OperationDef {
        mnemonic: "SIZE_UNDER",
        opcode: OP_SIZE_UNDER,
        source_line: false,
        positional: &[OperandKind::Value(ValueKind::Number)],
        execute: exec_size_under,
    },
    &OperationDef {
        mnemonic: "TRUE",
        opcode: OP_TRUE,
        source_line: false,
        positional: &[],
        execute: exec_true,
    },
    &OperationDef {
        mnemonic: "FALSE",
        opcode: OP_FALSE,
        source_line: false,
        positional: &[],
        execute: exec_false,
    },
];
