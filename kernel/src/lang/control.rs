//! Control flow: `require`, `if`/`elsif`/`else`, `allof`/`anyof`/`not`,
//! `stop`, and the jump operations they compile to.
//!
//! Every jump is forward. An `if` chain compiles to
//!
//! ```text
//! <test> JMPFALSE next  <block> JMP end
//! next: <test> JMPFALSE else  <block> JMP end
//! else: <block>
//! end:
//! ```
//!
//! where the trailing `JMP end` is only emitted when the chain continues.

use crate::binary::Operands;
use crate::compiler::generator::CodeGen;
use crate::compiler::validator::{CommandContext, Rejection, ValidatedCommand};
use crate::error::{CompileError, RuntimeError};
use crate::lang::{OP_JMP, OP_JMPFALSE, OP_JMPTRUE, OP_NOT, OP_STOP};
use crate::registry::{
    ArgSpec, BlockRule, CommandDef, CommandKind, ExtensionId, Flow, OperandKind, OperationDef,
    Subtests, ValueKind,
};
use crate::runtime::interpreter::Runtime;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_require(ctx: &mut CommandContext<'_>) -> Result<(), Rejection> {
    if !ctx.at_script_start() {
        return Err("require commands must come before any other command".into());
    }
    let names: Vec<String> = ctx
        .positional()
        .first()
        .and_then(|v| v.as_list())
        .map(<[String]>::to_vec)
        .unwrap_or_default();
    for name in &names {
        ctx.require_extension(name)?;
    }
    Ok(())
}

fn validate_chain_link(ctx: &mut CommandContext<'_>) -> Result<(), Rejection> {
    let name = ctx.command_name();
    match ctx.previous() {
        Some("if" | "elsif") => {
            ctx.continue_previous();
            Ok(())
        }
        _ => Err(format!("'{name}' must follow 'if' or 'elsif'").into()),
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

fn generate_nothing(_: &mut CodeGen<'_>, _: &ValidatedCommand) -> Result<(), CompileError> {
    Ok(())
}

fn block_of(cmd: &ValidatedCommand) -> &[ValidatedCommand] {
    cmd.block.as_deref().unwrap_or_default()
}

fn generate_conditional(gen: &mut CodeGen<'_>, cmd: &ValidatedCommand) -> Result<(), CompileError> {
    for test in &cmd.tests {
        gen.emit_command(test)?;
    }
    let skip = gen.emit_jump(OP_JMPFALSE)?;
    gen.emit_block(block_of(cmd))?;
    if cmd.continues_chain {
        let exit = gen.emit_jump(OP_JMP)?;
        gen.add_chain_exit(exit);
    }
    gen.resolve_jump(skip)?;
    if !cmd.continues_chain {
        gen.resolve_chain_exits()?;
    }
    Ok(())
}

fn generate_else(gen: &mut CodeGen<'_>, cmd: &ValidatedCommand) -> Result<(), CompileError> {
    gen.emit_block(block_of(cmd))?;
    gen.resolve_chain_exits()
}

/// Short-circuit over the subtests: `jump` leaves early with the current
/// test result in place.
fn generate_short_circuit(
    gen: &mut CodeGen<'_>,
    cmd: &ValidatedCommand,
    jump: u8,
) -> Result<(), CompileError> {
    let mut pending = Vec::new();
    if let Some((last, rest)) = cmd.tests.split_last() {
        for test in rest {
            gen.emit_command(test)?;
            pending.push(gen.emit_jump(jump)?);
        }
        gen.emit_command(last)?;
    }
    for at in pending {
        gen.resolve_jump(at)?;
    }
    Ok(())
}

fn generate_allof(gen: &mut CodeGen<'_>, cmd: &ValidatedCommand) -> Result<(), CompileError> {
    generate_short_circuit(gen, cmd, OP_JMPFALSE)
}

fn generate_anyof(gen: &mut CodeGen<'_>, cmd: &ValidatedCommand) -> Result<(), CompileError> {
    generate_short_circuit(gen, cmd, OP_JMPTRUE)
}

fn generate_not(gen: &mut CodeGen<'_>, cmd: &ValidatedCommand) -> Result<(), CompileError> {
    for test in &cmd.tests {
        gen.emit_command(test)?;
    }
    gen.emit_operation(ExtensionId::CORE, OP_NOT, 0)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn exec_jmp(_: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    Ok(Flow::Jump(ops.offset(0)?))
}

fn exec_jmptrue(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let target = ops.offset(0)?;
    Ok(if rt.test_result() {
        Flow::Jump(target)
    } else {
        Flow::Continue
    })
}

fn exec_jmpfalse(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let target = ops.offset(0)?;
    Ok(if rt.test_result() {
        Flow::Continue
    } else {
        Flow::Jump(target)
    })
}

fn exec_not(rt: &mut Runtime<'_>, _: &Operands<'_>) -> Result<Flow, RuntimeError> {
    let value = rt.test_result();
    rt.set_test_result(!value);
    Ok(Flow::Continue)
}

fn exec_stop(_: &mut Runtime<'_>, _: &Operands<'_>) -> Result<Flow, RuntimeError> {
    Ok(Flow::Stop)
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

pub(crate) static REQUIRE: CommandDef = CommandDef {
    name: "require",
    kind: CommandKind::Command,
    positional: &[ArgSpec {
        name: "capabilities",
        kind: ValueKind::StringList,
    }],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: None,
    validate: Some(validate_require),
    generate: Some(generate_nothing),
};

pub(crate) static IF: CommandDef = CommandDef {
    name: "if",
    kind: CommandKind::Command,
    positional: &[],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::One,
    block: BlockRule::Required,
    operation: None,
    validate: None,
    generate: Some(generate_conditional),
};

pub(crate) static ELSIF: CommandDef = CommandDef {
    name: "elsif",
    kind: CommandKind::Command,
    positional: &[],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::One,
    block: BlockRule::Required,
    operation: None,
    validate: Some(validate_chain_link),
    generate: Some(generate_conditional),
};

pub(crate) static ELSE: CommandDef = CommandDef {
    name: "else",
    kind: CommandKind::Command,
    positional: &[],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Required,
    operation: None,
    validate: Some(validate_chain_link),
    generate: Some(generate_else),
};

pub(crate) static STOP: CommandDef = CommandDef {
    name: "stop",
    kind: CommandKind::Command,
    positional: &[],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_STOP),
    validate: None,
    generate: None,
};

pub(crate) static ALLOF: CommandDef = CommandDef {
    name: "allof",
    kind: CommandKind::Test,
    positional: &[],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::AtLeastOne,
    block: BlockRule::Forbidden,
    operation: None,
    validate: None,
    generate: Some(generate_allof),
};

pub(crate) static ANYOF: CommandDef = CommandDef {
    name: "anyof",
    kind: CommandKind::Test,
    positional: &[],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::AtLeastOne,
    block: BlockRule::Forbidden,
    operation: None,
    validate: None,
    generate: Some(generate_anyof),
};

pub(crate) static NOT: CommandDef = CommandDef {
    name: "not",
    kind: CommandKind::Test,
    positional: &[],
    tags: &[],
    tag_sets: &[],
    subtests: Subtests::One,
    block: BlockRule::Forbidden,
    operation: None,
    validate: None,
    generate: Some(generate_not),
};

const JUMP_OPERANDS: &[OperandKind] = &[OperandKind::Offset];

pub(crate) static OPERATIONS: [&OperationDef; 5] = [
    &OperationDef {
        mnemonic: "JMP",
        opcode: OP_JMP,
        source_line: false,
        positional: JUMP_OPERANDS,
        execute: exec_jmp,
    },
    &OperationDef {
        mnemonic: "JMPTRUE",
        opcode: OP_JMPTRUE,
        source_line: false,
        positional: JUMP_OPERANDS,
        execute: exec_jmptrue,
    },
    &OperationDef {
        mnemonic: "JMPFALSE",
        opcode: OP_JMPFALSE,
        source_line: false,
        positional: JUMP_OPERANDS,
        execute: exec_jmpfalse,
    },
    &OperationDef {
        mnemonic: "NOT",
        opcode: OP_NOT,
        source_line: false,
        positional: &[],
        execute: exec_not,
    },
    &OperationDef {
        mnemonic: "STOP",
        opcode: OP_STOP,
        source_line: false,
        positional: &[],
        execute: exec_stop,
    },
];
