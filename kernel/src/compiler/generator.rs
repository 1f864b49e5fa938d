//! Bytecode generation from a validated script.
//!
//! Default emission for a command: operation header, source line if the
//! operation declares one, the optional loop if its layout has slots, then
//! positional operands. Commands with a custom generate callback (control
//! flow, `size`) drive [`CodeGen`] directly.

use std::collections::BTreeMap;

use tracing::debug;

use crate::binary::writer::LengthOverflow;
use crate::binary::{CodeWriter, LineEntry, Program};
use crate::compiler::validator::{ArgValue, ValidatedCommand, ValidatedScript};
use crate::error::CompileError;
use crate::lang::{OP_JMP, OP_JMPFALSE, OP_JMPTRUE};
use crate::registry::{ExtensionId, ObjectKey, OperationEntry, Registry, TagPayload};

/// Code emission state.
pub struct CodeGen<'r> {
    registry: &'r Registry,
    code: CodeWriter,
    lines: Vec<LineEntry>,
    extensions: BTreeMap<ExtensionId, &'static str>,
    /// Pending exit jumps of `if` chains, one frame per block.
    chain_exits: Vec<Vec<usize>>,
    line: u32,
}

fn overflow(line: u32) -> impl Fn(LengthOverflow) -> CompileError {
    move |err| CompileError::Generate {
        line,
        detail: err.to_string(),
    }
}

impl<'r> CodeGen<'r> {
    #[must_use]
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            code: CodeWriter::new(),
            lines: Vec::new(),
            extensions: BTreeMap::new(),
            chain_exits: vec![Vec::new()],
            line: 0,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Current code offset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.code.len()
    }

    fn error(&self, detail: impl Into<String>) -> CompileError {
        CompileError::Generate {
            line: self.line,
            detail: detail.into(),
        }
    }

    fn note_extension(&mut self, ext: ExtensionId) -> Result<(), CompileError> {
        if self.extensions.contains_key(&ext) {
            return Ok(());
        }
        let name = self
            .registry
            .extension(ext)
            .map(|e| e.name)
            .ok_or_else(|| self.error(format!("unknown extension id {ext}")))?;
        self.extensions.insert(ext, name);
        Ok(())
    }

    /// Emit one command, via its generate callback if it has one.
    ///
    /// # Errors
    ///
    /// [`CompileError::Generate`] on layout or size problems.
    pub fn emit_command(&mut self, command: &ValidatedCommand) -> Result<(), CompileError> {
        self.line = command.line;
        match command.def.generate {
            Some(generate) => generate(self, command),
            None => self.emit_default(command),
        }
    }

    /// Canonical layout of `command.def.operation`.
    ///
    /// # Errors
    ///
    /// [`CompileError::Generate`] if the command has no operation.
    pub fn emit_default(&mut self, command: &ValidatedCommand) -> Result<(), CompileError> {
        let opcode = command
            .def
            .operation
            .ok_or_else(|| self.error(format!("'{}' has no operation", command.name())))?;
        let entry = self.emit_operation(command.ext, opcode, command.line)?;
        self.emit_optional(entry, command)?;
        for value in &command.positional {
            self.emit_value(value)?;
        }
        Ok(())
    }

    /// Operation header plus source line if the operation wants one.
    ///
    /// # Errors
    ///
    /// [`CompileError::Generate`] for an unregistered operation.
    pub fn emit_operation(
        &mut self,
        ext: ExtensionId,
        opcode: u8,
        line: u32,
    ) -> Result<&'r OperationEntry, CompileError> {
        let registry = self.registry;
        let entry = registry
            .operation(ext, opcode)
            .ok_or_else(|| self.error(format!("operation {opcode:#04x} of extension {ext} is not registered")))?;
        self.note_extension(ext)?;
        let offset = u32::try_from(self.position()).map_err(|_| self.error("program too large"))?;
        if line != 0 && self.lines.last().map_or(true, |l| l.line != line) {
            self.lines.push(LineEntry { offset, line });
        }
        self.code.operation(ext, opcode);
        if entry.def.source_line {
            self.code.source_line(line);
        }
        Ok(entry)
    }

    /// The optional loop for `command` under `entry`'s layout.
    ///
    /// # Errors
    ///
    /// [`CompileError::Generate`] if a tag does not fit the layout.
    pub fn emit_optional(
        &mut self,
        entry: &OperationEntry,
        command: &ValidatedCommand,
    ) -> Result<(), CompileError> {
        let emitted = command
            .tags
            .iter()
            .filter(|t| t.emit && t.entry.def.opcode != 0);
        if entry.optional.is_empty() {
            if let Some(tag) = emitted.clone().next() {
                return Err(self.error(format!(
                    "tag ':{}' has no slot in {}",
                    tag.name(),
                    entry.def.mnemonic
                )));
            }
            return Ok(());
        }
        for tag in emitted {
            let opcode = tag.entry.def.opcode;
            if !entry.optional.contains_key(&opcode) {
                return Err(self.error(format!(
                    "tag ':{}' has no slot in {}",
                    tag.name(),
                    entry.def.mnemonic
                )));
            }
            self.code.optional_code(opcode);
            match tag.entry.def.payload {
                TagPayload::Param => {
                    if let Some(value) = &tag.value {
                        self.emit_value(value)?;
                    }
                }
                TagPayload::Flag => {}
                TagPayload::Object { .. } | TagPayload::ObjectByParam { .. } => {
                    let key = tag
                        .object
                        .ok_or_else(|| self.error(format!("tag ':{}' lost its object", tag.name())))?;
                    self.emit_object(key)?;
                    if matches!(tag.entry.def.payload, TagPayload::Object { .. }) {
                        if let Some(value) = &tag.value {
                            self.emit_value(value)?;
                        }
                    }
                }
            }
        }
        self.code.optional_end();
        Ok(())
    }

    /// # Errors
    ///
    /// [`CompileError::Generate`] for values beyond the wire limits.
    pub fn emit_value(&mut self, value: &ArgValue) -> Result<(), CompileError> {
        match value {
            ArgValue::Number(n) => {
                self.code.number(*n);
                Ok(())
            }
            ArgValue::String(s) => self.code.string(s).map_err(overflow(self.line)),
            ArgValue::StringList(items) => self.code.string_list(items).map_err(overflow(self.line)),
        }
    }

    /// # Errors
    ///
    /// [`CompileError::Generate`] if the owning extension is unknown.
    pub fn emit_object(&mut self, key: ObjectKey) -> Result<(), CompileError> {
        self.note_extension(key.ext)?;
        self.code.object(key);
        Ok(())
    }

    /// Emit a block in its own chain frame.
    ///
    /// # Errors
    ///
    /// Propagates command emission errors.
    pub fn emit_block(&mut self, commands: &[ValidatedCommand]) -> Result<(), CompileError> {
        self.chain_exits.push(Vec::new());
        for command in commands {
            self.emit_command(command)?;
        }
        // A chain cut short by the end of the block still needs its exits.
        self.resolve_chain_exits()?;
        self.chain_exits.pop();
        Ok(())
    }

    /// A jump operation with a placeholder target. Returns the patch
    /// position for [`CodeGen::resolve_jump`].
    ///
    /// # Errors
    ///
    /// [`CompileError::Generate`] if `opcode` is not a jump.
    pub fn emit_jump(&mut self, opcode: u8) -> Result<usize, CompileError> {
        if ![OP_JMP, OP_JMPTRUE, OP_JMPFALSE].contains(&opcode) {
            return Err(self.error(format!("{opcode:#04x} is not a jump")));
        }
        self.emit_operation(ExtensionId::CORE, opcode, 0)?;
        Ok(self.code.offset_placeholder())
    }

    /// Point the jump at `at` to the current position.
    ///
    /// # Errors
    ///
    /// [`CompileError::Generate`] if the offset does not fit.
    pub fn resolve_jump(&mut self, at: usize) -> Result<(), CompileError> {
        let target = self.position();
        self.code.patch_offset(at, target).map_err(overflow(self.line))
    }

    /// Register a jump that leaves the current `if` chain.
    pub fn add_chain_exit(&mut self, at: usize) {
        if let Some(frame) = self.chain_exits.last_mut() {
            frame.push(at);
        }
    }

    /// Point every pending chain exit in the current frame here.
    ///
    /// # Errors
    ///
    /// See [`CodeGen::resolve_jump`].
    pub fn resolve_chain_exits(&mut self) -> Result<(), CompileError> {
        let pending = self
            .chain_exits
            .last_mut()
            .map(std::mem::take)
            .unwrap_or_default();
        for at in pending {
            self.resolve_jump(at)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Program, CompileError> {
        self.resolve_chain_exits()?;
        self.note_extension(ExtensionId::CORE)?;
        let extensions = self
            .extensions
            .into_iter()
            .map(|(id, name)| (id, name.to_string()))
            .collect();
        Ok(Program::new(extensions, self.code.into_bytes(), self.lines))
    }
}

impl std::fmt::Debug for CodeGen<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeGen")
            .field("position", &self.position())
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

/// Generate a program from a validated script.
///
/// # Errors
///
/// [`CompileError::Generate`].
pub fn generate(script: &ValidatedScript, registry: &Registry) -> Result<Program, CompileError> {
    let mut gen = CodeGen::new(registry);
    for command in &script.commands {
        gen.emit_command(command)?;
    }
    let program = gen.finish()?;
    debug!(
        code_len = program.code().len(),
        extensions = program.extensions().len(),
        "program generated"
    );
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Ast, AstNode};
    use crate::binary::{decode_operands, CodeReader};
    use crate::compiler::compile;
    use crate::config::EngineConfig;
    use crate::error::Diagnostics;

    fn registry() -> Registry {
        Registry::core(EngineConfig::default()).unwrap()
    }

    /// `(offset, mnemonic)` of every operation plus jump targets.
    fn ops(program: &Program, reg: &Registry) -> Vec<(usize, &'static str, Option<usize>)> {
        let mut out = Vec::new();
        let mut reader = CodeReader::new(program.code());
        while !reader.at_end() {
            let at = reader.position();
            let (ext, op) = reader.read_operation().unwrap();
            let entry = reg.operation(ext, op).unwrap();
            let operands = decode_operands(&mut reader, at, entry, reg).unwrap();
            let target = operands.offset(0).ok();
            out.push((at, entry.def.mnemonic, target));
        }
        out
    }

    #[test]
    fn if_elsif_else_jumps_forward_to_chain_end() {
        let reg = registry();
        let ast = Ast::new(vec![
            AstNode::command("if", 1)
                .with_test(AstNode::test("false", 1))
                .with_block(vec![AstNode::command("discard", 2)]),
            AstNode::command("elsif", 3)
                .with_test(AstNode::test("true", 3))
                .with_block(vec![AstNode::command("stop", 4)]),
            AstNode::command("else", 5).with_block(vec![AstNode::command("keep", 6)]),
        ]);
        let program = compile(&ast, &reg, &mut Diagnostics::new()).unwrap();
        let listing = ops(&program, &reg);
        let names: Vec<_> = listing.iter().map(|o| o.1).collect();
        assert_eq!(
            names,
            vec!["FALSE", "JMPFALSE", "DISCARD", "JMP", "TRUE", "JMPFALSE", "STOP", "JMP", "KEEP"]
        );
        let end = program.code().len();
        // Both chain exits leave the whole chain.
        assert_eq!(listing[3].2, Some(end));
        assert_eq!(listing[7].2, Some(end));
        // Each test failure skips to the next branch.
        assert_eq!(listing[1].2, Some(listing[4].0));
        assert_eq!(listing[5].2, Some(listing[8].0));
        for (at, _, target) in &listing {
            if let Some(target) = target {
                assert!(*target > *at);
            }
        }
    }

    #[test]
    fn allof_short_circuits_to_end() {
        let reg = registry();
        let ast = Ast::new(vec![AstNode::command("if", 1)
            .with_test(
                AstNode::test("allof", 1)
                    .with_test(AstNode::test("true", 1))
                    .with_test(AstNode::test("exists", 1).string("X-Spam")),
            )
            .with_block(vec![AstNode::command("discard", 2)])]);
        let program = compile(&ast, &reg, &mut Diagnostics::new()).unwrap();
        let listing = ops(&program, &reg);
        let names: Vec<_> = listing.iter().map(|o| o.1).collect();
        assert_eq!(names, vec!["TRUE", "JMPFALSE", "EXISTS", "JMPFALSE", "DISCARD"]);
        // The inner short-circuit lands right after the last subtest.
        assert_eq!(listing[1].2, Some(listing[3].0));
    }

    #[test]
    fn line_table_follows_commands() {
        let reg = registry();
        let ast = Ast::new(vec![
            AstNode::command("keep", 4),
            AstNode::command("discard", 9),
        ]);
        let program = compile(&ast, &reg, &mut Diagnostics::new()).unwrap();
        assert_eq!(program.line_at(0), 4);
        assert_eq!(program.line_at(program.code().len() - 1), 9);
    }

    #[test]
    fn core_is_always_in_extension_table() {
        let reg = registry();
        let program = compile(&Ast::default(), &reg, &mut Diagnostics::new()).unwrap();
        assert!(program.code().is_empty());
        assert_eq!(program.extensions(), &[(ExtensionId::CORE, "core".to_string())]);
    }

    #[test]
    fn emit_jump_rejects_non_jumps() {
        let reg = registry();
        let mut gen = CodeGen::new(&reg);
        assert!(gen.emit_jump(crate::lang::OP_KEEP).is_err());
        assert!(gen.emit_jump(OP_JMPFALSE).is_ok());
    }
}
