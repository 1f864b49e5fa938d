//! The bytecode interpreter.
//!
//! A flat program-counter walk. Each step reads an operation header,
//! resolves it in the registry, decodes its operands against the
//! registered layout and hands them to the operation's execute callback.
//! Any decoding problem is fatal: nothing that was staged gets committed.

use std::any::Any;

use tracing::{debug, info, trace, warn};

use crate::binary::{decode_operands, CodeReader, Operands, OperandValue, Program};
use crate::config::EngineConfig;
use crate::error::{BytecodeError, RuntimeError};
use crate::registry::{ExtensionId, Flow, ObjectBehavior, ObjectClass, Registry};
use crate::result::{ActionDef, SideEffect, SieveResult};
use crate::runtime::context::ExtensionContexts;
use crate::runtime::env::ExecEnv;

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Ok,
    /// The program does not decode against this registry.
    BytecodeCorrupt,
    /// An extension failed to load or reported a runtime failure.
    ExtensionError,
    /// An action could not be staged (duplicate, conflict, limit).
    Failure,
}

impl ExecStatus {
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Status an aborted run reports for `err`.
    #[must_use]
    pub fn of(err: &RuntimeError) -> Self {
        match err {
            RuntimeError::Bytecode(_) => Self::BytecodeCorrupt,
            RuntimeError::Extension { .. } => Self::ExtensionError,
            RuntimeError::Action(_) => Self::Failure,
        }
    }
}

/// Outcome of [`execute`]. The result must only be committed when the
/// status is [`ExecStatus::Ok`].
#[derive(Debug)]
pub struct Execution {
    pub status: ExecStatus,
    pub error: Option<RuntimeError>,
    pub result: SieveResult,
}

/// Mutable state of one evaluation, handed to execute callbacks.
pub struct Runtime<'a> {
    registry: &'a Registry,
    env: ExecEnv<'a>,
    result: &'a mut SieveResult,
    contexts: ExtensionContexts,
    enabled: Vec<ExtensionId>,
    test_result: bool,
    current_ext: ExtensionId,
    current_line: u32,
}

impl<'a> Runtime<'a> {
    #[must_use]
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    #[must_use]
    pub fn config(&self) -> &'a EngineConfig {
        self.registry.config()
    }

    #[must_use]
    pub fn env(&self) -> &ExecEnv<'a> {
        &self.env
    }

    #[must_use]
    pub fn test_result(&self) -> bool {
        self.test_result
    }

    pub fn set_test_result(&mut self, value: bool) {
        self.test_result = value;
    }

    /// Extension owning the operation being executed.
    #[must_use]
    pub fn current_extension(&self) -> ExtensionId {
        self.current_ext
    }

    #[must_use]
    pub fn current_line(&self) -> u32 {
        self.current_line
    }

    /// True if the program references `ext`.
    #[must_use]
    pub fn is_enabled(&self, ext: ExtensionId) -> bool {
        self.enabled.contains(&ext)
    }

    /// Per-message context of the current extension.
    ///
    /// # Errors
    ///
    /// See [`ExtensionContexts::get_or_insert_with`].
    pub fn context<T, F>(&mut self, init: F) -> Result<&mut T, RuntimeError>
    where
        T: Any + Send,
        F: FnOnce() -> T,
    {
        self.contexts.get_or_insert_with(self.current_ext, init)
    }

    /// Per-message context of another extension, if it was created.
    #[must_use]
    pub fn context_of<T: Any + Send>(&self, ext: ExtensionId) -> Option<&T> {
        self.contexts.get(ext)
    }

    /// Stage an action at the current line.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Action`] when the result refuses it.
    pub fn add_action(
        &mut self,
        def: &'static ActionDef,
        data: Box<dyn Any + Send>,
        side_effects: Vec<SideEffect>,
    ) -> Result<(), RuntimeError> {
        self.result
            .add_action(def, data, self.current_line, side_effects)
            .map_err(RuntimeError::from)
    }

    #[must_use]
    pub fn result(&self) -> &SieveResult {
        self.result
    }

    /// Runtime warning anchored at the current line. Does not stop the run.
    pub fn warning(&self, message: &str) {
        warn!(line = self.current_line, extension = %self.current_ext, "{message}");
    }

    /// Failure of the current extension.
    #[must_use]
    pub fn failure(&self, detail: impl Into<String>) -> RuntimeError {
        let name = self
            .registry
            .extension(self.current_ext)
            .map_or_else(|| format!("#{}", self.current_ext), |e| e.name.to_string());
        RuntimeError::Extension {
            name,
            detail: detail.into(),
        }
    }

    /// Side effects for a store action: the one given in optional slot
    /// `code`, plus the implicit value of every other side effect whose
    /// extension the program uses.
    ///
    /// # Errors
    ///
    /// Propagates side-effect build failures.
    pub fn side_effects(
        &mut self,
        operands: &Operands<'_>,
        code: u8,
    ) -> Result<Vec<SideEffect>, RuntimeError> {
        let mut effects = Vec::new();
        if let Some(object) = operands.optional.object(code) {
            let ObjectBehavior::SideEffect(def) = object.def.behavior else {
                return Err(BytecodeError::TypeMismatch {
                    expected: ObjectClass::SideEffect.as_str().into(),
                    found: object.def.class().as_str().into(),
                    offset: operands.offset,
                }
                .into());
            };
            let saved = self.current_ext;
            self.current_ext = object.key.ext;
            let data = (def.build)(self, object.param.as_deref());
            self.current_ext = saved;
            effects.push(SideEffect { def, data: data? });
        }
        let explicit: Vec<_> = effects.iter().map(|e| e.def).collect();
        effects.extend(self.implicit_side_effects(&explicit)?);
        Ok(effects)
    }

    fn implicit_side_effects(
        &mut self,
        skip: &[&'static crate::result::SideEffectDef],
    ) -> Result<Vec<SideEffect>, RuntimeError> {
        let registry = self.registry;
        let mut effects = Vec::new();
        for entry in registry.objects_of_class(ObjectClass::SideEffect) {
            let ObjectBehavior::SideEffect(def) = entry.def.behavior else {
                continue;
            };
            if !self.is_enabled(entry.key.ext) || skip.iter().any(|s| std::ptr::eq(*s, def)) {
                continue;
            }
            let Some(implicit) = def.implicit else {
                continue;
            };
            let saved = self.current_ext;
            self.current_ext = entry.key.ext;
            let data = implicit(self);
            self.current_ext = saved;
            if let Some(data) = data? {
                effects.push(SideEffect { def, data });
            }
        }
        Ok(effects)
    }

    fn load(&mut self, program: &Program) -> Result<(), RuntimeError> {
        for (id, name) in program.extensions() {
            let entry = self
                .registry
                .extension(*id)
                .ok_or(BytecodeError::UnknownExtension { ext: id.0, offset: 0 })?;
            if entry.name != name {
                return Err(BytecodeError::ExtensionMismatch {
                    ext: id.0,
                    expected: name.clone(),
                    found: entry.name.into(),
                }
                .into());
            }
            entry
                .extension
                .runtime_load(self.registry.config())
                .map_err(|e| RuntimeError::Extension {
                    name: entry.name.into(),
                    detail: e.detail,
                })?;
            self.enabled.push(*id);
        }
        if !self.is_enabled(ExtensionId::CORE) {
            self.enabled.push(ExtensionId::CORE);
        }
        Ok(())
    }

    fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        self.load(program)?;
        let mut reader = CodeReader::new(program.code());
        while !reader.at_end() {
            let start = reader.position();
            let (ext, opcode) = reader.read_operation()?;
            if !self.is_enabled(ext) {
                return Err(BytecodeError::UnknownExtension {
                    ext: ext.0,
                    offset: start,
                }
                .into());
            }
            let entry = self
                .registry
                .operation(ext, opcode)
                .ok_or(BytecodeError::UnknownOperation {
                    ext: ext.0,
                    opcode,
                    offset: start,
                })?;
            let operands = decode_operands(&mut reader, start, entry, self.registry)?;
            self.current_ext = ext;
            self.current_line = operands
                .line
                .unwrap_or_else(|| program.line_at(start));
            trace!(offset = start, op = entry.def.mnemonic, line = self.current_line, "exec");

            match (entry.def.execute)(self, &operands)? {
                Flow::Continue => {}
                Flow::Jump(target) => reader.jump(start, target)?,
                Flow::Stop => {
                    debug!(line = self.current_line, "stop");
                    break;
                }
            }
        }
        self.current_ext = ExtensionId::CORE;
        let effects = self.implicit_side_effects(&[])?;
        self.result.set_implicit_side_effects(effects);
        Ok(())
    }
}

/// Run `program` against one message with a fresh result.
#[must_use]
pub fn execute(program: &Program, registry: &Registry, env: &ExecEnv<'_>) -> Execution {
    let mut result = SieveResult::new(registry.config().max_actions);
    let error = execute_into(program, registry, env, &mut result).err();
    let status = error.as_ref().map_or(ExecStatus::Ok, ExecStatus::of);
    Execution {
        status,
        error,
        result,
    }
}

/// Run `program` into an existing result, as one stage of a multi-script
/// evaluation.
///
/// # Errors
///
/// The fatal [`RuntimeError`] that stopped interpretation.
pub fn execute_into(
    program: &Program,
    registry: &Registry,
    env: &ExecEnv<'_>,
    result: &mut SieveResult,
) -> Result<(), RuntimeError> {
    let mut runtime = Runtime {
        registry,
        env: *env,
        result,
        contexts: ExtensionContexts::new(),
        enabled: Vec::new(),
        test_result: false,
        current_ext: ExtensionId::CORE,
        current_line: 0,
    };
    match runtime.run(program) {
        Ok(()) => {
            debug!(actions = runtime.result.len(), "execution finished");
            Ok(())
        }
        Err(err) => {
            info!(line = runtime.current_line, error = %err, status = ?ExecStatus::of(&err), "execution aborted");
            Err(err)
        }
    }
}

/// Owned strings of a string or string-list operand.
///
/// # Errors
///
/// [`BytecodeError`] for other operand kinds or a malformed list.
pub fn operand_strings(value: &OperandValue<'_>) -> Result<Vec<String>, BytecodeError> {
    match value {
        OperandValue::String(s) => Ok(vec![(*s).to_string()]),
        OperandValue::StringList(list) => list.to_vec(),
        other => Err(BytecodeError::TypeMismatch {
            expected: "string list".into(),
            found: other.type_name().into(),
            offset: 0,
        }),
    }
}
