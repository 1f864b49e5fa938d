//! Error types shared by every stage of the engine.
//!
//! Each stage fails closed with its own typed error:
//!
//! | Stage | Error | Fatal? |
//! |-------|-------|--------|
//! | registration | [`RegistryError`] | yes, registry is never built |
//! | validation / generation | [`CompileError`] | yes, no program |
//! | interpretation | [`RuntimeError`] | yes, no commit |
//! | commit | [`ActionError`] | isolated per action unless [`ActionError::RunVoid`] |

use std::fmt;

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Severity of a compile-time diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One validator message, anchored at a source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub line: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "line {}: {level}: {}", self.line, self.message)
    }
}

/// Error sink for validation. Collects every diagnostic so that one bad
/// command does not hide errors in its siblings.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, line: u32, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            line,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, line: u32, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            line,
            message: message.into(),
        });
    }

    /// All diagnostics in the order they were recorded.
    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Inconsistencies detected while building or finalizing the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("extension '{name}' registered twice")]
    DuplicateExtension { name: String },
    #[error("too many extensions registered (limit {limit})")]
    TooManyExtensions { limit: usize },
    #[error("command '{name}' registered twice")]
    DuplicateCommand { name: String },
    #[error("tag ':{tag}' registered twice for '{command}'")]
    DuplicateTag { command: String, tag: String },
    #[error("tag set '{name}' registered twice")]
    DuplicateTagSet { name: String },
    #[error("'{command}' links unknown tag set '{set}'")]
    UnknownTagSet { command: String, set: String },
    #[error("cannot attach tag ':{tag}' to unknown command '{command}'")]
    UnknownCommand { command: String, tag: String },
    #[error("operation {opcode:#04x} registered twice by extension '{extension}'")]
    DuplicateOperation { extension: String, opcode: u8 },
    #[error("'{command}' refers to unregistered operation {opcode:#04x}")]
    UnknownOperation { command: String, opcode: u8 },
    #[error("{class} object '{name}' registered twice")]
    DuplicateObject { class: String, name: String },
    #[error("tag ':{tag}' refers to unknown {class} object '{name}'")]
    UnknownObject {
        tag: String,
        class: String,
        name: String,
    },
    #[error("action '{name}' registered twice")]
    DuplicateAction { name: String },
    #[error("inconsistent layout for '{command}': {detail}")]
    InconsistentLayout { command: String, detail: String },
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Failure of an extension lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{detail}")]
pub struct ExtensionLoadError {
    pub detail: String,
}

impl ExtensionLoadError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Script compilation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// Validation recorded one or more errors. Every error is listed.
    #[error("script validation failed with {} error(s)", errors.len())]
    Invalid { errors: Vec<Diagnostic> },
    /// A required extension could not be loaded. Aborts validation at once.
    #[error("extension '{name}' failed to load (line {line}): {source}")]
    ExtensionLoad {
        name: String,
        line: u32,
        source: ExtensionLoadError,
    },
    /// The generator could not encode a validated command.
    #[error("code generation failed at line {line}: {detail}")]
    Generate { line: u32, detail: String },
}

// ---------------------------------------------------------------------------
// Bytecode
// ---------------------------------------------------------------------------

/// The program bytes cannot be trusted. Always fatal for the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BytecodeError {
    #[error("truncated bytecode: {detail}")]
    Truncated { detail: String },
    #[error("bad program header: {detail}")]
    BadHeader { detail: String },
    #[error("unknown extension id {ext} at offset {offset}")]
    UnknownExtension { ext: u16, offset: usize },
    #[error("extension table names '{expected}' for id {ext} but registry has '{found}'")]
    ExtensionMismatch {
        ext: u16,
        expected: String,
        found: String,
    },
    #[error("unknown operation {opcode:#04x} of extension {ext} at offset {offset}")]
    UnknownOperation { ext: u16, opcode: u8, offset: usize },
    #[error("unknown operand kind {kind:#04x} of extension {ext} at offset {offset}")]
    UnknownOperand { ext: u16, kind: u8, offset: usize },
    #[error("unknown object (extension {ext}, class {class}, code {code}) at offset {offset}")]
    UnknownObject {
        ext: u16,
        class: u8,
        code: u8,
        offset: usize,
    },
    #[error("unexpected operand at offset {offset}: expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        offset: usize,
    },
    #[error("invalid optional operand {opcode:#04x} at offset {offset}: {detail}")]
    BadOptional {
        opcode: u8,
        offset: usize,
        detail: String,
    },
    #[error("invalid jump from offset {from} to {target}")]
    BadJump { from: usize, target: usize },
    #[error("string operand at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },
}

// ---------------------------------------------------------------------------
// Result staging and commit
// ---------------------------------------------------------------------------

/// An action could not be staged next to the actions already in the result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionConflict {
    #[error("duplicate {action} action not allowed (line {line}, previous one at line {other_line})")]
    Duplicate {
        action: &'static str,
        line: u32,
        other_line: u32,
    },
    #[error("{action} action (line {line}) conflicts with {other} action (line {other_line})")]
    Conflict {
        action: &'static str,
        line: u32,
        other: &'static str,
        other_line: u32,
    },
    #[error("total number of actions exceeds the limit of {limit} (line {line})")]
    TooManyActions { limit: usize, line: u32 },
}

/// Commit-time failure of a single action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// The action failed. Sibling actions still commit.
    #[error("{detail}")]
    Failed { detail: String },
    /// The host declared the whole run void. Remaining actions are skipped.
    #[error("run void: {detail}")]
    RunVoid { detail: String },
}

impl ActionError {
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::Failed {
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Interpretation
// ---------------------------------------------------------------------------

/// Reason interpretation stopped before reaching the end of the program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
    #[error(transparent)]
    Action(#[from] ActionConflict),
    #[error("extension '{name}' failed: {detail}")]
    Extension { name: String, detail: String },
}
