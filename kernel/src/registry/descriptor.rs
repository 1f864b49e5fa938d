//! Descriptor types contributed by extensions.
//!
//! Every descriptor is an immutable `&'static` value with plain `fn`
//! callbacks. The registry only stores references to them, tagged with the
//! owning [`ExtensionId`](super::ExtensionId) assigned at registration.
//!
//! The split mirrors the pipeline:
//!
//! - [`CommandDef`] / [`TagDef`] / [`TagSetDef`]: grammar, used by the validator
//!   and generator.
//! - [`OperationDef`]: bytecode contract plus the execute callback.
//! - [`ObjectDef`]: constants referenced from bytecode (comparators, match
//!   types, address parts, side effects).
//! - [`ActionDef`](crate::result::ActionDef): result/commit behavior, defined
//!   next to the result engine.

use std::fmt;

use crate::binary::operands::Operands;
use crate::compiler::generator::CodeGen;
use crate::compiler::validator::{CommandContext, Rejection, TagContext, ValidatedCommand};
use crate::error::{CompileError, RuntimeError};
use crate::result::SideEffectDef;
use crate::runtime::interpreter::Runtime;
use crate::runtime::matching::{AddressPart, Comparator, MatchType};

// ---------------------------------------------------------------------------
// Value kinds
// ---------------------------------------------------------------------------

/// Source-level argument types, also the payload types of value operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    String,
    StringList,
}

impl ValueKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::StringList => "string list",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Commands and tests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Command,
    Test,
}

impl CommandKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Test => "test",
        }
    }
}

/// A named positional argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ValueKind,
}

/// How many subtests a command or test takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subtests {
    None,
    One,
    AtLeastOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRule {
    Forbidden,
    Required,
}

/// Validate hook for a whole command. Runs after its tags.
pub type CommandValidateFn = fn(&mut CommandContext<'_>) -> Result<(), Rejection>;

/// Custom code generation. Commands without one use the canonical layout
/// of their [`CommandDef::operation`].
pub type CommandGenerateFn = fn(&mut CodeGen<'_>, &ValidatedCommand) -> Result<(), CompileError>;

/// Grammar of one command or test.
pub struct CommandDef {
    pub name: &'static str,
    pub kind: CommandKind,
    pub positional: &'static [ArgSpec],
    /// Tags registered directly on this command, in registration order.
    pub tags: &'static [&'static TagDef],
    /// Names of tag sets linked onto this command (e.g. `"comparator"`).
    pub tag_sets: &'static [&'static str],
    pub subtests: Subtests,
    pub block: BlockRule,
    /// Opcode (within the owning extension) emitted by default generation.
    pub operation: Option<u8>,
    pub validate: Option<CommandValidateFn>,
    pub generate: Option<CommandGenerateFn>,
}

impl fmt::Debug for CommandDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// What a tag contributes to the optional-operand loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagPayload {
    /// The tag's parameter value.
    Param,
    /// Nothing beyond the opcode.
    Flag,
    /// A fixed object, e.g. `:contains`. A parameter, if declared, is
    /// emitted right after the object reference.
    Object { class: ObjectClass, name: &'static str },
    /// An object named by the string parameter, e.g. `:comparator "i;octet"`.
    ObjectByParam { class: ObjectClass },
}

/// Tag validate hook. An `Err` becomes an error diagnostic at the tag.
pub type TagValidateFn = fn(&mut TagContext<'_>) -> Result<(), String>;

/// An optional (tagged) argument.
pub struct TagDef {
    /// Name without the leading colon.
    pub name: &'static str,
    pub param: Option<ValueKind>,
    /// Opcode in the optional loop. 0 means the tag is never emitted there.
    pub opcode: u8,
    pub payload: TagPayload,
    pub validate: Option<TagValidateFn>,
}

impl TagDef {
    /// Name of the optional-operand slot this tag fills. Object tags share
    /// one slot per class, so `:is` and `:contains` collide as intended.
    #[must_use]
    pub fn slot_name(&self) -> &'static str {
        match self.payload {
            TagPayload::Object { class, .. } | TagPayload::ObjectByParam { class } => {
                class.as_str()
            }
            TagPayload::Param | TagPayload::Flag => self.name,
        }
    }
}

impl fmt::Debug for TagDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagDef")
            .field("name", &self.name)
            .field("opcode", &self.opcode)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// A named group of tags that commands link as a whole.
#[derive(Debug)]
pub struct TagSetDef {
    pub name: &'static str,
    pub tags: &'static [&'static TagDef],
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// Object classes, encoded as one byte in object operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectClass {
    Comparator,
    MatchType,
    AddressPart,
    SideEffect,
}

impl ObjectClass {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Comparator => 1,
            Self::MatchType => 2,
            Self::AddressPart => 3,
            Self::SideEffect => 4,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Comparator),
            2 => Some(Self::MatchType),
            3 => Some(Self::AddressPart),
            4 => Some(Self::SideEffect),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Comparator => "comparator",
            Self::MatchType => "match-type",
            Self::AddressPart => "address-part",
            Self::SideEffect => "side-effect",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime behavior behind an object reference.
#[derive(Clone, Copy)]
pub enum ObjectBehavior {
    Comparator(&'static dyn Comparator),
    MatchType(&'static dyn MatchType),
    AddressPart(&'static dyn AddressPart),
    SideEffect(&'static SideEffectDef),
}

impl ObjectBehavior {
    #[must_use]
    pub const fn class(&self) -> ObjectClass {
        match self {
            Self::Comparator(_) => ObjectClass::Comparator,
            Self::MatchType(_) => ObjectClass::MatchType,
            Self::AddressPart(_) => ObjectClass::AddressPart,
            Self::SideEffect(_) => ObjectClass::SideEffect,
        }
    }
}

/// A bytecode constant: `(extension, class, code)` names exactly one object.
pub struct ObjectDef {
    pub name: &'static str,
    pub code: u8,
    /// Operand that follows the reference in bytecode, if any.
    pub param: Option<ValueKind>,
    pub behavior: ObjectBehavior,
}

impl ObjectDef {
    #[must_use]
    pub const fn class(&self) -> ObjectClass {
        self.behavior.class()
    }
}

impl fmt::Debug for ObjectDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectDef")
            .field("name", &self.name)
            .field("class", &self.class())
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Positional operand types of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Value(ValueKind),
    Object(ObjectClass),
    /// Absolute code offset of a forward jump target.
    Offset,
}

/// What the interpreter does after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Jump(usize),
    Stop,
}

pub type ExecuteFn = fn(&mut Runtime<'_>, &Operands<'_>) -> Result<Flow, RuntimeError>;

/// Bytecode contract of one operation.
///
/// The optional-operand layout is not declared here: the registry derives
/// it from the tags of the command(s) that generate this operation.
pub struct OperationDef {
    pub mnemonic: &'static str,
    pub opcode: u8,
    pub source_line: bool,
    pub positional: &'static [OperandKind],
    pub execute: ExecuteFn,
}

impl fmt::Debug for OperationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDef")
            .field("mnemonic", &self.mnemonic)
            .field("opcode", &self.opcode)
            .field("source_line", &self.source_line)
            .field("positional", &self.positional)
            .finish_non_exhaustive()
    }
}
