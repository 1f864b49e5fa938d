//! The core language (extension id 0) and the `fileinto` extension.

pub mod actions;
pub mod conditions;
pub mod control;
pub mod objects;

use crate::error::RegistryError;
use crate::registry::{Extension, ExtensionRegistrar};

// Core opcodes.
pub const OP_JMP: u8 = 0x01;
pub const OP_JMPTRUE: u8 = 0x02;
pub const OP_JMPFALSE: u8 = 0x03;
pub const OP_NOT: u8 = 0x04;
pub const OP_TRUE: u8 = 0x05;
pub const OP_FALSE: u8 = 0x06;
pub const OP_STOP: u8 = 0x07;
pub const OP_KEEP: u8 = 0x10;
pub const OP_DISCARD: u8 = 0x11;
pub const OP_HEADER: u8 = 0x20;
pub const OP_ADDRESS: u8 = 0x21;
pub const OP_EXISTS: u8 = 0x22;
pub const OP_SIZE_OVER: u8 = 0x23;
pub const OP_SIZE_UNDER: u8 = 0x24;

/// `fileinto` opcode within its own extension.
pub const OP_FILEINTO: u8 = 0x01;

// Optional-operand slots shared across extensions.
pub const OPT_COMPARATOR: u8 = 1;
pub const OPT_MATCH_TYPE: u8 = 2;
pub const OPT_ADDRESS_PART: u8 = 3;
/// Store side effects such as `:flags`.
pub const OPT_SIDE_EFFECT: u8 = 4;

/// Commands, tests, objects and actions every script can use.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreLanguage;

impl Extension for CoreLanguage {
    fn name(&self) -> &'static str {
        "core"
    }

    fn register(&self, r: &mut ExtensionRegistrar<'_>) -> Result<(), RegistryError> {
        for op in control::OPERATIONS.iter().chain(&conditions::OPERATIONS) {
            r.operation(*op)?;
        }
        r.operation(&actions::KEEP_OP)?;
        r.operation(&actions::DISCARD_OP)?;

        for object in &objects::OBJECTS {
            r.object(*object)?;
        }
        r.tag_set(&objects::COMPARATOR_TAGS)?;
        r.tag_set(&objects::MATCH_TYPE_TAGS)?;
        r.tag_set(&objects::ADDRESS_PART_TAGS)?;

        for command in [
            &control::REQUIRE,
            &control::IF,
            &control::ELSIF,
            &control::ELSE,
            &control::STOP,
            &control::ALLOF,
            &control::ANYOF,
            &control::NOT,
            &actions::KEEP_CMD,
            &actions::DISCARD_CMD,
            &conditions::HEADER,
            &conditions::ADDRESS,
            &conditions::EXISTS,
            &conditions::SIZE,
            &conditions::TRUE,
            &conditions::FALSE,
        ] {
            r.command(command)?;
        }

        r.action(&actions::STORE)?;
        r.action(&actions::DISCARD)
    }
}

/// `require "fileinto"`. Registered right after the core.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileintoExtension;

impl Extension for FileintoExtension {
    fn name(&self) -> &'static str {
        "fileinto"
    }

    fn register(&self, r: &mut ExtensionRegistrar<'_>) -> Result<(), RegistryError> {
        r.operation(&actions::FILEINTO_OP)?;
        r.command(&actions::FILEINTO_CMD)
    }
}
