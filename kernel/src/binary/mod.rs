//! Binary program format.
//!
//! # Code layout
//!
//! ```text
//! operation := [ext:u16le][opcode:u8] [source_line:u32le]? optional? positional*
//! optional  := ([opt_code:u8 != 0][payload])* [0x00]
//! operand   := [ext:u16le][kind:u8][payload]
//!
//! kind 0x01 NUMBER       [value:u64le]
//! kind 0x02 STRING       [len:u32le][utf-8 bytes]
//! kind 0x03 STRING-LIST  [count:u32le][byte_len:u32le]([len:u32le][utf-8 bytes])*
//! kind 0x04 OBJECT       [class:u8][code:u8] param-operand?
//! kind 0x05 OFFSET       [target:u32le]
//! ```
//!
//! Primitive operands always carry extension id 0. Object operands carry
//! the id of the extension that registered the object. An operation has an
//! optional loop exactly when its registry layout declares optional slots,
//! and then the loop is always present, even if it only holds the sentinel.
//!
//! The program container around the code is described in [`program`].

pub mod dump;
pub mod operands;
pub mod program;
pub mod reader;
pub mod writer;

pub const KIND_NUMBER: u8 = 0x01;
pub const KIND_STRING: u8 = 0x02;
pub const KIND_STRING_LIST: u8 = 0x03;
pub const KIND_OBJECT: u8 = 0x04;
pub const KIND_OFFSET: u8 = 0x05;

/// Sentinel closing the optional-operand loop.
pub const OPTIONAL_END: u8 = 0x00;

/// Human-readable operand kind for diagnostics.
#[must_use]
pub fn kind_name(kind: u8) -> String {
    match kind {
        KIND_NUMBER => "number".into(),
        KIND_STRING => "string".into(),
        KIND_STRING_LIST => "string list".into(),
        KIND_OBJECT => "object".into(),
        KIND_OFFSET => "offset".into(),
        other => format!("kind {other:#04x}"),
    }
}

pub use operands::{decode_operands, Operands, OptionalOperands};
pub use program::{LineEntry, Program};
pub use reader::{CodeReader, ObjectOperand, OperandValue, StringListIter, StringListRef};
pub use writer::CodeWriter;
