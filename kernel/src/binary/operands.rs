//! Operand decoding for one operation.
//!
//! [`decode_operands`] reads everything after the operation header using
//! the registry's layout for that operation: the source line if declared,
//! the optional loop if the layout has slots, then the positional operands.
//! Execute callbacks only ever see the decoded [`Operands`].

use std::collections::BTreeMap;

use crate::binary::reader::{CodeReader, ObjectOperand, OperandValue, StringListRef};
use crate::error::BytecodeError;
use crate::registry::{OperandKind, OperationEntry, PayloadKind, Registry};

/// Optional operands present on one operation, keyed by opcode.
#[derive(Debug, Clone, Default)]
pub struct OptionalOperands<'a> {
    slots: BTreeMap<u8, (&'static str, OperandValue<'a>)>,
}

impl<'a> OptionalOperands<'a> {
    #[must_use]
    pub fn get(&self, code: u8) -> Option<&OperandValue<'a>> {
        self.slots.get(&code).map(|(_, value)| value)
    }

    #[must_use]
    pub fn contains(&self, code: u8) -> bool {
        self.slots.contains_key(&code)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `(opcode, slot name, value)` in opcode order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &'static str, &OperandValue<'a>)> {
        self.slots
            .iter()
            .map(|(code, (name, value))| (*code, *name, value))
    }

    #[must_use]
    pub fn number(&self, code: u8) -> Option<u64> {
        match self.get(code) {
            Some(OperandValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn string(&self, code: u8) -> Option<&'a str> {
        match self.get(code) {
            Some(OperandValue::String(s)) => Some(*s),
            _ => None,
        }
    }

    #[must_use]
    pub fn string_list(&self, code: u8) -> Option<StringListRef<'a>> {
        match self.get(code) {
            Some(OperandValue::StringList(list)) => Some(*list),
            _ => None,
        }
    }

    #[must_use]
    pub fn object(&self, code: u8) -> Option<&ObjectOperand<'a>> {
        match self.get(code) {
            Some(OperandValue::Object(obj)) => Some(obj),
            _ => None,
        }
    }
}

/// Decoded operands of one operation.
#[derive(Debug, Clone)]
pub struct Operands<'a> {
    /// Code offset of the operation header.
    pub offset: usize,
    pub line: Option<u32>,
    pub optional: OptionalOperands<'a>,
    pub positional: Vec<OperandValue<'a>>,
}

impl<'a> Operands<'a> {
    fn positional(&self, index: usize, expected: &str) -> Result<&OperandValue<'a>, BytecodeError> {
        self.positional
            .get(index)
            .ok_or_else(|| BytecodeError::TypeMismatch {
                expected: expected.into(),
                found: format!("missing operand {index}"),
                offset: self.offset,
            })
    }

    fn mismatch(&self, expected: &str, found: &OperandValue<'_>) -> BytecodeError {
        BytecodeError::TypeMismatch {
            expected: expected.into(),
            found: found.type_name().into(),
            offset: self.offset,
        }
    }

    /// # Errors
    ///
    /// [`BytecodeError::TypeMismatch`] if operand `index` is absent or not
    /// a number.
    pub fn number(&self, index: usize) -> Result<u64, BytecodeError> {
        match self.positional(index, "number")? {
            OperandValue::Number(n) => Ok(*n),
            other => Err(self.mismatch("number", other)),
        }
    }

    /// # Errors
    ///
    /// [`BytecodeError::TypeMismatch`] if operand `index` is absent or not
    /// a string.
    pub fn string(&self, index: usize) -> Result<&'a str, BytecodeError> {
        match self.positional(index, "string")? {
            OperandValue::String(s) => Ok(*s),
            other => Err(self.mismatch("string", other)),
        }
    }

    /// # Errors
    ///
    /// [`BytecodeError::TypeMismatch`] if operand `index` is absent or not
    /// a string list.
    pub fn string_list(&self, index: usize) -> Result<StringListRef<'a>, BytecodeError> {
        match self.positional(index, "string list")? {
            OperandValue::StringList(list) => Ok(*list),
            other => Err(self.mismatch("string list", other)),
        }
    }

    /// # Errors
    ///
    /// [`BytecodeError::TypeMismatch`] if operand `index` is absent or not
    /// an object.
    pub fn object(&self, index: usize) -> Result<&ObjectOperand<'a>, BytecodeError> {
        match self.positional(index, "object")? {
            OperandValue::Object(obj) => Ok(obj),
            other => Err(self.mismatch("object", other)),
        }
    }

    /// # Errors
    ///
    /// [`BytecodeError::TypeMismatch`] if operand `index` is absent or not
    /// an offset.
    pub fn offset(&self, index: usize) -> Result<usize, BytecodeError> {
        match self.positional(index, "offset")? {
            OperandValue::Offset(target) => Ok(*target),
            other => Err(self.mismatch("offset", other)),
        }
    }
}

/// Decode the operands that follow an operation header at `offset`.
///
/// # Errors
///
/// [`BytecodeError`] for truncation, wrong kinds, unknown objects, and
/// optional codes that are unknown to the layout or appear twice.
pub fn decode_operands<'a>(
    reader: &mut CodeReader<'a>,
    offset: usize,
    entry: &OperationEntry,
    registry: &Registry,
) -> Result<Operands<'a>, BytecodeError> {
    let line = if entry.def.source_line {
        Some(reader.read_source_line()?)
    } else {
        None
    };

    let mut optional = OptionalOperands::default();
    if !entry.optional.is_empty() {
        loop {
            let at = reader.position();
            let code = reader.read_optional_code()?;
            if code == crate::binary::OPTIONAL_END {
                break;
            }
            let slot = entry.optional.get(&code).ok_or_else(|| BytecodeError::BadOptional {
                opcode: code,
                offset: at,
                detail: format!("not part of the {} layout", entry.def.mnemonic),
            })?;
            if optional.contains(code) {
                return Err(BytecodeError::BadOptional {
                    opcode: code,
                    offset: at,
                    detail: format!("'{}' given twice", slot.name),
                });
            }
            let value = match slot.payload {
                PayloadKind::Value(kind) => reader.read_value(kind)?,
                PayloadKind::Flag => OperandValue::Flag,
                PayloadKind::Object(class) => {
                    OperandValue::Object(reader.read_object(registry, class)?)
                }
            };
            optional.slots.insert(code, (slot.name, value));
        }
    }

    let mut positional = Vec::with_capacity(entry.def.positional.len());
    for kind in entry.def.positional {
        positional.push(match *kind {
            OperandKind::Value(kind) => reader.read_value(kind)?,
            OperandKind::Object(class) => OperandValue::Object(reader.read_object(registry, class)?),
            OperandKind::Offset => OperandValue::Offset(reader.read_offset()?),
        });
    }

    Ok(Operands {
        offset,
        line,
        optional,
        positional,
    })
}
