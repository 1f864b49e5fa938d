//! Typed code reader.
//!
//! Fail-closed: every read checks bounds, operand kind and extension id,
//! and returns [`BytecodeError`] instead of guessing. No panics on
//! malformed input.
//!
//! String lists are not decoded when read. [`StringListRef`] keeps the raw
//! slice and hands out single-pass iterators that decode one item at a
//! time.

use crate::binary::{
    kind_name, KIND_NUMBER, KIND_OBJECT, KIND_OFFSET, KIND_STRING, KIND_STRING_LIST,
};
use crate::error::BytecodeError;
use crate::registry::{ExtensionId, ObjectClass, ObjectDef, ObjectKey, Registry, ValueKind};

// ---------------------------------------------------------------------------
// Operand values
// ---------------------------------------------------------------------------

/// A decoded operand. Borrows string data from the program.
#[derive(Debug, Clone)]
pub enum OperandValue<'a> {
    Number(u64),
    String(&'a str),
    StringList(StringListRef<'a>),
    Object(ObjectOperand<'a>),
    /// A tag that carries no payload.
    Flag,
    Offset(usize),
}

impl OperandValue<'_> {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::StringList(_) => "string list",
            Self::Object(_) => "object",
            Self::Flag => "flag",
            Self::Offset(_) => "offset",
        }
    }
}

/// A resolved object reference and its parameter, if any.
#[derive(Debug, Clone)]
pub struct ObjectOperand<'a> {
    pub key: ObjectKey,
    pub def: &'static ObjectDef,
    pub param: Option<Box<OperandValue<'a>>>,
}

impl<'a> ObjectOperand<'a> {
    /// String parameter, if the object carries one.
    #[must_use]
    pub fn param_str(&self) -> Option<&'a str> {
        match self.param.as_deref() {
            Some(OperandValue::String(s)) => Some(*s),
            _ => None,
        }
    }
}

/// An undecoded string list inside the program.
#[derive(Debug, Clone, Copy)]
pub struct StringListRef<'a> {
    count: u32,
    items: &'a [u8],
    offset: usize,
}

impl<'a> StringListRef<'a> {
    /// Number of items declared by the operand header.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// A fresh single-pass iterator over the items.
    #[must_use]
    pub fn iter(&self) -> StringListIter<'a> {
        StringListIter {
            remaining: self.count,
            data: self.items,
            pos: 0,
            offset: self.offset,
            failed: false,
        }
    }

    /// Decode every item.
    ///
    /// # Errors
    ///
    /// [`BytecodeError`] if any item is truncated or not UTF-8.
    pub fn to_vec(&self) -> Result<Vec<String>, BytecodeError> {
        self.iter()
            .map(|item| item.map(str::to_string))
            .collect()
    }
}

/// Lazily decodes string-list items. Yields an error once and then stops
/// if the list body is malformed, including leftover bytes after the last
/// declared item.
#[derive(Debug, Clone)]
pub struct StringListIter<'a> {
    remaining: u32,
    data: &'a [u8],
    pos: usize,
    offset: usize,
    failed: bool,
}

impl<'a> StringListIter<'a> {
    fn fail(&mut self, err: BytecodeError) -> Option<Result<&'a str, BytecodeError>> {
        self.failed = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for StringListIter<'a> {
    type Item = Result<&'a str, BytecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.remaining == 0 {
            if self.pos != self.data.len() {
                let extra = self.data.len() - self.pos;
                return self.fail(BytecodeError::Truncated {
                    detail: format!(
                        "string list at offset {}: {extra} bytes after last item",
                        self.offset
                    ),
                });
            }
            return None;
        }
        let at = self.offset + self.pos;
        let Some(len_bytes) = self.data.get(self.pos..self.pos + 4) else {
            return self.fail(BytecodeError::Truncated {
                detail: format!("string list item length at offset {at}"),
            });
        };
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        let start = self.pos + 4;
        let Some(bytes) = self.data.get(start..start + len) else {
            return self.fail(BytecodeError::Truncated {
                detail: format!("string list item of {len} bytes at offset {at}"),
            });
        };
        let Ok(item) = std::str::from_utf8(bytes) else {
            return self.fail(BytecodeError::InvalidUtf8 { offset: at });
        };
        self.pos = start + len;
        self.remaining -= 1;
        Some(Ok(item))
    }
}

// ---------------------------------------------------------------------------
// CodeReader
// ---------------------------------------------------------------------------

/// Cursor over program code.
#[derive(Debug, Clone)]
pub struct CodeReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> CodeReader<'a> {
    #[must_use]
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, pos: 0 }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn at_end(&self) -> bool {
        self.pos >= self.code.len()
    }

    #[must_use]
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Move to `target`, which must lie in `(from, code_len]`.
    ///
    /// # Errors
    ///
    /// [`BytecodeError::BadJump`] for backward, self or out-of-range jumps.
    pub fn jump(&mut self, from: usize, target: usize) -> Result<(), BytecodeError> {
        if target <= from || target > self.code.len() {
            return Err(BytecodeError::BadJump { from, target });
        }
        self.pos = target;
        Ok(())
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], BytecodeError> {
        let end = self.pos.checked_add(len);
        match end.and_then(|end| self.code.get(self.pos..end)) {
            Some(slice) => {
                self.pos += len;
                Ok(slice)
            }
            None => Err(BytecodeError::Truncated {
                detail: format!(
                    "{what}: need {len} bytes at offset {} but only {} remain",
                    self.pos,
                    self.code.len().saturating_sub(self.pos)
                ),
            }),
        }
    }

    fn u8(&mut self, what: &str) -> Result<u8, BytecodeError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, BytecodeError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32, BytecodeError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, what: &str) -> Result<u64, BytecodeError> {
        let b = self.take(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Operation header: owning extension and opcode.
    ///
    /// # Errors
    ///
    /// [`BytecodeError::Truncated`].
    pub fn read_operation(&mut self) -> Result<(ExtensionId, u8), BytecodeError> {
        let ext = ExtensionId(self.u16("operation extension")?);
        let opcode = self.u8("opcode")?;
        Ok((ext, opcode))
    }

    /// # Errors
    ///
    /// [`BytecodeError::Truncated`].
    pub fn read_source_line(&mut self) -> Result<u32, BytecodeError> {
        self.u32("source line")
    }

    /// Next code of the optional loop. 0 ends the loop.
    ///
    /// # Errors
    ///
    /// [`BytecodeError::Truncated`].
    pub fn read_optional_code(&mut self) -> Result<u8, BytecodeError> {
        self.u8("optional operand code")
    }

    fn primitive_header(&mut self, expected: u8) -> Result<(), BytecodeError> {
        let at = self.pos;
        let ext = self.u16("operand extension")?;
        let kind = self.u8("operand kind")?;
        if ext != ExtensionId::CORE.0 {
            return Err(BytecodeError::UnknownOperand { ext, kind, offset: at });
        }
        if kind != expected {
            if !matches!(
                kind,
                KIND_NUMBER | KIND_STRING | KIND_STRING_LIST | KIND_OBJECT | KIND_OFFSET
            ) {
                return Err(BytecodeError::UnknownOperand { ext, kind, offset: at });
            }
            return Err(BytecodeError::TypeMismatch {
                expected: kind_name(expected),
                found: kind_name(kind),
                offset: at,
            });
        }
        Ok(())
    }

    /// # Errors
    ///
    /// [`BytecodeError`] on truncation or a non-number operand.
    pub fn read_number(&mut self) -> Result<u64, BytecodeError> {
        self.primitive_header(KIND_NUMBER)?;
        self.u64("number")
    }

    /// # Errors
    ///
    /// [`BytecodeError`] on truncation, a non-string operand or bad UTF-8.
    pub fn read_string(&mut self) -> Result<&'a str, BytecodeError> {
        self.primitive_header(KIND_STRING)?;
        let len = self.u32("string length")? as usize;
        let at = self.pos;
        let bytes = self.take(len, "string")?;
        std::str::from_utf8(bytes).map_err(|_| BytecodeError::InvalidUtf8 { offset: at })
    }

    /// Reads the list frame only. Items decode lazily.
    ///
    /// # Errors
    ///
    /// [`BytecodeError`] on truncation or a non-list operand.
    pub fn read_string_list(&mut self) -> Result<StringListRef<'a>, BytecodeError> {
        self.primitive_header(KIND_STRING_LIST)?;
        let count = self.u32("string list count")?;
        let byte_len = self.u32("string list size")? as usize;
        let offset = self.pos;
        let items = self.take(byte_len, "string list body")?;
        Ok(StringListRef {
            count,
            items,
            offset,
        })
    }

    /// # Errors
    ///
    /// [`BytecodeError`] on truncation or a non-offset operand.
    pub fn read_offset(&mut self) -> Result<usize, BytecodeError> {
        self.primitive_header(KIND_OFFSET)?;
        Ok(self.u32("jump target")? as usize)
    }

    /// Object reference of the given class, resolved via the registry,
    /// followed by its declared parameter.
    ///
    /// # Errors
    ///
    /// [`BytecodeError`] on truncation, unknown object, wrong class or a
    /// malformed parameter.
    pub fn read_object(
        &mut self,
        registry: &Registry,
        class: ObjectClass,
    ) -> Result<ObjectOperand<'a>, BytecodeError> {
        let at = self.pos;
        let ext = self.u16("operand extension")?;
        let kind = self.u8("operand kind")?;
        if kind != KIND_OBJECT {
            if registry.extension(ExtensionId(ext)).is_none() {
                return Err(BytecodeError::UnknownExtension { ext, offset: at });
            }
            return Err(BytecodeError::TypeMismatch {
                expected: class.as_str().into(),
                found: kind_name(kind),
                offset: at,
            });
        }
        let class_code = self.u8("object class")?;
        let code = self.u8("object code")?;
        let found = ObjectClass::from_code(class_code).ok_or(BytecodeError::UnknownObject {
            ext,
            class: class_code,
            code,
            offset: at,
        })?;
        if found != class {
            return Err(BytecodeError::TypeMismatch {
                expected: class.as_str().into(),
                found: found.as_str().into(),
                offset: at,
            });
        }
        let key = ObjectKey {
            ext: ExtensionId(ext),
            class,
            code,
        };
        let entry = registry.object(&key).ok_or(BytecodeError::UnknownObject {
            ext,
            class: class_code,
            code,
            offset: at,
        })?;
        let param = match entry.def.param {
            Some(kind) => Some(Box::new(self.read_value(kind)?)),
            None => None,
        };
        Ok(ObjectOperand {
            key,
            def: entry.def,
            param,
        })
    }

    /// # Errors
    ///
    /// See the typed readers.
    pub fn read_value(&mut self, kind: ValueKind) -> Result<OperandValue<'a>, BytecodeError> {
        Ok(match kind {
            ValueKind::Number => OperandValue::Number(self.read_number()?),
            ValueKind::String => OperandValue::String(self.read_string()?),
            ValueKind::StringList => OperandValue::StringList(self.read_string_list()?),
        })
    }
}
