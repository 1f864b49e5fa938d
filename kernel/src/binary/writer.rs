//! Append-only code writer.
//!
//! Only the generator writes code. Lengths and offsets are stored as
//! `u32`; anything larger is refused rather than truncated.

use crate::binary::{
    KIND_NUMBER, KIND_OBJECT, KIND_OFFSET, KIND_STRING, KIND_STRING_LIST, OPTIONAL_END,
};
use crate::registry::{ExtensionId, ObjectKey};

/// A length or offset does not fit the 32-bit wire fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{what} of {value} does not fit in 32 bits")]
pub struct LengthOverflow {
    pub what: &'static str,
    pub value: usize,
}

fn to_u32(what: &'static str, value: usize) -> Result<u32, LengthOverflow> {
    u32::try_from(value).map_err(|_| LengthOverflow { what, value })
}

#[derive(Debug, Default, Clone)]
pub struct CodeWriter {
    buf: Vec<u8>,
}

impl CodeWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn operation(&mut self, ext: ExtensionId, opcode: u8) {
        self.buf.extend_from_slice(&ext.0.to_le_bytes());
        self.buf.push(opcode);
    }

    pub fn source_line(&mut self, line: u32) {
        self.buf.extend_from_slice(&line.to_le_bytes());
    }

    /// Opens one optional pair. `code` must be nonzero.
    pub fn optional_code(&mut self, code: u8) {
        debug_assert_ne!(code, OPTIONAL_END);
        self.buf.push(code);
    }

    pub fn optional_end(&mut self) {
        self.buf.push(OPTIONAL_END);
    }

    fn operand_header(&mut self, ext: ExtensionId, kind: u8) {
        self.buf.extend_from_slice(&ext.0.to_le_bytes());
        self.buf.push(kind);
    }

    pub fn number(&mut self, value: u64) {
        self.operand_header(ExtensionId::CORE, KIND_NUMBER);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// # Errors
    ///
    /// [`LengthOverflow`] for strings of 4 GiB or more.
    pub fn string(&mut self, value: &str) -> Result<(), LengthOverflow> {
        let len = to_u32("string length", value.len())?;
        self.operand_header(ExtensionId::CORE, KIND_STRING);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// # Errors
    ///
    /// [`LengthOverflow`] if the item count or total size exceeds `u32`.
    pub fn string_list<S: AsRef<str>>(&mut self, items: &[S]) -> Result<(), LengthOverflow> {
        let count = to_u32("string list count", items.len())?;
        let byte_len: usize = items.iter().map(|s| 4 + s.as_ref().len()).sum();
        let byte_len = to_u32("string list size", byte_len)?;
        self.operand_header(ExtensionId::CORE, KIND_STRING_LIST);
        self.buf.extend_from_slice(&count.to_le_bytes());
        self.buf.extend_from_slice(&byte_len.to_le_bytes());
        for item in items {
            let item = item.as_ref();
            // Bounded by byte_len above.
            let len = to_u32("string length", item.len())?;
            self.buf.extend_from_slice(&len.to_le_bytes());
            self.buf.extend_from_slice(item.as_bytes());
        }
        Ok(())
    }

    /// Object reference. A parameter operand, if the object declares one,
    /// must be written right after.
    pub fn object(&mut self, key: ObjectKey) {
        self.operand_header(key.ext, KIND_OBJECT);
        self.buf.push(key.class.code());
        self.buf.push(key.code);
    }

    /// Writes an offset operand with a zero target and returns the position
    /// of the target field for [`CodeWriter::patch_offset`].
    pub fn offset_placeholder(&mut self) -> usize {
        self.operand_header(ExtensionId::CORE, KIND_OFFSET);
        let at = self.buf.len();
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        at
    }

    /// # Errors
    ///
    /// [`LengthOverflow`] if `target` exceeds `u32`.
    ///
    /// # Panics
    ///
    /// Panics if `at` was not returned by [`CodeWriter::offset_placeholder`].
    pub fn patch_offset(&mut self, at: usize, target: usize) -> Result<(), LengthOverflow> {
        let target = to_u32("jump target", target)?;
        self.buf[at..at + 4].copy_from_slice(&target.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ObjectClass;

    #[test]
    fn number_layout() {
        let mut w = CodeWriter::new();
        w.number(7);
        assert_eq!(w.as_bytes(), &[0, 0, KIND_NUMBER, 7, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn string_list_carries_count_and_byte_len() {
        let mut w = CodeWriter::new();
        w.string_list(&["ab", "c"]).unwrap();
        let b = w.as_bytes();
        assert_eq!(b[2], KIND_STRING_LIST);
        assert_eq!(u32::from_le_bytes([b[3], b[4], b[5], b[6]]), 2);
        assert_eq!(u32::from_le_bytes([b[7], b[8], b[9], b[10]]), 4 + 2 + 4 + 1);
        assert_eq!(b.len(), 11 + 11);
    }

    #[test]
    fn object_carries_owner_extension() {
        let mut w = CodeWriter::new();
        w.object(ObjectKey {
            ext: ExtensionId(3),
            class: ObjectClass::MatchType,
            code: 9,
        });
        assert_eq!(w.as_bytes(), &[3, 0, KIND_OBJECT, 2, 9]);
    }

    #[test]
    fn offset_patch_rewrites_target() {
        let mut w = CodeWriter::new();
        let at = w.offset_placeholder();
        w.patch_offset(at, 0x0102).unwrap();
        assert_eq!(&w.as_bytes()[at..], &[2, 1, 0, 0]);
    }
}
