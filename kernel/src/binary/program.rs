//! Compiled program container.
//!
//! # Wire layout
//!
//! ```text
//! [magic:4 = "SVB1"][version:u16le]
//! [ext_count:u16le]  ([id:u16le][name_len:u16le][name:utf-8])*
//! [code_len:u32le]   [code]
//! [line_count:u32le] ([offset:u32le][line:u32le])*
//! ```
//!
//! The extension table lists every extension the code references, in id
//! order. The interpreter checks it against the registry before running.
//! Line entries are sorted by offset; [`Program::line_at`] maps an offset
//! back to the source line of the command that produced it.
//!
//! Parsing fails closed: bad magic, unsupported versions, truncation and
//! trailing bytes are all rejected.

use sha2::{Digest, Sha256};

use crate::error::BytecodeError;
use crate::registry::ExtensionId;

pub const PROGRAM_MAGIC: [u8; 4] = *b"SVB1";
pub const PROGRAM_VERSION: u16 = 1;

/// Maps a code offset to the source line it was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub offset: u32,
    pub line: u32,
}

/// A compiled script. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    extensions: Vec<(ExtensionId, String)>,
    code: Vec<u8>,
    lines: Vec<LineEntry>,
}

impl Program {
    /// Assemble a program. Entries are sorted; callers need not pre-sort.
    #[must_use]
    pub fn new(
        mut extensions: Vec<(ExtensionId, String)>,
        code: Vec<u8>,
        mut lines: Vec<LineEntry>,
    ) -> Self {
        extensions.sort_by_key(|(id, _)| *id);
        extensions.dedup_by_key(|(id, _)| *id);
        lines.sort_by_key(|e| e.offset);
        Self {
            extensions,
            code,
            lines,
        }
    }

    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    #[must_use]
    pub fn extensions(&self) -> &[(ExtensionId, String)] {
        &self.extensions
    }

    #[must_use]
    pub fn line_table(&self) -> &[LineEntry] {
        &self.lines
    }

    /// Source line of the last entry at or before `offset`, 0 if none.
    #[must_use]
    pub fn line_at(&self, offset: usize) -> u32 {
        let idx = self
            .lines
            .partition_point(|e| e.offset as usize <= offset);
        if idx == 0 {
            0
        } else {
            self.lines[idx - 1].line
        }
    }

    /// Serialize to the wire layout.
    ///
    /// # Errors
    ///
    /// [`BytecodeError::BadHeader`] if a section exceeds its length field.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BytecodeError> {
        let mut out = Vec::with_capacity(16 + self.code.len() + self.lines.len() * 8);
        out.extend_from_slice(&PROGRAM_MAGIC);
        out.extend_from_slice(&PROGRAM_VERSION.to_le_bytes());

        let ext_count = u16::try_from(self.extensions.len()).map_err(|_| too_long("extension table"))?;
        out.extend_from_slice(&ext_count.to_le_bytes());
        for (id, name) in &self.extensions {
            let len = u16::try_from(name.len()).map_err(|_| too_long("extension name"))?;
            out.extend_from_slice(&id.0.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
        }

        let code_len = u32::try_from(self.code.len()).map_err(|_| too_long("code"))?;
        out.extend_from_slice(&code_len.to_le_bytes());
        out.extend_from_slice(&self.code);

        let line_count = u32::try_from(self.lines.len()).map_err(|_| too_long("line table"))?;
        out.extend_from_slice(&line_count.to_le_bytes());
        for entry in &self.lines {
            out.extend_from_slice(&entry.offset.to_le_bytes());
            out.extend_from_slice(&entry.line.to_le_bytes());
        }
        Ok(out)
    }

    /// Parse the wire layout.
    ///
    /// # Errors
    ///
    /// [`BytecodeError::BadHeader`] or [`BytecodeError::Truncated`].
    pub fn from_bytes(data: &[u8]) -> Result<Self, BytecodeError> {
        let mut cursor = 0usize;

        let magic = read_slice(data, &mut cursor, 4, "magic")?;
        if magic != PROGRAM_MAGIC {
            return Err(BytecodeError::BadHeader {
                detail: format!("bad magic {}", hex::encode(magic)),
            });
        }
        let version = read_u16le(data, &mut cursor, "version")?;
        if version != PROGRAM_VERSION {
            return Err(BytecodeError::BadHeader {
                detail: format!("unsupported version {version}"),
            });
        }

        let ext_count = read_u16le(data, &mut cursor, "extension table")?;
        let mut extensions = Vec::with_capacity(usize::from(ext_count));
        for _ in 0..ext_count {
            let id = ExtensionId(read_u16le(data, &mut cursor, "extension id")?);
            let len = usize::from(read_u16le(data, &mut cursor, "extension name")?);
            let name = read_slice(data, &mut cursor, len, "extension name")?;
            let name = std::str::from_utf8(name).map_err(|_| BytecodeError::BadHeader {
                detail: format!("extension {id} name is not UTF-8"),
            })?;
            if extensions.last().is_some_and(|(prev, _)| *prev >= id) {
                return Err(BytecodeError::BadHeader {
                    detail: format!("extension table not in id order at {id}"),
                });
            }
            extensions.push((id, name.to_string()));
        }

        let code_len = read_u32le(data, &mut cursor, "code")? as usize;
        let code = read_slice(data, &mut cursor, code_len, "code")?.to_vec();

        let line_count = read_u32le(data, &mut cursor, "line table")? as usize;
        let mut lines = Vec::new();
        for _ in 0..line_count {
            let offset = read_u32le(data, &mut cursor, "line entry")?;
            let line = read_u32le(data, &mut cursor, "line entry")?;
            if offset as usize > code.len() {
                return Err(BytecodeError::BadHeader {
                    detail: format!("line entry offset {offset} past end of code"),
                });
            }
            lines.push(LineEntry { offset, line });
        }

        if cursor != data.len() {
            return Err(BytecodeError::BadHeader {
                detail: format!("{} trailing bytes", data.len() - cursor),
            });
        }

        Ok(Self::new(extensions, code, lines))
    }

    /// Hex SHA-256 of the serialized program. Identifies a compiled script
    /// independent of where it was loaded from.
    ///
    /// # Errors
    ///
    /// See [`Program::to_bytes`].
    pub fn digest(&self) -> Result<String, BytecodeError> {
        let bytes = self.to_bytes()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

fn too_long(section: &str) -> BytecodeError {
    BytecodeError::BadHeader {
        detail: format!("{section} too long to serialize"),
    }
}

fn read_slice<'a>(
    data: &'a [u8],
    cursor: &mut usize,
    len: usize,
    section: &str,
) -> Result<&'a [u8], BytecodeError> {
    let end = cursor.checked_add(len).filter(|end| *end <= data.len());
    let Some(end) = end else {
        return Err(BytecodeError::Truncated {
            detail: format!(
                "{section}: need {len} bytes at offset {} but only {} remain",
                *cursor,
                data.len().saturating_sub(*cursor)
            ),
        });
    };
    let slice = &data[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_u16le(data: &[u8], cursor: &mut usize, section: &str) -> Result<u16, BytecodeError> {
    let b = read_slice(data, cursor, 2, section)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32le(data: &[u8], cursor: &mut usize, section: &str) -> Result<u32, BytecodeError> {
    let b = read_slice(data, cursor, 4, section)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
