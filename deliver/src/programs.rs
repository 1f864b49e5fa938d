//! Compiled programs on disk, one `<stage>.svbin` file per stage.
//!
//! Writes go through a temporary file and a rename so a reader never
//! sees a half-written program. Loading is fail-closed: anything
//! [`Program::from_bytes`] rejects is an error, never a partial program.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sieve_kernel::binary::Program;
use sieve_kernel::error::BytecodeError;
use tracing::debug;

/// File extension of a stored program.
pub const PROGRAM_EXTENSION: &str = "svbin";

#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error("program I/O on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("program {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: BytecodeError,
    },
    #[error("program cannot be serialized: {0}")]
    Encode(#[from] BytecodeError),
}

#[derive(Debug, Clone)]
pub struct ProgramStore {
    dir: PathBuf,
}

impl ProgramStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_of(&self, stage: &str) -> PathBuf {
        self.dir.join(format!("{stage}.{PROGRAM_EXTENSION}"))
    }

    /// # Errors
    ///
    /// [`ProgramError`] if the program cannot be encoded or written.
    pub fn save(&self, stage: &str, program: &Program) -> Result<PathBuf, ProgramError> {
        let bytes = program.to_bytes()?;
        let path = self.path_of(stage);
        let io_err = |source| ProgramError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let tmp = path.with_extension(format!("{PROGRAM_EXTENSION}.tmp"));
        fs::write(&tmp, &bytes).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;
        debug!(stage, path = %path.display(), bytes = bytes.len(), "program saved");
        Ok(path)
    }

    /// # Errors
    ///
    /// [`ProgramError::Io`] if the file cannot be read,
    /// [`ProgramError::Corrupt`] if it does not decode.
    pub fn load(&self, stage: &str) -> Result<Program, ProgramError> {
        let path = self.path_of(stage);
        let bytes = fs::read(&path).map_err(|source| ProgramError::Io {
            path: path.clone(),
            source,
        })?;
        let program = Program::from_bytes(&bytes).map_err(|source| ProgramError::Corrupt {
            path: path.clone(),
            source,
        })?;
        debug!(stage, path = %path.display(), "program loaded");
        Ok(program)
    }
}
