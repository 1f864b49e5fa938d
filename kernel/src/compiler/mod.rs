//! Script compilation: validation against the registry, then code
//! generation.

pub mod generator;
pub mod validator;

use tracing::{info, warn};

use crate::ast::Ast;
use crate::binary::Program;
use crate::error::{CompileError, Diagnostics};
use crate::registry::Registry;

pub use generator::{generate, CodeGen};
pub use validator::{
    validate, ArgValue, CommandContext, Rejection, TagContext, ValidatedCommand, ValidatedScript,
    ValidatedTag,
};

/// Validate and generate. Warnings stay in `diags` on success too.
///
/// # Errors
///
/// See [`validate`] and [`generate`].
pub fn compile(
    ast: &Ast,
    registry: &Registry,
    diags: &mut Diagnostics,
) -> Result<Program, CompileError> {
    let script = match validate(ast, registry, diags) {
        Ok(script) => script,
        Err(err) => {
            warn!(error = %err, "compile failed");
            return Err(err);
        }
    };
    let program = generate(&script, registry)?;
    info!(
        commands = ast.commands.len(),
        code_len = program.code().len(),
        warnings = diags.warnings().count(),
        "script compiled"
    );
    Ok(program)
}
