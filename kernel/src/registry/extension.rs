//! Extension identity and lifecycle.

use std::fmt;

use crate::config::EngineConfig;
use crate::error::{ExtensionLoadError, RegistryError};
use crate::registry::descriptor::{CommandDef, ObjectDef, OperationDef, TagDef, TagSetDef};
use crate::registry::RegistryBuilder;
use crate::result::ActionDef;

/// Numeric extension identity, assigned in registration order.
///
/// Id 0 is the core language. Every operation and operand in bytecode
/// carries the id of the extension that defines it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtensionId(pub u16);

impl ExtensionId {
    pub const CORE: Self = Self(0);

    #[must_use]
    pub const fn is_core(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of language functionality.
///
/// `register` runs once while the registry is built. The load hooks run
/// each time a script requires the extension (validator) and each time a
/// program that references it starts executing (runtime).
pub trait Extension: Send + Sync {
    fn name(&self) -> &'static str;

    /// Contribute descriptors.
    ///
    /// # Errors
    ///
    /// Propagates [`RegistryError`] from the registrar.
    fn register(&self, registrar: &mut ExtensionRegistrar<'_>) -> Result<(), RegistryError>;

    /// Called when a script names this extension in `require`.
    ///
    /// # Errors
    ///
    /// An error aborts compilation immediately.
    fn validator_load(&self, _config: &EngineConfig) -> Result<(), ExtensionLoadError> {
        Ok(())
    }

    /// Called before a program referencing this extension runs.
    ///
    /// # Errors
    ///
    /// An error aborts execution with an extension failure.
    fn runtime_load(&self, _config: &EngineConfig) -> Result<(), ExtensionLoadError> {
        Ok(())
    }
}

/// Handle through which one extension adds its descriptors.
pub struct ExtensionRegistrar<'b> {
    pub(crate) builder: &'b mut RegistryBuilder,
    pub(crate) ext: ExtensionId,
}

impl ExtensionRegistrar<'_> {
    #[must_use]
    pub fn id(&self) -> ExtensionId {
        self.ext
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.builder.config()
    }

    /// Register a command or test.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateCommand`] if the name is taken.
    pub fn command(&mut self, def: &'static CommandDef) -> Result<(), RegistryError> {
        self.builder.add_command(self.ext, def)
    }

    /// Register an operation under this extension's id.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateOperation`] if the opcode is taken.
    pub fn operation(&mut self, def: &'static OperationDef) -> Result<(), RegistryError> {
        self.builder.add_operation(self.ext, def)
    }

    /// Register an object constant.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateObject`] if its class already has the name
    /// or code.
    pub fn object(&mut self, def: &'static ObjectDef) -> Result<(), RegistryError> {
        self.builder.add_object(self.ext, def)
    }

    /// Register a new tag set that commands can link.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateTagSet`] if the name is taken.
    pub fn tag_set(&mut self, def: &'static TagSetDef) -> Result<(), RegistryError> {
        self.builder.add_tag_set(self.ext, def)
    }

    /// Add a tag to an existing (possibly foreign) tag set. Resolved when
    /// the registry is built, so registration order does not matter.
    pub fn extend_tag_set(&mut self, set: &'static str, tag: &'static TagDef) {
        self.builder.defer_set_extension(self.ext, set, tag);
    }

    /// Attach a tag to another extension's command.
    pub fn attach_tag(&mut self, command: &'static str, tag: &'static TagDef) {
        self.builder.defer_attachment(self.ext, command, tag);
    }

    /// Register an action descriptor.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateAction`] if the name is taken.
    pub fn action(&mut self, def: &'static ActionDef) -> Result<(), RegistryError> {
        self.builder.add_action(def)
    }
}
