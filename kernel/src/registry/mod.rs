//! The registry: every descriptor the engine knows, keyed for lookup.
//!
//! Built once at process start through [`RegistryBuilder`], then frozen
//! into an immutable [`Registry`] that the validator, generator and
//! interpreter all borrow. The core language is always extension id 0.
//!
//! `build()` is where cross-extension wiring is checked: linked tag sets,
//! attached tags and tag-set extensions are resolved, effective tag sets
//! are checked for name collisions, and each operation's optional-operand
//! layout is derived from the tags of the commands that generate it.

pub mod descriptor;
pub mod extension;

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::RegistryError;
use crate::lang::{CoreLanguage, FileintoExtension};
use crate::result::ActionDef;

pub use descriptor::{
    ArgSpec, BlockRule, CommandDef, CommandKind, Flow, ObjectBehavior, ObjectClass, ObjectDef,
    OperandKind, OperationDef, Subtests, TagDef, TagPayload, TagSetDef, ValueKind,
};
pub use extension::{Extension, ExtensionId, ExtensionRegistrar};

// ---------------------------------------------------------------------------
// Resolved entries
// ---------------------------------------------------------------------------

/// A registered extension.
pub struct ExtensionEntry {
    pub id: ExtensionId,
    pub name: &'static str,
    pub extension: Box<dyn Extension>,
}

impl std::fmt::Debug for ExtensionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Identity of an object constant in bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub ext: ExtensionId,
    pub class: ObjectClass,
    pub code: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct ObjectEntry {
    pub key: ObjectKey,
    pub def: &'static ObjectDef,
}

/// One tag in a command's effective tag set.
#[derive(Debug, Clone, Copy)]
pub struct TagEntry {
    pub def: &'static TagDef,
    /// Extension that contributed the tag (not necessarily the command's).
    pub ext: ExtensionId,
    /// Position in the effective set. Validation and emission follow it.
    pub order: usize,
    /// Fixed object for [`TagPayload::Object`] tags.
    pub object: Option<ObjectKey>,
}

#[derive(Debug)]
pub struct CommandEntry {
    pub def: &'static CommandDef,
    pub ext: ExtensionId,
    pub tags: Vec<TagEntry>,
}

impl CommandEntry {
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&TagEntry> {
        self.tags.iter().find(|t| t.def.name == name)
    }
}

/// Payload shape of an optional-operand slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Value(ValueKind),
    Flag,
    Object(ObjectClass),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionalSlot {
    pub name: &'static str,
    pub payload: PayloadKind,
}

#[derive(Debug)]
pub struct OperationEntry {
    pub def: &'static OperationDef,
    pub ext: ExtensionId,
    /// Optional-operand layout keyed by opcode.
    pub optional: BTreeMap<u8, OptionalSlot>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct PendingTag {
    ext: ExtensionId,
    target: &'static str,
    tag: &'static TagDef,
}

/// Mutable registry under construction.
pub struct RegistryBuilder {
    config: EngineConfig,
    extensions: Vec<ExtensionEntry>,
    commands: BTreeMap<&'static str, (ExtensionId, &'static CommandDef)>,
    command_order: Vec<&'static str>,
    operations: BTreeMap<(ExtensionId, u8), &'static OperationDef>,
    objects: BTreeMap<ObjectKey, &'static ObjectDef>,
    tag_sets: BTreeMap<&'static str, (ExtensionId, &'static TagSetDef)>,
    set_extensions: Vec<PendingTag>,
    attachments: Vec<PendingTag>,
    actions: BTreeMap<&'static str, &'static ActionDef>,
}

impl RegistryBuilder {
    /// Start a registry with the core language registered as id 0 and
    /// `fileinto` as id 1.
    ///
    /// # Errors
    ///
    /// Propagates core registration errors.
    pub fn new(config: EngineConfig) -> Result<Self, RegistryError> {
        let mut builder = Self {
            config,
            extensions: Vec::new(),
            commands: BTreeMap::new(),
            command_order: Vec::new(),
            operations: BTreeMap::new(),
            objects: BTreeMap::new(),
            tag_sets: BTreeMap::new(),
            set_extensions: Vec::new(),
            attachments: Vec::new(),
            actions: BTreeMap::new(),
        };
        builder.register(CoreLanguage)?;
        builder.register(FileintoExtension)?;
        Ok(builder)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register an extension and let it contribute descriptors.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateExtension`] for a name already present,
    /// [`RegistryError::TooManyExtensions`] past `u16::MAX` entries, or any
    /// error raised by the extension's own registration.
    pub fn register<E: Extension + 'static>(
        &mut self,
        extension: E,
    ) -> Result<ExtensionId, RegistryError> {
        let name = extension.name();
        if self.extensions.iter().any(|e| e.name == name) {
            return Err(RegistryError::DuplicateExtension { name: name.into() });
        }
        let id = u16::try_from(self.extensions.len())
            .map(ExtensionId)
            .map_err(|_| RegistryError::TooManyExtensions {
                limit: usize::from(u16::MAX),
            })?;
        {
            let mut registrar = ExtensionRegistrar {
                builder: self,
                ext: id,
            };
            extension.register(&mut registrar)?;
        }
        debug!(extension = name, id = id.0, "registered extension");
        self.extensions.push(ExtensionEntry {
            id,
            name,
            extension: Box::new(extension),
        });
        Ok(id)
    }

    pub(crate) fn add_command(
        &mut self,
        ext: ExtensionId,
        def: &'static CommandDef,
    ) -> Result<(), RegistryError> {
        if self.commands.insert(def.name, (ext, def)).is_some() {
            return Err(RegistryError::DuplicateCommand {
                name: def.name.into(),
            });
        }
        self.command_order.push(def.name);
        Ok(())
    }

    pub(crate) fn add_operation(
        &mut self,
        ext: ExtensionId,
        def: &'static OperationDef,
    ) -> Result<(), RegistryError> {
        if self.operations.insert((ext, def.opcode), def).is_some() {
            return Err(RegistryError::DuplicateOperation {
                extension: self.pending_name(ext),
                opcode: def.opcode,
            });
        }
        Ok(())
    }

    pub(crate) fn add_object(
        &mut self,
        ext: ExtensionId,
        def: &'static ObjectDef,
    ) -> Result<(), RegistryError> {
        let class = def.class();
        let taken = self
            .objects
            .values()
            .any(|o| o.class() == class && o.name == def.name);
        let key = ObjectKey {
            ext,
            class,
            code: def.code,
        };
        if taken || self.objects.insert(key, def).is_some() {
            return Err(RegistryError::DuplicateObject {
                class: class.as_str().into(),
                name: def.name.into(),
            });
        }
        Ok(())
    }

    pub(crate) fn add_tag_set(
        &mut self,
        ext: ExtensionId,
        def: &'static TagSetDef,
    ) -> Result<(), RegistryError> {
        if self.tag_sets.insert(def.name, (ext, def)).is_some() {
            return Err(RegistryError::DuplicateTagSet {
                name: def.name.into(),
            });
        }
        Ok(())
    }

    pub(crate) fn defer_set_extension(
        &mut self,
        ext: ExtensionId,
        set: &'static str,
        tag: &'static TagDef,
    ) {
        self.set_extensions.push(PendingTag {
            ext,
            target: set,
            tag,
        });
    }

    pub(crate) fn defer_attachment(
        &mut self,
        ext: ExtensionId,
        command: &'static str,
        tag: &'static TagDef,
    ) {
        self.attachments.push(PendingTag {
            ext,
            target: command,
            tag,
        });
    }

    pub(crate) fn add_action(&mut self, def: &'static ActionDef) -> Result<(), RegistryError> {
        if self.actions.insert(def.name, def).is_some() {
            return Err(RegistryError::DuplicateAction {
                name: def.name.into(),
            });
        }
        Ok(())
    }

    /// Name of an extension that may still be mid-registration.
    fn pending_name(&self, ext: ExtensionId) -> String {
        self.extensions
            .get(usize::from(ext.0))
            .map_or_else(|| format!("#{}", ext.0), |e| e.name.to_string())
    }

    /// Resolve cross-extension wiring and freeze.
    ///
    /// # Errors
    ///
    /// Any unresolved reference or inconsistent layout.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let objects_by_name: BTreeMap<(ObjectClass, &'static str), ObjectKey> = self
            .objects
            .iter()
            .map(|(key, def)| ((key.class, def.name), *key))
            .collect();

        // Tag sets with their late additions.
        let mut sets: BTreeMap<&'static str, Vec<(ExtensionId, &'static TagDef)>> = self
            .tag_sets
            .iter()
            .map(|(name, (ext, def))| (*name, def.tags.iter().map(|t| (*ext, *t)).collect()))
            .collect();
        for pending in &self.set_extensions {
            let members =
                sets.get_mut(pending.target)
                    .ok_or_else(|| RegistryError::UnknownTagSet {
                        command: pending.tag.name.into(),
                        set: pending.target.into(),
                    })?;
            members.push((pending.ext, pending.tag));
        }

        for pending in &self.attachments {
            if !self.commands.contains_key(pending.target) {
                return Err(RegistryError::UnknownCommand {
                    command: pending.target.into(),
                    tag: pending.tag.name.into(),
                });
            }
        }

        // Effective tag sets.
        let mut commands = BTreeMap::new();
        for name in &self.command_order {
            let Some(&(ext, def)) = self.commands.get(name) else {
                continue;
            };
            let mut raw: Vec<(ExtensionId, &'static TagDef)> =
                def.tags.iter().map(|t| (ext, *t)).collect();
            raw.extend(
                self.attachments
                    .iter()
                    .filter(|p| p.target == def.name)
                    .map(|p| (p.ext, p.tag)),
            );
            for set in def.tag_sets {
                let members = sets.get(set).ok_or_else(|| RegistryError::UnknownTagSet {
                    command: def.name.into(),
                    set: (*set).into(),
                })?;
                raw.extend(members.iter().copied());
            }

            let mut tags: Vec<TagEntry> = Vec::with_capacity(raw.len());
            for (order, (tag_ext, tag)) in raw.into_iter().enumerate() {
                if tags.iter().any(|t| t.def.name == tag.name) {
                    return Err(RegistryError::DuplicateTag {
                        command: def.name.into(),
                        tag: tag.name.into(),
                    });
                }
                let object = match tag.payload {
                    TagPayload::Object { class, name } => Some(
                        *objects_by_name.get(&(class, name)).ok_or_else(|| {
                            RegistryError::UnknownObject {
                                tag: tag.name.into(),
                                class: class.as_str().into(),
                                name: name.into(),
                            }
                        })?,
                    ),
                    _ => None,
                };
                tags.push(TagEntry {
                    def: tag,
                    ext: tag_ext,
                    order,
                    object,
                });
            }
            commands.insert(def.name, CommandEntry { def, ext, tags });
        }

        // Operation layouts.
        let mut operations: BTreeMap<(ExtensionId, u8), OperationEntry> = self
            .operations
            .iter()
            .map(|(&(ext, opcode), def)| {
                (
                    (ext, opcode),
                    OperationEntry {
                        def,
                        ext,
                        optional: BTreeMap::new(),
                    },
                )
            })
            .collect();
        for entry in commands.values() {
            let Some(opcode) = entry.def.operation else {
                continue;
            };
            let op = operations.get_mut(&(entry.ext, opcode)).ok_or_else(|| {
                RegistryError::UnknownOperation {
                    command: entry.def.name.into(),
                    opcode,
                }
            })?;
            for tag in &entry.tags {
                if tag.def.opcode == 0 {
                    continue;
                }
                let slot = OptionalSlot {
                    name: tag.def.slot_name(),
                    payload: payload_kind(tag.def),
                };
                if let Some(object) = tag.object {
                    let declared = self.objects.get(&object).and_then(|d| d.param);
                    if declared != tag.def.param {
                        return Err(RegistryError::InconsistentLayout {
                            command: entry.def.name.into(),
                            detail: format!(
                                "tag ':{}' parameter does not match its object",
                                tag.def.name
                            ),
                        });
                    }
                }
                match op.optional.get(&tag.def.opcode) {
                    Some(existing) if *existing != slot => {
                        return Err(RegistryError::InconsistentLayout {
                            command: entry.def.name.into(),
                            detail: format!(
                                "opcode {} used by both '{}' and ':{}'",
                                tag.def.opcode, existing.name, tag.def.name
                            ),
                        });
                    }
                    Some(_) => {}
                    None => {
                        op.optional.insert(tag.def.opcode, slot);
                    }
                }
            }
        }

        let objects = self
            .objects
            .iter()
            .map(|(key, def)| (*key, ObjectEntry { key: *key, def }))
            .collect();
        let by_name = self
            .extensions
            .iter()
            .map(|e| (e.name, e.id))
            .collect();

        debug!(
            extensions = self.extensions.len(),
            commands = commands.len(),
            operations = operations.len(),
            "registry built"
        );

        Ok(Registry {
            config: self.config,
            extensions: self.extensions,
            by_name,
            commands,
            operations,
            objects,
            objects_by_name,
            actions: self.actions,
        })
    }
}

fn payload_kind(tag: &TagDef) -> PayloadKind {
    match tag.payload {
        TagPayload::Param => match tag.param {
            Some(kind) => PayloadKind::Value(kind),
            None => PayloadKind::Flag,
        },
        TagPayload::Flag => PayloadKind::Flag,
        TagPayload::Object { class, .. } | TagPayload::ObjectByParam { class } => {
            PayloadKind::Object(class)
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Frozen descriptor catalog. `Send + Sync`, shared by reference.
#[derive(Debug)]
pub struct Registry {
    config: EngineConfig,
    extensions: Vec<ExtensionEntry>,
    by_name: BTreeMap<&'static str, ExtensionId>,
    commands: BTreeMap<&'static str, CommandEntry>,
    operations: BTreeMap<(ExtensionId, u8), OperationEntry>,
    objects: BTreeMap<ObjectKey, ObjectEntry>,
    objects_by_name: BTreeMap<(ObjectClass, &'static str), ObjectKey>,
    actions: BTreeMap<&'static str, &'static ActionDef>,
}

impl Registry {
    /// Registry holding only the core language and `fileinto`.
    ///
    /// # Errors
    ///
    /// Propagates core registration errors.
    pub fn core(config: EngineConfig) -> Result<Self, RegistryError> {
        RegistryBuilder::new(config)?.build()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn extension(&self, id: ExtensionId) -> Option<&ExtensionEntry> {
        self.extensions.get(usize::from(id.0))
    }

    #[must_use]
    pub fn extension_by_name(&self, name: &str) -> Option<&ExtensionEntry> {
        self.by_name.get(name).and_then(|id| self.extension(*id))
    }

    pub fn extensions(&self) -> impl Iterator<Item = &ExtensionEntry> {
        self.extensions.iter()
    }

    #[must_use]
    pub fn command(&self, name: &str) -> Option<&CommandEntry> {
        self.commands.get(name)
    }

    #[must_use]
    pub fn operation(&self, ext: ExtensionId, opcode: u8) -> Option<&OperationEntry> {
        self.operations.get(&(ext, opcode))
    }

    #[must_use]
    pub fn object(&self, key: &ObjectKey) -> Option<&ObjectEntry> {
        self.objects.get(key)
    }

    /// Objects of one class in key order.
    pub fn objects_of_class(&self, class: ObjectClass) -> impl Iterator<Item = &ObjectEntry> {
        self.objects.values().filter(move |o| o.key.class == class)
    }

    #[must_use]
    pub fn object_by_name(&self, class: ObjectClass, name: &str) -> Option<&ObjectEntry> {
        self.objects_by_name
            .get(&(class, name))
            .and_then(|key| self.objects.get(key))
    }

    #[must_use]
    pub fn action(&self, name: &str) -> Option<&'static ActionDef> {
        self.actions.get(name).copied()
    }

    /// Number of registered commands and tests.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}
