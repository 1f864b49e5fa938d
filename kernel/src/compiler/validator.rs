//! AST validation against the registry.
//!
//! Every node is resolved by name and checked against its descriptor:
//! tags first (resolved in the command's effective tag set, parameters
//! consumed and type-checked), then positional arguments, then the tag and
//! command validate callbacks, then subtests and block. Errors go to the
//! [`Diagnostics`] sink and validation carries on with the next node, so a
//! single compile reports everything it can. Only an extension that fails
//! to load stops validation outright.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::ast::{ArgumentValue, Ast, AstNode};
use crate::config::EngineConfig;
use crate::error::{CompileError, Diagnostics};
use crate::registry::{
    BlockRule, CommandDef, CommandKind, ExtensionId, ObjectKey, Registry, Subtests, TagEntry,
    TagPayload, ValueKind,
};

// ---------------------------------------------------------------------------
// Validated tree
// ---------------------------------------------------------------------------

/// A typed argument value after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Number(u64),
    String(String),
    StringList(Vec<String>),
}

impl ArgValue {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Number(_) => ValueKind::Number,
            Self::String(_) => ValueKind::String,
            Self::StringList(_) => ValueKind::StringList,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Items of a string list. A single string counts as a one-item list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::StringList(items) => Some(items),
            Self::String(s) => Some(std::slice::from_ref(s)),
            Self::Number(_) => None,
        }
    }
}

/// A tag present on one command instance.
#[derive(Debug, Clone)]
pub struct ValidatedTag {
    pub entry: TagEntry,
    pub value: Option<ArgValue>,
    /// Object to emit for object tags.
    pub object: Option<ObjectKey>,
    /// False once a validate callback detached the tag from emission.
    pub emit: bool,
    pub line: u32,
}

impl ValidatedTag {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.entry.def.name
    }
}

/// Values a command's validation stashed for its generator.
pub type CommandMemo = BTreeMap<&'static str, ArgValue>;

#[derive(Debug, Clone)]
pub struct ValidatedCommand {
    pub def: &'static CommandDef,
    pub ext: ExtensionId,
    pub line: u32,
    /// Present tags in effective-set order.
    pub tags: Vec<ValidatedTag>,
    pub positional: Vec<ArgValue>,
    pub tests: Vec<ValidatedCommand>,
    pub block: Option<Vec<ValidatedCommand>>,
    pub memo: CommandMemo,
    /// An `elsif`/`else` follows directly.
    pub continues_chain: bool,
}

impl ValidatedCommand {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.def.name
    }

    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&ValidatedTag> {
        self.tags.iter().find(|t| t.name() == name)
    }
}

/// Output of [`validate`].
#[derive(Debug, Clone)]
pub struct ValidatedScript {
    pub commands: Vec<ValidatedCommand>,
    /// Extensions enabled by `require`, plus the core.
    pub extensions: BTreeSet<ExtensionId>,
}

// ---------------------------------------------------------------------------
// Callback contexts
// ---------------------------------------------------------------------------

/// Why a command validate callback refused the command.
#[derive(Debug)]
pub enum Rejection {
    /// Recorded as a diagnostic at the command; validation continues.
    Invalid(String),
    /// Stops validation.
    Fatal(CompileError),
}

impl From<String> for Rejection {
    fn from(message: String) -> Self {
        Self::Invalid(message)
    }
}

impl From<&str> for Rejection {
    fn from(message: &str) -> Self {
        Self::Invalid(message.to_string())
    }
}

/// View handed to tag validate callbacks.
pub struct TagContext<'v> {
    registry: &'v Registry,
    diags: &'v mut Diagnostics,
    tag: &'v mut ValidatedTag,
    memo: &'v mut CommandMemo,
    command: &'static str,
}

impl TagContext<'_> {
    #[must_use]
    pub fn command(&self) -> &'static str {
        self.command
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.tag.line
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.registry.config()
    }

    #[must_use]
    pub fn value(&self) -> Option<&ArgValue> {
        self.tag.value.as_ref()
    }

    pub fn set_value(&mut self, value: ArgValue) {
        self.tag.value = Some(value);
    }

    /// Keep the tag out of the optional-operand loop.
    pub fn detach(&mut self) {
        self.tag.emit = false;
    }

    pub fn memo(&mut self, key: &'static str, value: ArgValue) {
        self.memo.insert(key, value);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.diags.warning(self.tag.line, message);
    }
}

/// View handed to command validate callbacks.
pub struct CommandContext<'v> {
    registry: &'v Registry,
    diags: &'v mut Diagnostics,
    enabled: &'v mut BTreeSet<ExtensionId>,
    command: &'v mut ValidatedCommand,
    previous: Option<&'v mut ValidatedCommand>,
    at_script_start: bool,
}

impl CommandContext<'_> {
    #[must_use]
    pub fn command_name(&self) -> &'static str {
        self.command.name()
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.command.line
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.registry.config()
    }

    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&ValidatedTag> {
        self.command.tag(name)
    }

    #[must_use]
    pub fn tag_value(&self, name: &str) -> Option<&ArgValue> {
        self.tag(name).and_then(|t| t.value.as_ref())
    }

    #[must_use]
    pub fn positional(&self) -> &[ArgValue] {
        &self.command.positional
    }

    /// Append an operand the script did not spell out.
    pub fn push_positional(&mut self, value: ArgValue) {
        self.command.positional.push(value);
    }

    #[must_use]
    pub fn memo(&self, key: &str) -> Option<&ArgValue> {
        self.command.memo.get(key)
    }

    pub fn set_memo(&mut self, key: &'static str, value: ArgValue) {
        self.command.memo.insert(key, value);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.diags.warning(self.command.line, message);
    }

    /// True at top level while only `require` commands came before.
    #[must_use]
    pub fn at_script_start(&self) -> bool {
        self.at_script_start
    }

    /// Name of the directly preceding sibling, if it validated.
    #[must_use]
    pub fn previous(&self) -> Option<&'static str> {
        self.previous.as_ref().map(|p| p.name())
    }

    /// Mark the preceding sibling as continued by this command.
    pub fn continue_previous(&mut self) {
        if let Some(prev) = self.previous.as_mut() {
            prev.continues_chain = true;
        }
    }

    /// Enable a non-core extension for the rest of the script.
    ///
    /// # Errors
    ///
    /// [`Rejection::Invalid`] for an unknown name, [`Rejection::Fatal`] if
    /// the extension's validator load hook fails.
    pub fn require_extension(&mut self, name: &str) -> Result<(), Rejection> {
        let entry = self
            .registry
            .extension_by_name(name)
            .ok_or_else(|| Rejection::Invalid(format!("unknown extension '{name}'")))?;
        if self.enabled.contains(&entry.id) {
            return Ok(());
        }
        entry
            .extension
            .validator_load(self.registry.config())
            .map_err(|source| {
                Rejection::Fatal(CompileError::ExtensionLoad {
                    name: name.to_string(),
                    line: self.command.line,
                    source,
                })
            })?;
        debug!(extension = name, line = self.command.line, "extension required");
        self.enabled.insert(entry.id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a script.
///
/// # Errors
///
/// [`CompileError::Invalid`] with every error diagnostic if any was
/// recorded, or [`CompileError::ExtensionLoad`] at the first extension
/// that fails to load.
pub fn validate(
    ast: &Ast,
    registry: &Registry,
    diags: &mut Diagnostics,
) -> Result<ValidatedScript, CompileError> {
    let mut validator = Validator {
        registry,
        diags,
        enabled: BTreeSet::from([ExtensionId::CORE]),
    };
    let commands = validator.block(&ast.commands, true)?;
    if validator.diags.has_errors() {
        return Err(CompileError::Invalid {
            errors: validator.diags.errors().cloned().collect(),
        });
    }
    Ok(ValidatedScript {
        commands,
        extensions: validator.enabled,
    })
}

struct Validator<'r, 'd> {
    registry: &'r Registry,
    diags: &'d mut Diagnostics,
    enabled: BTreeSet<ExtensionId>,
}

/// Where a node appears.
#[derive(Clone, Copy)]
struct Position {
    kind: CommandKind,
    top_level: bool,
    at_script_start: bool,
}

impl Validator<'_, '_> {
    fn block(
        &mut self,
        nodes: &[AstNode],
        top_level: bool,
    ) -> Result<Vec<ValidatedCommand>, CompileError> {
        let mut out: Vec<ValidatedCommand> = Vec::with_capacity(nodes.len());
        let mut at_script_start = top_level;
        let mut previous_ok = false;
        for node in nodes {
            let position = Position {
                kind: CommandKind::Command,
                top_level,
                at_script_start,
            };
            let previous = if previous_ok { out.last_mut() } else { None };
            let validated = self.node(node, position, previous)?;
            at_script_start &= node.name == "require";
            previous_ok = validated.is_some();
            out.extend(validated);
        }
        Ok(out)
    }

    fn node(
        &mut self,
        node: &AstNode,
        position: Position,
        previous: Option<&mut ValidatedCommand>,
    ) -> Result<Option<ValidatedCommand>, CompileError> {
        let Some(entry) = self.registry.command(&node.name) else {
            let what = match position.kind {
                CommandKind::Command => "command",
                CommandKind::Test => "test",
            };
            self.diags
                .error(node.line, format!("unknown {what} '{}'", node.name));
            return Ok(None);
        };
        let def = entry.def;
        if def.kind != position.kind {
            self.diags.error(
                node.line,
                format!(
                    "'{}' is a {}, not a {}",
                    def.name,
                    def.kind.as_str(),
                    position.kind.as_str()
                ),
            );
            return Ok(None);
        }
        if !self.enabled.contains(&entry.ext) {
            let ext = self
                .registry
                .extension(entry.ext)
                .map_or("?", |e| e.name);
            self.diags.error(
                node.line,
                format!("'{}' requires extension '{ext}' (missing require)", def.name),
            );
            return Ok(None);
        }

        let mut command = ValidatedCommand {
            def,
            ext: entry.ext,
            line: node.line,
            tags: Vec::new(),
            positional: Vec::new(),
            tests: Vec::new(),
            block: None,
            memo: CommandMemo::new(),
            continues_chain: false,
        };

        let args = self.arguments(node, &entry.tags, &mut command);
        self.positional(node, def, args, &mut command);
        command.tags.sort_by_key(|t| t.entry.order);

        for idx in 0..command.tags.len() {
            let Some(check) = command.tags[idx].entry.def.validate else {
                continue;
            };
            let line = command.tags[idx].line;
            let (tags, memo) = (&mut command.tags, &mut command.memo);
            let mut ctx = TagContext {
                registry: self.registry,
                diags: &mut *self.diags,
                tag: &mut tags[idx],
                memo,
                command: def.name,
            };
            if let Err(message) = check(&mut ctx) {
                self.diags.error(line, message);
            }
        }

        if let Some(check) = def.validate {
            let mut ctx = CommandContext {
                registry: self.registry,
                diags: &mut *self.diags,
                enabled: &mut self.enabled,
                command: &mut command,
                previous,
                at_script_start: position.top_level && position.at_script_start,
            };
            match check(&mut ctx) {
                Ok(()) => {}
                Err(Rejection::Invalid(message)) => self.diags.error(node.line, message),
                Err(Rejection::Fatal(err)) => return Err(err),
            }
        }

        self.subtests(node, def, &mut command)?;

        match (def.block, &node.block) {
            (BlockRule::Forbidden, Some(_)) => self
                .diags
                .error(node.line, format!("'{}' does not take a block", def.name)),
            (BlockRule::Required, None) => self
                .diags
                .error(node.line, format!("'{}' requires a block", def.name)),
            (BlockRule::Required, Some(block)) => {
                command.block = Some(self.block(block, false)?);
            }
            (BlockRule::Forbidden, None) => {}
        }

        Ok(Some(command))
    }

    /// Consume leading tags. Returns the remaining (positional) arguments.
    fn arguments<'n>(
        &mut self,
        node: &'n AstNode,
        tags: &[TagEntry],
        command: &mut ValidatedCommand,
    ) -> Vec<&'n crate::ast::AstArgument> {
        let mut positional = Vec::new();
        let mut args = node.arguments.iter().peekable();
        while let Some(arg) = args.next() {
            let ArgumentValue::Tag(name) = &arg.value else {
                positional.push(arg);
                continue;
            };
            if !positional.is_empty() {
                self.diags.error(
                    arg.line,
                    format!("tag ':{name}' must come before positional arguments"),
                );
                continue;
            }
            let Some(entry) = tags.iter().find(|t| t.def.name == name) else {
                self.diags
                    .error(arg.line, format!("unknown tag ':{name}' for '{}'", node.name));
                continue;
            };
            if !self.enabled.contains(&entry.ext) {
                let ext = self.registry.extension(entry.ext).map_or("?", |e| e.name);
                self.diags.error(
                    arg.line,
                    format!("tag ':{name}' requires extension '{ext}' (missing require)"),
                );
                continue;
            }

            let value = match entry.def.param {
                None => None,
                Some(kind) => {
                    let next = args.next_if(|a| !matches!(a.value, ArgumentValue::Tag(_)));
                    match next.and_then(|a| coerce(&a.value, kind)) {
                        Some(value) => Some(value),
                        None => {
                            self.diags.error(
                                arg.line,
                                format!("tag ':{name}' requires a {kind} argument"),
                            );
                            continue;
                        }
                    }
                }
            };

            if let Some(other) = command.tags.iter().find(|t| {
                t.name() == entry.def.name
                    || (entry.def.opcode != 0 && t.entry.def.opcode == entry.def.opcode)
            }) {
                let message = if other.name() == entry.def.name {
                    format!("tag ':{name}' given more than once")
                } else {
                    format!("tags ':{}' and ':{name}' cannot be combined", other.name())
                };
                self.diags.error(arg.line, message);
                continue;
            }

            let object = match entry.def.payload {
                TagPayload::Object { .. } => entry.object,
                TagPayload::ObjectByParam { class } => {
                    let wanted = value.as_ref().and_then(ArgValue::as_str).unwrap_or("");
                    match self.registry.object_by_name(class, wanted) {
                        Some(obj) if self.enabled.contains(&obj.key.ext) => Some(obj.key),
                        _ => {
                            self.diags
                                .error(arg.line, format!("unknown {class} '{wanted}'"));
                            continue;
                        }
                    }
                }
                TagPayload::Param | TagPayload::Flag => None,
            };

            command.tags.push(ValidatedTag {
                entry: *entry,
                value,
                object,
                emit: true,
                line: arg.line,
            });
        }
        positional
    }

    fn positional(
        &mut self,
        node: &AstNode,
        def: &'static CommandDef,
        args: Vec<&crate::ast::AstArgument>,
        command: &mut ValidatedCommand,
    ) {
        if args.len() != def.positional.len() {
            self.diags.error(
                node.line,
                format!(
                    "'{}' expects {} positional argument(s), found {}",
                    def.name,
                    def.positional.len(),
                    args.len()
                ),
            );
            return;
        }
        for (spec, arg) in def.positional.iter().zip(args) {
            match coerce(&arg.value, spec.kind) {
                Some(value) => command.positional.push(value),
                None => self.diags.error(
                    arg.line,
                    format!(
                        "argument '{}' of '{}' must be a {}, found {}",
                        spec.name,
                        def.name,
                        spec.kind,
                        arg.value.type_name()
                    ),
                ),
            }
        }
    }

    fn subtests(
        &mut self,
        node: &AstNode,
        def: &'static CommandDef,
        command: &mut ValidatedCommand,
    ) -> Result<(), CompileError> {
        let count = node.tests.len();
        let ok = match def.subtests {
            Subtests::None => count == 0,
            Subtests::One => count == 1,
            Subtests::AtLeastOne => count >= 1,
        };
        if !ok {
            let expected = match def.subtests {
                Subtests::None => "no tests",
                Subtests::One => "exactly one test",
                Subtests::AtLeastOne => "at least one test",
            };
            self.diags.error(
                node.line,
                format!("'{}' takes {expected}, found {count}", def.name),
            );
            return Ok(());
        }
        let position = Position {
            kind: CommandKind::Test,
            top_level: false,
            at_script_start: false,
        };
        for test in &node.tests {
            if let Some(validated) = self.node(test, position, None)? {
                command.tests.push(validated);
            }
        }
        Ok(())
    }
}

/// Accept `value` as `kind`. A string is promoted to a one-item list.
fn coerce(value: &ArgumentValue, kind: ValueKind) -> Option<ArgValue> {
    match (value, kind) {
        (ArgumentValue::Number(n), ValueKind::Number) => Some(ArgValue::Number(*n)),
        (ArgumentValue::String(s), ValueKind::String) => Some(ArgValue::String(s.clone())),
        (ArgumentValue::String(s), ValueKind::StringList) => {
            Some(ArgValue::StringList(vec![s.clone()]))
        }
        (ArgumentValue::StringList(items), ValueKind::StringList) => {
            Some(ArgValue::StringList(items.clone()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::core(EngineConfig::default()).unwrap()
    }

    fn check(commands: Vec<AstNode>) -> (Result<ValidatedScript, CompileError>, Diagnostics) {
        let reg = registry();
        let mut diags = Diagnostics::new();
        let res = validate(&Ast::new(commands), &reg, &mut diags);
        (res, diags)
    }

    fn messages(diags: &Diagnostics) -> Vec<String> {
        diags.errors().map(ToString::to_string).collect()
    }

    #[test]
    fn unknown_command_is_reported_with_line() {
        let (res, diags) = check(vec![AstNode::command("frobnicate", 3)]);
        assert!(matches!(res, Err(CompileError::Invalid { .. })));
        assert_eq!(messages(&diags), vec!["line 3: error: unknown command 'frobnicate'"]);
    }

    #[test]
    fn errors_in_siblings_are_all_collected() {
        let (_, diags) = check(vec![
            AstNode::command("fileinto", 1),
            AstNode::command("keep", 2).string("extra"),
            AstNode::command("nope", 3),
        ]);
        assert_eq!(diags.error_count(), 3);
    }

    #[test]
    fn test_in_command_position_is_rejected() {
        let (_, diags) = check(vec![AstNode::command("true", 1)]);
        assert!(messages(&diags)[0].contains("is a test, not a command"));
    }

    #[test]
    fn string_is_promoted_to_list() {
        let (res, _) = check(vec![AstNode::command("if", 1)
            .with_test(AstNode::test("header", 1).string("Subject").string("hi"))
            .with_block(vec![])]);
        let script = res.unwrap();
        let header = &script.commands[0].tests[0];
        assert_eq!(header.positional[0], ArgValue::StringList(vec!["Subject".into()]));
    }

    #[test]
    fn two_match_types_cannot_be_combined() {
        let (_, diags) = check(vec![AstNode::command("if", 1)
            .with_test(
                AstNode::test("header", 1)
                    .tag("is")
                    .tag("contains")
                    .string("Subject")
                    .string("x"),
            )
            .with_block(vec![])]);
        assert!(messages(&diags)[0].contains("':is' and ':contains' cannot be combined"));
    }

    #[test]
    fn tags_are_ordered_by_registration_not_source() {
        let (res, _) = check(vec![AstNode::command("if", 1)
            .with_test(
                AstNode::test("address", 1)
                    .tag("domain")
                    .tag("contains")
                    .tag("comparator")
                    .string("i;octet")
                    .string("from")
                    .string("example.org"),
            )
            .with_block(vec![])]);
        let script = res.unwrap();
        let names: Vec<_> = script.commands[0].tests[0]
            .tags
            .iter()
            .map(ValidatedTag::name)
            .collect();
        assert_eq!(names, vec!["comparator", "contains", "domain"]);
    }

    #[test]
    fn unknown_comparator_is_rejected() {
        let (_, diags) = check(vec![AstNode::command("if", 1)
            .with_test(
                AstNode::test("header", 1)
                    .tag("comparator")
                    .string("i;klingon")
                    .string("Subject")
                    .string("x"),
            )
            .with_block(vec![])]);
        assert!(messages(&diags)[0].contains("unknown comparator 'i;klingon'"));
    }

    #[test]
    fn tag_without_parameter_is_rejected() {
        let (_, diags) = check(vec![AstNode::command("if", 1)
            .with_test(AstNode::test("header", 1).tag("comparator"))
            .with_block(vec![])]);
        assert!(messages(&diags)
            .iter()
            .any(|m| m.contains("':comparator' requires a string argument")));
    }

    #[test]
    fn require_after_other_command_is_rejected() {
        let (_, diags) = check(vec![
            AstNode::command("keep", 1),
            AstNode::command("require", 2).string_list(["fileinto"]),
        ]);
        assert!(messages(&diags)[0].contains("require"));
    }

    #[test]
    fn unknown_extension_in_require_is_rejected() {
        let (_, diags) = check(vec![AstNode::command("require", 1).string("nonesuch")]);
        assert!(messages(&diags)[0].contains("unknown extension 'nonesuch'"));
    }

    #[test]
    fn else_without_if_is_rejected() {
        let (_, diags) = check(vec![
            AstNode::command("keep", 1),
            AstNode::command("else", 2).with_block(vec![]),
        ]);
        assert!(messages(&diags)[0].contains("'else'"));
    }

    #[test]
    fn if_chain_is_linked() {
        let (res, _) = check(vec![
            AstNode::command("if", 1)
                .with_test(AstNode::test("false", 1))
                .with_block(vec![]),
            AstNode::command("elsif", 2)
                .with_test(AstNode::test("true", 2))
                .with_block(vec![]),
            AstNode::command("else", 3).with_block(vec![]),
        ]);
        let script = res.unwrap();
        assert!(script.commands[0].continues_chain);
        assert!(script.commands[1].continues_chain);
        assert!(!script.commands[2].continues_chain);
    }

    #[test]
    fn allof_needs_a_test() {
        let (_, diags) = check(vec![AstNode::command("if", 1)
            .with_test(AstNode::test("allof", 1))
            .with_block(vec![])]);
        assert!(messages(&diags)[0].contains("at least one test"));
    }

    #[test]
    fn size_needs_exactly_one_direction() {
        let (_, diags) = check(vec![AstNode::command("if", 1)
            .with_test(AstNode::test("size", 1).tag("over").tag("under").number(10))
            .with_block(vec![])]);
        assert_eq!(diags.error_count(), 1);
    }
}
