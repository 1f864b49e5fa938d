//! Script syntax tree, as handed over by the external parser.
//!
//! The tree is purely syntactic: command names are not resolved, tags are
//! not matched to their parameters, and nothing is type-checked. The
//! validator does all of that against the registry.
//!
//! The builder methods exist so hosts and tests can assemble trees without
//! a parser:
//!
//! ```
//! use sieve_kernel::ast::{Ast, AstNode};
//!
//! let ast = Ast::new(vec![
//!     AstNode::command("require", 1).string_list(["vacation"]),
//!     AstNode::command("vacation", 2).tag("days").number(3).string("Out"),
//! ]);
//! assert_eq!(ast.commands.len(), 2);
//! ```

/// A whole script: the top-level command list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ast {
    pub commands: Vec<AstNode>,
}

impl Ast {
    #[must_use]
    pub fn new(commands: Vec<AstNode>) -> Self {
        Self { commands }
    }
}

/// A command or test occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNode {
    pub name: String,
    pub line: u32,
    pub arguments: Vec<AstArgument>,
    /// Test list (`if` has one, `allof` many, plain commands none).
    pub tests: Vec<AstNode>,
    /// `{ ... }` block, if one was written.
    pub block: Option<Vec<AstNode>>,
}

/// One argument with the line it appeared on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstArgument {
    pub line: u32,
    pub value: ArgumentValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    /// `:name`, stored without the colon.
    Tag(String),
    Number(u64),
    String(String),
    StringList(Vec<String>),
}

impl ArgumentValue {
    /// Short type name for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Tag(_) => "tag",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::StringList(_) => "string list",
        }
    }
}

impl AstNode {
    /// A command (or test) with no arguments yet.
    pub fn command(name: impl Into<String>, line: u32) -> Self {
        Self {
            name: name.into(),
            line,
            arguments: Vec::new(),
            tests: Vec::new(),
            block: None,
        }
    }

    /// Alias of [`AstNode::command`] that reads better in test position.
    pub fn test(name: impl Into<String>, line: u32) -> Self {
        Self::command(name, line)
    }

    #[must_use]
    pub fn tag(self, name: &str) -> Self {
        let name = name.strip_prefix(':').unwrap_or(name).to_string();
        self.arg(ArgumentValue::Tag(name))
    }

    #[must_use]
    pub fn number(self, value: u64) -> Self {
        self.arg(ArgumentValue::Number(value))
    }

    #[must_use]
    pub fn string(self, value: impl Into<String>) -> Self {
        self.arg(ArgumentValue::String(value.into()))
    }

    #[must_use]
    pub fn string_list<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arg(ArgumentValue::StringList(
            values.into_iter().map(Into::into).collect(),
        ))
    }

    #[must_use]
    pub fn with_test(mut self, test: AstNode) -> Self {
        self.tests.push(test);
        self
    }

    #[must_use]
    pub fn with_block(mut self, block: Vec<AstNode>) -> Self {
        self.block = Some(block);
        self
    }

    fn arg(mut self, value: ArgumentValue) -> Self {
        self.arguments.push(AstArgument {
            line: self.line,
            value,
        });
        self
    }
}
