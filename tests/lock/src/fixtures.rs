//! Shared scripts, messages and hosts for the lock tests.
//!
//! The named scripts are the golden corpus: the `program_fixture` binary
//! compiles every one of them, and the determinism tests compare those
//! listings across processes.

use std::time::{Duration, SystemTime};

use sieve_deliver::{Host, MemoryDuplicateStore, MemoryMailStore, Message, RecordingSender};
use sieve_kernel::ast::{Ast, AstNode};
use sieve_kernel::binary::Program;
use sieve_kernel::compiler::compile;
use sieve_kernel::config::EngineConfig;
use sieve_kernel::error::Diagnostics;
use sieve_kernel::registry::Registry;
use sieve_kernel::result::CommitReport;
use sieve_kernel::runtime::{run, ExecEnv, Execution};

/// Fixed evaluation time so expiries are reproducible.
pub const EPOCH: u64 = 1_700_000_000;

#[must_use]
pub fn epoch() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(EPOCH)
}

/// The standard registry with default engine settings.
///
/// # Panics
///
/// Panics if the standard extensions fail to register.
#[must_use]
pub fn registry() -> Registry {
    sieve_extensions::standard_registry(EngineConfig::default()).unwrap()
}

/// Compile `commands` against `registry`.
///
/// # Panics
///
/// Panics with every diagnostic if the script does not compile.
#[must_use]
pub fn compile_with(registry: &Registry, commands: Vec<AstNode>) -> Program {
    let mut diags = Diagnostics::new();
    match compile(&Ast::new(commands), registry, &mut diags) {
        Ok(program) => program,
        Err(err) => panic!("script does not compile: {err}\n{:?}", diags.entries()),
    }
}

/// A plain message from `bob@example.com` to `alice@example.org`.
///
/// # Panics
///
/// Panics if the canned header block fails to parse.
#[must_use]
pub fn message() -> Message {
    message_with("")
}

/// [`message`] with `extra` header lines (each ending in CRLF) inserted
/// before the body.
///
/// # Panics
///
/// Panics if `extra` is not a valid header block.
#[must_use]
pub fn message_with(extra: &str) -> Message {
    let raw = format!(
        "From: Bob <bob@example.com>\r\n\
         To: Alice <alice@example.org>\r\n\
         Subject: status\r\n\
         Message-ID: <status-1@example.com>\r\n\
         {extra}\
         \r\n\
         Weekly status attached.\r\n"
    );
    Message::parse(&raw)
        .unwrap()
        .with_envelope("bob@example.com", "alice@example.org")
}

/// In-memory host collaborators for one test.
#[derive(Debug, Default)]
pub struct World {
    pub store: MemoryMailStore,
    pub sender: RecordingSender,
    pub duplicates: MemoryDuplicateStore,
}

impl World {
    #[must_use]
    pub fn new() -> Self {
        let world = Self::default();
        world.duplicates.set_now(epoch());
        world
    }

    #[must_use]
    pub fn host(&self) -> Host<'_> {
        Host::new(&self.store)
            .with_sender(&self.sender)
            .with_duplicates(&self.duplicates)
    }

    /// Execute and commit one program at [`epoch`].
    #[must_use]
    pub fn run(
        &self,
        program: &Program,
        registry: &Registry,
        message: &Message,
    ) -> (Execution, Option<CommitReport>) {
        self.run_as(program, registry, message, None)
    }

    /// [`World::run`] on behalf of `user`, when given.
    #[must_use]
    pub fn run_as(
        &self,
        program: &Program,
        registry: &Registry,
        message: &Message,
        user: Option<&str>,
    ) -> (Execution, Option<CommitReport>) {
        let mut env = ExecEnv::new(message)
            .with_now(epoch())
            .with_mail_store(&self.store)
            .with_sender(&self.sender)
            .with_duplicates(&self.duplicates);
        if let Some(user) = user {
            env = env.with_user(user);
        }
        run(program, registry, &env)
    }
}

fn require(names: &[&str]) -> AstNode {
    AstNode::command("require", 1).string_list(names.iter().copied())
}

/// The golden scripts, by name.
#[must_use]
pub fn scripts() -> Vec<(&'static str, Vec<AstNode>)> {
    vec![
        (
            "vacation",
            vec![
                require(&["vacation"]),
                AstNode::command("vacation", 2)
                    .tag("days")
                    .number(0)
                    .tag("subject")
                    .string("Away")
                    .string("Out"),
            ],
        ),
        (
            "duplicate",
            vec![
                require(&["duplicate", "fileinto"]),
                AstNode::command("if", 2)
                    .with_test(
                        AstNode::test("duplicate", 2)
                            .tag("handle")
                            .string("h1")
                            .tag("uniqueid")
                            .string("body-A"),
                    )
                    .with_block(vec![AstNode::command("fileinto", 3).string("Dup")]),
            ],
        ),
        (
            "flags",
            vec![
                require(&["imap4flags", "fileinto"]),
                AstNode::command("addflag", 2).string("\\Seen"),
                AstNode::command("fileinto", 3)
                    .tag("flags")
                    .string("\\Flagged")
                    .string("Archive"),
            ],
        ),
        (
            "relational",
            vec![
                require(&["relational", "comparator-i;ascii-numeric", "fileinto"]),
                AstNode::command("if", 2)
                    .with_test(
                        AstNode::test("header", 2)
                            .tag("count")
                            .string("gt")
                            .tag("comparator")
                            .string("i;ascii-numeric")
                            .string("received")
                            .string("2"),
                    )
                    .with_block(vec![AstNode::command("fileinto", 3).string("Hops")]),
                AstNode::command("elsif", 4)
                    .with_test(
                        AstNode::test("address", 4)
                            .tag("domain")
                            .tag("is")
                            .string("from")
                            .string("example.com"),
                    )
                    .with_block(vec![AstNode::command("keep", 5)]),
                AstNode::command("else", 6).with_block(vec![AstNode::command("discard", 7)]),
            ],
        ),
    ]
}

/// One golden script by name.
///
/// # Panics
///
/// Panics for an unknown name.
#[must_use]
pub fn script(name: &str) -> Vec<AstNode> {
    scripts()
        .into_iter()
        .find(|(n, _)| *n == name)
        .map(|(_, s)| s)
        .unwrap_or_else(|| panic!("no fixture script '{name}'"))
}
