//! Shared inputs for the Sieve benchmark suites.

use sieve_deliver::Message;
use sieve_extensions::standard_registry;
use sieve_kernel::ast::{Ast, AstNode};
use sieve_kernel::binary::Program;
use sieve_kernel::compiler::compile;
use sieve_kernel::config::EngineConfig;
use sieve_kernel::error::Diagnostics;
use sieve_kernel::registry::Registry;

/// Standard registry with default limits.
///
/// # Panics
///
/// Panics if the registry fails to build. Benchmark setup failures are fatal.
#[must_use]
pub fn registry() -> Registry {
    standard_registry(EngineConfig::default()).expect("standard registry")
}

/// A filing script with `rules` header tests, the shape of a typical
/// user's mailbox sorting rules. Only the last rule matches [`message`].
#[must_use]
pub fn filing_script(rules: usize) -> Ast {
    let mut nodes = vec![AstNode::command("require", 1).string_list(["fileinto", "imap4flags"])];
    for i in 0..rules {
        let line = u32::try_from(i + 2).unwrap_or(u32::MAX);
        let needle = if i + 1 == rules {
            "status".to_string()
        } else {
            format!("topic-{i}")
        };
        nodes.push(
            AstNode::command("if", line)
                .with_test(
                    AstNode::test("header", line)
                        .tag("contains")
                        .string_list(["subject", "x-list-id"])
                        .string(needle),
                )
                .with_block(vec![
                    AstNode::command("addflag", line).string("\\Seen"),
                    AstNode::command("fileinto", line).string(format!("Folder-{i}")),
                    AstNode::command("stop", line),
                ]),
        );
    }
    Ast::new(nodes)
}

/// A vacation script behind a duplicate check.
#[must_use]
pub fn responder_script() -> Ast {
    Ast::new(vec![
        AstNode::command("require", 1).string_list(["vacation", "duplicate"]),
        AstNode::command("if", 2)
            .with_test(AstNode::test("not", 2).with_test(AstNode::test("duplicate", 2)))
            .with_block(vec![AstNode::command("vacation", 3)
                .tag("days")
                .number(7)
                .tag("subject")
                .string("Away")
                .string("I am away until Monday.")]),
    ])
}

/// Compile `ast`.
///
/// # Panics
///
/// Panics with the diagnostics if compilation fails.
#[must_use]
pub fn compiled(registry: &Registry, ast: &Ast) -> Program {
    let mut diags = Diagnostics::new();
    compile(ast, registry, &mut diags).unwrap_or_else(|e| panic!("compile: {e}: {diags:?}"))
}

/// A small list message with a handful of headers.
///
/// # Panics
///
/// Panics if the fixed header block fails to parse.
#[must_use]
pub fn message() -> Message {
    let mut raw = String::from(
        "From: Bob <bob@example.com>\r\n\
         To: Alice <alice@example.org>\r\n\
         Subject: weekly status\r\n\
         Message-ID: <status-1@example.com>\r\n",
    );
    for hop in 0..8 {
        raw.push_str(&format!("Received: from relay{hop}.example.net\r\n"));
    }
    raw.push_str("\r\nBody.\r\n");
    Message::parse(&raw)
        .expect("fixed message parses")
        .with_envelope("bob@example.com", "alice@example.org")
}
