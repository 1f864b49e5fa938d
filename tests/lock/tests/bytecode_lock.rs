//! Bytecode lock tests.
//!
//! Proves:
//! 1. Tag source order does not change the generated program
//! 2. The listing shows exactly the tags and positionals left after validation
//! 3. An optional opcode outside the operation's layout is `BytecodeCorrupt`
//! 4. Truncated code is either a clean prefix or `BytecodeCorrupt`, never a panic
//! 5. The container header is locked (`SVB1`, version 1)

use lock_tests::fixtures::{compile_with, message, registry, scripts, World};
use sieve_kernel::ast::AstNode;
use sieve_kernel::binary::dump::dump;
use sieve_kernel::binary::{Program, KIND_NUMBER};
use sieve_kernel::runtime::ExecStatus;

/// A vacation script with `tags` applied in the given order.
fn vacation(tags: &[&str]) -> Vec<AstNode> {
    let mut node = AstNode::command("vacation", 2);
    for tag in tags {
        node = match *tag {
            "days" => node.tag("days").number(3),
            "subject" => node.tag("subject").string("Away"),
            "from" => node.tag("from").string("alice@example.org"),
            "mime" => node.tag("mime"),
            "handle" => node.tag("handle").string("h"),
            other => panic!("unknown tag {other}"),
        };
    }
    vec![
        AstNode::command("require", 1).string("vacation"),
        node.string("Out"),
    ]
}

// ---------------------------------------------------------------------------
// 1. Source order independence
// ---------------------------------------------------------------------------

#[test]
fn tag_order_does_not_change_the_program() {
    let registry = registry();
    let orders: [&[&str]; 4] = [
        &["days", "subject", "from", "mime", "handle"],
        &["handle", "mime", "from", "subject", "days"],
        &["from", "days", "handle", "subject", "mime"],
        &["mime", "handle", "days", "from", "subject"],
    ];
    let baseline = compile_with(&registry, vacation(orders[0]))
        .to_bytes()
        .unwrap();
    for order in &orders[1..] {
        let bytes = compile_with(&registry, vacation(order))
            .to_bytes()
            .unwrap();
        assert_eq!(bytes, baseline, "order {order:?} changed the program");
    }
}

// ---------------------------------------------------------------------------
// 2. Listing matches validation
// ---------------------------------------------------------------------------

#[test]
fn listing_carries_validated_tags_and_positionals() {
    let registry = registry();
    let program = compile_with(&registry, vacation(&["subject", "days", "mime"]));
    let listing = dump(&program, &registry).unwrap();
    let op = listing["operations"]
        .as_array()
        .unwrap()
        .iter()
        .find(|op| op["op"] == "VACATION")
        .unwrap();

    let optional = op["optional"].as_object().unwrap();
    let mut keys: Vec<&str> = optional.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["days", "mime", "subject"]);
    assert_eq!(optional["days"], 3);
    assert_eq!(optional["mime"], true);

    // Reason, then the derived handle. `:handle` itself is not emitted.
    let positional = op["positional"].as_array().unwrap();
    assert_eq!(positional.len(), 2);
    assert_eq!(positional[0], "Out");
    assert_eq!(positional[1], "OutAway<default-from><MIME>");
}

#[test]
fn every_golden_script_lists() {
    let registry = registry();
    for (name, script) in scripts() {
        let program = compile_with(&registry, script);
        let listing = dump(&program, &registry).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert!(
            !listing["operations"].as_array().unwrap().is_empty(),
            "{name}: empty listing"
        );
    }
}

// ---------------------------------------------------------------------------
// 3. Unknown optional opcode
// ---------------------------------------------------------------------------

/// Replace the opcode of the `:days 3` optional operand with `opcode`.
fn with_days_opcode(program: &Program, opcode: u8) -> Program {
    let mut days = vec![1u8, 0, 0, KIND_NUMBER];
    days.extend_from_slice(&3u64.to_le_bytes());
    let code = program.code();
    let at = code
        .windows(days.len())
        .position(|w| w == days.as_slice())
        .expect(":days operand in code");
    let mut patched = code.to_vec();
    patched[at] = opcode;
    Program::new(
        program.extensions().to_vec(),
        patched,
        program.line_table().to_vec(),
    )
}

#[test]
fn optional_opcode_outside_layout_is_corrupt() {
    let registry = registry();
    let program = compile_with(&registry, vacation(&["days"]));
    let world = World::new();

    let (execution, report) = world.run(&program, &registry, &message());
    assert_eq!(execution.status, ExecStatus::Ok);
    assert!(report.is_some());

    for opcode in [0x07, 0x40, 0xff] {
        let corrupt = with_days_opcode(&program, opcode);
        let (execution, report) = world.run(&corrupt, &registry, &message());
        assert_eq!(execution.status, ExecStatus::BytecodeCorrupt, "opcode {opcode:#04x}");
        assert!(report.is_none());
        assert!(dump(&corrupt, &registry).is_err());
    }
    assert_eq!(world.store.mailboxes().len(), 1, "only the clean run delivered");
}

// ---------------------------------------------------------------------------
// 4. Truncation
// ---------------------------------------------------------------------------

#[test]
fn truncated_code_never_panics() {
    let registry = registry();
    for (name, script) in scripts() {
        let program = compile_with(&registry, script);
        let code = program.code();
        let mut corrupt = 0;
        for cut in 0..code.len() {
            let truncated = Program::new(
                program.extensions().to_vec(),
                code[..cut].to_vec(),
                Vec::new(),
            );
            let (execution, _) = World::new().run(&truncated, &registry, &message());
            assert!(
                matches!(
                    execution.status,
                    ExecStatus::Ok | ExecStatus::BytecodeCorrupt
                ),
                "{name} cut at {cut}: {:?}",
                execution.status
            );
            if execution.status == ExecStatus::BytecodeCorrupt {
                corrupt += 1;
            }
        }
        assert!(corrupt > 0, "{name}: no truncation was detected");
    }
}

// ---------------------------------------------------------------------------
// 5. Container header
// ---------------------------------------------------------------------------

#[test]
fn container_header_is_locked() {
    let registry = registry();
    let program = compile_with(&registry, vacation(&[]));
    let bytes = program.to_bytes().unwrap();
    assert_eq!(&bytes[..4], b"SVB1");
    assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 1);

    let mut bad = bytes.clone();
    bad[4] = 2;
    assert!(Program::from_bytes(&bad).is_err());
    assert_eq!(Program::from_bytes(&bytes).unwrap(), program);
}
