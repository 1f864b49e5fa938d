//! Cross-process determinism of compiled programs.
//!
//! Spawns the `program_fixture` binary under several environment variants
//! and asserts identical output, then checks that output against the same
//! digests computed in this process. Compilation must not depend on cwd,
//! locale, environment or hash-map iteration order.

use std::path::Path;
use std::process::Command;

use lock_tests::fixtures::{compile_with, registry, scripts};
use sha2::{Digest, Sha256};
use sieve_kernel::binary::dump::dump;

fn workspace_root() -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("tests/ exists")
        .parent()
        .expect("workspace root exists")
        .to_string_lossy()
        .to_string()
}

/// The fixture binary sits next to the test binary's `deps/` directory.
fn binary_path() -> String {
    let mut path = std::env::current_exe()
        .expect("can resolve test binary path")
        .parent()
        .expect("binary dir exists")
        .parent()
        .expect("deps parent exists")
        .to_path_buf();
    path.push("program_fixture");
    path.to_string_lossy().to_string()
}

fn run_variant(work_dir: &str, env_overrides: &[(&str, &str)]) -> String {
    let bin = binary_path();
    let mut command = Command::new(&bin);
    command
        .current_dir(work_dir)
        .env_remove("LC_ALL")
        .env_remove("LC_COLLATE")
        .env_remove("LANG")
        .env_remove("LANGUAGE");
    for &(key, val) in env_overrides {
        command.env(key, val);
    }

    let output = command.output().unwrap_or_else(|e| {
        panic!("failed to spawn {bin} (work_dir={work_dir}, overrides={env_overrides:?}): {e}")
    });
    assert!(
        output.status.success(),
        "program_fixture exited with {}: stderr={}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("stdout is valid UTF-8")
}

#[test]
fn crossproc_determinism_env_variants() {
    let root = workspace_root();
    let baseline = run_variant(&root, &[]);
    assert_eq!(baseline.lines().count(), scripts().len() * 2);

    let alt_cwd = if cfg!(target_os = "windows") {
        "C:\\"
    } else {
        "/tmp"
    };
    assert_eq!(baseline, run_variant(alt_cwd, &[]), "cwd changed the output");
    assert_eq!(
        baseline,
        run_variant(&root, &[("LC_ALL", "C"), ("LANG", "C")]),
        "locale changed the output"
    );
    assert_eq!(
        baseline,
        run_variant(
            &root,
            &[
                ("SIEVE_NOISE", "should_not_matter"),
                ("TZ", "America/New_York"),
                ("HOME", "/nonexistent"),
            ],
        ),
        "spurious env vars changed the output"
    );
}

#[test]
fn crossproc_matches_in_process_digests() {
    let registry = registry();
    let mut expected = String::new();
    for (name, script) in scripts() {
        let program = compile_with(&registry, script);
        let json = serde_json::to_string(&dump(&program, &registry).unwrap()).unwrap();
        expected.push_str(&format!("{name}.program={}\n", program.digest().unwrap()));
        expected.push_str(&format!(
            "{name}.dump={}\n",
            hex::encode(Sha256::digest(json.as_bytes()))
        ));
    }
    assert_eq!(run_variant(&workspace_root(), &[]), expected);
}
