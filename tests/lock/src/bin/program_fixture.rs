//! Compiles every golden script and prints deterministic digests.
//!
//! Used by the cross-process determinism test to show that compiled
//! programs and their listings do not depend on process state.
//!
//! Output: two lines per script, in corpus order:
//!   `<name>.program=<hex sha256 of the serialized program>`
//!   `<name>.dump=<hex sha256 of the JSON listing>`

use lock_tests::fixtures::{compile_with, registry, scripts};
use sha2::{Digest, Sha256};
use sieve_kernel::binary::dump::dump;

fn main() {
    let registry = registry();
    for (name, script) in scripts() {
        let program = compile_with(&registry, script);
        let digest = program.digest().expect("program serializes");
        let listing = dump(&program, &registry).expect("program dumps");
        let json = serde_json::to_string(&listing).expect("listing serializes");
        println!("{name}.program={digest}");
        println!("{name}.dump={}", hex::encode(Sha256::digest(json.as_bytes())));
    }
}
