//! Cross-crate lock tests for the Sieve engine. Shared fixtures live here;
//! the tests themselves are under `tests/`.

pub mod fixtures;
