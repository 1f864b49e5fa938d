//! Sieve extensions built on the kernel's public registry API.
//!
//! Nothing here reaches into kernel internals: every extension is a set of
//! `&'static` descriptors handed to an
//! [`ExtensionRegistrar`](sieve_kernel::registry::ExtensionRegistrar), the
//! same way a third-party crate would add one.
//!
//! # Extensions
//!
//! - [`vacation`]: auto-replies, suppressed for lists, bulk mail, bounces
//!   and senders already answered within the interval
//! - [`duplicate`]: the `duplicate` test, backed by the host's duplicate
//!   store
//! - [`imap4flags`]: flag commands, the `hasflag` test and the `:flags`
//!   side effect on `keep`/`fileinto`
//! - [`relational`]: `:count` and `:value` match types, and the
//!   `i;ascii-numeric` comparator
//!
//! [`standard_registry`] builds a registry with all of them.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod duplicate;
pub mod imap4flags;
pub mod relational;
pub mod vacation;

#[cfg(test)]
pub(crate) mod testing;

use serde_json::{json, Value};
use tracing::debug;

use sieve_kernel::config::EngineConfig;
use sieve_kernel::error::RegistryError;
use sieve_kernel::registry::{Registry, RegistryBuilder};

pub use duplicate::DuplicateExtension;
pub use imap4flags::Imap4FlagsExtension;
pub use relational::{AsciiNumericExtension, RelationalExtension};
pub use vacation::VacationExtension;

/// Register every extension of this crate on top of the core language.
///
/// # Errors
///
/// [`RegistryError`] if registration or the final wiring check fails.
pub fn register_all(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    builder.register(VacationExtension)?;
    builder.register(DuplicateExtension)?;
    builder.register(Imap4FlagsExtension)?;
    builder.register(RelationalExtension)?;
    builder.register(AsciiNumericExtension)?;
    Ok(())
}

/// Core language, `fileinto` and every extension of this crate.
///
/// # Errors
///
/// [`RegistryError`] if registration or the final wiring check fails.
pub fn standard_registry(config: EngineConfig) -> Result<Registry, RegistryError> {
    let mut builder = RegistryBuilder::new(config)?;
    register_all(&mut builder)?;
    let registry = builder.build()?;
    debug!(extensions = registry.extensions().count(), "standard registry built");
    Ok(registry)
}

/// Capability listing as announced to script authors: the extension names
/// a script may `require`, plus the engine limits that bound a script.
#[must_use]
pub fn capabilities(registry: &Registry) -> Value {
    let sieve: Vec<&str> = registry
        .extensions()
        .filter(|e| !e.id.is_core())
        .map(|e| e.name)
        .collect();
    let config = registry.config();
    json!({
        "sieve": sieve,
        "max_actions": config.max_actions,
        "vacation": {
            "min_days": config.vacation.min_days,
            "max_days": config.vacation.max_days,
        },
        "duplicate": {
            "max_period": config.duplicate.max_period,
        },
    })
}
