//! Sieve kernel: an embeddable mail-filter engine.
//!
//! # API Surface
//!
//! - [`compiler::compile`] -- validate an AST against the registry and generate a [`binary::Program`]
//! - [`runtime::execute`] -- interpret a program against one message, producing a [`result::SieveResult`]
//! - [`result::commit`] -- perform the staged actions against the host
//!
//! [`runtime::run`] chains the last two and only commits a clean run.
//!
//! # Data Flow
//!
//! `ast` → `compiler` → `binary::Program` → `runtime` → `result`
//!
//! Every stage borrows one frozen [`registry::Registry`]. Language features
//! live in `lang` and reach the pipeline only through registered
//! descriptors.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ast;
pub mod binary;
pub mod compiler;
pub mod config;
pub mod duplicate;
pub mod error;
pub mod lang;
pub mod registry;
pub mod result;
pub mod runtime;
