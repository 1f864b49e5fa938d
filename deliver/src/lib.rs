//! Delivery agent around the Sieve engine.
//!
//! Loads a [`DeliverConfig`], keeps compiled stage programs on disk and
//! runs them against incoming messages with in-memory host collaborators.
//! A stage that does not execute cleanly never loses mail: the message
//! falls back to the default mailbox.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agent;
pub mod config;
pub mod host;
pub mod message;
pub mod programs;

pub use agent::{Agent, DeliverError, Delivery, Host, Stage, StageRun};
pub use config::{load_config, write_config, ConfigError, DeliverConfig};
pub use host::{MemoryDuplicateStore, MemoryMailStore, RecordingSender, SentMessage};
pub use message::{Message, MessageError};
pub use programs::{ProgramError, ProgramStore};
