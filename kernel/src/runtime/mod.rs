//! Per-message evaluation: host environment, interpreter and the match
//! protocol used by tests.

pub mod context;
pub mod env;
pub mod interpreter;
pub mod matching;

use tracing::info;

use crate::binary::Program;
use crate::registry::Registry;
use crate::result::{commit, CommitReport};

pub use context::ExtensionContexts;
pub use env::{
    ExecEnv, MailSender, MailStore, MessageEnv, OutboundMessage, StoreRequest, DEFAULT_MAILBOX,
};
pub use interpreter::{execute, execute_into, ExecStatus, Execution, Runtime};
pub use matching::{AddressPart, Comparator, MatchContext, MatchType, Matcher};

/// Execute and, if the run was clean, commit.
///
/// The report is `None` when execution did not finish with
/// [`ExecStatus::Ok`]; nothing was committed in that case.
pub fn run(
    program: &Program,
    registry: &Registry,
    env: &ExecEnv<'_>,
) -> (Execution, Option<CommitReport>) {
    let mut execution = execute(program, registry, env);
    if !execution.status.is_ok() {
        info!(status = ?execution.status, "skipping commit");
        return (execution, None);
    }
    let report = commit(&mut execution.result, env);
    (execution, Some(report))
}
