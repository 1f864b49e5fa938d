//! Commit: perform the staged actions against the host.
//!
//! Live, not yet executed actions commit in staging order. A failing
//! action is logged and recorded; its siblings still run. Only
//! [`ActionError::RunVoid`] stops the pass. Finish callbacks always run
//! afterwards with the overall success flag, which is how deferred
//! duplicate marks persist only for a clean run.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::ActionError;
use crate::result::{CommitOutcome, SieveResult};
use crate::runtime::env::{ExecEnv, StoreRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    Committed,
    Skipped { reason: String },
    Failed { detail: String },
    /// Not attempted because the run was declared void.
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub action: &'static str,
    pub line: u32,
    #[serde(flatten)]
    pub status: ActionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub outcomes: Vec<ActionOutcome>,
    /// Outcome of the implicit keep, if one was attempted.
    pub implicit_keep: Option<ActionStatus>,
    pub success: bool,
}

impl CommitReport {
    #[must_use]
    pub fn committed(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == ActionStatus::Committed)
    }
}

/// Commit a final result, including the implicit keep.
pub fn commit(result: &mut SieveResult, env: &ExecEnv<'_>) -> CommitReport {
    run(result, env, true)
}

/// Commit one stage of a multi-script run. The implicit keep is left to
/// the final stage; committed actions are marked executed so later stages
/// see them.
pub fn commit_stage(result: &mut SieveResult, env: &ExecEnv<'_>) -> CommitReport {
    run(result, env, false)
}

fn run(result: &mut SieveResult, env: &ExecEnv<'_>, final_stage: bool) -> CommitReport {
    let mut outcomes = Vec::new();
    let mut attempted = Vec::new();
    let mut success = true;
    let mut void = false;
    let mut keep_failed = false;

    for (idx, action) in result.actions().iter().enumerate() {
        if !action.is_live() || action.executed {
            continue;
        }
        let name = action.def.name;
        let line = action.line;
        if void {
            outcomes.push(ActionOutcome {
                action: name,
                line,
                status: ActionStatus::NotRun,
            });
            continue;
        }
        attempted.push(idx);
        let outcome = match action.def.commit {
            Some(commit) => commit(env, action),
            None => Ok(CommitOutcome::Committed),
        };
        let status = match outcome {
            Ok(CommitOutcome::Committed) => {
                info!(action = name, line, "{}", action.print());
                ActionStatus::Committed
            }
            Ok(CommitOutcome::Skipped { reason }) => {
                info!(action = name, line, %reason, "action skipped");
                ActionStatus::Skipped { reason }
            }
            Err(ActionError::Failed { detail }) => {
                warn!(action = name, line, %detail, "action failed");
                success = false;
                keep_failed |= action.def.cancels_keep;
                ActionStatus::Failed { detail }
            }
            Err(ActionError::RunVoid { detail }) => {
                error!(action = name, line, %detail, "run declared void");
                success = false;
                void = true;
                ActionStatus::Failed { detail }
            }
        };
        outcomes.push(ActionOutcome {
            action: name,
            line,
            status,
        });
    }

    // A failed keep-cancelling action falls back to the implicit keep.
    let mut implicit_keep = None;
    if final_stage && !void && (result.implicit_keep() || keep_failed) {
        let mut request = StoreRequest::new(env.default_mailbox);
        for effect in result.implicit_side_effects() {
            effect.apply(&mut request);
        }
        implicit_keep = Some(match env.store(&request) {
            Ok(()) => {
                info!(mailbox = %request.mailbox, "implicit keep");
                ActionStatus::Committed
            }
            Err(err) => {
                warn!(mailbox = %request.mailbox, error = %err, "implicit keep failed");
                success = false;
                ActionStatus::Failed {
                    detail: err.to_string(),
                }
            }
        });
    }

    for &idx in &attempted {
        let action = &result.actions()[idx];
        if let Some(finish) = action.def.finish {
            finish(env, action, success);
        }
    }

    let actions = result.actions_mut();
    for (&idx, outcome) in attempted.iter().zip(
        outcomes
            .iter()
            .filter(|o| o.status != ActionStatus::NotRun),
    ) {
        if matches!(
            outcome.status,
            ActionStatus::Committed | ActionStatus::Skipped { .. }
        ) {
            actions[idx].executed = true;
        }
    }

    debug!(
        actions = outcomes.len(),
        success,
        implicit_keep = implicit_keep.is_some(),
        "commit finished"
    );
    CommitReport {
        outcomes,
        implicit_keep,
        success,
    }
}
