//! The result: actions staged by one evaluation, waiting for commit.
//!
//! Actions are only ever appended. Resolution against earlier actions
//! happens in [`SieveResult::add_action`]:
//!
//! 1. Duplicate check against live actions of the same descriptor.
//! 2. Conflict check against every other live action, in both directions.
//! 3. The `max_actions` limit.
//!
//! Nothing is mutated unless all three pass. A superseded action stays in
//! the list but is no longer live; its side effects move to the newcomer.

pub mod commit;

use std::any::Any;
use std::fmt;
use std::fmt::Write as _;

use tracing::debug;

use crate::binary::OperandValue;
use crate::error::{ActionConflict, ActionError, RuntimeError};
use crate::runtime::env::{ExecEnv, StoreRequest};
use crate::runtime::interpreter::Runtime;

pub use commit::{commit, commit_stage, ActionOutcome, ActionStatus, CommitReport};

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Outcome of comparing a new action with a staged one of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateCheck {
    /// Different instances, both stay.
    Distinct,
    /// Same action declared twice. Fatal.
    RejectNew,
    /// Same action, but running both is fine (e.g. the other already ran).
    Allow,
    /// The new action replaces the staged one.
    Supersede,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCheck {
    NoConflict,
    Fatal,
    /// Would conflict, but the other action was executed by an earlier
    /// stage.
    AllowedExecuted,
}

/// Result of a successful commit callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Deliberately not performed; the action still counts as handled.
    Skipped { reason: String },
}

pub type DuplicateCheckFn = fn(new: &StagedAction, existing: &StagedAction) -> DuplicateCheck;
pub type ConflictCheckFn = fn(this: &StagedAction, other: &StagedAction) -> ConflictCheck;
pub type PrintFn = fn(&StagedAction) -> String;
pub type CommitFn = fn(&ExecEnv<'_>, &StagedAction) -> Result<CommitOutcome, ActionError>;
pub type FinishFn = fn(&ExecEnv<'_>, &StagedAction, success: bool);

/// Commit behavior of one action kind.
pub struct ActionDef {
    pub name: &'static str,
    /// Sends a message back to someone (vacation, reject).
    pub sends_response: bool,
    /// Cancels the implicit keep while live.
    pub cancels_keep: bool,
    pub check_duplicate: Option<DuplicateCheckFn>,
    pub check_conflict: Option<ConflictCheckFn>,
    pub print: PrintFn,
    pub commit: Option<CommitFn>,
    /// Runs after the whole commit pass with its overall success.
    pub finish: Option<FinishFn>,
}

impl ActionDef {
    /// Descriptors are compared by identity.
    #[must_use]
    pub fn is(&self, other: &ActionDef) -> bool {
        std::ptr::eq(self, other)
    }
}

impl fmt::Debug for ActionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDef")
            .field("name", &self.name)
            .field("sends_response", &self.sends_response)
            .field("cancels_keep", &self.cancels_keep)
            .finish_non_exhaustive()
    }
}

pub type SideEffectBuildFn =
    fn(&mut Runtime<'_>, Option<&OperandValue<'_>>) -> Result<Box<dyn Any + Send>, RuntimeError>;
pub type SideEffectImplicitFn =
    fn(&mut Runtime<'_>) -> Result<Option<Box<dyn Any + Send>>, RuntimeError>;

/// A modifier that rides on a store action (e.g. `:flags`).
pub struct SideEffectDef {
    pub name: &'static str,
    /// Instance data from the tag's parameter.
    pub build: SideEffectBuildFn,
    /// Instance data applied when the tag is absent, if any.
    pub implicit: Option<SideEffectImplicitFn>,
    pub apply: fn(&dyn Any, &mut StoreRequest),
    pub print: fn(&dyn Any) -> String,
}

impl fmt::Debug for SideEffectDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffectDef")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

pub struct SideEffect {
    pub def: &'static SideEffectDef,
    pub data: Box<dyn Any + Send>,
}

impl SideEffect {
    pub fn apply(&self, request: &mut StoreRequest) {
        (self.def.apply)(self.data.as_ref(), request);
    }

    #[must_use]
    pub fn print(&self) -> String {
        (self.def.print)(self.data.as_ref())
    }
}

impl fmt::Debug for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffect")
            .field("def", &self.def.name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Staged actions
// ---------------------------------------------------------------------------

pub struct StagedAction {
    pub def: &'static ActionDef,
    pub data: Box<dyn Any + Send>,
    pub line: u32,
    pub side_effects: Vec<SideEffect>,
    /// Committed by an earlier stage sharing this result.
    pub executed: bool,
    /// Replaced by a later action of the same kind.
    pub superseded: bool,
}

impl StagedAction {
    #[must_use]
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.superseded
    }

    /// Store request for this action with its side effects applied.
    #[must_use]
    pub fn store_request(&self, mailbox: &str) -> StoreRequest {
        let mut request = StoreRequest::new(mailbox);
        for effect in &self.side_effects {
            effect.apply(&mut request);
        }
        request
    }

    #[must_use]
    pub fn print(&self) -> String {
        (self.def.print)(self)
    }
}

impl fmt::Debug for StagedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedAction")
            .field("action", &self.def.name)
            .field("line", &self.line)
            .field("side_effects", &self.side_effects)
            .field("executed", &self.executed)
            .field("superseded", &self.superseded)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SieveResult
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SieveResult {
    actions: Vec<StagedAction>,
    max_actions: usize,
    implicit_side_effects: Vec<SideEffect>,
}

impl SieveResult {
    #[must_use]
    pub fn new(max_actions: usize) -> Self {
        Self {
            actions: Vec::new(),
            max_actions,
            implicit_side_effects: Vec::new(),
        }
    }

    /// Stage an action.
    ///
    /// # Errors
    ///
    /// [`ActionConflict`] if the action duplicates or conflicts with a
    /// staged one, or the action limit is reached. The result is unchanged
    /// on error.
    pub fn add_action(
        &mut self,
        def: &'static ActionDef,
        data: Box<dyn Any + Send>,
        line: u32,
        side_effects: Vec<SideEffect>,
    ) -> Result<(), ActionConflict> {
        let mut new = StagedAction {
            def,
            data,
            line,
            side_effects,
            executed: false,
            superseded: false,
        };

        let mut superseded = Vec::new();
        for (idx, existing) in self.actions.iter().enumerate() {
            if !existing.is_live() || !existing.def.is(def) {
                continue;
            }
            let Some(check) = def.check_duplicate else {
                continue;
            };
            match check(&new, existing) {
                DuplicateCheck::Distinct | DuplicateCheck::Allow => {}
                DuplicateCheck::RejectNew => {
                    return Err(ActionConflict::Duplicate {
                        action: def.name,
                        line,
                        other_line: existing.line,
                    });
                }
                DuplicateCheck::Supersede => superseded.push(idx),
            }
        }

        for existing in self.actions.iter().filter(|a| a.is_live()) {
            if existing.def.is(def) {
                continue;
            }
            let forward = def.check_conflict.map(|check| check(&new, existing));
            let backward = existing.def.check_conflict.map(|check| check(existing, &new));
            if forward == Some(ConflictCheck::Fatal) || backward == Some(ConflictCheck::Fatal) {
                return Err(ActionConflict::Conflict {
                    action: def.name,
                    line,
                    other: existing.def.name,
                    other_line: existing.line,
                });
            }
        }

        let live = self.actions.iter().filter(|a| a.is_live()).count();
        if live + 1 - superseded.len() > self.max_actions {
            return Err(ActionConflict::TooManyActions {
                limit: self.max_actions,
                line,
            });
        }

        for idx in superseded {
            let old = &mut self.actions[idx];
            old.superseded = true;
            debug!(action = def.name, line, replaced_line = old.line, "action superseded");
            for effect in std::mem::take(&mut old.side_effects) {
                if !new.side_effects.iter().any(|e| std::ptr::eq(e.def, effect.def)) {
                    new.side_effects.push(effect);
                }
            }
            // The merged action commits at most once across stages.
            new.executed |= old.executed;
        }

        debug!(action = def.name, line, "action staged");
        self.actions.push(new);
        Ok(())
    }

    /// All actions in staging order, superseded ones included.
    #[must_use]
    pub fn actions(&self) -> &[StagedAction] {
        &self.actions
    }

    pub(crate) fn actions_mut(&mut self) -> &mut [StagedAction] {
        &mut self.actions
    }

    pub fn live_actions(&self) -> impl Iterator<Item = &StagedAction> {
        self.actions.iter().filter(|a| a.is_live())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// True unless a live action cancels the implicit keep.
    #[must_use]
    pub fn implicit_keep(&self) -> bool {
        !self.live_actions().any(|a| a.def.cancels_keep)
    }

    /// Side effects the implicit keep would carry.
    pub fn set_implicit_side_effects(&mut self, effects: Vec<SideEffect>) {
        self.implicit_side_effects = effects;
    }

    #[must_use]
    pub fn implicit_side_effects(&self) -> &[SideEffect] {
        &self.implicit_side_effects
    }

    /// Human-readable listing of what a commit would do.
    #[must_use]
    pub fn print(&self) -> String {
        let mut out = String::from("Performed actions:\n");
        let mut any = false;
        for action in self.live_actions() {
            any = true;
            let marker = if action.executed { "(executed) " } else { "" };
            let _ = writeln!(out, "  * {marker}{}", action.print());
            for effect in &action.side_effects {
                let _ = writeln!(out, "        + {}", effect.print());
            }
        }
        if !any {
            out.push_str("  (none)\n");
        }
        out.push_str("\nImplicit keep:\n");
        if self.implicit_keep() {
            out.push_str("  * store message in default mailbox\n");
            for effect in &self.implicit_side_effects {
                let _ = writeln!(out, "        + {}", effect.print());
            }
        } else {
            out.push_str("  (none)\n");
        }
        out
    }
}
