//! The delivery pipeline: compiled stages run in order against one shared
//! result, each committed as it finishes.
//!
//! ```text
//! for each stage:  execute_into(result) → commit_stage(result)
//! last stage:      execute_into(result) → commit(result)   (implicit keep)
//! any stage fails: failsafe keep into the default mailbox, stop
//! ```
//!
//! Actions committed by an earlier stage stay in the result marked
//! executed, so a later `vacation` or `fileinto` composes with them
//! instead of conflicting.

use std::time::SystemTime;

use sieve_kernel::ast::Ast;
use sieve_kernel::binary::Program;
use sieve_kernel::compiler::compile;
use sieve_kernel::duplicate::DuplicateStore;
use sieve_kernel::error::{CompileError, Diagnostics, RegistryError};
use sieve_kernel::registry::Registry;
use sieve_kernel::result::{commit, commit_stage, ActionStatus, CommitReport, SieveResult};
use sieve_kernel::runtime::{
    execute_into, ExecEnv, ExecStatus, MailSender, MailStore, MessageEnv, StoreRequest,
};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, DeliverConfig};
use crate::programs::{ProgramError, ProgramStore};

#[derive(Debug, thiserror::Error)]
pub enum DeliverError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("stage '{stage}': {source}")]
    Compile { stage: String, source: CompileError },
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("stage '{stage}' was compiled for a different registry: {detail}")]
    Incompatible { stage: String, detail: String },
    #[error("stage '{stage}' is already loaded")]
    DuplicateStage { stage: String },
    #[error("no program_dir configured")]
    NoProgramDir,
}

/// Host collaborators for one delivery. Sender and duplicate store are
/// optional; extensions that need them degrade with a warning.
#[derive(Clone, Copy)]
pub struct Host<'a> {
    pub mail_store: &'a dyn MailStore,
    pub sender: Option<&'a dyn MailSender>,
    pub duplicates: Option<&'a dyn DuplicateStore>,
}

impl<'a> Host<'a> {
    #[must_use]
    pub fn new(mail_store: &'a dyn MailStore) -> Self {
        Self {
            mail_store,
            sender: None,
            duplicates: None,
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: &'a dyn MailSender) -> Self {
        self.sender = Some(sender);
        self
    }

    #[must_use]
    pub fn with_duplicates(mut self, duplicates: &'a dyn DuplicateStore) -> Self {
        self.duplicates = Some(duplicates);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub program: Program,
}

/// How one stage ended.
#[derive(Debug)]
pub struct StageRun {
    pub name: String,
    pub status: ExecStatus,
    pub error: Option<String>,
    /// `None` when the stage did not execute cleanly.
    pub report: Option<CommitReport>,
}

/// Everything that happened to one message.
#[derive(Debug)]
pub struct Delivery {
    pub stages: Vec<StageRun>,
    /// Outcome of the failsafe keep, if a stage failed.
    pub failsafe: Option<ActionStatus>,
}

impl Delivery {
    /// Every stage ran and committed without a failed action.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failsafe.is_none()
            && self
                .stages
                .iter()
                .all(|s| s.report.as_ref().is_some_and(|r| r.success))
    }
}

/// Compiled stages plus the registry they were compiled against.
pub struct Agent {
    config: DeliverConfig,
    registry: Registry,
    stages: Vec<Stage>,
}

impl Agent {
    /// An agent with the standard registry and no stages.
    ///
    /// # Errors
    ///
    /// [`DeliverError`] if the config is invalid or the registry fails to
    /// build.
    pub fn new(config: DeliverConfig) -> Result<Self, DeliverError> {
        config.validate()?;
        let registry = sieve_extensions::standard_registry(config.engine.clone())?;
        Ok(Self {
            config,
            registry,
            stages: Vec::new(),
        })
    }

    /// [`Agent::new`], then load every configured stage from `program_dir`.
    ///
    /// # Errors
    ///
    /// [`DeliverError`] if a stage program is missing, corrupt or was
    /// compiled against a different registry.
    pub fn from_config(config: DeliverConfig) -> Result<Self, DeliverError> {
        let mut agent = Self::new(config)?;
        if agent.config.stages.is_empty() {
            return Ok(agent);
        }
        let store = agent.program_store()?;
        for name in agent.config.stages.clone() {
            let program = store.load(&name)?;
            agent.push_program(&name, program)?;
        }
        info!(stages = agent.stages.len(), "stages loaded");
        Ok(agent)
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &DeliverConfig {
        &self.config
    }

    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn program_store(&self) -> Result<ProgramStore, DeliverError> {
        self.config
            .program_dir
            .as_ref()
            .map(ProgramStore::new)
            .ok_or(DeliverError::NoProgramDir)
    }

    /// Compile `ast` and append it as the next stage. Warnings are left in
    /// the returned diagnostics.
    ///
    /// # Errors
    ///
    /// [`DeliverError::Compile`] with every collected error.
    pub fn compile_stage(&mut self, name: &str, ast: &Ast) -> Result<Diagnostics, DeliverError> {
        let mut diags = Diagnostics::new();
        let program =
            compile(ast, &self.registry, &mut diags).map_err(|source| DeliverError::Compile {
                stage: name.to_string(),
                source,
            })?;
        self.push_program(name, program)?;
        Ok(diags)
    }

    /// Append an already compiled program as the next stage.
    ///
    /// # Errors
    ///
    /// [`DeliverError::Incompatible`] if the program references an
    /// extension this registry does not have under the same id.
    pub fn push_program(&mut self, name: &str, program: Program) -> Result<(), DeliverError> {
        if self.stages.iter().any(|s| s.name == name) {
            return Err(DeliverError::DuplicateStage {
                stage: name.to_string(),
            });
        }
        for (id, ext) in program.extensions() {
            let entry = self.registry.extension_by_name(ext);
            if entry.map(|e| e.id) != Some(*id) {
                return Err(DeliverError::Incompatible {
                    stage: name.to_string(),
                    detail: format!("extension '{ext}' is not registered as id {id}"),
                });
            }
        }
        debug!(stage = name, code_len = program.code().len(), "stage added");
        self.stages.push(Stage {
            name: name.to_string(),
            program,
        });
        Ok(())
    }

    /// Write every stage to `program_dir`.
    ///
    /// # Errors
    ///
    /// [`DeliverError`] if no directory is configured or a write fails.
    pub fn save_stages(&self) -> Result<(), DeliverError> {
        let store = self.program_store()?;
        for stage in &self.stages {
            store.save(&stage.name, &stage.program)?;
        }
        Ok(())
    }

    /// Filter and deliver one message.
    #[must_use]
    pub fn deliver(&self, message: &dyn MessageEnv, host: Host<'_>) -> Delivery {
        self.deliver_at(message, host, SystemTime::now())
    }

    /// [`Agent::deliver`] with an explicit time reference for duplicate
    /// and vacation expiries.
    #[must_use]
    pub fn deliver_at(
        &self,
        message: &dyn MessageEnv,
        host: Host<'_>,
        now: SystemTime,
    ) -> Delivery {
        let mut env = ExecEnv::new(message)
            .with_default_mailbox(&self.config.default_mailbox)
            .with_now(now)
            .with_mail_store(host.mail_store);
        if let Some(user) = self.config.user.as_deref() {
            env = env.with_user(user);
        }
        if let Some(sender) = host.sender {
            env = env.with_sender(sender);
        }
        if let Some(duplicates) = host.duplicates {
            env = env.with_duplicates(duplicates);
        }

        let mut result = SieveResult::new(self.registry.config().max_actions);
        let mut runs = Vec::with_capacity(self.stages.len());

        if self.stages.is_empty() {
            let report = commit(&mut result, &env);
            return Delivery {
                stages: runs,
                failsafe: None,
            }
            .with_keep_only(report);
        }

        let last = self.stages.len() - 1;
        for (idx, stage) in self.stages.iter().enumerate() {
            if let Err(err) = execute_into(&stage.program, &self.registry, &env, &mut result) {
                let status = ExecStatus::of(&err);
                warn!(stage = %stage.name, ?status, error = %err, "stage failed, using failsafe keep");
                runs.push(StageRun {
                    name: stage.name.clone(),
                    status,
                    error: Some(err.to_string()),
                    report: None,
                });
                let failsafe = Some(failsafe_keep(&env));
                return Delivery {
                    stages: runs,
                    failsafe,
                };
            }
            let report = if idx == last {
                commit(&mut result, &env)
            } else {
                commit_stage(&mut result, &env)
            };
            debug!(stage = %stage.name, success = report.success, "stage committed");
            runs.push(StageRun {
                name: stage.name.clone(),
                status: ExecStatus::Ok,
                error: None,
                report: Some(report),
            });
        }
        Delivery {
            stages: runs,
            failsafe: None,
        }
    }
}

impl Delivery {
    fn with_keep_only(mut self, report: CommitReport) -> Self {
        self.stages.push(StageRun {
            name: String::new(),
            status: ExecStatus::Ok,
            error: None,
            report: Some(report),
        });
        self
    }
}

fn failsafe_keep(env: &ExecEnv<'_>) -> ActionStatus {
    let request = StoreRequest::new(env.default_mailbox);
    match env.store(&request) {
        Ok(()) => {
            info!(mailbox = %request.mailbox, "failsafe keep");
            ActionStatus::Committed
        }
        Err(err) => {
            warn!(mailbox = %request.mailbox, error = %err, "failsafe keep failed");
            ActionStatus::Failed {
                detail: err.to_string(),
            }
        }
    }
}
