//! In-memory host for extension tests.

use std::cell::RefCell;
use std::io;
use std::time::SystemTime;

use sieve_kernel::ast::{Ast, AstNode};
use sieve_kernel::binary::Program;
use sieve_kernel::compiler::compile;
use sieve_kernel::config::EngineConfig;
use sieve_kernel::duplicate::{DuplicateStore, Fingerprint};
use sieve_kernel::error::{ActionError, CompileError, Diagnostics};
use sieve_kernel::registry::Registry;
use sieve_kernel::result::CommitReport;
use sieve_kernel::runtime::{
    run, ExecEnv, Execution, MailSender, MailStore, MessageEnv, OutboundMessage, StoreRequest,
};

use crate::standard_registry;

#[derive(Default, Clone)]
pub(crate) struct TestMessage {
    pub headers: Vec<(String, String)>,
    pub return_path: Option<String>,
    pub recipient: Option<String>,
    pub size: u64,
}

impl TestMessage {
    pub(crate) fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub(crate) fn envelope(mut self, return_path: &str, recipient: &str) -> Self {
        self.return_path = Some(return_path.into());
        self.recipient = Some(recipient.into());
        self
    }
}

impl MessageEnv for TestMessage {
    fn header(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn return_path(&self) -> Option<String> {
        self.return_path.clone()
    }

    fn recipient(&self) -> Option<String> {
        self.recipient.clone()
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sent {
    pub to: String,
    pub from: Option<String>,
    pub body: String,
}

/// Mail store, outbound transport and duplicate store in one. Duplicate
/// records never expire.
#[derive(Default)]
pub(crate) struct Host {
    pub stored: RefCell<Vec<StoreRequest>>,
    pub sent: RefCell<Vec<Sent>>,
    pub marks: RefCell<Vec<Fingerprint>>,
    pub checks: RefCell<usize>,
    pub no_sender: bool,
    pub no_duplicates: bool,
    pub user: Option<&'static str>,
}

impl Host {
    pub(crate) fn mailboxes(&self) -> Vec<String> {
        self.stored.borrow().iter().map(|r| r.mailbox.clone()).collect()
    }
}

impl MailStore for Host {
    fn store(&self, request: &StoreRequest) -> Result<(), ActionError> {
        self.stored.borrow_mut().push(request.clone());
        Ok(())
    }
}

impl DuplicateStore for Host {
    fn check(&self, fp: &Fingerprint) -> bool {
        *self.checks.borrow_mut() += 1;
        self.marks.borrow().contains(fp)
    }

    fn mark(&self, fp: &Fingerprint, _expires_at: SystemTime) {
        self.marks.borrow_mut().push(*fp);
    }
}

struct Outgoing<'h> {
    host: &'h Host,
    to: String,
    from: Option<String>,
    body: Vec<u8>,
}

impl io::Write for Outgoing<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutboundMessage for Outgoing<'_> {
    fn close(self: Box<Self>) -> Result<(), ActionError> {
        let Outgoing {
            host,
            to,
            from,
            body,
        } = *self;
        host.sent.borrow_mut().push(Sent {
            to,
            from,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
        Ok(())
    }
}

impl MailSender for Host {
    fn open<'s>(
        &'s self,
        to: &str,
        from: Option<&str>,
    ) -> Result<Box<dyn OutboundMessage + 's>, ActionError> {
        Ok(Box::new(Outgoing {
            host: self,
            to: to.into(),
            from: from.map(str::to_string),
            body: Vec::new(),
        }))
    }
}

pub(crate) fn registry() -> Registry {
    standard_registry(EngineConfig::default()).unwrap()
}

pub(crate) fn compile_with(script: Vec<AstNode>) -> (Program, Registry) {
    let registry = registry();
    let program = compile(&Ast::new(script), &registry, &mut Diagnostics::new()).unwrap();
    (program, registry)
}

/// Every error message of a script that must not compile.
pub(crate) fn compile_err(script: Vec<AstNode>) -> String {
    let registry = registry();
    match compile(&Ast::new(script), &registry, &mut Diagnostics::new()) {
        Err(CompileError::Invalid { errors }) => errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n"),
        Err(other) => other.to_string(),
        Ok(_) => panic!("script compiled"),
    }
}

pub(crate) fn evaluate(
    script: Vec<AstNode>,
    msg: &TestMessage,
    host: &Host,
) -> (Execution, Option<CommitReport>) {
    let (program, registry) = compile_with(script);
    let mut env = ExecEnv::new(msg).with_mail_store(host);
    if !host.no_sender {
        env = env.with_sender(host);
    }
    if !host.no_duplicates {
        env = env.with_duplicates(host);
    }
    if let Some(user) = host.user {
        env = env.with_user(user);
    }
    run(&program, &registry, &env)
}
