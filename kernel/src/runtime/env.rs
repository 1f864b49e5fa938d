//! Host collaborators seen by the interpreter and by commit callbacks.
//!
//! The engine never parses messages, talks SMTP or touches a mailbox
//! directly. Everything it needs from the outside world comes through
//! these traits, bundled per evaluation in [`ExecEnv`].

use std::fmt;
use std::io;
use std::time::SystemTime;

use crate::duplicate::{DuplicateStore, DuplicateTracker};
use crate::error::ActionError;

/// Mailbox used by `keep` and the implicit keep.
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// The message being filtered.
pub trait MessageEnv {
    /// Values of every header field named `name` (case-insensitive), in
    /// message order. Empty if absent.
    fn header(&self, name: &str) -> Vec<String>;

    /// Envelope sender. `None` or empty for bounces.
    fn return_path(&self) -> Option<String>;

    /// Envelope recipient.
    fn recipient(&self) -> Option<String>;

    fn message_id(&self) -> Option<String> {
        self.header("message-id").into_iter().next()
    }

    /// Size in octets.
    fn size(&self) -> u64;
}

/// One store operation: target mailbox plus side-effect modifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest {
    pub mailbox: String,
    pub flags: Vec<String>,
}

impl StoreRequest {
    #[must_use]
    pub fn new(mailbox: impl Into<String>) -> Self {
        Self {
            mailbox: mailbox.into(),
            flags: Vec::new(),
        }
    }
}

/// Delivers the current message into a mailbox.
pub trait MailStore {
    /// # Errors
    ///
    /// [`ActionError`] if the mailbox cannot be written.
    fn store(&self, request: &StoreRequest) -> Result<(), ActionError>;
}

/// An outbound message being written. Dropping it without `close`
/// abandons the send.
pub trait OutboundMessage: io::Write {
    /// Finalize and submit.
    ///
    /// # Errors
    ///
    /// [`ActionError`] if submission fails.
    fn close(self: Box<Self>) -> Result<(), ActionError>;
}

/// Submits new messages (auto-replies, redirects).
pub trait MailSender {
    /// Start a message to `to`. `from` is the envelope sender; `None` sends
    /// with a null return path.
    ///
    /// # Errors
    ///
    /// [`ActionError`] if the transport refuses the envelope.
    fn open<'s>(
        &'s self,
        to: &str,
        from: Option<&str>,
    ) -> Result<Box<dyn OutboundMessage + 's>, ActionError>;
}

/// Everything one evaluation can reach outside the engine.
#[derive(Clone, Copy)]
pub struct ExecEnv<'a> {
    pub message: &'a dyn MessageEnv,
    /// Address of the user whose script runs, if known.
    pub user: Option<&'a str>,
    pub default_mailbox: &'a str,
    /// Time reference for expiries.
    pub now: SystemTime,
    pub mail_store: Option<&'a dyn MailStore>,
    pub sender: Option<&'a dyn MailSender>,
    pub duplicates: Option<&'a dyn DuplicateStore>,
}

impl<'a> ExecEnv<'a> {
    #[must_use]
    pub fn new(message: &'a dyn MessageEnv) -> Self {
        Self {
            message,
            user: None,
            default_mailbox: DEFAULT_MAILBOX,
            now: SystemTime::now(),
            mail_store: None,
            sender: None,
            duplicates: None,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user: &'a str) -> Self {
        self.user = Some(user);
        self
    }

    #[must_use]
    pub fn with_default_mailbox(mut self, mailbox: &'a str) -> Self {
        self.default_mailbox = mailbox;
        self
    }

    #[must_use]
    pub fn with_now(mut self, now: SystemTime) -> Self {
        self.now = now;
        self
    }

    #[must_use]
    pub fn with_mail_store(mut self, store: &'a dyn MailStore) -> Self {
        self.mail_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_sender(mut self, sender: &'a dyn MailSender) -> Self {
        self.sender = Some(sender);
        self
    }

    #[must_use]
    pub fn with_duplicates(mut self, store: &'a dyn DuplicateStore) -> Self {
        self.duplicates = Some(store);
        self
    }

    /// Duplicate client, if the host provided a store.
    #[must_use]
    pub fn tracker(&self) -> Option<DuplicateTracker<'a>> {
        self.duplicates.map(DuplicateTracker::new)
    }

    /// Store the message. Fails if the host gave no mail store.
    ///
    /// # Errors
    ///
    /// [`ActionError`] from the store, or a missing store.
    pub fn store(&self, request: &StoreRequest) -> Result<(), ActionError> {
        let store = self
            .mail_store
            .ok_or_else(|| ActionError::failed("no mail store available"))?;
        store.store(request)
    }
}

impl fmt::Debug for ExecEnv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecEnv")
            .field("user", &self.user)
            .field("default_mailbox", &self.default_mailbox)
            .field("now", &self.now)
            .field("mail_store", &self.mail_store.is_some())
            .field("sender", &self.sender.is_some())
            .field("duplicates", &self.duplicates.is_some())
            .finish_non_exhaustive()
    }
}
