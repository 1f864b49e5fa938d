//! In-memory host collaborators: duplicate records, mailboxes and an
//! outbound transport that records what it was asked to send.
//!
//! All three are `Sync` so one instance can serve concurrent deliveries.
//! A poisoned lock is taken over as-is; every critical section leaves the
//! data consistent.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use sieve_kernel::duplicate::{DuplicateStore, Fingerprint};
use sieve_kernel::error::ActionError;
use sieve_kernel::runtime::{MailSender, MailStore, OutboundMessage, StoreRequest};
use tracing::{debug, info};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Duplicate records
// ---------------------------------------------------------------------------

/// Duplicate store keyed by fingerprint, each record with an expiry.
///
/// Expiry is judged against the store's clock: the system time, or a
/// pinned instant set with [`MemoryDuplicateStore::set_now`].
#[derive(Debug, Default)]
pub struct MemoryDuplicateStore {
    records: Mutex<HashMap<Fingerprint, SystemTime>>,
    pinned_now: Mutex<Option<SystemTime>>,
}

impl MemoryDuplicateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the clock used for expiry checks.
    pub fn set_now(&self, now: SystemTime) {
        *lock(&self.pinned_now) = Some(now);
    }

    #[must_use]
    pub fn now(&self) -> SystemTime {
        let pinned = *lock(&self.pinned_now);
        pinned.unwrap_or_else(SystemTime::now)
    }

    /// Records held, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired records. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let now = self.now();
        let mut records = lock(&self.records);
        let before = records.len();
        records.retain(|_, expires_at| *expires_at > now);
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, "purged expired duplicate records");
        }
        removed
    }
}

impl DuplicateStore for MemoryDuplicateStore {
    fn check(&self, fp: &Fingerprint) -> bool {
        let now = self.now();
        lock(&self.records)
            .get(fp)
            .is_some_and(|expires_at| *expires_at > now)
    }

    fn mark(&self, fp: &Fingerprint, expires_at: SystemTime) {
        lock(&self.records).insert(*fp, expires_at);
    }
}

// ---------------------------------------------------------------------------
// Mailboxes
// ---------------------------------------------------------------------------

/// Mail store that keeps every store request. Mailboxes listed with
/// [`MemoryMailStore::refuse`] fail like a full or missing folder would.
#[derive(Debug, Default)]
pub struct MemoryMailStore {
    stored: Mutex<Vec<StoreRequest>>,
    refused: BTreeSet<String>,
}

impl MemoryMailStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn refuse(mut self, mailbox: &str) -> Self {
        self.refused.insert(mailbox.to_string());
        self
    }

    #[must_use]
    pub fn stored(&self) -> Vec<StoreRequest> {
        lock(&self.stored).clone()
    }

    /// Target mailboxes in delivery order.
    #[must_use]
    pub fn mailboxes(&self) -> Vec<String> {
        lock(&self.stored)
            .iter()
            .map(|r| r.mailbox.clone())
            .collect()
    }
}

impl MailStore for MemoryMailStore {
    fn store(&self, request: &StoreRequest) -> Result<(), ActionError> {
        if self.refused.contains(&request.mailbox) {
            return Err(ActionError::failed(format!(
                "mailbox '{}' refused the message",
                request.mailbox
            )));
        }
        debug!(mailbox = %request.mailbox, flags = ?request.flags, "stored");
        lock(&self.stored).push(request.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outbound transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    /// Envelope sender. `None` for a null return path.
    pub from: Option<String>,
    pub data: String,
}

/// Transport that records submitted messages instead of relaying them.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }
}

struct Recording<'s> {
    sender: &'s RecordingSender,
    to: String,
    from: Option<String>,
    data: Vec<u8>,
}

impl io::Write for Recording<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutboundMessage for Recording<'_> {
    fn close(self: Box<Self>) -> Result<(), ActionError> {
        let Recording {
            sender,
            to,
            from,
            data,
        } = *self;
        let data = String::from_utf8(data)
            .map_err(|_| ActionError::failed("outbound message is not UTF-8"))?;
        info!(to = %to, bytes = data.len(), "message submitted");
        lock(&sender.sent).push(SentMessage { to, from, data });
        Ok(())
    }
}

impl MailSender for RecordingSender {
    fn open<'s>(
        &'s self,
        to: &str,
        from: Option<&str>,
    ) -> Result<Box<dyn OutboundMessage + 's>, ActionError> {
        if to.is_empty() {
            return Err(ActionError::failed("empty recipient"));
        }
        Ok(Box::new(Recording {
            sender: self,
            to: to.to_string(),
            from: from.map(str::to_string),
            data: Vec::new(),
        }))
    }
}
