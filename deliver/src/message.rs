//! Header block of a delivered message, parsed with `mailparse`.
//!
//! Folded lines are unfolded, encoded words are decoded and field names
//! are matched case-insensitively. The body is never inspected, it only
//! contributes to the size.

use mailparse::MailParseError;
use sieve_kernel::runtime::MessageEnv;

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed header block: {0}")]
    Header(#[from] MailParseError),
    #[error("header field {index} has an empty name")]
    EmptyName { index: usize },
}

/// A message as seen by the delivery agent: headers plus envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    headers: Vec<(String, String)>,
    return_path: Option<String>,
    recipient: Option<String>,
    size: u64,
}

impl Message {
    /// Parse the header block of `raw`.
    ///
    /// # Errors
    ///
    /// [`MessageError`] for a malformed header block.
    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        let (fields, _) = mailparse::parse_headers(raw.as_bytes())?;
        let mut headers = Vec::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            let name = field.get_key();
            let name = name.trim();
            if name.is_empty() {
                return Err(MessageError::EmptyName { index: index + 1 });
            }
            headers.push((name.to_string(), field.get_value().trim().to_string()));
        }
        Ok(Self {
            headers,
            return_path: None,
            recipient: None,
            size: raw.len() as u64,
        })
    }

    /// Attach the SMTP envelope. An empty return path marks a bounce.
    #[must_use]
    pub fn with_envelope(mut self, return_path: &str, recipient: &str) -> Self {
        self.return_path = Some(return_path.to_string());
        self.recipient = Some(recipient.to_string());
        self
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

impl MessageEnv for Message {
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
