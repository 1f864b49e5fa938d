//! `vacation`: auto-reply at most once per sender and interval.
//!
//! A message whose return path is its own recipient never stages a reply.
//! Everything else is decided at commit time: [`vacation_commit`] walks the
//! suppression rules in order and either sends through the host's
//! [`MailSender`](sieve_kernel::runtime::MailSender) or reports why it did
//! not.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::time::{Duration, SystemTime};

use mail_builder::headers::address::Address;
use mail_builder::headers::content_type::ContentType;
use mail_builder::headers::date::Date;
use mail_builder::headers::message_id::MessageId;
use mail_builder::headers::raw::Raw;
use mail_builder::mime::{BodyPart, MimePart};
use mail_builder::MessageBuilder;
use mailparse::{MailAddr, MailParseError, ParsedMail};
use tracing::{debug, info, warn};

use sieve_kernel::binary::Operands;
use sieve_kernel::compiler::{ArgValue, CommandContext, Rejection, TagContext};
use sieve_kernel::config::EngineConfig;
use sieve_kernel::duplicate::Fingerprint;
use sieve_kernel::error::{ActionError, ExtensionLoadError, RegistryError, RuntimeError};
use sieve_kernel::registry::{
    ArgSpec, BlockRule, CommandDef, CommandKind, Extension, ExtensionRegistrar, Flow, OperandKind,
    OperationDef, Subtests, TagDef, TagPayload, ValueKind,
};
use sieve_kernel::result::{ActionDef, CommitOutcome, ConflictCheck, DuplicateCheck, StagedAction};
use sieve_kernel::runtime::matching::header_addresses;
use sieve_kernel::runtime::{ExecEnv, Runtime};

pub const OP_VACATION: u8 = 0x01;

const OPT_DAYS: u8 = 1;
const OPT_SUBJECT: u8 = 2;
const OPT_FROM: u8 = 3;
const OPT_ADDRESSES: u8 = 4;
const OPT_MIME: u8 = 5;
const OPT_HANDLE: u8 = 6;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Namespace prefix of reply-tracking fingerprints.
pub const VACATION_NAMESPACE: &[u8] = b"sieve vacation";

const LIST_HEADERS: &[&str] = &[
    "list-id",
    "list-owner",
    "list-subscribe",
    "list-post",
    "list-unsubscribe",
    "list-help",
    "list-archive",
];

const RECIPIENT_HEADERS: &[&str] = &["to", "cc", "bcc", "resent-to", "resent-cc", "resent-bcc"];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_days(ctx: &mut TagContext<'_>) -> Result<(), String> {
    let Some(days) = ctx.value().and_then(ArgValue::as_number) else {
        return Ok(());
    };
    let bounds = &ctx.config().vacation;
    let clamped = days.max(1).clamp(bounds.min_days, bounds.max_days.max(bounds.min_days));
    if clamped != days {
        ctx.warning(format!("vacation :days {days} adjusted to {clamped}"));
        ctx.set_value(ArgValue::Number(clamped));
    }
    Ok(())
}

/// A single address with a local part and a domain.
fn plausible_address(value: &str) -> bool {
    let addresses = header_addresses(value);
    match addresses.as_slice() {
        [address] => match address.rsplit_once('@') {
            Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
            None => false,
        },
        _ => false,
    }
}

fn validate_from(ctx: &mut TagContext<'_>) -> Result<(), String> {
    match ctx.value().and_then(ArgValue::as_str) {
        Some(from) if !plausible_address(from) => Err(format!(
            "specified :from address '{from}' is invalid for vacation action"
        )),
        _ => Ok(()),
    }
}

/// `:handle` is read by [`validate_vacation`] and never emitted.
fn detach_handle(ctx: &mut TagContext<'_>) -> Result<(), String> {
    ctx.detach();
    Ok(())
}

/// Fills in the default handle as a second positional operand.
fn validate_vacation(ctx: &mut CommandContext<'_>) -> Result<(), Rejection> {
    let handle = match ctx.tag_value("handle").and_then(ArgValue::as_str) {
        Some(handle) => handle.to_string(),
        None => {
            let reason = ctx
                .positional()
                .first()
                .and_then(ArgValue::as_str)
                .unwrap_or_default();
            let subject = ctx
                .tag_value("subject")
                .and_then(ArgValue::as_str)
                .unwrap_or("<default-subject>");
            let from = ctx
                .tag_value("from")
                .and_then(ArgValue::as_str)
                .unwrap_or("<default-from>");
            let mime = if ctx.tag("mime").is_some() {
                "<MIME>"
            } else {
                "<NO-MIME>"
            };
            format!("{reason}{subject}{from}{mime}")
        }
    };
    ctx.push_positional(ArgValue::String(handle));
    Ok(())
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Instance data of [`VACATION`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacationData {
    pub reason: String,
    pub handle: String,
    pub days: u64,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub addresses: Vec<String>,
    pub mime: bool,
}

fn vacation_duplicate(_: &StagedAction, existing: &StagedAction) -> DuplicateCheck {
    if existing.executed {
        DuplicateCheck::Allow
    } else {
        DuplicateCheck::RejectNew
    }
}

fn vacation_conflict(this: &StagedAction, other: &StagedAction) -> ConflictCheck {
    if !other.def.sends_response {
        ConflictCheck::NoConflict
    } else if this.executed || other.executed {
        ConflictCheck::AllowedExecuted
    } else {
        ConflictCheck::Fatal
    }
}

fn vacation_print(action: &StagedAction) -> String {
    let Some(data) = action.data::<VacationData>() else {
        return "send vacation message".into();
    };
    let mut out = String::from("send vacation message:");
    let _ = write!(out, "\n    => days: {}", data.days);
    if let Some(subject) = &data.subject {
        let _ = write!(out, "\n    => subject: {subject}");
    }
    if let Some(from) = &data.from {
        let _ = write!(out, "\n    => from: {from}");
    }
    let _ = write!(out, "\n    => handle: {}", data.handle);
    let _ = write!(out, "\n\nSTART MESSAGE\n{}\nEND MESSAGE", data.reason);
    out
}

/// Reply-tracking fingerprint for one sender and handle.
#[must_use]
pub fn reply_fingerprint(return_path: &str, handle: &str) -> Fingerprint {
    Fingerprint::of_parts(&[
        VACATION_NAMESPACE,
        return_path.as_bytes(),
        b"\0",
        handle.as_bytes(),
    ])
}

fn is_system_address(address: &str) -> bool {
    let lower = address.to_ascii_lowercase();
    ["mailer-daemon", "listserv", "majordomo", "owner-"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
        || lower.contains("-request@")
}

fn addressed_to(env: &ExecEnv<'_>, recipient: &str, alternatives: &[String]) -> bool {
    RECIPIENT_HEADERS.iter().any(|name| {
        env.message.header(name).iter().any(|value| {
            header_addresses(value).iter().any(|address| {
                address.eq_ignore_ascii_case(recipient)
                    || alternatives.iter().any(|a| address.eq_ignore_ascii_case(a))
            })
        })
    })
}

/// Why the reply must not be sent, if it must not.
fn suppression(
    env: &ExecEnv<'_>,
    data: &VacationData,
    return_path: &str,
    recipient: &str,
) -> Option<String> {
    let message = env.message;
    if let Some(tracker) = env.tracker() {
        if tracker.check(&reply_fingerprint(return_path, &data.handle)) {
            return Some(format!("already replied to <{return_path}>"));
        }
    }
    if let Some(header) = LIST_HEADERS
        .iter()
        .find(|name| !message.header(name).is_empty())
    {
        return Some(format!("message is from a mailing list ({header})"));
    }
    if let Some(value) = message
        .header("auto-submitted")
        .into_iter()
        .find(|v| !v.trim().eq_ignore_ascii_case("no"))
    {
        return Some(format!("message is auto-submitted ({})", value.trim()));
    }
    if let Some(value) = message.header("precedence").into_iter().find(|v| {
        let v = v.trim();
        ["junk", "bulk", "list"]
            .iter()
            .any(|p| v.eq_ignore_ascii_case(p))
    }) {
        return Some(format!("message has precedence {}", value.trim()));
    }
    if is_system_address(return_path) {
        return Some(format!("return path <{return_path}> is a system address"));
    }
    if !addressed_to(env, recipient, &data.addresses) {
        return Some(format!("<{recipient}> is not a direct recipient"));
    }
    None
}

/// Message ids in a header value, without their angle brackets.
fn message_ids(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(|id| id.trim_start_matches('<').trim_end_matches('>').to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

/// The `:from` address when it parses as a single mailbox, else the
/// recipient.
fn reply_from(data: &VacationData, recipient: &str) -> Address<'static> {
    let parsed = data
        .from
        .as_deref()
        .and_then(|from| mailparse::addrparse(from).ok())
        .and_then(|list| match list.first() {
            Some(MailAddr::Single(info)) => Some(info.clone()),
            _ => None,
        });
    match parsed {
        Some(info) => Address::new_address(info.display_name, info.addr),
        None => Address::new_address(None::<String>, recipient.to_string()),
    }
}

/// A `:mime` reason as a MIME part. Text leaves are re-declared as UTF-8
/// and multipart boundaries are regenerated.
fn mime_part(entity: &ParsedMail<'_>) -> Result<MimePart<'static>, MailParseError> {
    let mimetype = entity.ctype.mimetype.clone();
    let is_text = entity.subparts.is_empty() && mimetype.starts_with("text/");
    let mut content_type = ContentType::new(mimetype);
    for (name, value) in &entity.ctype.params {
        if !name.eq_ignore_ascii_case("boundary") && !name.eq_ignore_ascii_case("charset") {
            content_type = content_type.attribute(name.clone(), value.clone());
        }
    }
    let body = if is_text {
        content_type = content_type.attribute("charset", "utf-8");
        BodyPart::Text(Cow::Owned(entity.get_body()?))
    } else if entity.subparts.is_empty() {
        BodyPart::Binary(Cow::Owned(entity.get_body_raw()?))
    } else {
        let parts = entity
            .subparts
            .iter()
            .map(mime_part)
            .collect::<Result<Vec<_>, _>>()?;
        BodyPart::Multipart(parts)
    };
    Ok(MimePart::new(content_type, body))
}

fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

fn build_reply(
    env: &ExecEnv<'_>,
    data: &VacationData,
    return_path: &str,
    recipient: &str,
) -> Result<MessageBuilder<'static>, ActionError> {
    let message = env.message;
    let subject = data.subject.clone().unwrap_or_else(|| {
        message
            .header("subject")
            .into_iter()
            .next()
            .map_or_else(|| "Automated reply".into(), |s| format!("Auto: {}", s.trim()))
    });

    let mut reply = MessageBuilder::new()
        .from(reply_from(data, recipient))
        .to(Address::new_address(None::<String>, return_path.to_string()))
        .subject(subject)
        .date(Date::new(unix_seconds(env.now)));
    if let Some(id) = message
        .message_id()
        .as_deref()
        .map(message_ids)
        .filter(|ids| !ids.is_empty())
    {
        let mut references = message
            .header("references")
            .into_iter()
            .next()
            .map(|refs| message_ids(&refs))
            .unwrap_or_default();
        references.extend(id.iter().cloned());
        reply = reply
            .in_reply_to(MessageId::new_list(id.into_iter()))
            .references(MessageId::new_list(references.into_iter()));
    }
    reply = reply
        .header("Auto-Submitted", Raw::new("auto-replied (vacation)"))
        .header("Precedence", Raw::new("bulk"));

    if !data.mime {
        return Ok(reply.text_body(data.reason.clone()));
    }
    let part = mailparse::parse_mail(data.reason.as_bytes())
        .and_then(|entity| mime_part(&entity))
        .map_err(|e| ActionError::failed(format!("vacation :mime reason is not MIME: {e}")))?;
    Ok(reply.body(part))
}

/// The envelope recipient, or the configured user when the host set one.
fn recipient_of(env: &ExecEnv<'_>) -> Option<String> {
    env.user
        .map(str::to_string)
        .or_else(|| env.message.recipient())
}

/// The return path is the envelope recipient or the configured user.
fn is_reply_to_self(env: &ExecEnv<'_>) -> bool {
    let return_path = env.message.return_path().unwrap_or_default();
    if return_path.is_empty() {
        return false;
    }
    let own = |address: &str| return_path.eq_ignore_ascii_case(address);
    env.message.recipient().is_some_and(|r| own(&r)) || env.user.is_some_and(own)
}

fn vacation_commit(env: &ExecEnv<'_>, action: &StagedAction) -> Result<CommitOutcome, ActionError> {
    let data = action
        .data::<VacationData>()
        .ok_or_else(|| ActionError::failed("vacation action without data"))?;
    let skip = |reason: String| {
        info!(line = action.line, %reason, "vacation reply suppressed");
        Ok(CommitOutcome::Skipped { reason })
    };

    let return_path = env.message.return_path().unwrap_or_default();
    if return_path.is_empty() {
        return skip("empty return path".into());
    }
    let Some(recipient) = recipient_of(env) else {
        return skip("recipient address unknown".into());
    };
    if let Some(reason) = suppression(env, data, &return_path, &recipient) {
        return skip(reason);
    }
    let Some(sender) = env.sender else {
        warn!(line = action.line, "vacation reply not sent: no outbound transport");
        return Ok(CommitOutcome::Skipped {
            reason: "no outbound transport".into(),
        });
    };

    let reply = build_reply(env, data, &return_path, &recipient)?;
    let mut outbound = sender.open(&return_path, None)?;
    reply
        .write_to(&mut outbound)
        .map_err(|e| ActionError::failed(format!("failed to write vacation reply: {e}")))?;
    outbound.close()?;

    if let Some(tracker) = env.tracker() {
        let period = Duration::from_secs(data.days.saturating_mul(SECONDS_PER_DAY));
        tracker.mark(&reply_fingerprint(&return_path, &data.handle), env.now, period);
    }
    info!(to = %return_path, days = data.days, "sent vacation response");
    Ok(CommitOutcome::Committed)
}

/// The auto-reply action. Sends a response, so it conflicts with any other
/// responding action staged in the same evaluation.
pub static VACATION: ActionDef = ActionDef {
    name: "vacation",
    sends_response: true,
    cancels_keep: false,
    check_duplicate: Some(vacation_duplicate),
    check_conflict: Some(vacation_conflict),
    print: vacation_print,
    commit: Some(vacation_commit),
    finish: None,
};

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn exec_vacation(rt: &mut Runtime<'_>, ops: &Operands<'_>) -> Result<Flow, RuntimeError> {
    if is_reply_to_self(rt.env()) {
        info!(
            line = rt.current_line(),
            "vacation reply not staged: return path equals the recipient"
        );
        return Ok(Flow::Continue);
    }
    let bounds = &rt.config().vacation;
    let days = ops
        .optional
        .number(OPT_DAYS)
        .unwrap_or(bounds.default_days)
        .clamp(bounds.min_days.max(1), bounds.max_days.max(bounds.min_days.max(1)));
    let addresses = match ops.optional.string_list(OPT_ADDRESSES) {
        Some(list) => list.to_vec()?,
        None => Vec::new(),
    };
    let data = VacationData {
        reason: ops.string(0)?.to_string(),
        handle: ops.string(1)?.to_string(),
        days,
        subject: ops.optional.string(OPT_SUBJECT).map(str::to_string),
        from: ops.optional.string(OPT_FROM).map(str::to_string),
        addresses,
        mime: ops.optional.contains(OPT_MIME),
    };
    debug!(days, handle = %data.handle, "vacation staged");
    rt.add_action(&VACATION, Box::new(data), Vec::new())?;
    Ok(Flow::Continue)
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

static TAG_DAYS: TagDef = TagDef {
    name: "days",
    param: Some(ValueKind::Number),
    opcode: OPT_DAYS,
    payload: TagPayload::Param,
    validate: Some(validate_days),
};

static TAG_SUBJECT: TagDef = TagDef {
    name: "subject",
    param: Some(ValueKind::String),
    opcode: OPT_SUBJECT,
    payload: TagPayload::Param,
    validate: None,
};

static TAG_FROM: TagDef = TagDef {
    name: "from",
    param: Some(ValueKind::String),
    opcode: OPT_FROM,
    payload: TagPayload::Param,
    validate: Some(validate_from),
};

static TAG_ADDRESSES: TagDef = TagDef {
    name: "addresses",
    param: Some(ValueKind::StringList),
    opcode: OPT_ADDRESSES,
    payload: TagPayload::Param,
    validate: None,
};

static TAG_MIME: TagDef = TagDef {
    name: "mime",
    param: None,
    opcode: OPT_MIME,
    payload: TagPayload::Flag,
    validate: None,
};

// Folded into the handle operand.
static TAG_HANDLE: TagDef = TagDef {
    name: "handle",
    param: Some(ValueKind::String),
    opcode: OPT_HANDLE,
    payload: TagPayload::Param,
    validate: Some(detach_handle),
};

static VACATION_CMD: CommandDef = CommandDef {
    name: "vacation",
    kind: CommandKind::Command,
    positional: &[ArgSpec {
        name: "reason",
        kind: ValueKind::String,
    }],
    tags: &[
        &TAG_DAYS,
        &TAG_SUBJECT,
        &TAG_FROM,
        &TAG_ADDRESSES,
        &TAG_MIME,
        &TAG_HANDLE,
    ],
    tag_sets: &[],
    subtests: Subtests::None,
    block: BlockRule::Forbidden,
    operation: Some(OP_VACATION),
    validate: Some(validate_vacation),
    generate: None,
};

static VACATION_OP: OperationDef = OperationDef {
    mnemonic: "VACATION",
    opcode: OP_VACATION,
    source_line: true,
    positional: &[
        OperandKind::Value(ValueKind::String),
        OperandKind::Value(ValueKind::String),
    ],
    execute: exec_vacation,
};

/// `require "vacation"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VacationExtension;

impl Extension for VacationExtension {
    fn name(&self) -> &'static str {
        "vacation"
    }

    fn register(&self, r: &mut ExtensionRegistrar<'_>) -> Result<(), RegistryError> {
        r.operation(&VACATION_OP)?;
        r.command(&VACATION_CMD)?;
        r.action(&VACATION)
    }

    fn validator_load(&self, config: &EngineConfig) -> Result<(), ExtensionLoadError> {
        let bounds = &config.vacation;
        if bounds.min_days > bounds.max_days {
            return Err(ExtensionLoadError::new(format!(
                "vacation min_days {} exceeds max_days {}",
                bounds.min_days, bounds.max_days
            )));
        }
        Ok(())
    }
}
