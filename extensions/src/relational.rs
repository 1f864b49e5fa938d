//! `relational`: `:value "<rel>"` and `:count "<rel>"` match types, plus
//! the `i;ascii-numeric` comparator they are usually paired with.
//!
//! Both match types join the shared `match-type` tag set, so every test
//! that links that set (`header`, `address`, `hasflag`, ...) accepts them.
//! `:count` only knows its verdict after the last value, so it decides in
//! [`Matcher::end`].

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use sieve_kernel::compiler::{ArgValue, TagContext};
use sieve_kernel::error::RegistryError;
use sieve_kernel::lang::OPT_MATCH_TYPE;
use sieve_kernel::registry::{
    Extension, ExtensionRegistrar, ObjectBehavior, ObjectClass, ObjectDef, TagDef, TagPayload,
    ValueKind,
};
use sieve_kernel::runtime::{Comparator, MatchType, Matcher};

/// A relational operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Relation {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Eq => "eq",
            Self::Ne => "ne",
        }
    }

    /// Whether `ordering` (value compared to key) satisfies the relation.
    #[must_use]
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn relation_param(param: Option<&str>) -> Result<Relation, String> {
    let raw = param.ok_or("relational match without a relation")?;
    Relation::parse(raw).ok_or_else(|| format!("invalid relation '{raw}'"))
}

// ---------------------------------------------------------------------------
// Match types
// ---------------------------------------------------------------------------

struct ValueMatcher {
    comparator: &'static dyn Comparator,
    relation: Relation,
    keys: Vec<String>,
}

impl Matcher for ValueMatcher {
    fn feed(&mut self, value: &str) -> bool {
        self.keys
            .iter()
            .any(|key| self.relation.holds(self.comparator.compare(value, key)))
    }
}

struct CountMatcher {
    comparator: &'static dyn Comparator,
    relation: Relation,
    keys: Vec<String>,
    count: usize,
}

impl Matcher for CountMatcher {
    fn feed(&mut self, _: &str) -> bool {
        self.count += 1;
        false
    }

    fn end(&mut self) -> bool {
        let count = self.count.to_string();
        self.keys
            .iter()
            .any(|key| self.relation.holds(self.comparator.compare(&count, key)))
    }
}

struct RelationalMatch {
    name: &'static str,
    count: bool,
}

impl MatchType for RelationalMatch {
    fn name(&self) -> &'static str {
        self.name
    }

    fn begin(
        &self,
        comparator: &'static dyn Comparator,
        keys: Vec<String>,
        param: Option<&str>,
    ) -> Result<Box<dyn Matcher>, String> {
        let relation = relation_param(param)?;
        Ok(if self.count {
            Box::new(CountMatcher {
                comparator,
                relation,
                keys,
                count: 0,
            })
        } else {
            Box::new(ValueMatcher {
                comparator,
                relation,
                keys,
            })
        })
    }
}

static VALUE: RelationalMatch = RelationalMatch {
    name: "value",
    count: false,
};
static COUNT: RelationalMatch = RelationalMatch {
    name: "count",
    count: true,
};

static VALUE_OBJECT: ObjectDef = ObjectDef {
    name: "value",
    code: 0,
    param: Some(ValueKind::String),
    behavior: ObjectBehavior::MatchType(&VALUE),
};

static COUNT_OBJECT: ObjectDef = ObjectDef {
    name: "count",
    code: 1,
    param: Some(ValueKind::String),
    behavior: ObjectBehavior::MatchType(&COUNT),
};

fn validate_relation(ctx: &mut TagContext<'_>) -> Result<(), String> {
    let raw = ctx.value().and_then(ArgValue::as_str).unwrap_or_default();
    let relation = Relation::parse(raw).ok_or_else(|| {
        format!("invalid relation '{raw}' (expected gt, ge, lt, le, eq or ne)")
    })?;
    ctx.set_value(ArgValue::String(relation.as_str().into()));
    Ok(())
}

static TAG_VALUE: TagDef = TagDef {
    name: "value",
    param: Some(ValueKind::String),
    opcode: OPT_MATCH_TYPE,
    payload: TagPayload::Object {
        class: ObjectClass::MatchType,
        name: "value",
    },
    validate: Some(validate_relation),
};

static TAG_COUNT: TagDef = TagDef {
    name: "count",
    param: Some(ValueKind::String),
    opcode: OPT_MATCH_TYPE,
    payload: TagPayload::Object {
        class: ObjectClass::MatchType,
        name: "count",
    },
    validate: Some(validate_relation),
};

/// `require "relational"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationalExtension;

impl Extension for RelationalExtension {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn register(&self, r: &mut ExtensionRegistrar<'_>) -> Result<(), RegistryError> {
        r.object(&VALUE_OBJECT)?;
        r.object(&COUNT_OBJECT)?;
        r.extend_tag_set("match-type", &TAG_VALUE);
        r.extend_tag_set("match-type", &TAG_COUNT);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// i;ascii-numeric
// ---------------------------------------------------------------------------

/// Leading digits without leading zeros. `None` for a value that does not
/// start with a digit, which sorts above every number.
fn numeric_prefix(value: &str) -> Option<&str> {
    let end = value
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(value.len());
    if end == 0 {
        return None;
    }
    let digits = value[..end].trim_start_matches('0');
    Some(if digits.is_empty() { "0" } else { digits })
}

struct AsciiNumeric;

impl Comparator for AsciiNumeric {
    fn name(&self) -> &'static str {
        "i;ascii-numeric"
    }

    fn fold<'v>(&self, value: &'v str) -> Cow<'v, str> {
        Cow::Borrowed(numeric_prefix(value).unwrap_or(""))
    }

    fn compare(&self, a: &str, b: &str) -> Ordering {
        match (numeric_prefix(a), numeric_prefix(b)) {
            (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

static ASCII_NUMERIC: AsciiNumeric = AsciiNumeric;

static ASCII_NUMERIC_OBJECT: ObjectDef = ObjectDef {
    name: "i;ascii-numeric",
    code: 0,
    param: None,
    behavior: ObjectBehavior::Comparator(&ASCII_NUMERIC),
};

/// `require "comparator-i;ascii-numeric"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiNumericExtension;

impl Extension for AsciiNumericExtension {
    fn name(&self) -> &'static str {
        "comparator-i;ascii-numeric"
    }

    fn register(&self, r: &mut ExtensionRegistrar<'_>) -> Result<(), RegistryError> {
        r.object(&ASCII_NUMERIC_OBJECT)
    }
}
