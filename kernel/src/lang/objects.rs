//! Core comparators, match types and address parts, with the tags and tag
//! sets that select them.

use std::borrow::Cow;

use crate::lang::{OPT_ADDRESS_PART, OPT_COMPARATOR, OPT_MATCH_TYPE};
use crate::registry::{ObjectBehavior, ObjectClass, ObjectDef, TagDef, TagPayload, TagSetDef, ValueKind};
use crate::runtime::matching::{wildcard_match, AddressPart, Comparator, MatchType, Matcher};

pub const DEFAULT_COMPARATOR: &str = "i;ascii-casemap";
pub const DEFAULT_MATCH_TYPE: &str = "is";
pub const DEFAULT_ADDRESS_PART: &str = "all";

// ---------------------------------------------------------------------------
// Comparators
// ---------------------------------------------------------------------------

struct Octet;

impl Comparator for Octet {
    fn name(&self) -> &'static str {
        "i;octet"
    }

    fn fold<'v>(&self, value: &'v str) -> Cow<'v, str> {
        Cow::Borrowed(value)
    }
}

struct AsciiCasemap;

impl Comparator for AsciiCasemap {
    fn name(&self) -> &'static str {
        DEFAULT_COMPARATOR
    }

    fn fold<'v>(&self, value: &'v str) -> Cow<'v, str> {
        if value.bytes().any(|b| b.is_ascii_uppercase()) {
            Cow::Owned(value.to_ascii_lowercase())
        } else {
            Cow::Borrowed(value)
        }
    }
}

static OCTET: Octet = Octet;
static ASCII_CASEMAP: AsciiCasemap = AsciiCasemap;

pub static COMPARATOR_OCTET: ObjectDef = ObjectDef {
    name: "i;octet",
    code: 0,
    param: None,
    behavior: ObjectBehavior::Comparator(&OCTET),
};

pub static COMPARATOR_ASCII_CASEMAP: ObjectDef = ObjectDef {
    name: DEFAULT_COMPARATOR,
    code: 1,
    param: None,
    behavior: ObjectBehavior::Comparator(&ASCII_CASEMAP),
};

// ---------------------------------------------------------------------------
// Match types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum KeyMode {
    Is,
    Contains,
    Matches,
}

/// Matches each value against every key after folding both. Done after
/// the first hit.
struct KeyMatcher {
    comparator: &'static dyn Comparator,
    keys: Vec<String>,
    mode: KeyMode,
    hit: bool,
}

impl Matcher for KeyMatcher {
    fn feed(&mut self, value: &str) -> bool {
        let value = self.comparator.fold(value);
        let mode = self.mode;
        let found = self.keys.iter().any(|key| match mode {
            KeyMode::Is => *key == value,
            KeyMode::Contains => value.contains(key.as_str()),
            KeyMode::Matches => wildcard_match(key, &value),
        });
        self.hit |= found;
        found
    }

    fn is_done(&self) -> bool {
        self.hit
    }
}

struct KeyMatchType {
    name: &'static str,
    mode: KeyMode,
}

impl MatchType for KeyMatchType {
    fn name(&self) -> &'static str {
        self.name
    }

    fn begin(
        &self,
        comparator: &'static dyn Comparator,
        keys: Vec<String>,
        _param: Option<&str>,
    ) -> Result<Box<dyn Matcher>, String> {
        let keys = keys
            .iter()
            .map(|k| comparator.fold(k).into_owned())
            .collect();
        Ok(Box::new(KeyMatcher {
            comparator,
            keys,
            mode: self.mode,
            hit: false,
        }))
    }
}

static IS: KeyMatchType = KeyMatchType {
    name: "is",
    mode: KeyMode::Is,
};
static CONTAINS: KeyMatchType = KeyMatchType {
    name: "contains",
    mode: KeyMode::Contains,
};
static MATCHES: KeyMatchType = KeyMatchType {
    name: "matches",
    mode: KeyMode::Matches,
};

pub static MATCH_IS: ObjectDef = ObjectDef {
    name: "is",
    code: 0,
    param: None,
    behavior: ObjectBehavior::MatchType(&IS),
};

pub static MATCH_CONTAINS: ObjectDef = ObjectDef {
    name: "contains",
    code: 1,
    param: None,
    behavior: ObjectBehavior::MatchType(&CONTAINS),
};

pub static MATCH_MATCHES: ObjectDef = ObjectDef {
    name: "matches",
    code: 2,
    param: None,
    behavior: ObjectBehavior::MatchType(&MATCHES),
};

// ---------------------------------------------------------------------------
// Address parts
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Part {
    All,
    LocalPart,
    Domain,
}

struct AddressPartImpl {
    name: &'static str,
    part: Part,
}

impl AddressPart for AddressPartImpl {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extract<'v>(&self, address: &'v str) -> Option<Cow<'v, str>> {
        let split = address.rfind('@');
        match (self.part, split) {
            (Part::All, _) => Some(Cow::Borrowed(address)),
            (Part::LocalPart, Some(at)) => Some(Cow::Borrowed(&address[..at])),
            (Part::LocalPart, None) => Some(Cow::Borrowed(address)),
            (Part::Domain, Some(at)) => Some(Cow::Borrowed(&address[at + 1..])),
            (Part::Domain, None) => None,
        }
    }
}

static ALL: AddressPartImpl = AddressPartImpl {
    name: "all",
    part: Part::All,
};
static LOCALPART: AddressPartImpl = AddressPartImpl {
    name: "localpart",
    part: Part::LocalPart,
};
static DOMAIN: AddressPartImpl = AddressPartImpl {
    name: "domain",
    part: Part::Domain,
};

pub static PART_ALL: ObjectDef = ObjectDef {
    name: "all",
    code: 0,
    param: None,
    behavior: ObjectBehavior::AddressPart(&ALL),
};

pub static PART_LOCALPART: ObjectDef = ObjectDef {
    name: "localpart",
    code: 1,
    param: None,
    behavior: ObjectBehavior::AddressPart(&LOCALPART),
};

pub static PART_DOMAIN: ObjectDef = ObjectDef {
    name: "domain",
    code: 2,
    param: None,
    behavior: ObjectBehavior::AddressPart(&DOMAIN),
};

pub(crate) static OBJECTS: [&ObjectDef; 8] = [
    &COMPARATOR_OCTET,
    &COMPARATOR_ASCII_CASEMAP,
    &MATCH_IS,
    &MATCH_CONTAINS,
    &MATCH_MATCHES,
    &PART_ALL,
    &PART_LOCALPART,
    &PART_DOMAIN,
];

// ---------------------------------------------------------------------------
// Tags and tag sets
// ---------------------------------------------------------------------------

static TAG_COMPARATOR: TagDef = TagDef {
    name: "comparator",
    param: Some(ValueKind::String),
    opcode: OPT_COMPARATOR,
    payload: TagPayload::ObjectByParam {
        class: ObjectClass::Comparator,
    },
    validate: None,
};

const fn match_tag(name: &'static str) -> TagDef {
    TagDef {
        name,
        param: None,
        opcode: OPT_MATCH_TYPE,
        payload: TagPayload::Object {
            class: ObjectClass::MatchType,
            name,
        },
        validate: None,
    }
}

const fn part_tag(name: &'static str) -> TagDef {
    TagDef {
        name,
        param: None,
        opcode: OPT_ADDRESS_PART,
        payload: TagPayload::Object {
            class: ObjectClass::AddressPart,
            name,
        },
        validate: None,
    }
}

static TAG_IS: TagDef = match_tag("is");
static TAG_CONTAINS: TagDef = match_tag("contains");
static TAG_MATCHES: TagDef = match_tag("matches");
static TAG_ALL: TagDef = part_tag("all");
static TAG_LOCALPART: TagDef = part_tag("localpart");
static TAG_DOMAIN: TagDef = part_tag("domain");

pub static COMPARATOR_TAGS: TagSetDef = TagSetDef {
    name: "comparator",
    tags: &[&TAG_COMPARATOR],
};

/// Extensions add match types here (relational's `:count`).
pub static MATCH_TYPE_TAGS: TagSetDef = TagSetDef {
    name: "match-type",
    tags: &[&TAG_IS, &TAG_CONTAINS, &TAG_MATCHES],
};

pub static ADDRESS_PART_TAGS: TagSetDef = TagSetDef {
    name: "address-part",
    tags: &[&TAG_ALL, &TAG_LOCALPART, &TAG_DOMAIN],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::matching::MatchContext;

    fn run(mt: &'static dyn MatchType, cmp: &'static dyn Comparator, keys: &[&str], values: &[&str]) -> bool {
        let keys = keys.iter().map(ToString::to_string).collect();
        let mut ctx = MatchContext::begin(mt, cmp, keys, None).unwrap();
        for v in values {
            ctx.feed(v);
        }
        ctx.end()
    }

    #[test]
    fn casemap_folds_keys_and_values() {
        assert!(run(&IS, &ASCII_CASEMAP, &["HELLO"], &["hello"]));
        assert!(!run(&IS, &OCTET, &["HELLO"], &["hello"]));
    }

    #[test]
    fn contains_and_matches() {
        assert!(run(&CONTAINS, &ASCII_CASEMAP, &["money"], &["Make MONEY fast"]));
        assert!(run(&MATCHES, &ASCII_CASEMAP, &["*@EXAMPLE.org"], &["a@example.org"]));
        assert!(!run(&MATCHES, &OCTET, &["a?c"], &["abbc"]));
    }

    #[test]
    fn key_match_types_stop_after_the_first_hit() {
        for mt in [&IS, &CONTAINS, &MATCHES] {
            let mut ctx =
                MatchContext::begin(mt, &ASCII_CASEMAP, vec!["hit".to_string()], None).unwrap();
            ctx.feed("miss");
            assert!(!ctx.is_done(), "{}", mt.name());
            ctx.feed("hit");
            assert!(ctx.is_done(), "{}", mt.name());
            assert!(ctx.end());
        }
    }

    #[test]
    fn address_parts_split_on_last_at() {
        assert_eq!(LOCALPART.extract("a@b@c.org").as_deref(), Some("a@b"));
        assert_eq!(DOMAIN.extract("user@example.org").as_deref(), Some("example.org"));
        assert_eq!(DOMAIN.extract("postmaster"), None);
        assert_eq!(ALL.extract("x@y").as_deref(), Some("x@y"));
    }
}
