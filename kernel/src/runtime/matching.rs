//! Match protocol shared by every match-style test.
//!
//! A test resolves its comparator and match type from object operands,
//! calls [`MatchContext::begin`] with the key list, feeds each candidate
//! value, and finally calls [`MatchContext::end`]. The result is
//! `end() || any feed matched`. Feeding stops once the matcher reports
//! itself done; match types that need every value (counting) never do.

use std::borrow::Cow;
use std::cmp::Ordering;

use mailparse::MailAddr;
use tracing::debug;

/// Value normalization before matching.
pub trait Comparator: Send + Sync {
    fn name(&self) -> &'static str;

    fn fold<'v>(&self, value: &'v str) -> Cow<'v, str>;

    /// Ordering used by relational matches.
    fn compare(&self, a: &str, b: &str) -> Ordering {
        self.fold(a).cmp(&self.fold(b))
    }
}

/// A match type constructs one matcher per test evaluation.
pub trait MatchType: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    ///
    /// A message if `param` is not acceptable to this match type.
    fn begin(
        &self,
        comparator: &'static dyn Comparator,
        keys: Vec<String>,
        param: Option<&str>,
    ) -> Result<Box<dyn Matcher>, String>;
}

/// Stateful matcher for one test evaluation.
pub trait Matcher {
    /// Offer one candidate. True if it matched outright.
    fn feed(&mut self, value: &str) -> bool;

    /// True once further values cannot change the outcome.
    fn is_done(&self) -> bool {
        false
    }

    /// Final verdict after all values were fed.
    fn end(&mut self) -> bool {
        false
    }
}

/// Selects part of an address.
pub trait AddressPart: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` if the address has no such part.
    fn extract<'v>(&self, address: &'v str) -> Option<Cow<'v, str>>;
}

/// One running begin/feed/end sequence.
pub struct MatchContext {
    matcher: Box<dyn Matcher>,
    matched: bool,
}

impl MatchContext {
    /// # Errors
    ///
    /// Propagates the match type's parameter error.
    pub fn begin(
        match_type: &'static dyn MatchType,
        comparator: &'static dyn Comparator,
        keys: Vec<String>,
        param: Option<&str>,
    ) -> Result<Self, String> {
        Ok(Self {
            matcher: match_type.begin(comparator, keys, param)?,
            matched: false,
        })
    }

    /// Feed one value unless the matcher is already done.
    pub fn feed(&mut self, value: &str) {
        if self.matcher.is_done() {
            return;
        }
        if self.matcher.feed(value) {
            self.matched = true;
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.matcher.is_done()
    }

    #[must_use]
    pub fn end(mut self) -> bool {
        self.matcher.end() || self.matched
    }
}

impl std::fmt::Debug for MatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchContext")
            .field("matched", &self.matched)
            .finish_non_exhaustive()
    }
}

/// Wildcard match: `*` any run, `?` one character, `\` escapes the next.
#[must_use]
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let val: Vec<char> = value.chars().collect();
    let (mut p, mut v) = (0usize, 0usize);
    // Last `*` seen and the value position it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;

    while v < val.len() {
        match pat.get(p) {
            Some('*') => {
                star = Some((p, v));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                v += 1;
                continue;
            }
            Some('\\') if p + 1 < pat.len() => {
                if pat[p + 1] == val[v] {
                    p += 2;
                    v += 1;
                    continue;
                }
            }
            Some(c) if *c == val[v] => {
                p += 1;
                v += 1;
                continue;
            }
            _ => {}
        }
        match star {
            Some((sp, sv)) => {
                p = sp + 1;
                v = sv + 1;
                star = Some((sp, sv + 1));
            }
            None => return false,
        }
    }
    while pat.get(p) == Some(&'*') {
        p += 1;
    }
    p == pat.len()
}

/// Addresses in a structured header value, e.g. `"A" <a@x>, team: b@y;`.
///
/// Group members are flattened in order. A value that does not parse as an
/// address list yields no addresses.
#[must_use]
pub fn header_addresses(value: &str) -> Vec<String> {
    let list = match mailparse::addrparse(value) {
        Ok(list) => list,
        Err(err) => {
            debug!(error = %err, "unparsable address list");
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => out.push(info.addr.trim().to_string()),
            MailAddr::Group(group) => {
                out.extend(group.addrs.iter().map(|m| m.addr.trim().to_string()));
            }
        }
    }
    out.retain(|a| !a.is_empty());
    out
}
