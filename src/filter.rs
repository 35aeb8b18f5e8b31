//! The attribute predicate language and its in-memory evaluator.
//!
//! A filter is plain data: key/subkey matchers, an optional value equality,
//! a number predicate, the hidden-key rule and a sort flag. The same data is
//! translated to SQL by the persistor (see `persist`), and the two
//! evaluations must agree for every input; `tests/filter_equivalence.rs`
//! property-checks that they do.
//!
//! Patterns use SQLite GLOB syntax (`*` and `?`), which is case sensitive on
//! both sides of the agreement, unlike LIKE.

use std::sync::Arc;

use regex::Regex;

use crate::construct::{Attribute, Reference};
use crate::datatype::Value;

/// Key or subkey matcher: exact equality or a glob-style pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Match {
    Exact(String),
    Like(String),
}
impl Match {
    /// An explicit filter on a hidden key re-enables hidden attributes.
    pub fn names_hidden(&self) -> bool {
        match self {
            Match::Exact(s) | Match::Like(s) => s.starts_with('_'),
        }
    }
    fn compile(&self) -> CompiledMatch<'_> {
        match self {
            Match::Exact(s) => CompiledMatch::Exact(s),
            Match::Like(pattern) => {
                let mut source = String::from("^");
                for c in pattern.chars() {
                    match c {
                        '*' => source.push_str(".*"),
                        '?' => source.push('.'),
                        other => source.push_str(&regex::escape(&other.to_string())),
                    }
                }
                source.push('$');
                // escaped character classes only, so compilation cannot fail
                CompiledMatch::Pattern(Regex::new(&source).unwrap())
            }
        }
    }
}

enum CompiledMatch<'m> {
    Exact(&'m str),
    Pattern(Regex),
}
impl CompiledMatch<'_> {
    fn test(&self, candidate: &str) -> bool {
        match self {
            CompiledMatch::Exact(s) => *s == candidate,
            CompiledMatch::Pattern(re) => re.is_match(candidate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum NumberMatch {
    #[default]
    Any,
    Numbered,
    Unnumbered,
    Exactly(i64),
}

/// Conjunction of attribute predicates, built in place:
///
/// ```
/// use stowage::filter::{AttrFilter, NumberMatch};
/// let filter = AttrFilter::new().key("disk").number(NumberMatch::Numbered);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AttrFilter {
    key: Option<Match>,
    subkey: Option<Match>,
    value: Option<Value>,
    number: NumberMatch,
    ignore_hidden: bool,
    sort_by_keys: bool,
}

impl Default for AttrFilter {
    fn default() -> Self {
        Self {
            key: None,
            subkey: None,
            value: None,
            number: NumberMatch::Any,
            ignore_hidden: true,
            sort_by_keys: true,
        }
    }
}

impl AttrFilter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(Match::Exact(key.into()));
        self
    }
    pub fn key_like(mut self, pattern: impl Into<String>) -> Self {
        self.key = Some(Match::Like(pattern.into()));
        self
    }
    pub fn subkey(mut self, subkey: impl Into<String>) -> Self {
        self.subkey = Some(Match::Exact(subkey.into()));
        self
    }
    pub fn subkey_like(mut self, pattern: impl Into<String>) -> Self {
        self.subkey = Some(Match::Like(pattern.into()));
        self
    }
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }
    pub fn number(mut self, number: NumberMatch) -> Self {
        self.number = number;
        self
    }
    pub fn show_hidden(mut self) -> Self {
        self.ignore_hidden = false;
        self
    }
    pub fn unsorted(mut self) -> Self {
        self.sort_by_keys = false;
        self
    }

    // accessors for the pushdown translator
    pub fn key_match(&self) -> Option<&Match> {
        self.key.as_ref()
    }
    pub fn subkey_match(&self) -> Option<&Match> {
        self.subkey.as_ref()
    }
    pub fn value_match(&self) -> Option<&Value> {
        self.value.as_ref()
    }
    pub fn number_match(&self) -> &NumberMatch {
        &self.number
    }
    pub fn sorts_by_keys(&self) -> bool {
        self.sort_by_keys
    }
    /// The hidden-key rule after the explicit-lookup exception: a key filter
    /// that itself names a hidden key turns hidden exclusion off.
    pub fn effective_ignore_hidden(&self) -> bool {
        self.ignore_hidden && !self.key.as_ref().map_or(false, Match::names_hidden)
    }

    fn compile(&self) -> CompiledFilter<'_> {
        CompiledFilter {
            filter: self,
            key: self.key.as_ref().map(Match::compile),
            subkey: self.subkey.as_ref().map(Match::compile),
        }
    }

    /// Test one attribute. For whole collections prefer [`AttrFilter::apply`],
    /// which compiles patterns once.
    pub fn matches(&self, attr: &Attribute) -> bool {
        self.compile().matches(attr)
    }

    /// In-memory evaluation over a materialized attribute collection:
    /// conjunctive filtering, then a stable sort by key (insertion order
    /// breaks ties) unless unsorted.
    pub fn apply(&self, attrs: &[Arc<Attribute>]) -> Vec<Arc<Attribute>> {
        let compiled = self.compile();
        let mut result: Vec<Arc<Attribute>> = attrs
            .iter()
            .filter(|attr| compiled.matches(attr))
            .cloned()
            .collect();
        if self.sort_by_keys {
            result.sort_by(|a, b| a.key().cmp(b.key()));
        }
        result
    }

    /// Short-circuiting emptiness check; never materializes or sorts.
    pub fn matches_any(&self, attrs: &[Arc<Attribute>]) -> bool {
        let compiled = self.compile();
        attrs.iter().any(|attr| compiled.matches(attr))
    }

    /// Same evaluation over inbound references (filters on the attribute
    /// part, keeps the owner attached).
    pub fn apply_references(&self, references: Vec<Reference>) -> Vec<Reference> {
        let compiled = self.compile();
        let mut result: Vec<Reference> = references
            .into_iter()
            .filter(|r| compiled.matches(r.attr()))
            .collect();
        if self.sort_by_keys {
            result.sort_by(|a, b| a.attr().key().cmp(b.attr().key()));
        }
        result
    }
}

struct CompiledFilter<'f> {
    filter: &'f AttrFilter,
    key: Option<CompiledMatch<'f>>,
    subkey: Option<CompiledMatch<'f>>,
}
impl CompiledFilter<'_> {
    fn matches(&self, attr: &Attribute) -> bool {
        if let Some(key) = &self.key {
            if !key.test(attr.key()) {
                return false;
            }
        }
        if let Some(subkey) = &self.subkey {
            // an attribute without a subkey never matches a subkey filter
            match attr.subkey() {
                Some(candidate) => {
                    if !subkey.test(candidate) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if let Some(value) = &self.filter.value {
            if attr.value() != value {
                return false;
            }
        }
        match self.filter.number {
            NumberMatch::Any => {}
            NumberMatch::Numbered => {
                if attr.number().is_none() {
                    return false;
                }
            }
            NumberMatch::Unnumbered => {
                if attr.number().is_some() {
                    return false;
                }
            }
            NumberMatch::Exactly(n) => {
                if attr.number() != Some(n) {
                    return false;
                }
            }
        }
        if self.filter.effective_ignore_hidden() && attr.is_hidden() {
            return false;
        }
        true
    }
}
