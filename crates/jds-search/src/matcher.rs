//! Depth-first leaf matcher.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use jds_types::Document;

use crate::error::SearchError;
use crate::query::{Query, Token, TokenKind};

/// Options controlling a search.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Compare without case folding. Regex tokens with explicit flags ignore
    /// this and use their own.
    pub case_sensitive: bool,
    /// Also test mapping keys; key hits get a `#key` origin suffix.
    pub include_keys: bool,
    /// Stop once this many exact plus partial matches were collected.
    pub limit: Option<usize>,
}

/// A single hit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Path of the matching leaf, e.g. `items[0].title`.
    pub origin: String,
    /// The leaf value, or the key (as a string) for key hits.
    pub matched: Value,
}

/// Search results split by match quality.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matches {
    pub partial: Vec<Match>,
    pub exact: Vec<Match>,
}

impl Matches {
    pub fn len(&self) -> usize {
        self.partial.len() + self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_empty() && self.exact.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Hit {
    Partial,
    Exact,
}

enum Compiled {
    Literal { needle: String, exact_only: bool },
    Pattern { any: Regex, full: Regex },
}

impl Compiled {
    fn compile(token: &Token, case_sensitive: bool) -> Result<Self, SearchError> {
        match token.kind {
            TokenKind::Word | TokenKind::Phrase | TokenKind::Exact => Ok(Self::Literal {
                needle: fold(&token.text, case_sensitive),
                exact_only: token.kind == TokenKind::Exact,
            }),
            TokenKind::Regex => {
                let flags = token.flags.as_deref();
                let any = build_regex(&token.text, flags, case_sensitive)?;
                // `\A`/`\z` stay whole-string under `m`; the newline ends a
                // trailing `#` comment under `x`.
                let close = if flags.is_some_and(|f| f.contains('x')) {
                    "\n)"
                } else {
                    ")"
                };
                let full = build_regex(
                    &format!("\\A(?:{}{close}\\z", token.text),
                    flags,
                    case_sensitive,
                )?;
                Ok(Self::Pattern { any, full })
            }
        }
    }

    /// `raw` is the untouched candidate, `folded` its case-folded form.
    fn test(&self, raw: &str, folded: &str) -> Option<Hit> {
        match self {
            Self::Literal { needle, exact_only } => {
                if folded == needle {
                    Some(Hit::Exact)
                } else if !exact_only && folded.contains(needle.as_str()) {
                    Some(Hit::Partial)
                } else {
                    None
                }
            }
            Self::Pattern { any, full } => {
                if full.is_match(raw) {
                    Some(Hit::Exact)
                } else if any.is_match(raw) {
                    Some(Hit::Partial)
                } else {
                    None
                }
            }
        }
    }
}

fn build_regex(pattern: &str, flags: Option<&str>, case_sensitive: bool) -> Result<Regex, SearchError> {
    let mut builder = RegexBuilder::new(pattern);
    match flags {
        Some(flags) => {
            for flag in flags.chars() {
                match flag {
                    'i' => builder.case_insensitive(true),
                    'm' => builder.multi_line(true),
                    's' => builder.dot_matches_new_line(true),
                    'x' => builder.ignore_whitespace(true),
                    other => {
                        return Err(SearchError::InvalidFlag {
                            pattern: pattern.to_string(),
                            flag: other,
                        })
                    }
                };
            }
        }
        None => {
            builder.case_insensitive(!case_sensitive);
        }
    }
    builder.build().map_err(|e| SearchError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn fold(text: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        text.to_string()
    } else {
        text.to_lowercase()
    }
}

struct Walker<'a> {
    tokens: &'a [Compiled],
    options: &'a SearchOptions,
    seen: HashSet<String>,
    out: Matches,
}

impl Walker<'_> {
    fn full(&self) -> bool {
        self.options.limit.is_some_and(|cap| self.out.len() >= cap)
    }

    /// Walk `node`; returns `false` once the result cap is reached.
    fn walk(&mut self, node: &Value, origin: &str) -> bool {
        if self.full() {
            return false;
        }
        match node {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    let child_origin = if origin.is_empty() {
                        key.clone()
                    } else {
                        format!("{origin}.{key}")
                    };
                    if self.options.include_keys {
                        self.record(&format!("{child_origin}#key"), key, Value::String(key.clone()));
                        if self.full() {
                            return false;
                        }
                    }
                    if !self.walk(child, &child_origin) {
                        return false;
                    }
                }
                true
            }
            Value::Array(items) if !items.is_empty() => {
                for (i, child) in items.iter().enumerate() {
                    if !self.walk(child, &format!("{origin}[{i}]")) {
                        return false;
                    }
                }
                true
            }
            leaf => {
                let candidate = match leaf {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                self.record(origin, &candidate, leaf.clone());
                !self.full()
            }
        }
    }

    fn record(&mut self, origin: &str, candidate: &str, matched: Value) {
        if self.seen.contains(origin) {
            return;
        }
        let folded = fold(candidate, self.options.case_sensitive);
        let best = self
            .tokens
            .iter()
            .filter_map(|t| t.test(candidate, &folded))
            .max();
        let Some(hit) = best else { return };

        self.seen.insert(origin.to_string());
        let entry = Match {
            origin: origin.to_string(),
            matched,
        };
        match hit {
            Hit::Exact => self.out.exact.push(entry),
            Hit::Partial => self.out.partial.push(entry),
        }
    }
}

/// Search every leaf of `doc` for `query`.
pub fn find_matches(
    doc: &Document,
    query: &Query,
    options: &SearchOptions,
) -> Result<Matches, SearchError> {
    let tokens = query
        .tokens()
        .iter()
        .map(|t| Compiled::compile(t, options.case_sensitive))
        .collect::<Result<Vec<_>, _>>()?;
    if tokens.is_empty() {
        return Ok(Matches::default());
    }

    let mut walker = Walker {
        tokens: &tokens,
        options,
        seen: HashSet::new(),
        out: Matches::default(),
    };
    walker.walk(doc, "");

    debug!(
        exact = walker.out.exact.len(),
        partial = walker.out.partial.len(),
        "search finished"
    );
    Ok(walker.out)
}
