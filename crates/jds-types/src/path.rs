//! Dotted/bracketed path addressing into a [`Document`].
//!
//! A path string is split into segments on `.` and `[index]` brackets:
//!
//! ```
//! use jds_types::{DocPath, Segment};
//!
//! let path: DocPath = "items[0].title".parse().unwrap();
//! assert_eq!(
//!     path.segments(),
//!     &[Segment::Key("items".into()), Segment::Index(0), Segment::Key("title".into())]
//! );
//! ```
//!
//! A dotted segment made only of digits (`a.2`) is also an index. Applied to
//! a mapping, an index segment addresses the key with the same decimal text,
//! so `{"2": x}` is reachable as `a.2` too. The empty string is the root.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::document::{deep_merge, Document};
use crate::error::PathError;

/// How far past the end of a sequence `set` and `merge` may write. Skipped
/// positions are padded with `null`.
pub const MAX_INDEX_GAP: usize = 1024;

/// One step of a [`DocPath`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A mapping key.
    Key(String),
    /// A sequence position (or the mapping key with the same decimal text).
    Index(usize),
}

impl Segment {
    /// The mapping key this segment addresses.
    fn key(&self) -> String {
        match self {
            Self::Key(k) => k.clone(),
            Self::Index(i) => i.to_string(),
        }
    }

    /// Classify a dotted segment: canonical decimal integers become indices.
    fn from_dotted(raw: &str) -> Self {
        let canonical = raw == "0" || (!raw.starts_with('0') && !raw.is_empty());
        if canonical && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(i) = raw.parse() {
                return Self::Index(i);
            }
        }
        Self::Key(raw.to_string())
    }
}

/// A parsed path into a document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DocPath {
    segments: Vec<Segment>,
}

impl DocPath {
    /// The root path (`""`).
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path string.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let mut segments = Vec::new();
        let mut current = String::new();
        // Whether the previous token closed a bracket, which makes a
        // following '.' legal without a pending key.
        let mut after_bracket = false;
        let mut chars = path.char_indices().peekable();

        while let Some((offset, ch)) = chars.next() {
            match ch {
                '.' => {
                    if current.is_empty() {
                        if !after_bracket {
                            return Err(PathError::EmptySegment(offset));
                        }
                    } else {
                        segments.push(Segment::from_dotted(&current));
                        current.clear();
                    }
                    after_bracket = false;
                    if chars.peek().is_none() {
                        return Err(PathError::EmptySegment(offset + 1));
                    }
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(Segment::from_dotted(&current));
                        current.clear();
                    }
                    let mut inner = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(PathError::UnclosedBracket(offset));
                    }
                    let index = inner
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| PathError::InvalidIndex(inner.clone()))?;
                    segments.push(Segment::Index(index));
                    after_bracket = true;
                }
                c => {
                    current.push(c);
                    after_bracket = false;
                }
            }
        }

        if !current.is_empty() {
            segments.push(Segment::from_dotted(&current));
        }

        Ok(Self { segments })
    }

    /// The parsed segments, outermost first.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns `true` for the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Resolve the path, returning `None` when any segment is absent.
    pub fn get<'a>(&self, doc: &'a Document) -> Option<&'a Document> {
        self.segments.iter().try_fold(doc, |node, seg| match (node, seg) {
            (Value::Object(map), seg) => map.get(&seg.key()),
            (Value::Array(items), Segment::Index(i)) => items.get(*i),
            _ => None,
        })
    }

    fn get_mut<'a>(segments: &[Segment], doc: &'a mut Document) -> Option<&'a mut Document> {
        segments.iter().try_fold(doc, |node, seg| match (node, seg) {
            (Value::Object(map), seg) => map.get_mut(&seg.key()),
            (Value::Array(items), Segment::Index(i)) => items.get_mut(*i),
            _ => None,
        })
    }

    /// Store `value` at the path, creating intermediate containers.
    ///
    /// A missing or non-container intermediate becomes a sequence when the
    /// segment addressing into it is an index, a mapping otherwise. Setting
    /// the root replaces the top-level keys of a mapping root in place.
    ///
    /// Fails with [`PathError::IndexOutOfRange`], leaving `doc` untouched,
    /// when an index lies more than [`MAX_INDEX_GAP`] past the end of its
    /// sequence.
    pub fn set(&self, doc: &mut Document, value: Document) -> Result<(), PathError> {
        self.check_reach(doc)?;
        if self.segments.is_empty() {
            set_root(doc, value);
            return Ok(());
        }
        let mut node = doc;
        for seg in &self.segments {
            node = slot(node, seg);
        }
        *node = value;
        Ok(())
    }

    /// Deep-merge `value` into the node at the path (created when absent).
    /// Index limits as for [`DocPath::set`].
    pub fn merge(&self, doc: &mut Document, value: &Document) -> Result<(), PathError> {
        self.check_reach(doc)?;
        let mut node = doc;
        for seg in &self.segments {
            node = slot(node, seg);
        }
        deep_merge(node, value);
        Ok(())
    }

    /// Walk the path the way `slot` will, without creating anything, and
    /// reject indices too far past the end of their sequence.
    fn check_reach(&self, doc: &Document) -> Result<(), PathError> {
        let mut node = Some(doc);
        for seg in &self.segments {
            if let Segment::Index(index) = seg {
                let len = match node {
                    Some(Value::Object(_)) => None,
                    Some(Value::Array(items)) => Some(items.len()),
                    // Reshaped into an empty sequence.
                    _ => Some(0),
                };
                if let Some(len) = len {
                    if *index > len.saturating_add(MAX_INDEX_GAP) {
                        return Err(PathError::IndexOutOfRange { index: *index, len });
                    }
                }
            }
            node = node.and_then(|n| match (n, seg) {
                (Value::Object(map), seg) => map.get(&seg.key()),
                (Value::Array(items), Segment::Index(i)) => items.get(*i),
                _ => None,
            });
        }
        Ok(())
    }

    /// Remove the node at the path, returning it. No-op when absent.
    ///
    /// Deleting a sequence position shifts later elements down. Deleting the
    /// root clears a mapping root in place.
    pub fn delete(&self, doc: &mut Document) -> Option<Document> {
        let Some((last, parents)) = self.segments.split_last() else {
            let old = doc.clone();
            match doc {
                Value::Object(map) => map.clear(),
                other => *other = Value::Object(Map::new()),
            }
            return Some(old);
        };
        match (Self::get_mut(parents, doc)?, last) {
            (Value::Object(map), seg) => map.remove(&seg.key()),
            (Value::Array(items), Segment::Index(i)) if *i < items.len() => Some(items.remove(*i)),
            _ => None,
        }
    }
}

/// Return the child slot for `seg`, reshaping `node` if it cannot hold it.
fn slot<'a>(node: &'a mut Document, seg: &Segment) -> &'a mut Document {
    let fits = matches!(
        (&*node, seg),
        (Value::Object(_), _) | (Value::Array(_), Segment::Index(_))
    );
    if !fits {
        *node = match seg {
            Segment::Index(_) => Value::Array(Vec::new()),
            Segment::Key(_) => Value::Object(Map::new()),
        };
    }
    match (node, seg) {
        (Value::Object(map), seg) => map.entry(seg.key()).or_insert(Value::Null),
        (Value::Array(items), Segment::Index(i)) => {
            if items.len() <= *i {
                items.resize(*i + 1, Value::Null);
            }
            &mut items[*i]
        }
        _ => unreachable!("node reshaped to fit segment"),
    }
}

fn set_root(doc: &mut Document, value: Document) {
    match (doc, value) {
        (Value::Object(current), Value::Object(incoming)) => {
            current.clear();
            current.extend(incoming);
        }
        (doc, value) => *doc = value,
    }
}

impl FromStr for DocPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                Segment::Key(k) if i == 0 => write!(f, "{k}")?,
                Segment::Key(k) => write!(f, ".{k}")?,
                Segment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    #[test]
    fn parse_mixed_syntax() {
        assert_eq!(
            p("a.b[2].c").segments(),
            &[
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(2),
                Segment::Key("c".into()),
            ]
        );
        assert_eq!(p("a.1").segments(), &[Segment::Key("a".into()), Segment::Index(1)]);
        assert_eq!(p("m[0][1]").segments().len(), 3);
        assert_eq!(p("007").segments(), &[Segment::Key("007".into())]);
        assert!(p("").is_root());
    }

    #[test]
    fn parse_errors() {
        assert_eq!(DocPath::parse("a..b"), Err(PathError::EmptySegment(2)));
        assert_eq!(DocPath::parse(".a"), Err(PathError::EmptySegment(0)));
        assert_eq!(DocPath::parse("a."), Err(PathError::EmptySegment(2)));
        assert_eq!(DocPath::parse("a[1"), Err(PathError::UnclosedBracket(1)));
        assert!(matches!(DocPath::parse("a[x]"), Err(PathError::InvalidIndex(_))));
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(p("items[0].title").to_string(), "items[0].title");
    }

    #[test]
    fn get_returns_none_for_missing_intermediate() {
        let doc = json!({"a": {"b": [10, 20]}});
        assert_eq!(p("a.b[1]").get(&doc), Some(&json!(20)));
        assert_eq!(p("a.b.0").get(&doc), Some(&json!(10)));
        assert_eq!(p("a.x.y").get(&doc), None);
        assert_eq!(p("a.b[5]").get(&doc), None);
        assert_eq!(p("").get(&doc), Some(&doc));
    }

    #[test]
    fn index_segment_reads_numeric_mapping_key() {
        let doc = json!({"ids": {"2": "two"}});
        assert_eq!(p("ids.2").get(&doc), Some(&json!("two")));
    }

    #[test]
    fn set_creates_mappings_and_sequences() {
        let mut doc = json!({});
        p("a.b.c").set(&mut doc, json!(1)).unwrap();
        p("list[2].name").set(&mut doc, json!("x")).unwrap();
        p("grid.0.1").set(&mut doc, json!(true)).unwrap();

        assert_eq!(
            doc,
            json!({
                "a": {"b": {"c": 1}},
                "list": [null, null, {"name": "x"}],
                "grid": [[null, true]],
            })
        );
    }

    #[test]
    fn set_replaces_scalar_intermediate() {
        let mut doc = json!({"a": 5});
        p("a.b").set(&mut doc, json!(1)).unwrap();
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }

    #[test]
    fn set_root_replaces_keys_in_place() {
        let mut doc = json!({"old": 1, "keep": 2});
        p("").set(&mut doc, json!({"new": 3})).unwrap();
        assert_eq!(doc, json!({"new": 3}));

        p("").set(&mut doc, json!([1])).unwrap();
        assert_eq!(doc, json!([1]));
    }

    #[test]
    fn merge_at_path() {
        let mut doc = json!({"cfg": {"a": 1}});
        p("cfg").merge(&mut doc, &json!({"b": 2})).unwrap();
        p("fresh.node").merge(&mut doc, &json!({"c": 3})).unwrap();
        assert_eq!(doc, json!({"cfg": {"a": 1, "b": 2}, "fresh": {"node": {"c": 3}}}));
    }

    #[test]
    fn delete_present_and_absent() {
        let mut doc = json!({"a": {"b": 1, "c": 2}, "l": [1, 2, 3]});
        assert_eq!(p("a.b").delete(&mut doc), Some(json!(1)));
        assert_eq!(p("a.zzz").delete(&mut doc), None);
        assert_eq!(p("missing.deep").delete(&mut doc), None);
        assert_eq!(p("l[1]").delete(&mut doc), Some(json!(2)));
        assert_eq!(p("l[9]").delete(&mut doc), None);
        assert_eq!(doc, json!({"a": {"c": 2}, "l": [1, 3]}));
    }

    #[test]
    fn delete_root_clears_mapping() {
        let mut doc = json!({"a": 1});
        assert_eq!(p("").delete(&mut doc), Some(json!({"a": 1})));
        assert_eq!(doc, json!({}));
    }

    #[test]
    fn far_index_is_rejected_without_touching_the_document() {
        let mut doc = json!({"a": [1, 2]});
        let err = p("a[18446744073709551615]").set(&mut doc, json!(1)).unwrap_err();
        assert_eq!(
            err,
            PathError::IndexOutOfRange {
                index: usize::MAX,
                len: 2
            }
        );
        assert!(p("fresh[100000000000].x").merge(&mut doc, &json!({})).is_err());
        assert_eq!(doc, json!({"a": [1, 2]}));
    }

    #[test]
    fn index_within_gap_pads_with_null() {
        let mut doc = json!({});
        p(&format!("l[{MAX_INDEX_GAP}]")).set(&mut doc, json!(true)).unwrap();
        let items = doc["l"].as_array().unwrap();
        assert_eq!(items.len(), MAX_INDEX_GAP + 1);
        assert!(items[0].is_null());
        assert!(p(&format!("l[{}]", 2 * MAX_INDEX_GAP + 2)).set(&mut doc, json!(1)).is_err());
    }
}
