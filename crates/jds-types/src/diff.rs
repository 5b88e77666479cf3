//! Top-level diff between two documents.
//!
//! The "data changed" notification carries one entry per top-level key whose
//! value differs: `{ key: { old, new } }`. A side where the key is absent is
//! `None`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;

/// Old and new value of one top-level key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChange {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

impl KeyChange {
    /// The key did not exist before.
    pub fn is_added(&self) -> bool {
        self.old.is_none() && self.new.is_some()
    }

    /// The key no longer exists.
    pub fn is_removed(&self) -> bool {
        self.old.is_some() && self.new.is_none()
    }
}

/// Per top-level key changes, ordered by key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: BTreeMap<String, KeyChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, key: &str) -> Option<&KeyChange> {
        self.changes.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }
}

/// Compute the per top-level key diff from `before` to `after`.
///
/// Non-mapping roots that differ are reported as a single change under the
/// empty key `""`.
pub fn diff_top_level(before: &Document, after: &Document) -> ChangeSet {
    let mut changes = BTreeMap::new();

    let (Value::Object(old), Value::Object(new)) = (before, after) else {
        if before != after {
            changes.insert(
                String::new(),
                KeyChange {
                    old: Some(before.clone()),
                    new: Some(after.clone()),
                },
            );
        }
        return ChangeSet { changes };
    };

    for (key, old_val) in old {
        match new.get(key) {
            Some(new_val) if new_val == old_val => {}
            new_val => {
                changes.insert(
                    key.clone(),
                    KeyChange {
                        old: Some(old_val.clone()),
                        new: new_val.cloned(),
                    },
                );
            }
        }
    }

    for (key, new_val) in new {
        if !old.contains_key(key) {
            changes.insert(
                key.clone(),
                KeyChange {
                    old: None,
                    new: Some(new_val.clone()),
                },
            );
        }
    }

    ChangeSet { changes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_documents_have_no_changes() {
        let doc = json!({"a": 1, "b": {"c": [1, 2]}});
        assert!(diff_top_level(&doc, &doc).is_empty());
    }

    #[test]
    fn added_removed_modified() {
        let before = json!({"keep": true, "modify": "old", "remove": 42});
        let after = json!({"keep": true, "modify": "new", "added": [1]});

        let diff = diff_top_level(&before, &after);
        assert_eq!(diff.len(), 3);
        assert!(diff.get("added").unwrap().is_added());
        assert!(diff.get("remove").unwrap().is_removed());
        assert_eq!(
            diff.get("modify"),
            Some(&KeyChange {
                old: Some(json!("old")),
                new: Some(json!("new")),
            })
        );
        assert!(diff.get("keep").is_none());
    }

    #[test]
    fn nested_change_reported_on_top_level_key() {
        let before = json!({"cfg": {"debug": false, "port": 1}});
        let after = json!({"cfg": {"debug": true, "port": 1}});
        let diff = diff_top_level(&before, &after);
        assert_eq!(diff.keys().collect::<Vec<_>>(), vec!["cfg"]);
    }

    #[test]
    fn scalar_roots_use_empty_key() {
        let diff = diff_top_level(&json!(1), &json!([1]));
        assert_eq!(diff.len(), 1);
        assert!(diff.get("").is_some());
        assert!(diff_top_level(&json!("x"), &json!("x")).is_empty());
    }
}
