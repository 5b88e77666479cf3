//! Structural helpers over [`Document`] values.
//!
//! `serde_json::Value` owns all of its children, so cloning is already a
//! deep copy. The helpers are still the single place the store goes through
//! when it copies or combines documents, which keeps the boundary rules in
//! one spot.

use serde_json::Value;

/// The JSON-shaped root value held by a store: a mapping, sequence, or scalar.
pub type Document = Value;

/// Recursively copy a document.
///
/// The returned value shares no mutable structure with `doc`.
pub fn deep_clone(doc: &Document) -> Document {
    match doc {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), deep_clone(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(deep_clone).collect()),
        scalar => scalar.clone(),
    }
}

/// Merge `patch` into `base` in place.
///
/// For each key in `patch`: when both sides hold mappings the merge recurses,
/// otherwise the (cloned) patch value replaces the base value. A patch that is
/// not a mapping replaces `base` wholesale.
pub fn deep_merge(base: &mut Document, patch: &Document) {
    let Value::Object(patch_map) = patch else {
        *base = deep_clone(patch);
        return;
    };
    let Value::Object(base_map) = base else {
        *base = deep_clone(patch);
        return;
    };

    for (key, patch_val) in patch_map {
        match base_map.get_mut(key) {
            Some(base_val) if base_val.is_object() && patch_val.is_object() => {
                deep_merge(base_val, patch_val);
            }
            _ => {
                base_map.insert(key.clone(), deep_clone(patch_val));
            }
        }
    }
}

/// Non-mutating form of [`deep_merge`].
pub fn merged(base: &Document, patch: &Document) -> Document {
    let mut out = deep_clone(base);
    deep_merge(&mut out, patch);
    out
}

/// Structural equality of two documents.
pub fn deep_equal(a: &Document, b: &Document) -> bool {
    a == b
}
