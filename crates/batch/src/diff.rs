//! Keys-only structural diff between a stored snapshot and a fresh one.
//!
//! Scalar values are never compared; only the shape is. A key that appears
//! or disappears, an array that grows or shrinks, or a value whose kind
//! changes (object, array or scalar) is a change.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Added,
    Removed,
    KindChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    /// JSON-pointer style location, `/` for the root.
    pub path: String,
    pub change: ChangeKind,
}

pub fn structural_diff(old: &Value, new: &Value) -> Vec<DiffEntry> {
    let mut entries = Vec::new();
    walk(old, new, String::new(), &mut entries);
    entries
}

fn walk(old: &Value, new: &Value, path: String, out: &mut Vec<DiffEntry>) {
    let at = |path: &str, change| DiffEntry {
        path: if path.is_empty() { "/".into() } else { path.to_owned() },
        change,
    };
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, av) in a {
                let child = format!("{path}/{key}");
                match b.get(key) {
                    Some(bv) => walk(av, bv, child, out),
                    None => out.push(at(&child, ChangeKind::Removed)),
                }
            }
            for key in b.keys().filter(|k| !a.contains_key(*k)) {
                out.push(at(&format!("{path}/{key}"), ChangeKind::Added));
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for (i, (av, bv)) in a.iter().zip(b).enumerate() {
                walk(av, bv, format!("{path}/{i}"), out);
            }
            for i in b.len()..a.len() {
                out.push(at(&format!("{path}/{i}"), ChangeKind::Removed));
            }
            for i in a.len()..b.len() {
                out.push(at(&format!("{path}/{i}"), ChangeKind::Added));
            }
        }
        (Value::Object(_), _) | (_, Value::Object(_)) | (Value::Array(_), _) | (_, Value::Array(_)) => {
            out.push(at(&path, ChangeKind::KindChanged));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn added_key_is_a_change() {
        let diff = structural_diff(&json!({ "a": 1 }), &json!({ "a": 1, "b": 2 }));
        assert_eq!(diff, vec![DiffEntry { path: "/b".into(), change: ChangeKind::Added }]);
    }

    #[test]
    fn scalar_values_are_ignored() {
        let old = json!({ "a": 1, "list": [{ "x": "old" }] });
        let new = json!({ "a": 2, "list": [{ "x": "new" }] });
        assert!(structural_diff(&old, &new).is_empty());
    }

    #[test]
    fn nested_removals_and_kind_changes_are_reported() {
        let old = json!({ "n": { "items": [1, 2], "meta": { "k": 1 } } });
        let new = json!({ "n": { "items": [1], "meta": "flat" } });
        assert_eq!(
            structural_diff(&old, &new),
            vec![
                DiffEntry { path: "/n/items/1".into(), change: ChangeKind::Removed },
                DiffEntry { path: "/n/meta".into(), change: ChangeKind::KindChanged },
            ]
        );
    }
}
