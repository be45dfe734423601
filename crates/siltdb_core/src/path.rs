//! Dotted field paths: extraction and projection.
//!
//! A field path is a dot-separated sequence of name segments applied
//! left-to-right. Each segment selects an object field; when the current
//! value is an array and segments remain, the rest of the path is mapped
//! over every element, so one path can reach many leaves. Absent segments
//! produce no leaves. Numeric segments are ordinary field names and do not
//! index arrays.

use serde_json::{Map, Value};

/// Splits a dotted path into its segments.
#[must_use]
pub fn segments(path: &str) -> Vec<&str> {
    path.split('.').collect()
}

/// Returns every leaf value a path reaches in a document.
///
/// The result is a multiset: distinct array elements can contribute equal
/// values. An empty result means the path is absent, never an error.
#[must_use]
pub fn extract<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    extract_into(doc, &segments(path), &mut out);
    out
}

fn extract_into<'a>(value: &'a Value, segs: &[&str], out: &mut Vec<&'a Value>) {
    if segs.is_empty() {
        out.push(value);
        return;
    }
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(segs[0]) {
                extract_into(child, &segs[1..], out);
            }
        }
        Value::Array(arr) => {
            for elem in arr {
                extract_into(elem, segs, out);
            }
        }
        _ => {}
    }
}

/// Resolves a path to a single value for projection.
///
/// Objects are descended by name. An array with segments remaining
/// collapses to the array of per-element resolutions (absent elements are
/// skipped); an empty collapse counts as absent.
#[must_use]
pub fn get_path(doc: &Value, segs: &[&str]) -> Option<Value> {
    if segs.is_empty() {
        return Some(doc.clone());
    }
    match doc {
        Value::Object(map) => get_path(map.get(segs[0])?, &segs[1..]),
        Value::Array(arr) => {
            let values: Vec<Value> = arr.iter().filter_map(|elem| get_path(elem, segs)).collect();
            if values.is_empty() {
                None
            } else {
                Some(Value::Array(values))
            }
        }
        _ => None,
    }
}

/// Inserts a value at a path, creating intermediate objects as needed.
fn insert_path(target: &mut Map<String, Value>, segs: &[&str], value: Value) {
    match segs {
        [] => {}
        [last] => {
            target.insert((*last).to_string(), value);
        }
        [first, rest @ ..] => {
            let child = target
                .entry((*first).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            } else {
                // A scalar already claimed this segment via an earlier
                // projection path; replace it with an object so the more
                // specific path still lands.
                let mut map = Map::new();
                insert_path(&mut map, rest, value);
                *child = Value::Object(map);
            }
        }
    }
}

/// Projects a document onto a list of paths.
///
/// The output contains only the requested paths, with their nested
/// structure rebuilt; absent paths contribute nothing. An empty path list
/// returns the document unchanged. Projecting a non-object document yields
/// an empty object unless no paths were requested.
#[must_use]
pub fn project(doc: &Value, paths: &[String]) -> Value {
    if paths.is_empty() {
        return doc.clone();
    }

    let mut out = Map::new();
    for path in paths {
        let segs = segments(path);
        if let Some(value) = get_path(doc, &segs) {
            insert_path(&mut out, &segs, value);
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_object_descent() {
        let doc = json!({"a": {"b": {"c": 42}}});
        let leaves = extract(&doc, "a.b.c");
        assert_eq!(leaves, vec![&json!(42)]);
    }

    #[test]
    fn extract_absent_path_is_empty() {
        let doc = json!({"a": {"b": 1}});
        assert!(extract(&doc, "a.x").is_empty());
        assert!(extract(&doc, "a.b.c").is_empty());
        assert!(extract(&doc, "nope").is_empty());
    }

    #[test]
    fn extract_array_fans_out() {
        let doc = json!({"items": [{"price": 1}, {"price": 2}, {"name": "x"}]});
        let leaves = extract(&doc, "items.price");
        assert_eq!(leaves, vec![&json!(1), &json!(2)]);
    }

    #[test]
    fn extract_terminal_array_is_one_leaf() {
        let doc = json!({"tags": ["a", "b"]});
        let leaves = extract(&doc, "tags");
        assert_eq!(leaves, vec![&json!(["a", "b"])]);
    }

    #[test]
    fn extract_nested_arrays_fan_recursively() {
        let doc = json!({"m": [[{"v": 1}], [{"v": 2}, {"v": 3}]]});
        let leaves = extract(&doc, "m.v");
        assert_eq!(leaves, vec![&json!(1), &json!(2), &json!(3)]);
    }

    #[test]
    fn numeric_segments_do_not_index_arrays() {
        let doc = json!({"arr": [10, 20, 30]});
        assert!(extract(&doc, "arr.0").is_empty());

        // But a literal field named "0" is reachable.
        let doc = json!({"obj": {"0": "zero"}});
        assert_eq!(extract(&doc, "obj.0"), vec![&json!("zero")]);
    }

    #[test]
    fn project_keeps_nested_shape() {
        let doc = json!({
            "title": "First",
            "author": {"id": "a1", "name": "Alice"},
            "body": "..."
        });
        let projected = project(&doc, &["title".into(), "author.name".into()]);
        assert_eq!(
            projected,
            json!({"title": "First", "author": {"name": "Alice"}})
        );
    }

    #[test]
    fn project_empty_paths_is_identity() {
        let doc = json!({"a": 1, "b": 2});
        assert_eq!(project(&doc, &[]), doc);
    }

    #[test]
    fn project_absent_paths_contribute_nothing() {
        let doc = json!({"a": 1});
        assert_eq!(project(&doc, &["a".into(), "missing.deep".into()]), json!({"a": 1}));
    }

    #[test]
    fn project_through_array_collapses_elements() {
        let doc = json!({"posts": [{"title": "t1"}, {"title": "t2"}]});
        let projected = project(&doc, &["posts.title".into()]);
        assert_eq!(projected, json!({"posts": {"title": ["t1", "t2"]}}));
    }

    #[test]
    fn project_non_object_document() {
        assert_eq!(project(&json!(17), &["a".into()]), json!({}));
        assert_eq!(project(&json!(17), &[]), json!(17));
    }
}
