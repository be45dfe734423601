//! Field and geo index entry derivation.
//!
//! Every commit recomputes the index entries a document contributes and
//! diffs them against the previous version's entries; the differences are
//! staged into the same atomic batch as the document itself, so the
//! indexes can never drift from the main store.

use crate::index::geo::{as_geo_point, cell_for};
use crate::keys;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::warn;

/// Computes the full set of index entry keys for a document.
///
/// Field entries cover every scalar leaf: object fields extend the dotted
/// path, array elements contribute under the array's own path (nested
/// arrays flatten, object elements extend the path). Geo entries cover
/// every object field that is a valid geo point.
#[must_use]
pub fn index_entries(key: &str, doc: &Value, geo_precision: usize) -> BTreeSet<Vec<u8>> {
    let mut out = BTreeSet::new();
    walk(key, "", doc, geo_precision, &mut out);
    out
}

fn walk(key: &str, path: &str, value: &Value, geo_precision: usize, out: &mut BTreeSet<Vec<u8>>) {
    match value {
        Value::Object(map) => {
            for (name, child) in map {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{path}.{name}")
                };

                if let Some(point) = as_geo_point(child) {
                    match cell_for(point, geo_precision) {
                        Ok(cell) => {
                            out.insert(keys::geo_entry(&child_path, &cell, key));
                        }
                        Err(e) => {
                            warn!(key, path = %child_path, error = %e, "skipping unencodable geo point");
                        }
                    }
                }

                walk(key, &child_path, child, geo_precision, out);
            }
        }
        Value::Array(arr) => {
            for elem in arr {
                walk(key, path, elem, geo_precision, out);
            }
        }
        _ => {
            if path.is_empty() {
                return; // a bare scalar document has no addressable fields
            }
            if let Some((tag, leaf)) = keys::leaf_bytes(value) {
                out.insert(keys::field_entry(path, tag, &leaf, key));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{parse_field_entry, parse_geo_entry, TAG_BOOL, TAG_NUMBER, TAG_STRING};
    use serde_json::json;

    fn paths_of(entries: &BTreeSet<Vec<u8>>) -> Vec<(String, u8)> {
        entries
            .iter()
            .filter_map(|e| parse_field_entry(e))
            .map(|e| (e.path, e.tag))
            .collect()
    }

    #[test]
    fn scalar_fields_indexed_with_types() {
        let entries = index_entries("k", &json!({"name": "a", "age": 3, "on": true}), 7);
        let mut paths = paths_of(&entries);
        paths.sort();
        assert_eq!(
            paths,
            vec![
                ("age".to_string(), TAG_NUMBER),
                ("name".to_string(), TAG_STRING),
                ("on".to_string(), TAG_BOOL),
            ]
        );
    }

    #[test]
    fn nested_paths_are_dotted() {
        let entries = index_entries(
            "k",
            &json!({"profile": {"settings": {"email": {"enabled": true}}}}),
            7,
        );
        let paths = paths_of(&entries);
        assert_eq!(paths, vec![("profile.settings.email.enabled".to_string(), TAG_BOOL)]);
    }

    #[test]
    fn array_elements_contribute_under_array_path() {
        let entries = index_entries("k", &json!({"tags": ["x", "y"]}), 7);
        let parsed: Vec<_> = entries.iter().filter_map(|e| parse_field_entry(e)).collect();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.iter().all(|e| e.path == "tags" && e.tag == TAG_STRING));
        assert_eq!(parsed[0].doc_key, "k");
    }

    #[test]
    fn array_of_objects_extends_path() {
        let entries = index_entries("k", &json!({"xs": [{"a": 1}, {"a": 2}]}), 7);
        let paths = paths_of(&entries);
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|(p, t)| p == "xs.a" && *t == TAG_NUMBER));
    }

    #[test]
    fn nested_arrays_flatten() {
        let entries = index_entries("k", &json!({"m": [[1, 2], [3]]}), 7);
        let paths = paths_of(&entries);
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|(p, _)| p == "m"));
    }

    #[test]
    fn duplicate_leaves_collapse_to_one_entry() {
        let entries = index_entries("k", &json!({"tags": ["x", "x"]}), 7);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn nulls_and_containers_are_not_leaves() {
        let entries = index_entries("k", &json!({"a": null, "b": {}, "c": []}), 7);
        assert!(entries.is_empty());
    }

    #[test]
    fn bare_scalar_document_has_no_entries() {
        assert!(index_entries("k", &json!(42), 7).is_empty());
        assert!(index_entries("k", &json!("just a string"), 7).is_empty());
    }

    #[test]
    fn geo_point_gets_cell_entry_and_field_entries() {
        let entries = index_entries(
            "store-1",
            &json!({"location": {"lat": 52.52, "lon": 13.405}}),
            7,
        );

        let geo: Vec<_> = entries.iter().filter_map(|e| parse_geo_entry(e)).collect();
        assert_eq!(geo.len(), 1);
        assert_eq!(geo[0].path, "location");
        assert_eq!(geo[0].cell.len(), 7);
        assert_eq!(geo[0].doc_key, "store-1");

        // lat/lon also index as plain numbers.
        let field_paths = paths_of(&entries);
        assert!(field_paths.contains(&("location.lat".to_string(), TAG_NUMBER)));
        assert!(field_paths.contains(&("location.lon".to_string(), TAG_NUMBER)));
    }

    #[test]
    fn out_of_range_coordinates_are_not_geo() {
        let entries = index_entries("k", &json!({"loc": {"lat": 95.0, "lon": 0.0}}), 7);
        assert!(entries.iter().filter_map(|e| parse_geo_entry(e)).next().is_none());
    }

    #[test]
    fn overwrite_diff_removes_stale_entries() {
        let old = index_entries("k", &json!({"status": "active", "n": 1}), 7);
        let new = index_entries("k", &json!({"status": "done", "n": 1}), 7);

        let removed: Vec<_> = old.difference(&new).collect();
        let added: Vec<_> = new.difference(&old).collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(added.len(), 1);

        let kept: Vec<_> = old.intersection(&new).collect();
        assert_eq!(kept.len(), 1, "unchanged leaf should not be rewritten");
    }
}
