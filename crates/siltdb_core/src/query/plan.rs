//! Index-backed candidate planning.
//!
//! Each AST node reduces to a sorted set of candidate document keys pulled
//! from the field and geo indexes. Candidate sets over-approximate the
//! true result - array-element entries and covering cells admit false
//! positives - so every candidate is re-verified against the full AST
//! afterwards. The over-approximation also means `Not` cannot complement
//! a child's candidate set without losing matches; it complements against
//! the full `d/` key iterator instead and lets verification decide.

use crate::error::{DbError, DbResult};
use crate::index::geo::{covering_cells, BoundingBox, GeoPoint};
use crate::keys;
use crate::keyspace::{prefix_successor, Keyspace};
use crate::query::ast::{DataType, QueryNode};
use serde_json::Value;
use std::collections::BTreeSet;
use std::ops::Bound;

/// Encodes a query literal into its index leaf form.
fn encode_literal(literal: &Value, data_type: DataType) -> DbResult<(u8, Vec<u8>)> {
    let leaf = match data_type {
        DataType::Number => literal
            .as_f64()
            .map(|f| keys::number_leaf(f).to_vec())
            .ok_or_else(|| DbError::invalid_query("number literal is not representable"))?,
        DataType::String => literal
            .as_str()
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| DbError::invalid_query("string literal is not a string"))?,
        DataType::Bool => literal
            .as_bool()
            .map(|b| vec![u8::from(b)])
            .ok_or_else(|| DbError::invalid_query("bool literal is not a boolean"))?,
    };
    Ok((data_type.tag(), leaf))
}

/// Every document key in the store, via the `d/` iterator.
fn all_doc_keys(ks: &Keyspace) -> BTreeSet<String> {
    ks.scan_prefix_keys(keys::DOC_NS)
        .iter()
        .filter_map(|k| keys::user_key(k).map(str::to_string))
        .collect()
}

/// Direct index probe for an exact (path, type, leaf).
fn probe_eq(
    ks: &Keyspace,
    path: &str,
    literal: &Value,
    data_type: DataType,
) -> DbResult<BTreeSet<String>> {
    let (tag, leaf) = encode_literal(literal, data_type)?;
    let prefix = keys::field_value_prefix(path, tag, &leaf);
    Ok(ks
        .scan_prefix_keys(&prefix)
        .iter()
        .filter_map(|k| keys::parse_field_entry(k))
        .map(|e| e.doc_key)
        .collect())
}

/// Ordered range scan over a (path, type) index sub-tree.
fn probe_range(
    ks: &Keyspace,
    path: &str,
    literal: &Value,
    data_type: DataType,
    include_equal: bool,
    greater: bool,
) -> DbResult<BTreeSet<String>> {
    let (tag, leaf) = encode_literal(literal, data_type)?;
    let subtree = keys::field_tag_prefix(path, tag);

    let (start, end) = if greater {
        let start = keys::field_leaf_bound(path, tag, &leaf, !include_equal);
        let end = match prefix_successor(&subtree) {
            Some(succ) => Bound::Excluded(succ),
            None => Bound::Unbounded,
        };
        (Bound::Included(start), end)
    } else {
        let end = keys::field_leaf_bound(path, tag, &leaf, include_equal);
        (Bound::Included(subtree), Bound::Excluded(end))
    };

    Ok(ks
        .scan_range(start, end)
        .iter()
        .filter_map(|k| keys::parse_field_entry(k))
        .map(|e| e.doc_key)
        .collect())
}

/// Universe of keys carrying a path: the index's path sub-tree.
///
/// `Ne` complements inside this universe instead of scanning documents.
fn probe_universe(ks: &Keyspace, path: &str) -> BTreeSet<String> {
    ks.scan_prefix_keys(&keys::field_path_prefix(path))
        .iter()
        .filter_map(|k| keys::parse_field_entry(k))
        .map(|e| e.doc_key)
        .collect()
}

/// Probes the geo index through a covering cell set.
fn probe_geo(
    ks: &Keyspace,
    path: &str,
    bbox: BoundingBox,
    geo_precision: usize,
) -> DbResult<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    for cell in covering_cells(bbox, geo_precision)? {
        for key in ks.scan_prefix_keys(&keys::geo_cell_prefix(path, &cell)) {
            if let Some(entry) = keys::parse_geo_entry(&key) {
                out.insert(entry.doc_key);
            }
        }
    }
    Ok(out)
}

/// Reduces an AST node to its sorted candidate key set.
pub(crate) fn candidates(
    ks: &Keyspace,
    node: &QueryNode,
    geo_precision: usize,
) -> DbResult<BTreeSet<String>> {
    match node {
        QueryNode::Eq(path, literal, data_type) | QueryNode::Includes(path, literal, data_type) => {
            probe_eq(ks, path, literal, *data_type)
        }

        QueryNode::Gt(path, literal, data_type) => {
            probe_range(ks, path, literal, *data_type, false, true)
        }
        QueryNode::Gte(path, literal, data_type) => {
            probe_range(ks, path, literal, *data_type, true, true)
        }
        QueryNode::Lt(path, literal, data_type) => {
            probe_range(ks, path, literal, *data_type, false, false)
        }
        QueryNode::Lte(path, literal, data_type) => {
            probe_range(ks, path, literal, *data_type, true, false)
        }

        QueryNode::Ne(path, _, _) => Ok(probe_universe(ks, path)),

        QueryNode::And(left, right) => {
            let a = candidates(ks, left, geo_precision)?;
            let b = candidates(ks, right, geo_precision)?;
            // Sorted intersection, iterating the smaller set.
            let (small, large) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
            Ok(small.iter().filter(|k| large.contains(*k)).cloned().collect())
        }

        QueryNode::Or(left, right) => {
            let mut a = candidates(ks, left, geo_precision)?;
            a.extend(candidates(ks, right, geo_precision)?);
            Ok(a)
        }

        QueryNode::Not(_) => Ok(all_doc_keys(ks)),

        QueryNode::GeoWithinRadius {
            field,
            lat,
            lon,
            radius,
        } => {
            let bbox = BoundingBox::around(
                GeoPoint {
                    lat: *lat,
                    lon: *lon,
                },
                *radius,
            );
            probe_geo(ks, field, bbox, geo_precision)
        }

        QueryNode::GeoInBox {
            field,
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        } => {
            let bbox = BoundingBox {
                min_lat: *min_lat,
                min_lon: *min_lon,
                max_lat: *max_lat,
                max_lon: *max_lon,
            };
            probe_geo(ks, field, bbox, geo_precision)
        }
    }
}
