//! Document-level predicate evaluation.
//!
//! This is the verification side of the query engine: after the planner
//! reduces the candidate set through index probes, every candidate
//! document is re-evaluated here against the full AST. Evaluation is pure
//! and total - type mismatches and absent paths are false, never errors.

use crate::index::geo::{as_geo_point, haversine_m, GeoPoint};
use crate::path::extract;
use crate::query::ast::{DataType, QueryNode};
use geo::{Contains, Coord, Point, Rect};
use serde_json::Value;
use std::cmp::Ordering;

/// Typed equality between a document leaf and a query literal.
fn typed_eq(leaf: &Value, literal: &Value, data_type: DataType) -> bool {
    match data_type {
        DataType::Number => match (leaf.as_f64(), literal.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        DataType::String => match (leaf.as_str(), literal.as_str()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        DataType::Bool => match (leaf.as_bool(), literal.as_bool()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// Typed ordering between a document leaf and a query literal.
///
/// Returns `None` when the leaf is not of the literal's type, which makes
/// the enclosing comparison false.
fn typed_cmp(leaf: &Value, literal: &Value, data_type: DataType) -> Option<Ordering> {
    match data_type {
        DataType::Number => leaf.as_f64()?.partial_cmp(&literal.as_f64()?),
        DataType::String => Some(leaf.as_str()?.cmp(literal.as_str()?)),
        DataType::Bool => Some(leaf.as_bool()?.cmp(&literal.as_bool()?)),
    }
}

fn any_leaf_cmp(
    doc: &Value,
    path: &str,
    literal: &Value,
    data_type: DataType,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    extract(doc, path)
        .into_iter()
        .filter_map(|leaf| typed_cmp(leaf, literal, data_type))
        .any(accept)
}

/// Evaluates the full AST against one document.
#[must_use]
pub fn matches(doc: &Value, node: &QueryNode) -> bool {
    match node {
        QueryNode::Eq(path, literal, data_type) => extract(doc, path)
            .into_iter()
            .any(|leaf| typed_eq(leaf, literal, *data_type)),

        QueryNode::Ne(path, literal, data_type) => {
            // False for absent paths; requires a leaf of the literal's
            // type, none of which equals the literal.
            let mut saw_typed_leaf = false;
            for leaf in extract(doc, path) {
                if data_type.matches(leaf) {
                    saw_typed_leaf = true;
                    if typed_eq(leaf, literal, *data_type) {
                        return false;
                    }
                }
            }
            saw_typed_leaf
        }

        QueryNode::Gt(path, literal, data_type) => {
            any_leaf_cmp(doc, path, literal, *data_type, |o| o == Ordering::Greater)
        }
        QueryNode::Lt(path, literal, data_type) => {
            any_leaf_cmp(doc, path, literal, *data_type, |o| o == Ordering::Less)
        }
        QueryNode::Gte(path, literal, data_type) => {
            any_leaf_cmp(doc, path, literal, *data_type, |o| o != Ordering::Less)
        }
        QueryNode::Lte(path, literal, data_type) => {
            any_leaf_cmp(doc, path, literal, *data_type, |o| o != Ordering::Greater)
        }

        QueryNode::Includes(path, literal, data_type) => {
            extract(doc, path).into_iter().any(|leaf| match leaf {
                Value::Array(items) => items.iter().any(|item| typed_eq(item, literal, *data_type)),
                _ => false,
            })
        }

        QueryNode::And(left, right) => matches(doc, left) && matches(doc, right),
        QueryNode::Or(left, right) => matches(doc, left) || matches(doc, right),
        QueryNode::Not(child) => !matches(doc, child),

        QueryNode::GeoWithinRadius {
            field,
            lat,
            lon,
            radius,
        } => {
            let centre = GeoPoint {
                lat: *lat,
                lon: *lon,
            };
            extract(doc, field)
                .into_iter()
                .filter_map(as_geo_point)
                .any(|point| haversine_m(centre, point) <= *radius)
        }

        QueryNode::GeoInBox {
            field,
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        } => {
            let rect = Rect::new(
                Coord {
                    x: *min_lon,
                    y: *min_lat,
                },
                Coord {
                    x: *max_lon,
                    y: *max_lat,
                },
            );
            extract(doc, field)
                .into_iter()
                .filter_map(as_geo_point)
                .any(|point| rect.contains(&Point::new(point.lon, point.lat)))
        }
    }
}
