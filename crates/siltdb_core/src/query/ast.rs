//! Query AST and validation.
//!
//! The AST is a value the boundary deserializes straight from request
//! JSON; variants are externally tagged, so the wire shapes are
//! `{"Eq": ["a.b", 5, "Number"]}`, `{"And": [<node>, <node>]}`,
//! `{"Not": <node>}` and
//! `{"GeoWithinRadius": {"field": "loc", "lat": 52.0, "lon": 13.0, "radius": 500.0}}`.

use crate::error::{DbError, DbResult};
use crate::keys;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison type of a query literal.
///
/// A predicate only matches leaves of its literal's type; a mismatched
/// leaf makes the predicate false for that document, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// UTF-8 string comparison.
    String,
    /// Numeric comparison (integers and doubles compare as f64).
    Number,
    /// Boolean comparison.
    Bool,
}

impl DataType {
    /// The index type tag for this comparison type.
    #[must_use]
    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::Number => keys::TAG_NUMBER,
            Self::String => keys::TAG_STRING,
            Self::Bool => keys::TAG_BOOL,
        }
    }

    /// Whether a JSON value is of this type.
    #[must_use]
    pub(crate) fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
        }
    }
}

/// A node of the boolean query AST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueryNode {
    /// Any extracted leaf equals the literal (typed).
    Eq(String, Value, DataType),
    /// The path resolves to an array containing the literal.
    Includes(String, Value, DataType),
    /// Any extracted leaf is greater than the literal.
    Gt(String, Value, DataType),
    /// Any extracted leaf is less than the literal.
    Lt(String, Value, DataType),
    /// Any extracted leaf is greater than or equal to the literal.
    Gte(String, Value, DataType),
    /// Any extracted leaf is less than or equal to the literal.
    Lte(String, Value, DataType),
    /// The path is present and no extracted leaf equals the literal.
    Ne(String, Value, DataType),
    /// Both sub-queries match.
    And(Box<QueryNode>, Box<QueryNode>),
    /// Either sub-query matches.
    Or(Box<QueryNode>, Box<QueryNode>),
    /// The sub-query does not match.
    Not(Box<QueryNode>),
    /// A geo point at `field` lies within `radius` metres of the centre.
    GeoWithinRadius {
        /// Dotted path holding the geo point.
        field: String,
        /// Centre latitude in decimal degrees.
        lat: f64,
        /// Centre longitude in decimal degrees.
        lon: f64,
        /// Radius in metres.
        radius: f64,
    },
    /// A geo point at `field` lies within an axis-aligned box.
    GeoInBox {
        /// Dotted path holding the geo point.
        field: String,
        /// Southern edge.
        min_lat: f64,
        /// Western edge.
        min_lon: f64,
        /// Northern edge.
        max_lat: f64,
        /// Eastern edge.
        max_lon: f64,
    },
}

fn check_lat(lat: f64) -> DbResult<()> {
    if (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        Err(DbError::invalid_geo(format!("latitude out of range: {lat}")))
    }
}

fn check_lon(lon: f64) -> DbResult<()> {
    if (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(DbError::invalid_geo(format!("longitude out of range: {lon}")))
    }
}

fn check_literal(path: &str, literal: &Value, data_type: DataType) -> DbResult<()> {
    if data_type.matches(literal) {
        Ok(())
    } else {
        Err(DbError::invalid_query(format!(
            "literal for '{path}' is tagged {data_type:?} but carries a different type"
        )))
    }
}

impl QueryNode {
    /// Validates the whole AST once before planning.
    ///
    /// Catches typed-literal mismatches and out-of-range geo arguments so
    /// the boundary can answer with a client error instead of silently
    /// matching nothing.
    pub fn validate(&self) -> DbResult<()> {
        match self {
            Self::Eq(path, literal, data_type)
            | Self::Includes(path, literal, data_type)
            | Self::Gt(path, literal, data_type)
            | Self::Lt(path, literal, data_type)
            | Self::Gte(path, literal, data_type)
            | Self::Lte(path, literal, data_type)
            | Self::Ne(path, literal, data_type) => check_literal(path, literal, *data_type),

            Self::And(left, right) | Self::Or(left, right) => {
                left.validate()?;
                right.validate()
            }
            Self::Not(child) => child.validate(),

            Self::GeoWithinRadius {
                lat, lon, radius, ..
            } => {
                check_lat(*lat)?;
                check_lon(*lon)?;
                if radius.is_finite() && *radius >= 0.0 {
                    Ok(())
                } else {
                    Err(DbError::invalid_geo(format!("invalid radius: {radius}")))
                }
            }

            Self::GeoInBox {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
                ..
            } => {
                check_lat(*min_lat)?;
                check_lat(*max_lat)?;
                check_lon(*min_lon)?;
                check_lon(*max_lon)
            }
        }
    }
}
