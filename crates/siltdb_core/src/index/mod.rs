//! Secondary index maintenance.
//!
//! Indexes live inside the same keyspace as the documents (`i/` and `g/`
//! namespaces), so their atomicity and durability are inherited from the
//! batch commit.

mod field;
pub mod geo;

pub use field::index_entries;
pub use geo::GeoPoint;
