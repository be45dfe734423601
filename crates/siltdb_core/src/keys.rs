//! Keyspace layout and byte-key encoding.
//!
//! The engine stores everything in one sorted byte keyspace, partitioned by
//! reserved prefixes:
//!
//! ```text
//! d/<key>                          document bytes
//! i/<path>/<type>/<leaf>/<key>     field index entry (empty value)
//! g/<path>/<cell>/<key>            geo index entry (empty value)
//! ```
//!
//! Index key components are escaped so they remain unambiguous and sort
//! bytewise in component order: `0x00` inside a component becomes
//! `0x00 0xFF`, and each component ends with a bare `0x00` terminator.
//! Paths, string leaves, cells, and document keys are UTF-8 (which never
//! contains `0xFF`), so a terminator can always be told apart from an
//! escape pair.
//!
//! Number leaves are encoded as monotonic big-endian `f64` bit patterns,
//! so lexicographic order of encoded leaves equals numeric order.

use serde_json::Value;

/// Namespace prefix for document entries.
pub const DOC_NS: &[u8] = b"d/";
/// Namespace prefix for field index entries.
pub const FIELD_NS: &[u8] = b"i/";
/// Namespace prefix for geo index entries.
pub const GEO_NS: &[u8] = b"g/";

/// Type tag for number leaves.
pub const TAG_NUMBER: u8 = 0x01;
/// Type tag for string leaves.
pub const TAG_STRING: u8 = 0x02;
/// Type tag for boolean leaves.
pub const TAG_BOOL: u8 = 0x03;

/// Builds the store key for a document.
#[must_use]
pub fn doc_key(key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DOC_NS.len() + key.len());
    buf.extend_from_slice(DOC_NS);
    buf.extend_from_slice(key.as_bytes());
    buf
}

/// Builds the store prefix matching every document key starting with `prefix`.
///
/// An empty `prefix` matches all documents.
#[must_use]
pub fn doc_prefix(prefix: &str) -> Vec<u8> {
    doc_key(prefix)
}

/// Extracts the user key from a document store key.
///
/// Returns `None` for keys outside the `d/` namespace or non-UTF-8 keys.
#[must_use]
pub fn user_key(store_key: &[u8]) -> Option<&str> {
    let rest = store_key.strip_prefix(DOC_NS)?;
    std::str::from_utf8(rest).ok()
}

/// Appends a component with escaping and a terminator.
fn append_component(buf: &mut Vec<u8>, raw: &[u8]) {
    for &b in raw {
        if b == 0x00 {
            buf.push(0x00);
            buf.push(0xFF);
        } else {
            buf.push(b);
        }
    }
    buf.push(0x00);
}

/// Reads one escaped component, returning the unescaped bytes and the rest.
///
/// Returns `None` if the input ends before a terminator.
fn read_component(input: &[u8]) -> Option<(Vec<u8>, &[u8])> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < input.len() {
        if input[i] == 0x00 {
            if input.get(i + 1) == Some(&0xFF) {
                out.push(0x00);
                i += 2;
            } else {
                return Some((out, &input[i + 1..]));
            }
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    None
}

/// Encodes an `f64` as 8 bytes whose lexicographic order matches numeric order.
#[must_use]
pub fn number_leaf(value: f64) -> [u8; 8] {
    // Normalize -0.0 so it probes and sorts identically to 0.0.
    let value = if value == 0.0 { 0.0 } else { value };
    let bits = value.to_bits();
    let ordered = if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    };
    ordered.to_be_bytes()
}

/// Returns the (tag, encoded leaf) pair for an indexable scalar.
///
/// Null, objects, and arrays are not indexable leaf types and yield `None`.
/// Numbers that cannot be represented as `f64` also yield `None`.
#[must_use]
pub fn leaf_bytes(value: &Value) -> Option<(u8, Vec<u8>)> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| (TAG_NUMBER, number_leaf(f).to_vec())),
        Value::String(s) => Some((TAG_STRING, s.as_bytes().to_vec())),
        Value::Bool(b) => Some((TAG_BOOL, vec![u8::from(*b)])),
        _ => None,
    }
}

/// Builds a full field index entry key.
#[must_use]
pub fn field_entry(path: &str, tag: u8, leaf: &[u8], key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FIELD_NS.len() + path.len() + leaf.len() + key.len() + 8);
    buf.extend_from_slice(FIELD_NS);
    append_component(&mut buf, path.as_bytes());
    buf.push(tag);
    append_component(&mut buf, leaf);
    append_component(&mut buf, key.as_bytes());
    buf
}

/// Prefix matching every field index entry for a path, across all types.
///
/// This is the universe scan used by `Ne` planning.
#[must_use]
pub fn field_path_prefix(path: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FIELD_NS.len() + path.len() + 2);
    buf.extend_from_slice(FIELD_NS);
    append_component(&mut buf, path.as_bytes());
    buf
}

/// Prefix matching every field index entry for a (path, type) pair.
#[must_use]
pub fn field_tag_prefix(path: &str, tag: u8) -> Vec<u8> {
    let mut buf = field_path_prefix(path);
    buf.push(tag);
    buf
}

/// Prefix matching every field index entry for an exact (path, type, leaf).
///
/// This is the equality probe.
#[must_use]
pub fn field_value_prefix(path: &str, tag: u8, leaf: &[u8]) -> Vec<u8> {
    let mut buf = field_tag_prefix(path, tag);
    append_component(&mut buf, leaf);
    buf
}

/// Lower/upper bound key for range scans over a (path, type) sub-tree.
///
/// With `after` false the bound sits at the start of the leaf's entry
/// block; with `after` true it sits just past the block (entries for the
/// leaf itself are excluded). Entry blocks never interleave because every
/// entry continues with an escaped UTF-8 document key, whose first byte is
/// always below `0xFF`.
#[must_use]
pub fn field_leaf_bound(path: &str, tag: u8, leaf: &[u8], after: bool) -> Vec<u8> {
    let mut buf = field_value_prefix(path, tag, leaf);
    if after {
        buf.push(0xFF);
    }
    buf
}

/// A parsed field index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntry {
    /// Dotted field path.
    pub path: String,
    /// Leaf type tag.
    pub tag: u8,
    /// Encoded leaf bytes.
    pub leaf: Vec<u8>,
    /// Document key the entry points at.
    pub doc_key: String,
}

/// Parses a field index entry key.
///
/// Returns `None` for keys outside the `i/` namespace or with a malformed
/// component structure.
#[must_use]
pub fn parse_field_entry(store_key: &[u8]) -> Option<FieldEntry> {
    let rest = store_key.strip_prefix(FIELD_NS)?;
    let (path, rest) = read_component(rest)?;
    let (&tag, rest) = rest.split_first()?;
    let (leaf, rest) = read_component(rest)?;
    let (doc_key, rest) = read_component(rest)?;
    if !rest.is_empty() {
        return None;
    }
    Some(FieldEntry {
        path: String::from_utf8(path).ok()?,
        tag,
        leaf,
        doc_key: String::from_utf8(doc_key).ok()?,
    })
}

/// Builds a full geo index entry key.
#[must_use]
pub fn geo_entry(path: &str, cell: &str, key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(GEO_NS.len() + path.len() + cell.len() + key.len() + 6);
    buf.extend_from_slice(GEO_NS);
    append_component(&mut buf, path.as_bytes());
    append_component(&mut buf, cell.as_bytes());
    append_component(&mut buf, key.as_bytes());
    buf
}

/// Prefix matching geo entries for a path whose cell starts with `cell`.
///
/// Coarser geohash cells are string prefixes of finer ones, so probing a
/// coarse cell by prefix covers all finer cells nested inside it. Passing
/// an empty `cell` matches every entry for the path.
#[must_use]
pub fn geo_cell_prefix(path: &str, cell: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(GEO_NS.len() + path.len() + cell.len() + 2);
    buf.extend_from_slice(GEO_NS);
    append_component(&mut buf, path.as_bytes());
    // No terminator: the scan should match any cell with this prefix.
    buf.extend_from_slice(cell.as_bytes());
    buf
}

/// A parsed geo index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoEntry {
    /// Dotted field path.
    pub path: String,
    /// Geohash cell.
    pub cell: String,
    /// Document key the entry points at.
    pub doc_key: String,
}

/// Parses a geo index entry key.
#[must_use]
pub fn parse_geo_entry(store_key: &[u8]) -> Option<GeoEntry> {
    let rest = store_key.strip_prefix(GEO_NS)?;
    let (path, rest) = read_component(rest)?;
    let (cell, rest) = read_component(rest)?;
    let (doc_key, rest) = read_component(rest)?;
    if !rest.is_empty() {
        return None;
    }
    Some(GeoEntry {
        path: String::from_utf8(path).ok()?,
        cell: String::from_utf8(cell).ok()?,
        doc_key: String::from_utf8(doc_key).ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn doc_keys_round_trip() {
        let k = doc_key("users/alice");
        assert_eq!(user_key(&k), Some("users/alice"));
        assert_eq!(user_key(b"i/whatever"), None);
    }

    #[test]
    fn empty_user_key_accepted() {
        let k = doc_key("");
        assert_eq!(k, b"d/");
        assert_eq!(user_key(&k), Some(""));
    }

    #[test]
    fn number_leaf_order_matches_numeric_order() {
        let values = [
            f64::NEG_INFINITY,
            -1.0e308,
            -42.5,
            -1.0,
            -0.001,
            0.0,
            0.001,
            1.0,
            42.5,
            1.0e308,
            f64::INFINITY,
        ];
        for pair in values.windows(2) {
            assert!(
                number_leaf(pair[0]) < number_leaf(pair[1]),
                "{} should encode below {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn negative_zero_normalized() {
        assert_eq!(number_leaf(-0.0), number_leaf(0.0));
    }

    #[test]
    fn leaf_bytes_covers_scalars_only() {
        assert_eq!(leaf_bytes(&json!("s")).unwrap().0, TAG_STRING);
        assert_eq!(leaf_bytes(&json!(3)).unwrap().0, TAG_NUMBER);
        assert_eq!(leaf_bytes(&json!(true)).unwrap().0, TAG_BOOL);
        assert!(leaf_bytes(&Value::Null).is_none());
        assert!(leaf_bytes(&json!([1])).is_none());
        assert!(leaf_bytes(&json!({"a": 1})).is_none());
    }

    #[test]
    fn integer_and_float_probe_identically() {
        let (t1, l1) = leaf_bytes(&json!(5)).unwrap();
        let (t2, l2) = leaf_bytes(&json!(5.0)).unwrap();
        assert_eq!((t1, l1), (t2, l2));
    }

    #[test]
    fn field_entry_round_trip() {
        let entry = field_entry("a.b", TAG_STRING, b"hello", "doc-1");
        let parsed = parse_field_entry(&entry).unwrap();
        assert_eq!(parsed.path, "a.b");
        assert_eq!(parsed.tag, TAG_STRING);
        assert_eq!(parsed.leaf, b"hello");
        assert_eq!(parsed.doc_key, "doc-1");
    }

    #[test]
    fn field_entry_with_embedded_nul() {
        let entry = field_entry("p", TAG_STRING, b"a\x00b", "k\x00ey");
        let parsed = parse_field_entry(&entry).unwrap();
        assert_eq!(parsed.leaf, b"a\x00b");
        assert_eq!(parsed.doc_key, "k\x00ey");
    }

    #[test]
    fn prefixes_nest() {
        let entry = field_entry("a.b", TAG_NUMBER, &number_leaf(7.0), "k");
        assert!(entry.starts_with(&field_path_prefix("a.b")));
        assert!(entry.starts_with(&field_tag_prefix("a.b", TAG_NUMBER)));
        assert!(entry.starts_with(&field_value_prefix("a.b", TAG_NUMBER, &number_leaf(7.0))));
        // A different path must not collide.
        assert!(!entry.starts_with(&field_path_prefix("a.bc")));
    }

    #[test]
    fn leaf_bounds_bracket_the_entry_block() {
        let low = field_leaf_bound("p", TAG_NUMBER, &number_leaf(5.0), false);
        let high = field_leaf_bound("p", TAG_NUMBER, &number_leaf(5.0), true);
        let entry = field_entry("p", TAG_NUMBER, &number_leaf(5.0), "some-key");
        assert!(low <= entry);
        assert!(entry < high);

        let six = field_entry("p", TAG_NUMBER, &number_leaf(6.0), "k");
        assert!(high < six);
    }

    #[test]
    fn string_range_includes_extensions() {
        // "ab" < "abc" must hold through encoding for Gte("ab") scans.
        let ab = field_entry("p", TAG_STRING, b"ab", "k");
        let abc = field_entry("p", TAG_STRING, b"abc", "k");
        assert!(ab < abc);
        let bound = field_leaf_bound("p", TAG_STRING, b"ab", false);
        assert!(bound <= abc);
    }

    #[test]
    fn geo_entry_round_trip() {
        let entry = geo_entry("loc", "u4pruyd", "store-7");
        let parsed = parse_geo_entry(&entry).unwrap();
        assert_eq!(parsed.path, "loc");
        assert_eq!(parsed.cell, "u4pruyd");
        assert_eq!(parsed.doc_key, "store-7");
    }

    #[test]
    fn coarse_cell_prefix_matches_finer_cells() {
        let entry = geo_entry("loc", "u4pruyd", "k");
        assert!(entry.starts_with(&geo_cell_prefix("loc", "u4p")));
        assert!(entry.starts_with(&geo_cell_prefix("loc", "")));
        assert!(!entry.starts_with(&geo_cell_prefix("loc", "u4q")));
    }
}
