//! Content fingerprinting for row metadata (spec §3: "a stable numeric hash
//! of the stringified tuple of column values in column order").
//!
//! Uses xxHash with a fixed seed so the fingerprint is reproducible across
//! processes — the hash determinism invariant (spec §8, property 1).

use xxhash_rust::xxh64;

const SEED: u64 = 0x517cc1b727220a95;
const RECORD_SEPARATOR: char = '\u{1E}';

use crate::value::Value;

/// Compute the content fingerprint of a row's non-PK columns, in column
/// order. Values are joined with a record-separator byte so that e.g.
/// `("ab", "c")` and `("a", "bc")` hash differently.
pub fn row_hash(values: &[&Value]) -> u64 {
    let mut combined = String::new();
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            combined.push(RECORD_SEPARATOR);
        }
        combined.push_str(&v.canonical_string());
    }
    xxh64::xxh64(combined.as_bytes(), SEED)
}
