//! Property-based tests for key derivation and result encoding.
//!
//! # Properties Tested
//!
//! 1. **Key Determinism**: equal compiled queries always derive equal keys
//! 2. **Key Distinctness**: different compiled queries derive different keys
//! 3. **Roundtrip Property**: decode(encode(x)) == x for ANY result
//! 4. **Compression Property**: unpack(pack(x)) == x, compressed iff at threshold
//! 5. **Envelope Property**: All encoded data starts with magic + version

use proptest::prelude::*;
use query_cache::codec::{
    decode, encode, Compression, CACHE_MAGIC, CURRENT_SCHEMA_VERSION,
    DEFAULT_COMPRESSION_THRESHOLD,
};
use query_cache::{CacheKey, CompiledQuery, QueryParam};
use serde::{Deserialize, Serialize};

// ============================================================================
// Generators
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Person {
    id: i64,
    first_name: String,
    last_name: Option<String>,
    score: f64,
    tags: Vec<String>,
}

/// Parameters without floats, so `!=` implies a different encoding.
fn arb_exact_param() -> impl Strategy<Value = QueryParam> {
    prop_oneof![
        Just(QueryParam::Null),
        any::<bool>().prop_map(QueryParam::Bool),
        any::<i64>().prop_map(QueryParam::Int),
        any::<String>().prop_map(QueryParam::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(QueryParam::Bytes),
    ]
}

fn arb_param() -> impl Strategy<Value = QueryParam> {
    prop_oneof![
        arb_exact_param(),
        any::<f64>().prop_map(QueryParam::Float),
    ]
}

fn arb_query(param: impl Strategy<Value = QueryParam>) -> impl Strategy<Value = CompiledQuery> {
    (any::<String>(), prop::collection::vec(param, 0..6)).prop_map(|(sql, parameters)| {
        CompiledQuery { sql, parameters }
    })
}

fn arb_person() -> impl Strategy<Value = Person> {
    (
        any::<i64>(),
        any::<String>(),
        any::<Option<String>>(),
        -1.0e12f64..1.0e12f64,
        prop::collection::vec(any::<String>(), 0..8),
    )
        .prop_map(|(id, first_name, last_name, score, tags)| Person {
            id,
            first_name,
            last_name,
            score,
            tags,
        })
}

// ============================================================================
// Property 1 and 2: Keys
// ============================================================================

proptest! {
    /// Property: the key depends only on SQL text and parameters
    #[test]
    fn prop_key_determinism(query in arb_query(arb_param())) {
        let rebuilt = query
            .parameters
            .iter()
            .cloned()
            .fold(CompiledQuery::new(query.sql.clone()), |q, p| q.bind(p));

        let key = CacheKey::derive(&query);
        prop_assert_eq!(&key, &rebuilt.cache_key());
        prop_assert_eq!(key.as_str().len(), CacheKey::LEN);
        prop_assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    /// Property: different queries get different keys
    #[test]
    fn prop_key_distinctness(a in arb_query(arb_exact_param()), b in arb_query(arb_exact_param())) {
        prop_assume!(a != b);
        prop_assert_ne!(a.cache_key(), b.cache_key());
    }
}

#[test]
fn test_key_separates_text_from_parameters() {
    let a = CompiledQuery::new("select ?").bind("ab");
    let b = CompiledQuery::new("select ?a").bind("b");
    let c = CompiledQuery::new("select ?").bind("a").bind("b");

    assert_ne!(a.cache_key(), b.cache_key());
    assert_ne!(a.cache_key(), c.cache_key());
}

#[test]
fn test_key_distinguishes_parameter_types() {
    let int = CompiledQuery::new("select ?").bind(1i64);
    let text = CompiledQuery::new("select ?").bind("1");
    let null = CompiledQuery::new("select ?").bind(None::<i64>);

    assert_ne!(int.cache_key(), text.cache_key());
    assert_ne!(int.cache_key(), null.cache_key());
}

// ============================================================================
// Property 3: Roundtrip
// ============================================================================

proptest! {
    /// Property: any result set survives encode/decode
    #[test]
    fn prop_rows_roundtrip(rows in prop::collection::vec(arb_person(), 0..20)) {
        let bytes = encode(&rows).expect("Encoding should never fail for valid rows");
        let decoded: Vec<Person> = decode(&bytes).expect("Decoding should never fail for valid bytes");
        prop_assert_eq!(rows, decoded);
    }

    /// Property: absent single rows round trip too
    #[test]
    fn prop_optional_row_roundtrip(row in proptest::option::of(arb_person())) {
        let bytes = encode(&row).expect("Encoding should succeed");
        let decoded: Option<Person> = decode(&bytes).expect("Decoding should succeed");
        prop_assert_eq!(row, decoded);
    }

    /// Property: encoding the same rows twice produces identical bytes
    #[test]
    fn prop_encoding_determinism(rows in prop::collection::vec(arb_person(), 0..5)) {
        let bytes1 = encode(&rows).expect("Encoding should succeed");
        let bytes2 = encode(&rows).expect("Encoding should succeed");
        prop_assert_eq!(bytes1, bytes2, "Encoding must be deterministic");
    }
}

// ============================================================================
// Property 4: Compression
// ============================================================================

proptest! {
    #[test]
    fn prop_compression_roundtrip(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let compression = Compression::gzip();
        let (stored, compressed) = compression
            .pack(data.clone())
            .expect("Compression should succeed");

        prop_assert_eq!(compressed, data.len() >= DEFAULT_COMPRESSION_THRESHOLD);
        if !compressed {
            prop_assert_eq!(&stored, &data);
        }

        let unpacked = compression
            .unpack(stored, compressed)
            .expect("Decompression should succeed");
        prop_assert_eq!(unpacked, data);
    }

    /// Property: encode -> pack -> unpack -> decode is lossless
    #[test]
    fn prop_compressed_rows_roundtrip(rows in prop::collection::vec(arb_person(), 20..40)) {
        let compression = Compression::gzip();
        let bytes = encode(&rows).expect("Encoding should succeed");
        let (stored, compressed) = compression.pack(bytes.clone()).expect("Compression should succeed");

        let unpacked = compression.unpack(stored, compressed).expect("Decompression should succeed");
        prop_assert_eq!(&unpacked, &bytes);

        let decoded: Vec<Person> = decode(&unpacked).expect("Decoding should succeed");
        prop_assert_eq!(rows, decoded);
    }
}

// ============================================================================
// Property 5: Envelope
// ============================================================================

proptest! {
    #[test]
    fn prop_envelope_header(rows in prop::collection::vec(arb_person(), 0..3)) {
        let bytes = encode(&rows).expect("Encoding should succeed");

        prop_assert_eq!(&bytes[0..4], &CACHE_MAGIC[..]);
        // Postcard writes small u32 values as a single varint byte.
        prop_assert_eq!(u32::from(bytes[4]), CURRENT_SCHEMA_VERSION);
    }
}
