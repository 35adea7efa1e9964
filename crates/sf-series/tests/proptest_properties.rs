#![forbid(unsafe_code)]

//! Property-based tests for series construction, inference and rendering.
//!
//! Strategies produce arbitrary keys and mixed scalar values; properties
//! check invariants that must hold for every input rather than fixtures.

use std::collections::BTreeMap;

use proptest::prelude::*;

use sf_index::IndexKey;
use sf_series::{AstypeOptions, Series};
use sf_types::{DType, Scalar, merge_priority};

// ---------------------------------------------------------------------------
// Strategy generators
// ---------------------------------------------------------------------------

/// Generate an arbitrary non-object Scalar, including missing values.
fn arb_scalar() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        3 => (-1_000_000i64..1_000_000i64).prop_map(Scalar::Int),
        3 => (-1e6_f64..1e6_f64).prop_map(Scalar::Float),
        2 => any::<bool>().prop_map(Scalar::Bool),
        2 => "[a-z]{0,8}".prop_map(Scalar::Str),
        1 => proptest::collection::vec((0i64..10).prop_map(Scalar::Int), 0..3).prop_map(Scalar::Array),
        1 => Just(Scalar::Missing),
    ]
}

/// Generate an object-valued Scalar.
fn arb_object() -> impl Strategy<Value = Scalar> {
    proptest::collection::btree_map("[a-c]", (0i64..5).prop_map(Scalar::Int), 0..3)
        .prop_map(|fields: BTreeMap<String, Scalar>| Scalar::Object(fields))
}

/// Generate an arbitrary IndexKey.
fn arb_index_key() -> impl Strategy<Value = IndexKey> {
    prop_oneof![
        3 => (0i64..1_000).prop_map(IndexKey::Int),
        1 => "[a-e]{1,3}".prop_map(IndexKey::Str),
    ]
}

/// Generate distinct keys with a value for each.
fn arb_keyed_values(max_len: usize) -> impl Strategy<Value = (Vec<IndexKey>, Vec<Scalar>)> {
    proptest::collection::vec(arb_index_key(), 0..max_len)
        .prop_map(|keys| {
            let mut distinct: Vec<IndexKey> = Vec::with_capacity(keys.len());
            for key in keys {
                if !distinct.contains(&key) {
                    distinct.push(key);
                }
            }
            distinct
        })
        .prop_flat_map(|keys| {
            let len = keys.len();
            (Just(keys), proptest::collection::vec(arb_scalar(), len))
        })
}

fn arb_dtype() -> impl Strategy<Value = DType> {
    proptest::sample::select(DType::ALL.to_vec())
}

fn uniform_width(rendered: &[String]) -> bool {
    rendered
        .windows(2)
        .all(|pair| pair[0].chars().count() == pair[1].chars().count())
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_indexed_values_round_trip((keys, values) in arb_keyed_values(24)) {
        let series = Series::from_indexed_values(keys.clone(), values.clone());
        prop_assert_eq!(series.keys(), keys.as_slice());
        prop_assert_eq!(series.values(), values.as_slice());
        prop_assert_eq!(series.len(), series.keys().len());
    }

    #[test]
    fn prop_plain_mapping_does_not_mutate((keys, values) in arb_keyed_values(16)) {
        let series = Series::from_indexed_values(keys, values).with_name("sample");
        let before = series.clone();
        let mapping = series.to_plain_mapping();
        prop_assert_eq!(mapping.len(), series.len());
        prop_assert_eq!(series.name(), Some("sample"));
        prop_assert_eq!(series.dtype(), before.dtype());
        prop_assert_eq!(&series, &before);
    }

    #[test]
    fn prop_merge_priority_commutes(left in arb_dtype(), right in arb_dtype()) {
        prop_assert_eq!(merge_priority(left, right), merge_priority(right, left));
    }

    #[test]
    fn prop_all_booleans_infer_boolean(values in proptest::collection::vec(any::<bool>(), 1..20)) {
        let series = Series::from_values(values.into_iter().map(Scalar::Bool).collect());
        prop_assert_eq!(series.dtype(), DType::Boolean);
    }

    #[test]
    fn prop_all_integers_infer_int(values in proptest::collection::vec(any::<i64>(), 1..20)) {
        let series = Series::from_values(values.into_iter().map(Scalar::Int).collect());
        prop_assert_eq!(series.dtype(), DType::Int);
    }

    #[test]
    fn prop_any_object_dominates(
        mut values in proptest::collection::vec(arb_scalar(), 0..12),
        object in arb_object(),
        position in any::<prop::sample::Index>(),
    ) {
        let at = position.index(values.len() + 1);
        values.insert(at, object);
        let series = Series::from_values(values);
        prop_assert_eq!(series.dtype(), DType::Object);
    }

    #[test]
    fn prop_rendered_strings_share_width((keys, values) in arb_keyed_values(16)) {
        let series = Series::from_indexed_values(keys, values);
        let rendered_values = series.value_to_string();
        let rendered_index = series.index_to_string();
        prop_assert!(uniform_width(&rendered_values));
        prop_assert!(uniform_width(&rendered_index));
        prop_assert!(rendered_index.iter().all(|key| key.chars().count() >= 5));
    }

    #[test]
    fn prop_astype_copy_never_mutates(
        (keys, values) in arb_keyed_values(16),
        target in arb_dtype(),
    ) {
        let mut series = Series::from_indexed_values(keys, values);
        let before = series.clone();
        let converted = series.astype(target, &AstypeOptions::copy()).into_owned();
        prop_assert_eq!(&series, &before);
        prop_assert_eq!(converted.dtype(), target);
        prop_assert_eq!(converted.keys(), before.keys());
    }

    #[test]
    fn prop_astype_default_mutates_in_place(
        values in proptest::collection::vec(arb_scalar(), 0..16),
        target in arb_dtype(),
    ) {
        let mut series = Series::from_values(values);
        let converted = series.astype(target, &AstypeOptions::default()).into_owned();
        prop_assert_eq!(series.dtype(), target);
        prop_assert_eq!(converted.dtype(), target);
        prop_assert_eq!(converted.len(), series.len());
        // Conversions may produce NaN, so compare with NaN-aware equality.
        for (left, right) in converted.values().iter().zip(series.values()) {
            prop_assert!(left.semantic_eq(right));
        }
    }

    #[test]
    fn prop_unique_is_distinct_and_sorting_is_a_permutation(
        values in proptest::collection::vec(arb_scalar(), 0..20),
    ) {
        let series = Series::from_values(values);
        let unordered = series.unique(false);
        let ordered = series.unique(true);
        prop_assert_eq!(unordered.len(), ordered.len());
        for (i, left) in unordered.iter().enumerate() {
            for right in &unordered[i + 1..] {
                prop_assert!(!left.semantic_eq(right));
            }
            prop_assert!(ordered.iter().any(|value| value.semantic_eq(left)));
        }
    }
}
