//! Property-based tests for the generator, comparator, broadcasting and case expansion.
//!
//! Key invariants:
//! - Generated values stay in `[low, high)` and depend only on the seed
//! - Any output compared with itself matches with zero error
//! - Reducing a broadcast gradient preserves its total
//! - Expansion yields one case per combination, named by index

use opcheck::broadcast::reduce_to_dims;
use opcheck::case::{expand, ParamSet};
use opcheck::compare::{compare, CompareMode, Tolerance};
use opcheck::generator::generate;
use opcheck::tensor::DType;
use proptest::prelude::*;

fn dtype() -> impl Strategy<Value = DType> {
    prop_oneof![
        Just(DType::F16),
        Just(DType::F32),
        Just(DType::F64),
        Just(DType::I32),
        Just(DType::I64),
    ]
}

fn dims() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..6, 1..4)
}

proptest! {
    #[test]
    fn generated_values_stay_in_range(
        shape in dims(),
        dtype in dtype(),
        low in -50i64..0,
        width in 1i64..100,
        seed in any::<u64>(),
    ) {
        let (low, high) = (low as f64, (low + width) as f64);
        let a = generate(&shape, dtype, low, high, seed).unwrap();
        let b = generate(&shape, dtype, low, high, seed).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.dtype(), dtype);
        for value in a.to_f64_vec() {
            prop_assert!(value >= low && value < high, "{} outside [{}, {})", value, low, high);
        }
    }

    #[test]
    fn self_comparison_is_exact(
        shape in dims(),
        dtype in dtype(),
        seed in any::<u64>(),
    ) {
        let value = generate(&shape, dtype, -10.0, 10.0, seed).unwrap();
        for mode in [CompareMode::AllEqual, CompareMode::Tolerant] {
            let results = compare(
                std::slice::from_ref(&value),
                std::slice::from_ref(&value),
                mode,
                &Tolerance::for_dtype(dtype),
            )
            .unwrap();
            prop_assert!(results[0].matched);
            prop_assert_eq!(results[0].max_relative_error, 0.0);
        }
    }

    #[test]
    fn reduction_preserves_total(
        out in prop::collection::vec(1usize..5, 1..4),
        mask in prop::collection::vec(any::<bool>(), 4),
    ) {
        let to: Vec<usize> = out
            .iter()
            .zip(mask.iter())
            .map(|(&dim, &keep)| if keep { dim } else { 1 })
            .collect();
        let total: usize = out.iter().product();
        let values: Vec<f64> = (0..total).map(|i| i as f64).collect();
        let reduced = reduce_to_dims(&values, &out, &to);
        prop_assert_eq!(reduced.len(), to.iter().product::<usize>());
        prop_assert_eq!(reduced.iter().sum::<f64>(), values.iter().sum::<f64>());
    }

    #[test]
    fn expansion_covers_every_combination(
        inputs in 1usize..4,
        dtypes in 1usize..4,
        attrs in 1usize..4,
    ) {
        let list = |key: &str, n: usize| -> Vec<ParamSet> {
            (0..n).map(|i| ParamSet::new().int(key, i as i64)).collect()
        };
        let cases = expand("TestProp", &list("a", inputs), &list("b", dtypes), &list("c", attrs)).unwrap();
        prop_assert_eq!(cases.len(), inputs * dtypes * attrs);
        for (index, case) in cases.iter().enumerate() {
            prop_assert_eq!(case.name(), format!("TestProp_{index}"));
            // Attrs vary fastest.
            prop_assert_eq!(case.int("c").unwrap(), (index % attrs) as i64);
            prop_assert_eq!(case.int("a").unwrap(), (index / (dtypes * attrs)) as i64);
        }
    }
}
