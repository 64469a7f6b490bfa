//! Operator suites for `roll`, `cosh` and `mod`, and the harness that runs them against a
//! candidate backend with the reference backend as the oracle.

pub mod common;
pub mod harness;
pub mod suites;

/// Generates one `#[test]` per shipped suite, grouped by operator, for the backend built by
/// `$candidate_ctor`.
///
/// ```ignore
/// opcheck_conformance::define_conformance_tests!(compiled, opcheck_backend_compiled::CompiledBackend::new);
/// ```
#[macro_export]
macro_rules! define_conformance_tests {
    ($module:ident, $candidate_ctor:expr) => {
        mod $module {
            macro_rules! conformance_test {
                ($name:ident, $suite:path) => {
                    #[test]
                    fn $name() {
                        let candidate = ($candidate_ctor)();
                        if let Err(err) = $crate::harness::run_suite(candidate, $suite()) {
                            panic!("{err:#}");
                        }
                    }
                };
            }

            mod roll {
                conformance_test!(test_roll_op, $crate::suites::roll::test_roll_op);
                conformance_test!(test_roll_case1, $crate::suites::roll::test_roll_case1);
                conformance_test!(test_roll_case2, $crate::suites::roll::test_roll_case2);
                conformance_test!(test_roll_case3, $crate::suites::roll::test_roll_case3);
                conformance_test!(test_roll_case4, $crate::suites::roll::test_roll_case4);
                conformance_test!(test_roll_case5, $crate::suites::roll::test_roll_case5);
                conformance_test!(test_roll_case6, $crate::suites::roll::test_roll_case6);
                conformance_test!(test_roll_axes_empty, $crate::suites::roll::test_roll_axes_empty);
            }

            mod cosh {
                conformance_test!(test_cosh_op_shape, $crate::suites::cosh::test_cosh_op_shape);
                conformance_test!(test_cosh_op_dtype, $crate::suites::cosh::test_cosh_op_dtype);
            }

            mod modulo {
                conformance_test!(test_mod_op_shape, $crate::suites::modulo::test_mod_op_shape);
                conformance_test!(test_mod_op_dtype, $crate::suites::modulo::test_mod_op_dtype);
                conformance_test!(test_mod_op_polarity, $crate::suites::modulo::test_mod_op_polarity);
                conformance_test!(test_mod_op_broadcast, $crate::suites::modulo::test_mod_op_broadcast);
            }
        }
    };
}
