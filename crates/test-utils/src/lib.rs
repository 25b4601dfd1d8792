//! Shared test utilities for the hydro-retrieval workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Fixed times, features and a populated identifier cache
//! - Row generators for forecasts, observations and ensembles
//! - An in-memory query backend that counts cursor opens and closes
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, MockBackend, RowBuilder};
//! ```

pub mod fixtures;
pub mod generators;
pub mod mocks;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use mocks::*;

/// Asserts that an event value is within a tolerance of the expected value.
///
/// The tolerance defaults to `1e-9` and scales with the magnitude of the
/// expected value, so flows in the thousands compare the same way as stages.
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(series.events()[0].value, 1002.0);
/// assert_approx_eq!(stage, 4.5, 1e-3);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($actual:expr, $expected:expr) => {
        $crate::assert_approx_eq!($actual, $expected, 1e-9)
    };
    ($actual:expr, $expected:expr, $tolerance:expr) => {{
        let actual: f64 = $actual;
        let expected: f64 = $expected;
        let allowed = $tolerance * expected.abs().max(1.0);
        let within = (actual - expected).abs() <= allowed;
        if !within {
            panic!(
                "assertion failed: expected a value near `{:?}` (within {:?}), got `{:?}`",
                expected, allowed, actual
            );
        }
    }};
}

/// Asserts that one value in a series is the missing marker.
///
/// ```ignore
/// use test_utils::assert_missing;
///
/// assert_missing!(series.events()[0].value);
/// ```
#[macro_export]
macro_rules! assert_missing {
    ($value:expr) => {{
        let value: f64 = $value;
        if !value.is_nan() {
            panic!("assertion failed: expected a missing value, got `{:?}`", value);
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_approx_eq_scales_with_magnitude() {
        assert_approx_eq!(0.1 + 0.2, 0.3);
        assert_approx_eq!(1002.000_000_5, 1002.0);
        assert_approx_eq!(4.501, 4.5, 1e-3);
    }

    #[test]
    #[should_panic(expected = "expected a value near")]
    fn test_assert_approx_eq_rejects_distant_value() {
        assert_approx_eq!(1003.0, 1002.0);
    }

    #[test]
    #[should_panic(expected = "expected a value near")]
    fn test_assert_approx_eq_rejects_missing_value() {
        assert_approx_eq!(f64::NAN, 1.0);
    }

    #[test]
    fn test_assert_missing_passes() {
        assert_missing!(f64::NAN);
    }

    #[test]
    #[should_panic(expected = "expected a missing value")]
    fn test_assert_missing_fails() {
        assert_missing!(1.0);
    }
}
