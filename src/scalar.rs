//! Heterogeneous scalar operands and the distances between them.

use crate::distance::{
    distance_to_equality_f64, distance_to_equality_i64, left_alignment_distance, normalize,
    MAX_DISTANCE,
};
use crate::truthness::Truthness;

/// A scalar value observed at a probe site.
///
/// One variant per category the engine knows a distance for. Comparing values
/// of different categories gives [`MAX_DISTANCE`]: there is no meaningful
/// gradient between, say, a string and a timestamp.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ScalarValue<'a> {
    Int(i64),
    Float(f64),
    Char(char),
    Bool(bool),
    Str(&'a str),
    /// Epoch milliseconds.
    Timestamp(i64),
}

/// Distance to equality between two scalars.
pub fn distance_between(left: &ScalarValue, right: &ScalarValue) -> f64 {
    use ScalarValue::*;
    match (left, right) {
        (Int(a), Int(b)) => distance_to_equality_i64(*a, *b),
        (Float(a), Float(b)) => distance_to_equality_f64(*a, *b),
        (Char(a), Char(b)) => distance_to_equality_i64(*a as i64, *b as i64),
        (Bool(a), Bool(b)) => {
            if a == b {
                0.0
            } else {
                1.0
            }
        }
        (Str(a), Str(b)) => left_alignment_distance(a, b) as f64,
        (Timestamp(a), Timestamp(b)) => distance_to_equality_i64(*a, *b),
        // mixed numeric categories still have a usable gradient
        (Int(a), Float(b)) | (Float(b), Int(a)) => distance_to_equality_f64(*a as f64, *b),
        _ => MAX_DISTANCE,
    }
}

/// Distance to equality where either side may be absent.
///
/// Both absent is a match; one absent is as far as it gets.
pub fn distance_between_optional(
    left: Option<&ScalarValue>,
    right: Option<&ScalarValue>,
) -> f64 {
    match (left, right) {
        (None, None) => 0.0,
        (Some(l), Some(r)) => distance_between(l, r),
        _ => MAX_DISTANCE,
    }
}

/// Truthness of `left == right` for two scalars.
pub fn equality_truthness(left: &ScalarValue, right: &ScalarValue) -> Truthness {
    let distance = distance_between(left, right);
    if distance == 0.0 {
        Truthness::TRUE
    } else {
        let of_true = (1.0 - normalize(distance)).min(1.0 - f64::EPSILON);
        Truthness::new(of_true, 1.0)
    }
}
