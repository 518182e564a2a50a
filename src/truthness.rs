//! The `(of_true, of_false)` heuristic pair for a single evaluated condition.

use std::fmt;

use crate::distance::{
    distance_to_equality_f64, distance_to_equality_i64, heuristic_from_scaled_distance_with_base,
    left_alignment_distance, normalize, H_NOT_NULL,
};

/// How true and how false an evaluated condition was.
///
/// Both components are in `[0,1]` and exactly one of them equals 1: a branch
/// always resolves one way, and the other component measures how close the
/// operands came to flipping it (gradient for the search).
///
/// # Invariants
///
/// - `of_true` and `of_false` are both in `[0,1]`
/// - exactly one of the two equals 1.0
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Truthness {
    of_true: f64,
    of_false: f64,
}

impl Truthness {
    /// The condition held exactly, with no gradient toward false.
    pub const TRUE: Truthness = Truthness {
        of_true: 1.0,
        of_false: 0.0,
    };

    /// The condition failed exactly, with no gradient toward true.
    pub const FALSE: Truthness = Truthness {
        of_true: 0.0,
        of_false: 1.0,
    };

    /// The condition failed, but the target was at least reached with a
    /// usable value. Tuned against the search; do not re-derive.
    pub const FALSE_BETTER: Truthness = Truthness {
        of_true: H_NOT_NULL,
        of_false: 1.0,
    };

    /// The condition failed and the value was absent. Strictly worse than
    /// [`Truthness::FALSE_BETTER`]. Tuned against the search; do not re-derive.
    pub const FALSE_LOWER: Truthness = Truthness {
        of_true: H_NOT_NULL / 2.0,
        of_false: 1.0,
    };

    /// Create a new pair.
    ///
    /// # Panics
    ///
    /// Panics if either component is outside `[0,1]`, or if the
    /// exactly-one-side-is-1 invariant does not hold.
    pub fn new(of_true: f64, of_false: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&of_true),
            "Invalid of_true: {}",
            of_true
        );
        assert!(
            (0.0..=1.0).contains(&of_false),
            "Invalid of_false: {}",
            of_false
        );
        assert!(
            of_true == 1.0 || of_false == 1.0,
            "At least one value should be equal to 1"
        );
        assert!(
            !(of_true == 1.0 && of_false == 1.0),
            "Values cannot both be equal to 1"
        );

        Self { of_true, of_false }
    }

    pub fn of_true(&self) -> f64 {
        self.of_true
    }
    pub fn of_false(&self) -> f64 {
        self.of_false
    }

    /// Swap the two components, turning the truthness of `c` into the
    /// truthness of `!c`.
    pub fn invert(&self) -> Self {
        Self {
            of_true: self.of_false,
            of_false: self.of_true,
        }
    }

    pub fn is_true(&self) -> bool {
        self.of_true == 1.0
    }
    pub fn is_false(&self) -> bool {
        self.of_false == 1.0
    }
}

impl fmt::Display for Truthness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.of_true, self.of_false)
    }
}

/// Truthness of `a == b` for integer scalars.
///
/// When unequal, `of_true` grows toward 1 as the operands approach each other;
/// ties are resolved by absolute distance, not sign.
pub fn equality_truthness_i64(a: i64, b: i64) -> Truthness {
    if a == b {
        return Truthness::TRUE;
    }
    let normalized = normalize(distance_to_equality_i64(a, b));
    // distinct i64s can collide once cast to f64; of_true must stay below 1
    let of_true = (1.0 - normalized).min(1.0 - f64::EPSILON);
    Truthness::new(of_true, 1.0)
}

/// Truthness of `a == b` for floating-point scalars.
pub fn equality_truthness_f64(a: f64, b: f64) -> Truthness {
    // NaN is equal to nothing, not even itself.
    if a == b {
        return Truthness::TRUE;
    }
    let normalized = normalize(distance_to_equality_f64(a, b));
    // a tiny distance can round 1 - normalized back up to 1
    let of_true = (1.0 - normalized).min(1.0 - f64::EPSILON);
    Truthness::new(of_true, 1.0)
}

/// Truthness of `a < b` for integer scalars.
///
/// The non-satisfied side takes the value `1 / (1.1 + distance)`: the 1.1
/// keeps the division bounded at distance 0 while staying strictly below 1,
/// so the single-1.0 invariant holds even under floating error.
pub fn less_than_truthness_i64(a: i64, b: i64) -> Truthness {
    let distance = distance_to_equality_i64(a, b);
    Truthness::new(
        if a < b { 1.0 } else { 1.0 / (1.1 + distance) },
        if a >= b { 1.0 } else { 1.0 / (1.1 + distance) },
    )
}

/// Truthness of `a < b` for floating-point scalars.
pub fn less_than_truthness_f64(a: f64, b: f64) -> Truthness {
    let distance = distance_to_equality_f64(a, b);
    Truthness::new(
        if a < b { 1.0 } else { 1.0 / (1.1 + distance) },
        if !(a < b) { 1.0 } else { 1.0 / (1.1 + distance) },
    )
}

/// Truthness of `a == b` for strings, based on the left-alignment distance.
///
/// Equal strings yield `(1, H_NOT_NULL)`: the false side keeps the "reached
/// with a non-null value" credit rather than dropping to 0. Unequal strings
/// yield a true side scaled from the same base, so any observed string beats
/// a null one.
pub fn string_equality_truthness(a: &str, b: &str) -> Truthness {
    if a == b {
        return Truthness::new(1.0, H_NOT_NULL);
    }
    let distance = left_alignment_distance(a, b) as f64;
    let h = heuristic_from_scaled_distance_with_base(H_NOT_NULL, distance);
    Truthness::new(h, 1.0)
}
