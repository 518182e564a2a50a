//! Branch-distance heuristics for conditional jumps.
//!
//! Each builder turns the operand value(s) observed right before a conditional
//! jump into a [`Truthness`] for the jump condition. Only two primitives are
//! ever evaluated directly — equality and less-than — and every other kind is
//! derived from them by inversion or operand swap, so the whole family stays
//! internally consistent (see the algebraic identities in the tests).

use crate::truthness::{equality_truthness_i64, less_than_truthness_i64, Truthness};

/// Comparison of a single value against zero.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UnaryCmp {
    /// `value == 0`
    Eq,
    /// `value != 0`
    Ne,
    /// `value < 0`
    Lt,
    /// `value >= 0`
    Ge,
    /// `value <= 0`
    Le,
    /// `value > 0`
    Gt,
}

/// Comparison of two values.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BinaryCmp {
    Eq,
    Ne,
    Lt,
    Ge,
    Le,
    Gt,
}

/// Reference-identity comparison. No numeric gradient exists for pointer
/// identity, so the resulting truthness is always binary.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RefCmp {
    Eq,
    Ne,
}

/// Null check. Binary, like [`RefCmp`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NullCmp {
    Null,
    NonNull,
}

/// Truthness for a jump testing a single value against zero.
pub fn for_single_value_jump(value: i64, cmp: UnaryCmp) -> Truthness {
    match cmp {
        UnaryCmp::Eq => for_value_comparison(value, 0, BinaryCmp::Eq),
        UnaryCmp::Ne => for_single_value_jump(value, UnaryCmp::Eq).invert(),
        UnaryCmp::Lt => for_value_comparison(value, 0, BinaryCmp::Lt),
        UnaryCmp::Ge => for_single_value_jump(value, UnaryCmp::Lt).invert(),
        // value <= 0  ->  !(0 < value)
        UnaryCmp::Le => for_value_comparison(0, value, BinaryCmp::Lt).invert(),
        // value > 0  ->  0 < value
        UnaryCmp::Gt => for_value_comparison(0, value, BinaryCmp::Lt),
    }
}

/// Truthness for a jump comparing two values.
pub fn for_value_comparison(first: i64, second: i64, cmp: BinaryCmp) -> Truthness {
    match cmp {
        BinaryCmp::Eq => equality_truthness_i64(first, second),
        BinaryCmp::Ne => for_value_comparison(first, second, BinaryCmp::Eq).invert(),
        BinaryCmp::Lt => less_than_truthness_i64(first, second),
        BinaryCmp::Ge => for_value_comparison(first, second, BinaryCmp::Lt).invert(),
        // a <= b  ->  !(b < a)
        BinaryCmp::Le => for_value_comparison(second, first, BinaryCmp::Lt).invert(),
        // a > b  ->  b < a
        BinaryCmp::Gt => for_value_comparison(second, first, BinaryCmp::Lt),
    }
}

/// Truthness for a jump comparing two references for identity.
///
/// The caller resolves identity; either the references are the same or they
/// are not, with no partial credit.
pub fn for_ref_comparison(same: bool, cmp: RefCmp) -> Truthness {
    match cmp {
        RefCmp::Eq => {
            if same {
                Truthness::TRUE
            } else {
                Truthness::FALSE
            }
        }
        RefCmp::Ne => for_ref_comparison(same, RefCmp::Eq).invert(),
    }
}

/// Truthness for a null-check jump.
pub fn for_null_comparison(is_null: bool, cmp: NullCmp) -> Truthness {
    match cmp {
        NullCmp::Null => for_ref_comparison(is_null, RefCmp::Eq),
        NullCmp::NonNull => for_ref_comparison(is_null, RefCmp::Ne),
    }
}

impl UnaryCmp {
    /// The kind testing the opposite condition.
    pub fn negated(self) -> Self {
        match self {
            UnaryCmp::Eq => UnaryCmp::Ne,
            UnaryCmp::Ne => UnaryCmp::Eq,
            UnaryCmp::Lt => UnaryCmp::Ge,
            UnaryCmp::Ge => UnaryCmp::Lt,
            UnaryCmp::Le => UnaryCmp::Gt,
            UnaryCmp::Gt => UnaryCmp::Le,
        }
    }
}

impl BinaryCmp {
    /// The kind testing the opposite condition.
    pub fn negated(self) -> Self {
        match self {
            BinaryCmp::Eq => BinaryCmp::Ne,
            BinaryCmp::Ne => BinaryCmp::Eq,
            BinaryCmp::Lt => BinaryCmp::Ge,
            BinaryCmp::Ge => BinaryCmp::Lt,
            BinaryCmp::Le => BinaryCmp::Gt,
            BinaryCmp::Gt => BinaryCmp::Le,
        }
    }
}
