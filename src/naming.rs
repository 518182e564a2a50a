//! Descriptive-id scheme for coverage objectives.
//!
//! Ids are plain strings with a stable prefix per objective category, so
//! clients can select categories by prefix matching (e.g. "all line
//! objectives of class X"). Line numbers are zero-padded so lexicographic
//! order matches numeric order.

/// Prefix of class coverage objectives. A class is covered once at least one
/// of its lines executes.
pub const CLASS: &str = "Class";

/// Prefix of line coverage objectives.
pub const LINE: &str = "Line";

/// Prefix of branch coverage objectives.
pub const BRANCH: &str = "Branch";

/// Tag marking the "true"/then outcome in a branch id.
pub const TRUE_BRANCH: &str = "_trueBranch";

/// Tag marking the "false"/else outcome in a branch id.
pub const FALSE_BRANCH: &str = "_falseBranch";

/// Prefix of objectives for method calls completing without throwing.
pub const SUCCESS_CALL: &str = "Success_Call";

/// Prefix of three-way numeric comparison objectives.
pub const NUMERIC_COMPARISON: &str = "NumericComparison";

pub fn class_objective_name(class_name: &str) -> String {
    format!("{}_{}", CLASS, class_name)
}

pub fn line_objective_name(class_name: &str, line: u32) -> String {
    format!("{}_at_{}_{}", LINE, class_name, pad_number(line))
}

pub fn branch_objective_name(class_name: &str, line: u32, branch_id: usize, then_branch: bool) -> String {
    let tag = if then_branch { TRUE_BRANCH } else { FALSE_BRANCH };
    format!(
        "{}_at_{}_at_line_{}_position_{}{}",
        BRANCH,
        class_name,
        pad_number(line),
        branch_id,
        tag
    )
}

pub fn success_call_objective_name(class_name: &str, line: u32, index: usize) -> String {
    format!(
        "{}_at_{}_{}_{}",
        SUCCESS_CALL,
        class_name,
        pad_number(line),
        index
    )
}

/// Name for one outcome of a three-way numeric comparison; `res` is the sign
/// of the comparison (negative, zero, positive).
pub fn numeric_comparison_objective_name(id_template: &str, res: i32) -> String {
    let outcome = if res == 0 {
        "EQ"
    } else if res < 0 {
        "LT"
    } else {
        "GT"
    };
    format!("{}_{}_{}", NUMERIC_COMPARISON, id_template, outcome)
}

fn pad_number(value: u32) -> String {
    format!("{:05}", value)
}
