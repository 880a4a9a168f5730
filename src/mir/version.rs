//! Dotted-version comparison for `version_compare()` and friends.

use std::cmp::Ordering;

use itertools::{EitherOrBoth, Itertools};

/// What kind of comparison is being done
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Operator {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = ">")]
    Gt,
}

/// Order two dotted version strings. Segments are compared numerically when
/// both parse as integers, lexicographically otherwise; a missing segment
/// counts as zero ("1.2" == "1.2.0").
fn order(a: &str, b: &str) -> Ordering {
    for pair in a.split('.').zip_longest(b.split('.')) {
        let (left, right) = match pair {
            EitherOrBoth::Both(left, right) => (left, right),
            EitherOrBoth::Left(left) => (left, "0"),
            EitherOrBoth::Right(right) => ("0", right),
        };

        let segment = match (left.parse::<u64>(), right.parse::<u64>()) {
            (Ok(left), Ok(right)) => left.cmp(&right),
            _ => left.cmp(right),
        };

        if segment != Ordering::Equal {
            return segment;
        }
    }

    Ordering::Equal
}

pub fn compare(v1: &str, op: Operator, v2: &str) -> bool {
    let ordering = order(v1, v2);
    match op {
        Operator::Lt => ordering == Ordering::Less,
        Operator::Le => ordering != Ordering::Greater,
        Operator::Ne => ordering != Ordering::Equal,
        Operator::Eq => ordering == Ordering::Equal,
        Operator::Ge => ordering != Ordering::Less,
        Operator::Gt => ordering == Ordering::Greater,
    }
}
