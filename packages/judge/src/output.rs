//! Output equivalence rule: trailing whitespace at line ends and
//! trailing empty lines are ignored; every other difference (internal
//! whitespace, ordering, casing) is a mismatch.

/// Compare actual program output against the expected output under the
/// normalization rule.
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize(actual) == normalize(expected)
}

fn normalize(s: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = s.lines().map(|l| l.trim_end()).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}
