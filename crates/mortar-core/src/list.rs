//! Helpers for Mortar's `;`-separated string lists and the truth constants
//! shared by the condition evaluator and the loop commands.

pub const LIST_SEPARATOR: char = ';';

/// Whether empty elements survive a split. Mirrors the `KeepEmptyListElements`
/// policy decision made by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyElements {
    Keep,
    Drop,
}

/// Splits a list string on unescaped `;`. `\;` stays a literal semicolon
/// inside the element.
pub fn split_list(value: &str, empty: EmptyElements) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }

    let mut elements = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' && chars.peek() == Some(&LIST_SEPARATOR) {
            current.push(LIST_SEPARATOR);
            chars.next();
        } else if ch == LIST_SEPARATOR {
            elements.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    elements.push(current);

    if empty == EmptyElements::Drop {
        elements.retain(|element| !element.is_empty());
    }
    elements
}

pub fn join_list(elements: &[String]) -> String {
    elements.join(";")
}

/// True constants: `1`, `ON`, `YES`, `TRUE`, `Y` (case-insensitive) or any
/// string that parses entirely as a non-zero number.
pub fn is_on(value: &str) -> bool {
    let upper = value.to_ascii_uppercase();
    if matches!(upper.as_str(), "1" | "ON" | "YES" | "TRUE" | "Y") {
        return true;
    }
    matches!(parse_number(value), Some(number) if number != 0.0)
}

/// False constants: empty, `0`, `OFF`, `NO`, `FALSE`, `N`, `IGNORE`,
/// `NOTFOUND` and anything ending in `-NOTFOUND` (case-insensitive).
pub fn is_off(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let upper = value.to_ascii_uppercase();
    matches!(
        upper.as_str(),
        "0" | "OFF" | "NO" | "FALSE" | "N" | "IGNORE" | "NOTFOUND"
    ) || upper.ends_with("-NOTFOUND")
}

/// The whole-token numeric predicate: the trimmed token must be non-empty and
/// parse completely as an `f64`. Anything else is "not a number" and sends
/// comparisons down the lexicographic fallback.
pub fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
}

impl CompareOp {
    pub fn eval_ordering(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Less => ordering == Less,
            CompareOp::LessEqual => ordering != Greater,
            CompareOp::Greater => ordering == Greater,
            CompareOp::GreaterEqual => ordering != Less,
            CompareOp::Equal => ordering == Equal,
        }
    }
}

/// Dotted-version comparison. Components compare numerically; a missing
/// component counts as zero; a non-numeric component counts as zero as well.
pub fn version_compare(op: CompareOp, lhs: &str, rhs: &str) -> bool {
    let left = version_components(lhs);
    let right = version_components(rhs);
    let len = left.len().max(right.len());
    for index in 0..len {
        let l = left.get(index).copied().unwrap_or(0);
        let r = right.get(index).copied().unwrap_or(0);
        if l != r {
            return op.eval_ordering(l.cmp(&r));
        }
    }
    op.eval_ordering(std::cmp::Ordering::Equal)
}

fn version_components(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|component| {
            let digits: String = component.chars().take_while(|ch| ch.is_ascii_digit()).collect();
            digits.parse::<u64>().unwrap_or(0)
        })
        .collect()
}

#[cfg(test)]
mod list_tests {
    use super::*;

    #[test]
    fn split_respects_escapes_and_empties() {
        assert_eq!(
            split_list("a;;b", EmptyElements::Keep),
            vec!["a".to_string(), String::new(), "b".to_string()]
        );
        assert_eq!(
            split_list("a;;b", EmptyElements::Drop),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            split_list(r"a\;b;c", EmptyElements::Keep),
            vec!["a;b".to_string(), "c".to_string()]
        );
        assert!(split_list("", EmptyElements::Keep).is_empty());
    }

    #[test]
    fn truth_constants_follow_the_documented_table() {
        for value in ["1", "ON", "on", "Yes", "TRUE", "y", "2", "0.5", "-3"] {
            assert!(is_on(value), "expected {value:?} to be on");
        }
        for value in ["", "0", "OFF", "no", "False", "n", "IGNORE", "NOTFOUND", "FOO-NOTFOUND"] {
            assert!(is_off(value), "expected {value:?} to be off");
        }
        assert!(!is_on("banana"));
        assert!(!is_off("banana"));
    }

    #[test]
    fn parse_number_requires_the_whole_token() {
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number(" 1.5 "), Some(1.5));
        assert_eq!(parse_number("1x"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn version_compare_handles_uneven_lengths() {
        assert!(version_compare(CompareOp::Less, "1.2", "1.10"));
        assert!(version_compare(CompareOp::Equal, "1.2.0", "1.2"));
        assert!(version_compare(CompareOp::GreaterEqual, "2.0.1", "2"));
        assert!(!version_compare(CompareOp::Greater, "1.2", "1.2"));
    }
}
