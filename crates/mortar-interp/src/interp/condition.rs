use std::cmp::Ordering;

use mortar_core::{
    is_off, is_on, parse_number, split_list, version_compare, CompareOp, EmptyElements,
    ExpandedArgument, MortarError,
};

use super::policy::{Policy, PolicyStatus};
use super::state::Interpreter;

const KEY_AND: &str = "AND";
const KEY_OR: &str = "OR";
const KEY_NOT: &str = "NOT";
const KEY_PAREN_L: &str = "(";
const KEY_PAREN_R: &str = ")";
const KEY_COMMAND: &str = "COMMAND";
const KEY_DEFINED: &str = "DEFINED";
const KEY_EXISTS: &str = "EXISTS";
const KEY_IS_ABSOLUTE: &str = "IS_ABSOLUTE";
const KEY_IS_DIRECTORY: &str = "IS_DIRECTORY";
const KEY_IS_SYMLINK: &str = "IS_SYMLINK";
const KEY_POLICY: &str = "POLICY";
const KEY_TARGET: &str = "TARGET";
const KEY_MATCHES: &str = "MATCHES";
const KEY_IN_LIST: &str = "IN_LIST";

const NUMERIC_OPS: [(&str, CompareOp); 5] = [
    ("LESS", CompareOp::Less),
    ("LESS_EQUAL", CompareOp::LessEqual),
    ("GREATER", CompareOp::Greater),
    ("GREATER_EQUAL", CompareOp::GreaterEqual),
    ("EQUAL", CompareOp::Equal),
];

const STRING_OPS: [(&str, CompareOp); 5] = [
    ("STRLESS", CompareOp::Less),
    ("STRLESS_EQUAL", CompareOp::LessEqual),
    ("STRGREATER", CompareOp::Greater),
    ("STRGREATER_EQUAL", CompareOp::GreaterEqual),
    ("STREQUAL", CompareOp::Equal),
];

const VERSION_OPS: [(&str, CompareOp); 5] = [
    ("VERSION_LESS", CompareOp::Less),
    ("VERSION_LESS_EQUAL", CompareOp::LessEqual),
    ("VERSION_GREATER", CompareOp::Greater),
    ("VERSION_GREATER_EQUAL", CompareOp::GreaterEqual),
    ("VERSION_EQUAL", CompareOp::Equal),
];

fn bool_token(value: bool) -> ExpandedArgument {
    // Reduced results count as quoted so later passes treat them literally.
    ExpandedArgument::new(if value { "1" } else { "0" }, true)
}

/// Reduces a token list to one boolean by fixed operator-precedence passes:
/// parentheses, then unary predicates, then binary operators, then `NOT`,
/// then `AND`, then `OR`. Each pass repeatedly collapses its leftmost
/// occurrence until none remains.
pub struct ConditionEvaluator<'i> {
    interp: &'i mut Interpreter,
}

impl<'i> ConditionEvaluator<'i> {
    pub fn new(interp: &'i mut Interpreter) -> Self {
        Self { interp }
    }

    pub fn is_true(&mut self, args: &[ExpandedArgument]) -> Result<bool, MortarError> {
        if args.is_empty() {
            return Ok(false);
        }

        let mut list = args.to_vec();
        self.reduce_parentheses(&mut list)?;
        self.reduce_predicates(&mut list)?;
        self.reduce_binary_operators(&mut list)?;
        self.reduce_not(&mut list);
        self.reduce_connective(&mut list, KEY_AND);
        self.reduce_connective(&mut list, KEY_OR);

        if list.len() != 1 {
            let original: Vec<&str> = args.iter().map(|arg| arg.value.as_str()).collect();
            return Err(MortarError::new(
                "COND_MALFORMED_EXPRESSION",
                format!(
                    "Unknown arguments specified in condition \"{}\".",
                    original.join(" ")
                ),
            ));
        }
        Ok(self.boolean_with_auto_dereference(&list[0], true))
    }

    /// A token acts as a keyword only when unquoted, unless the
    /// `QuotedArgDeref` compatibility policy is still `Old`.
    fn is_keyword(&self, keyword: &str, arg: &ExpandedArgument) -> bool {
        if arg.quoted && self.interp.policy_status(Policy::QuotedArgDeref) == PolicyStatus::New {
            return false;
        }
        arg.value == keyword
    }

    fn definition_if_unquoted(&self, arg: &ExpandedArgument) -> Option<&str> {
        if arg.quoted && self.interp.policy_status(Policy::QuotedArgDeref) == PolicyStatus::New {
            return None;
        }
        self.interp.get_variable(&arg.value)
    }

    fn variable_or_string(&self, arg: &ExpandedArgument) -> String {
        self.definition_if_unquoted(arg)
            .unwrap_or(&arg.value)
            .to_string()
    }

    fn boolean_value(&self, arg: &ExpandedArgument) -> bool {
        if is_on(&arg.value) {
            return true;
        }
        if is_off(&arg.value) {
            return false;
        }
        if let Some(number) = parse_number(&arg.value) {
            return number != 0.0;
        }
        matches!(self.definition_if_unquoted(arg), Some(value) if !is_off(value))
    }

    /// Boolean behavior from before the `BareConstantDeref` policy: almost
    /// everything dereferences as a variable name.
    fn boolean_value_old(&self, arg: &ExpandedArgument, one_arg: bool) -> bool {
        if one_arg {
            if arg.value == "0" {
                return false;
            }
            if arg.value == "1" {
                return true;
            }
            return matches!(self.definition_if_unquoted(arg), Some(value) if !is_off(value));
        }
        match self.definition_if_unquoted(arg) {
            Some(value) => !is_off(value),
            None => leading_integer(&arg.value) != 0 && !is_off(&arg.value),
        }
    }

    /// The legacy auto-dereference compatibility point: gated by the same
    /// policy everywhere a bare token is coerced to a boolean.
    fn boolean_with_auto_dereference(&self, arg: &ExpandedArgument, one_arg: bool) -> bool {
        match self.interp.policy_status(Policy::BareConstantDeref) {
            PolicyStatus::New => self.boolean_value(arg),
            PolicyStatus::Old => self.boolean_value_old(arg, one_arg),
        }
    }

    // Pass 1: innermost parenthetical groups, evaluated recursively.
    fn reduce_parentheses(
        &mut self,
        list: &mut Vec<ExpandedArgument>,
    ) -> Result<(), MortarError> {
        let mut index = 0;
        while index < list.len() {
            if !self.is_keyword(KEY_PAREN_L, &list[index]) {
                index += 1;
                continue;
            }
            let mut depth = 1usize;
            let mut close = index + 1;
            while close < list.len() && depth > 0 {
                if self.is_keyword(KEY_PAREN_L, &list[close]) {
                    depth += 1;
                } else if self.is_keyword(KEY_PAREN_R, &list[close]) {
                    depth -= 1;
                }
                close += 1;
            }
            if depth != 0 {
                return Err(MortarError::new(
                    "COND_MISMATCHED_PAREN",
                    "Mismatched parenthesis in condition.",
                ));
            }
            let sub: Vec<ExpandedArgument> = list[index + 1..close - 1].to_vec();
            let value = self.is_true(&sub)?;
            list.splice(index..close, [bool_token(value)]);
            index += 1;
        }
        Ok(())
    }

    // Pass 2: unary predicates consuming the keyword and one operand.
    fn reduce_predicates(&mut self, list: &mut Vec<ExpandedArgument>) -> Result<(), MortarError> {
        let mut index = 0;
        while index + 1 < list.len() {
            let operand = list[index + 1].value.clone();
            let reduced = if self.is_keyword(KEY_EXISTS, &list[index]) {
                Some(self.interp.inspector.path_exists(&operand))
            } else if self.is_keyword(KEY_IS_DIRECTORY, &list[index]) {
                Some(self.interp.inspector.is_directory(&operand))
            } else if self.is_keyword(KEY_IS_SYMLINK, &list[index]) {
                Some(self.interp.inspector.is_symlink(&operand))
            } else if self.is_keyword(KEY_IS_ABSOLUTE, &list[index]) {
                Some(self.interp.inspector.is_absolute_path(&operand))
            } else if self.is_keyword(KEY_COMMAND, &list[index]) {
                Some(self.interp.has_command(&operand))
            } else if self.is_keyword(KEY_TARGET, &list[index]) {
                Some(self.interp.inspector.target_exists(&operand))
            } else if self.is_keyword(KEY_POLICY, &list[index]) {
                Some(Policy::from_id(&operand).is_some())
            } else if self.is_keyword(KEY_DEFINED, &list[index]) {
                Some(self.defined_predicate(&operand))
            } else {
                None
            };

            match reduced {
                Some(value) => {
                    list.splice(index..index + 2, [bool_token(value)]);
                }
                None => index += 1,
            }
        }
        Ok(())
    }

    fn defined_predicate(&self, operand: &str) -> bool {
        // `DEFINED ENV{name}` probes the process environment.
        if let Some(name) = operand
            .strip_prefix("ENV{")
            .and_then(|rest| rest.strip_suffix('}'))
        {
            return std::env::var_os(name).is_some();
        }
        self.interp.is_variable_defined(operand)
    }

    // Pass 3: binary operators, the operator keyword sitting between its
    // operands.
    fn reduce_binary_operators(
        &mut self,
        list: &mut Vec<ExpandedArgument>,
    ) -> Result<(), MortarError> {
        let mut index = 0;
        while index < list.len() {
            // `x MATCHES` with nothing after it: the pattern expanded away;
            // the whole expression collapses to false.
            if index + 1 < list.len() && self.is_keyword(KEY_MATCHES, &list[index]) {
                list.splice(index..index + 2, [bool_token(false)]);
                continue;
            }
            if index + 2 >= list.len() {
                index += 1;
                continue;
            }

            if self.is_keyword(KEY_MATCHES, &list[index + 1]) {
                let value = self.regex_match(list, index)?;
                list.splice(index..index + 3, [bool_token(value)]);
                continue;
            }

            if let Some(op) = self.match_operator(&list[index + 1], &NUMERIC_OPS) {
                let lhs = self.variable_or_string(&list[index]);
                let rhs = self.variable_or_string(&list[index + 2]);
                let value = match (parse_number(&lhs), parse_number(&rhs)) {
                    (Some(left), Some(right)) => {
                        op.eval_ordering(left.partial_cmp(&right).unwrap_or(Ordering::Equal))
                    }
                    // Either side fails the whole-token numeric parse:
                    // lexicographic string comparison.
                    _ => op.eval_ordering(lhs.cmp(&rhs)),
                };
                list.splice(index..index + 3, [bool_token(value)]);
                continue;
            }

            if let Some(op) = self.match_operator(&list[index + 1], &STRING_OPS) {
                let lhs = self.variable_or_string(&list[index]);
                let rhs = self.variable_or_string(&list[index + 2]);
                let value = op.eval_ordering(lhs.cmp(&rhs));
                list.splice(index..index + 3, [bool_token(value)]);
                continue;
            }

            if let Some(op) = self.match_operator(&list[index + 1], &VERSION_OPS) {
                let lhs = self.variable_or_string(&list[index]);
                let rhs = self.variable_or_string(&list[index + 2]);
                let value = version_compare(op, &lhs, &rhs);
                list.splice(index..index + 3, [bool_token(value)]);
                continue;
            }

            if self.is_keyword(KEY_IN_LIST, &list[index + 1])
                && self.interp.policy_status(Policy::InListOperator) == PolicyStatus::New
            {
                let needle = self.variable_or_string(&list[index]);
                let value = self
                    .interp
                    .get_variable(&list[index + 2].value)
                    .map(|haystack| {
                        split_list(haystack, EmptyElements::Keep).contains(&needle)
                    })
                    .unwrap_or(false);
                list.splice(index..index + 3, [bool_token(value)]);
                continue;
            }

            index += 1;
        }
        Ok(())
    }

    fn match_operator(
        &self,
        arg: &ExpandedArgument,
        table: &[(&str, CompareOp)],
    ) -> Option<CompareOp> {
        table
            .iter()
            .find(|(keyword, _)| self.is_keyword(keyword, arg))
            .map(|(_, op)| *op)
    }

    fn regex_match(
        &mut self,
        list: &[ExpandedArgument],
        index: usize,
    ) -> Result<bool, MortarError> {
        // Copy the subject before clearing: it may itself live in a capture
        // variable from a previous match.
        let subject = self.variable_or_string(&list[index]);
        let pattern = &list[index + 2].value;

        self.interp.clear_match_captures();
        let regex = regex::Regex::new(pattern).map_err(|error| {
            MortarError::new(
                "COND_BAD_REGEX",
                format!("Regular expression \"{}\" cannot compile: {}", pattern, error),
            )
        })?;
        match regex.captures(&subject) {
            Some(captures) => {
                self.interp.store_match_captures(&captures);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // Pass 4: NOT.
    fn reduce_not(&mut self, list: &mut Vec<ExpandedArgument>) {
        let mut index = 0;
        while index + 1 < list.len() {
            if self.is_keyword(KEY_NOT, &list[index]) {
                let value = !self.boolean_with_auto_dereference(&list[index + 1], false);
                list.splice(index..index + 2, [bool_token(value)]);
            } else {
                index += 1;
            }
        }
    }

    // Passes 5 and 6: AND, then OR.
    fn reduce_connective(&mut self, list: &mut Vec<ExpandedArgument>, keyword: &str) {
        let mut index = 0;
        while index + 2 < list.len() {
            if self.is_keyword(keyword, &list[index + 1]) {
                let lhs = self.boolean_with_auto_dereference(&list[index], false);
                let rhs = self.boolean_with_auto_dereference(&list[index + 2], false);
                let value = if keyword == KEY_AND {
                    lhs && rhs
                } else {
                    lhs || rhs
                };
                list.splice(index..index + 3, [bool_token(value)]);
            } else {
                index += 1;
            }
        }
    }
}

/// `atoi`-style leading-integer parse used only by the legacy boolean rules.
fn leading_integer(value: &str) -> i64 {
    let trimmed = value.trim_start();
    let mut end = 0;
    for (offset, ch) in trimmed.char_indices() {
        if offset == 0 && (ch == '+' || ch == '-') {
            end = offset + ch.len_utf8();
        } else if ch.is_ascii_digit() {
            end = offset + 1;
        } else {
            break;
        }
    }
    trimmed[..end].parse::<i64>().unwrap_or(0)
}

#[cfg(test)]
mod condition_tests {
    use std::sync::Arc;

    use mortar_core::ExpandedArgument;

    use super::super::policy::{Policy, PolicyStatus};
    use super::super::state::{Interpreter, InterpreterOptions, SystemInspector};
    use super::ConditionEvaluator;

    fn args(tokens: &[&str]) -> Vec<ExpandedArgument> {
        tokens
            .iter()
            .map(|token| ExpandedArgument::new(*token, false))
            .collect()
    }

    fn eval(interp: &mut Interpreter, tokens: &[&str]) -> bool {
        ConditionEvaluator::new(interp)
            .is_true(&args(tokens))
            .expect("condition should evaluate")
    }

    #[test]
    fn constants_and_logic_reduce_as_specified() {
        let mut interp = Interpreter::new();
        assert!(eval(&mut interp, &["NOT", "FALSE"]));
        assert!(!eval(&mut interp, &["1", "AND", "0"]));
        assert!(eval(&mut interp, &["(", "1", "OR", "0", ")", "AND", "1"]));
        assert!(!eval(&mut interp, &[]));
        assert!(eval(&mut interp, &["ON"]));
        assert!(!eval(&mut interp, &["NOTFOUND"]));
    }

    #[test]
    fn bare_variables_auto_dereference() {
        let mut interp = Interpreter::new();
        interp.set_variable("FLAG", "ON");
        interp.set_variable("EMPTYISH", "SOMETHING-NOTFOUND");
        assert!(eval(&mut interp, &["FLAG"]));
        assert!(!eval(&mut interp, &["EMPTYISH"]));
        assert!(!eval(&mut interp, &["NEVER_SET"]));
    }

    #[test]
    fn quoted_tokens_stay_literal_under_the_new_policy() {
        let mut interp = Interpreter::new();
        interp.set_variable("NOT", "1");
        let quoted_not = vec![
            ExpandedArgument::new("NOT", true),
            ExpandedArgument::new("FALSE", false),
        ];
        // "NOT" is quoted: no keyword, no dereference, two leftover tokens.
        let error = ConditionEvaluator::new(&mut interp)
            .is_true(&quoted_not)
            .expect_err("should be malformed");
        assert_eq!(error.code, "COND_MALFORMED_EXPRESSION");

        interp.set_policy(Policy::QuotedArgDeref, PolicyStatus::Old);
        assert!(ConditionEvaluator::new(&mut interp)
            .is_true(&quoted_not)
            .expect("legacy keyword recognition"));
    }

    #[test]
    fn legacy_bare_constant_policy_changes_single_token_meaning() {
        let mut interp = Interpreter::new();
        // "TRUE" is a modern constant; under the old rules it is a variable
        // name and dereferences to nothing.
        assert!(eval(&mut interp, &["TRUE"]));
        interp.set_policy(Policy::BareConstantDeref, PolicyStatus::Old);
        assert!(!eval(&mut interp, &["TRUE"]));
        interp.set_variable("TRUE", "1");
        assert!(eval(&mut interp, &["TRUE"]));
    }

    #[test]
    fn numeric_comparison_falls_back_to_lexicographic() {
        let mut interp = Interpreter::new();
        assert!(eval(&mut interp, &["2", "LESS", "10"]));
        assert!(eval(&mut interp, &["2", "GREATER_EQUAL", "2"]));
        // "abc" fails the numeric parse, so lexicographic order decides.
        assert!(eval(&mut interp, &["10", "LESS", "abc"]));
        assert!(eval(&mut interp, &["a", "STRLESS", "b"]));
        interp.set_variable("V", "5");
        assert!(eval(&mut interp, &["V", "EQUAL", "5"]));
    }

    #[test]
    fn version_comparison_is_component_wise() {
        let mut interp = Interpreter::new();
        assert!(eval(&mut interp, &["1.9", "VERSION_LESS", "1.10"]));
        assert!(eval(&mut interp, &["1.2.0", "VERSION_EQUAL", "1.2"]));
        assert!(!eval(&mut interp, &["1.9", "STRLESS", "1.10"]));
    }

    #[test]
    fn defined_predicate_checks_variables_and_environment() {
        let mut interp = Interpreter::new();
        interp.set_variable("HERE", "");
        assert!(eval(&mut interp, &["DEFINED", "HERE"]));
        assert!(!eval(&mut interp, &["DEFINED", "GONE"]));
        assert!(eval(&mut interp, &["NOT", "DEFINED", "GONE"]));
        std::env::set_var("MORTAR_COND_TEST_ENV", "x");
        assert!(eval(&mut interp, &["DEFINED", "ENV{MORTAR_COND_TEST_ENV}"]));
        assert!(!eval(&mut interp, &["DEFINED", "ENV{MORTAR_COND_NO_SUCH}"]));
    }

    #[test]
    fn command_and_policy_predicates() {
        let mut interp = Interpreter::new();
        assert!(eval(&mut interp, &["COMMAND", "set"]));
        assert!(!eval(&mut interp, &["COMMAND", "no_such_command"]));
        assert!(eval(&mut interp, &["POLICY", "MOP0002"]));
        assert!(!eval(&mut interp, &["POLICY", "MOP9999"]));
    }

    #[test]
    fn filesystem_predicates_delegate_to_the_inspector() {
        struct FixedInspector;
        impl SystemInspector for FixedInspector {
            fn path_exists(&self, path: &str) -> bool {
                path == "/present"
            }
            fn is_directory(&self, path: &str) -> bool {
                path == "/dir"
            }
        }

        let mut interp = Interpreter::with_options(InterpreterOptions {
            inspector: Some(Arc::new(FixedInspector)),
            ..InterpreterOptions::default()
        });
        assert!(eval(&mut interp, &["EXISTS", "/present"]));
        assert!(!eval(&mut interp, &["EXISTS", "/absent"]));
        assert!(eval(&mut interp, &["IS_DIRECTORY", "/dir"]));
        assert!(eval(&mut interp, &["IS_ABSOLUTE", "/anything"]));
        assert!(!eval(&mut interp, &["IS_ABSOLUTE", "relative/path"]));
    }

    #[test]
    fn matches_populates_capture_variables() {
        let mut interp = Interpreter::new();
        interp.set_variable("INPUT", "release-1.4");
        assert!(eval(
            &mut interp,
            &["INPUT", "MATCHES", r"release-([0-9]+)\.([0-9]+)"],
        ));
        assert_eq!(interp.get_variable("MORTAR_MATCH_0"), Some("release-1.4"));
        assert_eq!(interp.get_variable("MORTAR_MATCH_1"), Some("1"));
        assert_eq!(interp.get_variable("MORTAR_MATCH_2"), Some("4"));
        assert_eq!(interp.get_variable("MORTAR_MATCH_COUNT"), Some("2"));

        // A failed match clears the previous captures.
        assert!(!eval(&mut interp, &["INPUT", "MATCHES", "nope"]));
        assert_eq!(interp.get_variable("MORTAR_MATCH_1"), None);
    }

    #[test]
    fn optional_groups_that_did_not_match_stay_unset_and_uncounted() {
        let mut interp = Interpreter::new();
        assert!(eval(&mut interp, &["a", "MATCHES", "(a)(b)?"]));
        assert_eq!(interp.get_variable("MORTAR_MATCH_0"), Some("a"));
        assert_eq!(interp.get_variable("MORTAR_MATCH_1"), Some("a"));
        assert_eq!(interp.get_variable("MORTAR_MATCH_2"), None);
        assert_eq!(interp.get_variable("MORTAR_MATCH_COUNT"), Some("1"));
    }

    #[test]
    fn bad_regex_is_a_fatal_condition_error() {
        let mut interp = Interpreter::new();
        let error = ConditionEvaluator::new(&mut interp)
            .is_true(&args(&["x", "MATCHES", "("]))
            .expect_err("bad regex");
        assert_eq!(error.code, "COND_BAD_REGEX");
    }

    #[test]
    fn in_list_is_policy_gated() {
        let mut interp = Interpreter::new();
        interp.set_variable("L", "a;b;c");
        assert!(eval(&mut interp, &["b", "IN_LIST", "L"]));
        assert!(!eval(&mut interp, &["z", "IN_LIST", "L"]));

        interp.set_policy(Policy::InListOperator, PolicyStatus::Old);
        let error = ConditionEvaluator::new(&mut interp)
            .is_true(&args(&["b", "IN_LIST", "L"]))
            .expect_err("not an operator under Old");
        assert_eq!(error.code, "COND_MALFORMED_EXPRESSION");
    }

    #[test]
    fn mismatched_parenthesis_is_reported() {
        let mut interp = Interpreter::new();
        let error = ConditionEvaluator::new(&mut interp)
            .is_true(&args(&["(", "1", "OR", "0"]))
            .expect_err("unbalanced paren");
        assert_eq!(error.code, "COND_MISMATCHED_PAREN");
    }

    #[test]
    fn leftover_tokens_are_malformed() {
        let mut interp = Interpreter::new();
        let error = ConditionEvaluator::new(&mut interp)
            .is_true(&args(&["1", "1"]))
            .expect_err("two tokens left");
        assert_eq!(error.code, "COND_MALFORMED_EXPRESSION");
    }
}
