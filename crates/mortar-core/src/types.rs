use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: SourceLocation,
    pub end: SourceLocation,
}

impl SourceSpan {
    pub fn synthetic() -> Self {
        Self {
            start: SourceLocation { line: 1, column: 1 },
            end: SourceLocation { line: 1, column: 1 },
        }
    }
}

/// How the external lexer delimited an argument. Quoting survives into the
/// interpreter because it changes list splitting and, under the
/// `QuotedArgDeref` policy, keyword recognition in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentDelimiter {
    Unquoted,
    Quoted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArgument {
    pub value: String,
    pub delimiter: ArgumentDelimiter,
    pub span: SourceSpan,
}

impl RawArgument {
    pub fn unquoted(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            delimiter: ArgumentDelimiter::Unquoted,
            span: SourceSpan::synthetic(),
        }
    }

    pub fn quoted(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            delimiter: ArgumentDelimiter::Quoted,
            span: SourceSpan::synthetic(),
        }
    }

    pub fn is_quoted(&self) -> bool {
        self.delimiter == ArgumentDelimiter::Quoted
    }
}

/// One command invocation as produced by the external parser. Immutable once
/// created; the interpreter rebuilds fresh invocations when it substitutes
/// macro arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInvocation {
    pub name: String,
    pub args: Vec<RawArgument>,
    pub span: SourceSpan,
}

impl RawInvocation {
    pub fn new(name: impl Into<String>, args: Vec<RawArgument>) -> Self {
        Self {
            name: name.into(),
            args,
            span: SourceSpan::synthetic(),
        }
    }
}

/// An argument after variable expansion, with its quoting preserved for the
/// condition evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedArgument {
    pub value: String,
    pub quoted: bool,
}

impl ExpandedArgument {
    pub fn new(value: impl Into<String>, quoted: bool) -> Self {
        Self {
            value: value.into(),
            quoted,
        }
    }
}

/// Control signal produced by a dispatched command. Not an error: every
/// caller inspects it after every dispatch and decides whether to keep
/// executing, stop the loop iteration, or unwind further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSignal {
    #[default]
    None,
    Return,
    Break,
    Continue,
}

/// The status of one dispatched invocation: a control signal on success, a
/// fatal-to-this-file error otherwise. Errors propagate by value and are
/// never rewritten on the way up.
pub type Status = Result<ControlSignal, crate::error::MortarError>;

#[cfg(test)]
mod types_tests {
    use super::*;

    #[test]
    fn raw_invocation_serializes_for_diagnostics() {
        let invocation = RawInvocation::new(
            "set",
            vec![RawArgument::unquoted("X"), RawArgument::quoted("a;b")],
        );
        let json = serde_json::to_value(&invocation).expect("serialize");
        assert_eq!(json["name"], "set");
        assert_eq!(json["args"][1]["delimiter"], "quoted");
    }

    #[test]
    fn control_signal_defaults_to_none() {
        assert_eq!(ControlSignal::default(), ControlSignal::None);
    }
}
