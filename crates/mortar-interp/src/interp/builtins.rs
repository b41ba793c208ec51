//! The built-in commands: variable manipulation, the block openers, loop
//! control and policy management. Everything else comes from the host or
//! from scripted `macro`/`function` definitions.

use mortar_core::{
    ControlSignal, EmptyElements, ExpandedArgument, MortarError, RawInvocation, Status,
};

use super::blockers::{BlockerVariant, FunctionBlocker};
use super::condition::ConditionEvaluator;
use super::invoke::DefinitionKind;
use super::policy::{Policy, PolicyStatus};
use super::state::{Command, CommandArguments, Interpreter};

pub(crate) fn register_all(interp: &mut Interpreter) {
    interp.register_command("set", Box::new(SetCommand));
    interp.register_command("unset", Box::new(UnsetCommand));
    interp.register_command("if", Box::new(IfCommand));
    interp.register_command("foreach", Box::new(ForEachCommand));
    interp.register_command("while", Box::new(WhileCommand));
    interp.register_command("macro", Box::new(DefineCommand(DefinitionKind::Macro)));
    interp.register_command("function", Box::new(DefineCommand(DefinitionKind::Function)));
    interp.register_command("break", Box::new(BreakCommand));
    interp.register_command("continue", Box::new(ContinueCommand));
    interp.register_command("return", Box::new(ReturnCommand));
    interp.register_command("mortar_policy", Box::new(PolicyCommand));

    // Closing keywords reach dispatch only when no matching block is open.
    for (keyword, opener) in [
        ("elseif", "if"),
        ("else", "if"),
        ("endif", "if"),
        ("endforeach", "foreach"),
        ("endwhile", "while"),
        ("endmacro", "macro"),
        ("endfunction", "function"),
    ] {
        interp.register_command(keyword, Box::new(StrayTerminatorCommand { keyword, opener }));
    }
}

fn usage_error(invocation: &RawInvocation, message: impl Into<String>) -> MortarError {
    MortarError::with_span("DISPATCH_INVALID_ARGUMENTS", message.into(), invocation.span)
}

fn expect_expanded<'a>(
    invocation: &RawInvocation,
    args: CommandArguments<'a>,
) -> Result<&'a [ExpandedArgument], MortarError> {
    match args {
        CommandArguments::Expanded(args) => Ok(args),
        CommandArguments::Raw(_) => Err(usage_error(
            invocation,
            "internal: command registered without argument expansion",
        )),
    }
}

#[derive(Clone)]
struct SetCommand;

impl Command for SetCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        args: CommandArguments<'_>,
        interp: &mut Interpreter,
    ) -> Status {
        let args = expect_expanded(invocation, args)?;
        let Some(name) = args.first() else {
            return Err(usage_error(invocation, "set requires a variable name."));
        };

        let mut values = &args[1..];
        let parent_scope = values.last().is_some_and(|arg| arg.value == "PARENT_SCOPE");
        if parent_scope {
            values = &values[..values.len() - 1];
        }

        if values.is_empty() {
            // `set(VAR)` with no value unsets.
            if parent_scope {
                interp.raise_variable(&name.value, None);
            } else {
                interp.unset_variable(&name.value);
            }
            return Ok(ControlSignal::None);
        }

        let joined = values
            .iter()
            .map(|arg| arg.value.as_str())
            .collect::<Vec<_>>()
            .join(";");
        if parent_scope {
            interp.raise_variable(&name.value, Some(&joined));
        } else {
            interp.set_variable(name.value.clone(), joined);
        }
        Ok(ControlSignal::None)
    }
}

#[derive(Clone)]
struct UnsetCommand;

impl Command for UnsetCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        args: CommandArguments<'_>,
        interp: &mut Interpreter,
    ) -> Status {
        let args = expect_expanded(invocation, args)?;
        let Some(name) = args.first() else {
            return Err(usage_error(invocation, "unset requires a variable name."));
        };
        let parent_scope = args.len() == 2 && args[1].value == "PARENT_SCOPE";
        if args.len() > 1 && !parent_scope {
            return Err(usage_error(invocation, "unset called with extra arguments."));
        }

        if parent_scope {
            interp.raise_variable(&name.value, None);
        } else {
            interp.unset_variable(&name.value);
        }
        Ok(ControlSignal::None)
    }
}

/// `if` evaluates its condition immediately and opens an `If` blocker that
/// either passes the active branch through to normal dispatch or swallows
/// the inactive ones.
#[derive(Clone)]
struct IfCommand;

impl Command for IfCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        args: CommandArguments<'_>,
        interp: &mut Interpreter,
    ) -> Status {
        let args = expect_expanded(invocation, args)?;
        let condition = ConditionEvaluator::new(interp).is_true(args)?;
        let opener_args = args.iter().map(|arg| arg.value.clone()).collect();
        interp.blockers.push(FunctionBlocker::new(
            BlockerVariant::If {
                blocking: !condition,
                branch_taken: condition,
                seen_else: false,
                opener_args,
            },
            invocation.span,
        ));
        Ok(ControlSignal::None)
    }
}

#[derive(Clone)]
struct ForEachCommand;

impl Command for ForEachCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        args: CommandArguments<'_>,
        interp: &mut Interpreter,
    ) -> Status {
        let args = expect_expanded(invocation, args)?;
        let Some(loop_var) = args.first() else {
            return Err(usage_error(invocation, "foreach requires a loop variable."));
        };
        let rest = &args[1..];

        let items = match rest.first().map(|arg| arg.value.as_str()) {
            Some("RANGE") => range_items(invocation, &rest[1..])?,
            Some("IN") => in_mode_items(invocation, &rest[1..], interp)?,
            _ => rest.iter().map(|arg| arg.value.clone()).collect(),
        };

        interp.blockers.push(FunctionBlocker::new(
            BlockerVariant::ForEach {
                loop_var: loop_var.value.clone(),
                items,
            },
            invocation.span,
        ));
        Ok(ControlSignal::None)
    }
}

/// `RANGE stop`, `RANGE start stop` or `RANGE start stop step`, all bounds
/// inclusive.
fn range_items(
    invocation: &RawInvocation,
    args: &[ExpandedArgument],
) -> Result<Vec<String>, MortarError> {
    let parse = |arg: &ExpandedArgument| -> Result<i64, MortarError> {
        arg.value.parse::<i64>().map_err(|_| {
            usage_error(
                invocation,
                format!("foreach RANGE argument \"{}\" is not an integer.", arg.value),
            )
        })
    };

    let (start, stop, step) = match args {
        [stop] => (0, parse(stop)?, 1),
        [start, stop] => (parse(start)?, parse(stop)?, 1),
        [start, stop, step] => (parse(start)?, parse(stop)?, parse(step)?),
        _ => {
            return Err(usage_error(
                invocation,
                "foreach RANGE takes one, two or three arguments.",
            ))
        }
    };
    if step <= 0 {
        return Err(usage_error(invocation, "foreach RANGE step must be positive."));
    }
    if stop < start {
        return Err(usage_error(
            invocation,
            format!("foreach RANGE is backwards: {} to {}.", start, stop),
        ));
    }

    let mut items = Vec::new();
    let mut value = start;
    while value <= stop {
        items.push(value.to_string());
        value += step;
    }
    Ok(items)
}

/// `IN ITEMS a b c` takes the values literally; `IN LISTS L1 L2` reads each
/// named variable as a list. The keywords may repeat and mix.
fn in_mode_items(
    invocation: &RawInvocation,
    args: &[ExpandedArgument],
    interp: &Interpreter,
) -> Result<Vec<String>, MortarError> {
    let empty = if interp.policy_status(Policy::KeepEmptyListElements) == PolicyStatus::New {
        EmptyElements::Keep
    } else {
        EmptyElements::Drop
    };

    enum Mode {
        Items,
        Lists,
    }
    let mut mode: Option<Mode> = None;
    let mut items = Vec::new();
    for arg in args {
        match arg.value.as_str() {
            "ITEMS" => mode = Some(Mode::Items),
            "LISTS" => mode = Some(Mode::Lists),
            value => match mode {
                Some(Mode::Items) => items.push(value.to_string()),
                Some(Mode::Lists) => {
                    if let Some(list) = interp.get_variable(value) {
                        items.extend(mortar_core::split_list(list, empty));
                    }
                }
                None => {
                    return Err(usage_error(
                        invocation,
                        format!("foreach IN expects ITEMS or LISTS, got \"{}\".", value),
                    ))
                }
            },
        }
    }
    Ok(items)
}

/// `while` keeps its condition raw; it is re-expanded and re-evaluated
/// before every pass once the block closes.
#[derive(Clone)]
struct WhileCommand;

impl Command for WhileCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn wants_raw_arguments(&self) -> bool {
        true
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        _args: CommandArguments<'_>,
        interp: &mut Interpreter,
    ) -> Status {
        if invocation.args.is_empty() {
            return Err(usage_error(invocation, "while requires a condition."));
        }
        let opener_args = interp.expand_argument_values(&invocation.args)?;
        interp.blockers.push(FunctionBlocker::new(
            BlockerVariant::While {
                condition: invocation.args.clone(),
                opener_args,
            },
            invocation.span,
        ));
        Ok(ControlSignal::None)
    }
}

/// Shared opener for `macro` and `function`.
#[derive(Clone)]
struct DefineCommand(DefinitionKind);

impl Command for DefineCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        args: CommandArguments<'_>,
        interp: &mut Interpreter,
    ) -> Status {
        let args = expect_expanded(invocation, args)?;
        let Some(name) = args.first() else {
            return Err(usage_error(invocation, "a definition requires a name."));
        };
        interp.blockers.push(FunctionBlocker::new(
            BlockerVariant::Definition {
                kind: self.0,
                name: name.value.clone(),
                formals: args[1..].iter().map(|arg| arg.value.clone()).collect(),
            },
            invocation.span,
        ));
        Ok(ControlSignal::None)
    }
}

#[derive(Clone)]
struct BreakCommand;

impl Command for BreakCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        _args: CommandArguments<'_>,
        interp: &mut Interpreter,
    ) -> Status {
        if interp.loop_depth == 0 {
            return Err(MortarError::with_span(
                "DISPATCH_BREAK_OUTSIDE_LOOP",
                "A BREAK command was found outside of a proper FOREACH or WHILE loop.",
                invocation.span,
            ));
        }
        Ok(ControlSignal::Break)
    }
}

#[derive(Clone)]
struct ContinueCommand;

impl Command for ContinueCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        _args: CommandArguments<'_>,
        interp: &mut Interpreter,
    ) -> Status {
        if interp.loop_depth == 0 {
            return Err(MortarError::with_span(
                "DISPATCH_CONTINUE_OUTSIDE_LOOP",
                "A CONTINUE command was found outside of a proper FOREACH or WHILE loop.",
                invocation.span,
            ));
        }
        Ok(ControlSignal::Continue)
    }
}

/// `return` is a plain signal; whoever replays the current body decides what
/// it means. Only the file boundary consumes it.
#[derive(Clone)]
struct ReturnCommand;

impl Command for ReturnCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn execute(
        &mut self,
        _invocation: &RawInvocation,
        _args: CommandArguments<'_>,
        _interp: &mut Interpreter,
    ) -> Status {
        Ok(ControlSignal::Return)
    }
}

/// `mortar_policy(SET MOPxxxx OLD|NEW)` and `mortar_policy(GET MOPxxxx var)`.
#[derive(Clone)]
struct PolicyCommand;

impl Command for PolicyCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        args: CommandArguments<'_>,
        interp: &mut Interpreter,
    ) -> Status {
        let args = expect_expanded(invocation, args)?;
        let [verb, id, operand] = args else {
            return Err(usage_error(
                invocation,
                "mortar_policy takes a verb, a policy id and one operand.",
            ));
        };
        let Some(policy) = Policy::from_id(&id.value) else {
            return Err(usage_error(
                invocation,
                format!("Policy \"{}\" is not known.", id.value),
            ));
        };

        match verb.value.as_str() {
            "SET" => {
                let status = match operand.value.as_str() {
                    "OLD" => PolicyStatus::Old,
                    "NEW" => PolicyStatus::New,
                    other => {
                        return Err(usage_error(
                            invocation,
                            format!("Policy status must be OLD or NEW, got \"{}\".", other),
                        ))
                    }
                };
                interp.set_policy(policy, status);
            }
            "GET" => {
                let value = match interp.policy_status(policy) {
                    PolicyStatus::Old => "OLD",
                    PolicyStatus::New => "NEW",
                };
                interp.set_variable(operand.value.clone(), value);
            }
            other => {
                return Err(usage_error(
                    invocation,
                    format!("mortar_policy verb must be SET or GET, got \"{}\".", other),
                ))
            }
        }
        Ok(ControlSignal::None)
    }
}

/// A closing keyword dispatched with no matching open block.
#[derive(Clone)]
struct StrayTerminatorCommand {
    keyword: &'static str,
    opener: &'static str,
}

impl Command for StrayTerminatorCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        _args: CommandArguments<'_>,
        _interp: &mut Interpreter,
    ) -> Status {
        Err(MortarError::with_span(
            "SYNTAX_STRAY_TERMINATOR",
            format!(
                "A \"{}\" command was found without a matching open \"{}\" block.",
                self.keyword, self.opener,
            ),
            invocation.span,
        ))
    }
}

#[cfg(test)]
mod builtin_tests {
    use mortar_core::{ExpandedArgument, RawInvocation};

    use super::super::interp_test_support::inv;
    use super::super::state::Interpreter;
    use super::range_items;

    fn expanded(values: &[&str]) -> Vec<ExpandedArgument> {
        values
            .iter()
            .map(|value| ExpandedArgument::new(*value, false))
            .collect()
    }

    #[test]
    fn range_items_cover_the_three_forms() {
        let invocation = RawInvocation::new("foreach", Vec::new());
        assert_eq!(
            range_items(&invocation, &expanded(&["3"])).expect("stop only"),
            vec!["0", "1", "2", "3"]
        );
        assert_eq!(
            range_items(&invocation, &expanded(&["2", "4"])).expect("start stop"),
            vec!["2", "3", "4"]
        );
        assert_eq!(
            range_items(&invocation, &expanded(&["0", "6", "3"])).expect("with step"),
            vec!["0", "3", "6"]
        );
    }

    #[test]
    fn range_rejects_bad_specifications() {
        let invocation = RawInvocation::new("foreach", Vec::new());
        for bad in [
            expanded(&["x"]),
            expanded(&["5", "1"]),
            expanded(&["1", "5", "0"]),
            expanded(&["1", "2", "3", "4"]),
        ] {
            let error = range_items(&invocation, &bad).expect_err("bad range");
            assert_eq!(error.code, "DISPATCH_INVALID_ARGUMENTS");
        }
    }

    #[test]
    fn set_joins_values_and_set_with_no_value_unsets() {
        let mut interp = Interpreter::new();
        interp
            .execute_invocation(&inv("set", &["X", "a", "b"]))
            .expect("set");
        assert_eq!(interp.get_variable("X"), Some("a;b"));

        interp.execute_invocation(&inv("set", &["X"])).expect("unset form");
        assert_eq!(interp.get_variable("X"), None);
    }

    #[test]
    fn break_outside_a_loop_is_rejected() {
        let mut interp = Interpreter::new();
        let error = interp
            .execute_invocation(&inv("break", &[]))
            .expect_err("no loop open");
        assert_eq!(error.code, "DISPATCH_BREAK_OUTSIDE_LOOP");

        let error = interp
            .execute_invocation(&inv("continue", &[]))
            .expect_err("no loop open");
        assert_eq!(error.code, "DISPATCH_CONTINUE_OUTSIDE_LOOP");
    }

    #[test]
    fn stray_terminators_are_syntax_errors() {
        let mut interp = Interpreter::new();
        for keyword in ["else", "endif", "endforeach", "endwhile", "endmacro"] {
            let error = interp
                .execute_invocation(&inv(keyword, &[]))
                .expect_err("no open block");
            assert_eq!(error.code, "SYNTAX_STRAY_TERMINATOR");
        }
    }

    #[test]
    fn policy_command_sets_and_reads_back() {
        let mut interp = Interpreter::new();
        interp
            .execute_invocation(&inv("mortar_policy", &["SET", "MOP0002", "OLD"]))
            .expect("set policy");
        interp
            .execute_invocation(&inv("mortar_policy", &["GET", "MOP0002", "OUT"]))
            .expect("get policy");
        assert_eq!(interp.get_variable("OUT"), Some("OLD"));

        let error = interp
            .execute_invocation(&inv("mortar_policy", &["SET", "MOP9999", "OLD"]))
            .expect_err("unknown policy");
        assert_eq!(error.code, "DISPATCH_INVALID_ARGUMENTS");
    }
}
