use mortar_core::{ControlSignal, MortarError, RawArgument, RawInvocation, SourceSpan, Status};

use super::condition::ConditionEvaluator;
use super::invoke::{DefinitionKind, MacroOrFunctionDefinition};
use super::state::Interpreter;

/// State specific to each block construct. The generic record/discard
/// protocol and same-kind depth counting live on [`FunctionBlocker`];
/// everything here is header data captured by the opening command.
pub(crate) enum BlockerVariant {
    /// `if` does not defer execution: the active branch is dispatched as it
    /// arrives (the blocker declines those invocations) and inactive
    /// branches are consumed and discarded.
    If {
        /// Invocations are being discarded (current branch is inactive).
        blocking: bool,
        /// Some earlier branch already ran; later `elseif`/`else` branches
        /// must not.
        branch_taken: bool,
        seen_else: bool,
        /// Expanded opener arguments, for terminator matching.
        opener_args: Vec<String>,
    },
    ForEach {
        loop_var: String,
        items: Vec<String>,
    },
    While {
        /// Raw condition tokens, re-expanded and re-evaluated before each
        /// pass.
        condition: Vec<RawArgument>,
        /// Expanded condition tokens at open time, for terminator matching.
        opener_args: Vec<String>,
    },
    Definition {
        kind: DefinitionKind,
        name: String,
        formals: Vec<String>,
    },
}

/// A block-construct interceptor. Owns the raw body of its block until the
/// matching closing keyword arrives at nesting depth zero.
pub(crate) struct FunctionBlocker {
    pub(crate) variant: BlockerVariant,
    /// Same-kind nesting depth: an inner `if`..`endif` must not close an
    /// outer one.
    depth: usize,
    body: Vec<RawInvocation>,
    pub(crate) opener_span: SourceSpan,
}

impl FunctionBlocker {
    pub(crate) fn new(variant: BlockerVariant, opener_span: SourceSpan) -> Self {
        Self {
            variant,
            depth: 0,
            body: Vec::new(),
            opener_span,
        }
    }

    pub(crate) fn start_keyword(&self) -> &'static str {
        match self.variant {
            BlockerVariant::If { .. } => "if",
            BlockerVariant::ForEach { .. } => "foreach",
            BlockerVariant::While { .. } => "while",
            BlockerVariant::Definition {
                kind: DefinitionKind::Macro,
                ..
            } => "macro",
            BlockerVariant::Definition {
                kind: DefinitionKind::Function,
                ..
            } => "function",
        }
    }

    pub(crate) fn end_keyword(&self) -> &'static str {
        match self.variant {
            BlockerVariant::If { .. } => "endif",
            BlockerVariant::ForEach { .. } => "endforeach",
            BlockerVariant::While { .. } => "endwhile",
            BlockerVariant::Definition {
                kind: DefinitionKind::Macro,
                ..
            } => "endmacro",
            BlockerVariant::Definition {
                kind: DefinitionKind::Function,
                ..
            } => "endfunction",
        }
    }

    /// Step 1 of the protocol: offer the invocation to the blocker.
    /// `Ok(true)` means it was fully consumed (recorded, discarded, or — for
    /// `if` — already acted on); `Ok(false)` declines it for normal dispatch.
    fn is_blocked(
        &mut self,
        invocation: &RawInvocation,
        interp: &mut Interpreter,
    ) -> Result<bool, MortarError> {
        let name = invocation.name.to_ascii_lowercase();

        if let BlockerVariant::If {
            blocking,
            branch_taken,
            seen_else,
            ..
        } = &mut self.variant
        {
            if self.depth > 0 {
                // Inside a discarded nested if-block: only track its bounds.
                if name == "if" {
                    self.depth += 1;
                } else if name == "endif" {
                    self.depth -= 1;
                }
                return Ok(true);
            }
            return match name.as_str() {
                "if" => {
                    if *blocking {
                        self.depth += 1;
                        Ok(true)
                    } else {
                        // Active branch: let normal dispatch open its own
                        // blocker.
                        Ok(false)
                    }
                }
                "elseif" => {
                    if *seen_else {
                        return Err(MortarError::with_span(
                            "SYNTAX_MISPLACED_ELSEIF",
                            "An ELSEIF command was found after an ELSE command.",
                            invocation.span,
                        ));
                    }
                    if *branch_taken {
                        *blocking = true;
                    } else {
                        let args = interp.expand_arguments(&invocation.args)?;
                        let condition = ConditionEvaluator::new(interp).is_true(&args)?;
                        *blocking = !condition;
                        if condition {
                            *branch_taken = true;
                        }
                    }
                    Ok(true)
                }
                "else" => {
                    if *seen_else {
                        return Err(MortarError::with_span(
                            "SYNTAX_DUPLICATE_ELSE",
                            "A duplicate ELSE command was found inside an IF block.",
                            invocation.span,
                        ));
                    }
                    *seen_else = true;
                    *blocking = *branch_taken;
                    *branch_taken = true;
                    Ok(true)
                }
                // The terminator is handled by should_remove.
                "endif" => Ok(false),
                _ => Ok(*blocking),
            };
        }

        // Recording variants: everything between the opener and its matching
        // terminator is captured without execution.
        if name == self.start_keyword() {
            self.depth += 1;
        } else if name == self.end_keyword() {
            if self.depth == 0 {
                return Ok(false);
            }
            self.depth -= 1;
        }
        self.body.push(invocation.clone());
        Ok(true)
    }

    /// Step 2: is this invocation the blocker's own matching terminator at
    /// depth zero? A named terminator that does not match the opener is a
    /// syntax error and the blocker stays on the stack.
    fn should_remove(
        &self,
        invocation: &RawInvocation,
        interp: &mut Interpreter,
    ) -> Result<bool, MortarError> {
        if self.depth != 0 || invocation.name.to_ascii_lowercase() != self.end_keyword() {
            return Ok(false);
        }

        let terminator_args = interp.expand_argument_values(&invocation.args)?;
        if terminator_args.is_empty() {
            return Ok(true);
        }

        let matches = match &self.variant {
            BlockerVariant::If { opener_args, .. } => &terminator_args == opener_args,
            BlockerVariant::ForEach { loop_var, .. } => terminator_args[0] == *loop_var,
            BlockerVariant::While { opener_args, .. } => &terminator_args == opener_args,
            BlockerVariant::Definition { name, .. } => terminator_args[0] == *name,
        };
        if matches {
            Ok(true)
        } else {
            Err(MortarError::with_span(
                "SYNTAX_MISMATCHED_TERMINATOR",
                format!(
                    "A \"{}\" command names \"{}\" which does not match the opening \"{}\" block.",
                    self.end_keyword(),
                    terminator_args.join(";"),
                    self.start_keyword(),
                ),
                invocation.span,
            ))
        }
    }
}

impl Interpreter {
    /// Offers an invocation to the top-of-stack blocker. `Ok(Some(signal))`
    /// means the blocker consumed it (possibly finishing the block and
    /// replaying its body); `Ok(None)` sends it to normal dispatch.
    pub(crate) fn offer_to_blockers(
        &mut self,
        invocation: &RawInvocation,
    ) -> Result<Option<ControlSignal>, MortarError> {
        // Taken off the stack while we hold `&mut self`; every non-removal
        // path must push it back.
        let mut blocker = self
            .blockers
            .pop()
            .expect("offer_to_blockers requires an active blocker");

        let consumed = match blocker.is_blocked(invocation, self) {
            Ok(consumed) => consumed,
            Err(error) => {
                self.blockers.push(blocker);
                return Err(error);
            }
        };
        let remove = match blocker.should_remove(invocation, self) {
            Ok(remove) => remove,
            Err(error) => {
                self.blockers.push(blocker);
                return Err(error);
            }
        };

        if remove {
            tracing::debug!(block = blocker.start_keyword(), "closing block");
            return self.finalize_blocker(blocker).map(Some);
        }

        self.blockers.push(blocker);
        Ok(if consumed { Some(ControlSignal::None) } else { None })
    }

    /// Runs whatever the completed block stands for: nothing for `if`
    /// (branches already executed), the recorded body for loops, a command
    /// registration for definitions.
    fn finalize_blocker(&mut self, blocker: FunctionBlocker) -> Status {
        match blocker.variant {
            BlockerVariant::If { .. } => Ok(ControlSignal::None),
            BlockerVariant::ForEach { loop_var, items } => {
                self.run_foreach(&loop_var, &items, &blocker.body)
            }
            BlockerVariant::While { condition, .. } => self.run_while(&condition, &blocker.body),
            BlockerVariant::Definition {
                kind,
                name,
                formals,
            } => {
                let definition = MacroOrFunctionDefinition {
                    kind,
                    name,
                    formals,
                    body: std::sync::Arc::new(blocker.body),
                    policies: self.policy_snapshot(),
                };
                self.register_definition(definition)?;
                Ok(ControlSignal::None)
            }
        }
    }

    /// Dispatches a recorded body in order, stopping at the first non-`None`
    /// signal. Errors propagate unchanged. Blocks opened inside the body and
    /// abandoned by an early exit (a `break` before the `endif` replays, say)
    /// are discarded at the barrier.
    pub(crate) fn replay_body(&mut self, body: &[RawInvocation]) -> Status {
        let barrier = self.blockers.len();
        for invocation in body {
            let signal = match self.execute_invocation(invocation) {
                Ok(signal) => signal,
                Err(error) => {
                    self.blockers.truncate(barrier);
                    return Err(error);
                }
            };
            if signal != ControlSignal::None {
                self.blockers.truncate(barrier);
                return Ok(signal);
            }
        }

        if self.blockers.len() > barrier {
            let opener = self.blockers.last().expect("length checked above");
            let error = MortarError::with_span(
                "SYNTAX_UNCLOSED_BLOCK",
                format!(
                    "A \"{}\" block is missing its \"{}\" before the end of the enclosing block.",
                    opener.start_keyword(),
                    opener.end_keyword(),
                ),
                opener.opener_span,
            );
            self.blockers.truncate(barrier);
            return Err(error);
        }
        Ok(ControlSignal::None)
    }

    fn run_foreach(&mut self, loop_var: &str, items: &[String], body: &[RawInvocation]) -> Status {
        let saved = self.get_variable(loop_var).map(str::to_string);

        self.loop_depth += 1;
        let outcome = self.run_foreach_passes(loop_var, items, body);
        self.loop_depth -= 1;

        // On error the variable is left as the failing iteration set it,
        // matching the fatal-error path of the original.
        let signal = outcome?;
        match saved {
            Some(value) => self.set_variable(loop_var, value),
            None => self.unset_variable(loop_var),
        }
        Ok(signal)
    }

    fn run_foreach_passes(
        &mut self,
        loop_var: &str,
        items: &[String],
        body: &[RawInvocation],
    ) -> Status {
        for item in items {
            self.set_variable(loop_var, item.clone());
            match self.replay_body(body)? {
                ControlSignal::None | ControlSignal::Continue => {}
                // Consumed at the loop boundary.
                ControlSignal::Break => return Ok(ControlSignal::None),
                ControlSignal::Return => return Ok(ControlSignal::Return),
            }
        }
        Ok(ControlSignal::None)
    }

    fn run_while(&mut self, condition: &[RawArgument], body: &[RawInvocation]) -> Status {
        self.loop_depth += 1;
        let outcome = self.run_while_passes(condition, body);
        self.loop_depth -= 1;
        outcome
    }

    fn run_while_passes(&mut self, condition: &[RawArgument], body: &[RawInvocation]) -> Status {
        loop {
            let args = self.expand_arguments(condition)?;
            if !ConditionEvaluator::new(self).is_true(&args)? {
                return Ok(ControlSignal::None);
            }
            match self.replay_body(body)? {
                ControlSignal::None | ControlSignal::Continue => {}
                ControlSignal::Break => return Ok(ControlSignal::None),
                ControlSignal::Return => return Ok(ControlSignal::Return),
            }
        }
    }
}
