use std::sync::Arc;

use mortar_core::{MortarError, RawArgument, RawInvocation, SourceSpan, Status};

use super::policy::{Policy, PolicySet, PolicyStatus};
use super::state::{Command, CommandArguments, Interpreter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    /// Purely textual substitution into the caller's scope.
    Macro,
    /// A fresh variable scope with real bindings for formals and the
    /// ARGC/ARGV/ARGN pseudo-variables.
    Function,
}

/// A macro or function captured by its defining block: name, formal
/// parameters, recorded body and the policy set in effect at definition
/// time. Lives as long as its registry entry.
pub struct MacroOrFunctionDefinition {
    pub kind: DefinitionKind,
    pub name: String,
    pub formals: Vec<String>,
    pub body: Arc<Vec<RawInvocation>>,
    pub policies: PolicySet,
}

/// The registered prototype for a scripted macro or function. Cloning shares
/// the definition; dispatch clones are cheap.
pub(crate) struct DefinedCommand {
    definition: Arc<MacroOrFunctionDefinition>,
}

impl Command for DefinedCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(DefinedCommand {
            definition: Arc::clone(&self.definition),
        })
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        args: CommandArguments<'_>,
        interp: &mut Interpreter,
    ) -> Status {
        let CommandArguments::Expanded(args) = args else {
            return Err(MortarError::new(
                "INVOKE_INTERNAL",
                "Scripted commands receive pre-expanded arguments.",
            ));
        };
        let actuals: Vec<String> = args.iter().map(|arg| arg.value.clone()).collect();
        interp.invoke_definition(&Arc::clone(&self.definition), &actuals, invocation.span)
    }
}

/// The synthesized pseudo-variable values, computed once per invocation.
struct SynthesizedArguments {
    argc: String,
    argv: String,
    argn: String,
}

impl Interpreter {
    /// Registers a completed macro/function definition. A pre-existing
    /// command of the same name is renamed to `_<name>` so it stays
    /// callable.
    pub(crate) fn register_definition(
        &mut self,
        definition: MacroOrFunctionDefinition,
    ) -> Result<(), MortarError> {
        let name = definition.name.clone();
        if self.has_command(&name) {
            let shadow = format!("_{}", name.to_ascii_lowercase());
            tracing::debug!(name = %name, shadow = %shadow, "shadowing existing command");
            self.rename_command(&name, &shadow)?;
        }
        self.register_command(
            &name,
            Box::new(DefinedCommand {
                definition: Arc::new(definition),
            }),
        );
        Ok(())
    }

    /// Replays a definition body with the given actual arguments. Arity is
    /// checked first, then recursion depth; the body runs under the
    /// definition-time policy set.
    pub(crate) fn invoke_definition(
        &mut self,
        definition: &Arc<MacroOrFunctionDefinition>,
        actuals: &[String],
        call_span: SourceSpan,
    ) -> Status {
        if actuals.len() < definition.formals.len() {
            return Err(MortarError::with_span(
                "INVOKE_ARGUMENT_COUNT",
                format!(
                    "\"{}\" requires at least {} argument(s) but was called with {}.",
                    definition.name,
                    definition.formals.len(),
                    actuals.len(),
                ),
                call_span,
            ));
        }

        let limit = self.effective_recursion_limit();
        if self.recursion_depth >= limit {
            return Err(MortarError::with_span(
                "INVOKE_RECURSION_LIMIT",
                format!(
                    "Maximum recursion depth of {} exceeded while invoking \"{}\".",
                    limit, definition.name,
                ),
                call_span,
            ));
        }

        tracing::debug!(name = %definition.name, argc = actuals.len(), "invoking definition");
        self.recursion_depth += 1;
        let outcome = match definition.kind {
            DefinitionKind::Macro => self.replay_macro(definition, actuals),
            DefinitionKind::Function => self.replay_function(definition, actuals),
        };
        self.recursion_depth -= 1;
        outcome
    }

    fn replay_macro(
        &mut self,
        definition: &MacroOrFunctionDefinition,
        actuals: &[String],
    ) -> Status {
        let synthesized = self.synthesize_arguments(definition, actuals);
        self.push_policy_scope(definition.policies.clone());
        let outcome = self.replay_macro_body(definition, actuals, &synthesized);
        self.pop_policy_scope();
        // Return/Break/Continue propagate unchanged; a macro opens no
        // variable scope and consumes no signals.
        outcome
    }

    fn replay_macro_body(
        &mut self,
        definition: &MacroOrFunctionDefinition,
        actuals: &[String],
        synthesized: &SynthesizedArguments,
    ) -> Status {
        // Substitution completes for the whole body before any invocation
        // runs; the rebuilt body then replays like any other.
        let rebuilt: Vec<RawInvocation> = definition
            .body
            .iter()
            .map(|invocation| {
                substitute_invocation(invocation, definition, actuals, synthesized)
            })
            .collect();
        self.replay_body(&rebuilt)
    }

    fn replay_function(
        &mut self,
        definition: &MacroOrFunctionDefinition,
        actuals: &[String],
    ) -> Status {
        let synthesized = self.synthesize_arguments(definition, actuals);

        self.push_scope();
        self.push_policy_scope(definition.policies.clone());
        // A function body is not "inside" any loop of its caller.
        let caller_loop_depth = std::mem::replace(&mut self.loop_depth, 0);
        for (formal, actual) in definition.formals.iter().zip(actuals) {
            self.set_variable(formal.clone(), actual.clone());
        }
        self.set_variable("ARGC", synthesized.argc);
        self.set_variable("ARGV", synthesized.argv);
        self.set_variable("ARGN", synthesized.argn);
        for (index, actual) in actuals.iter().enumerate() {
            self.set_variable(format!("ARGV{}", index), actual.clone());
        }

        let outcome = self.replay_body(&definition.body);
        self.loop_depth = caller_loop_depth;
        self.pop_policy_scope();
        // The scope pops before any signal propagates onward.
        self.pop_scope()?;
        outcome
    }

    fn synthesize_arguments(
        &self,
        definition: &MacroOrFunctionDefinition,
        actuals: &[String],
    ) -> SynthesizedArguments {
        let keep_empty =
            self.policy_status(Policy::KeepEmptyListElements) == PolicyStatus::New;
        let join = |items: &[String]| -> String {
            if keep_empty {
                items.join(";")
            } else {
                items
                    .iter()
                    .filter(|item| !item.is_empty())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(";")
            }
        };
        SynthesizedArguments {
            argc: actuals.len().to_string(),
            argv: join(actuals),
            argn: join(&actuals[definition.formals.len()..]),
        }
    }
}

/// Rebuilds one recorded invocation by textual substitution, in order: each
/// formal, then `ARGC`, `ARGN`, `ARGV`, then the indexed `ARGV<k>`.
/// Substitution completes before the rebuilt invocation is re-dispatched.
fn substitute_invocation(
    invocation: &RawInvocation,
    definition: &MacroOrFunctionDefinition,
    actuals: &[String],
    synthesized: &SynthesizedArguments,
) -> RawInvocation {
    let mut args = Vec::with_capacity(invocation.args.len());
    for arg in &invocation.args {
        let mut value = arg.value.clone();
        for (formal, actual) in definition.formals.iter().zip(actuals) {
            value = value.replace(&format!("${{{}}}", formal), actual);
        }
        value = value.replace("${ARGC}", &synthesized.argc);
        value = value.replace("${ARGN}", &synthesized.argn);
        value = value.replace("${ARGV}", &synthesized.argv);
        for (index, actual) in actuals.iter().enumerate() {
            value = value.replace(&format!("${{ARGV{}}}", index), actual);
        }
        args.push(RawArgument {
            value,
            delimiter: arg.delimiter,
            span: arg.span,
        });
    }
    RawInvocation {
        name: invocation.name.clone(),
        args,
        span: invocation.span,
    }
}

#[cfg(test)]
mod invoke_tests {
    use std::sync::Arc;

    use mortar_core::{RawArgument, RawInvocation};

    use super::super::policy::PolicySet;
    use super::{
        substitute_invocation, DefinitionKind, MacroOrFunctionDefinition, SynthesizedArguments,
    };

    fn definition(formals: &[&str]) -> MacroOrFunctionDefinition {
        MacroOrFunctionDefinition {
            kind: DefinitionKind::Macro,
            name: "m".to_string(),
            formals: formals.iter().map(|f| f.to_string()).collect(),
            body: Arc::new(Vec::new()),
            policies: PolicySet::default(),
        }
    }

    #[test]
    fn substitution_applies_formals_then_pseudo_arguments() {
        let def = definition(&["a", "b"]);
        let actuals = vec![
            "1".to_string(),
            "2".to_string(),
            "3".to_string(),
            "4".to_string(),
        ];
        let synthesized = SynthesizedArguments {
            argc: "4".to_string(),
            argv: "1;2;3;4".to_string(),
            argn: "3;4".to_string(),
        };
        let recorded = RawInvocation::new(
            "leaf",
            vec![
                RawArgument::unquoted("${a}-${b}"),
                RawArgument::quoted("${ARGN}"),
                RawArgument::unquoted("${ARGV2}/${ARGC}"),
            ],
        );

        let rebuilt = substitute_invocation(&recorded, &def, &actuals, &synthesized);
        assert_eq!(rebuilt.args[0].value, "1-2");
        assert_eq!(rebuilt.args[1].value, "3;4");
        assert!(rebuilt.args[1].is_quoted());
        assert_eq!(rebuilt.args[2].value, "3/4");
    }

    #[test]
    fn unrelated_references_are_left_for_normal_expansion() {
        let def = definition(&["a"]);
        let actuals = vec!["x".to_string()];
        let synthesized = SynthesizedArguments {
            argc: "1".to_string(),
            argv: "x".to_string(),
            argn: String::new(),
        };
        let recorded = RawInvocation::new("leaf", vec![RawArgument::unquoted("${OTHER}/${a}")]);

        let rebuilt = substitute_invocation(&recorded, &def, &actuals, &synthesized);
        assert_eq!(rebuilt.args[0].value, "${OTHER}/x");
    }
}
