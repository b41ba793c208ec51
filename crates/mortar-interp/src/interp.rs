mod blockers;
mod builtins;
mod condition;
mod dispatch;
mod expand;
mod invoke;
mod policy;
mod scope;
mod state;


pub use condition::ConditionEvaluator;
pub use invoke::{DefinitionKind, MacroOrFunctionDefinition};
pub use policy::{Policy, PolicySet, PolicyStatus};
pub use state::{
    Command, CommandArguments, Interpreter, InterpreterOptions, NullSystemInspector,
    SystemInspector, MATCH_VARIABLE_PREFIX, RECURSION_DEPTH_VARIABLE,
};

#[cfg(test)]
pub(crate) mod interp_test_support {
    use std::cell::RefCell;
    use std::rc::Rc;

    use mortar_core::{ControlSignal, MortarError, RawArgument, RawInvocation, Status};

    use super::state::{Command, CommandArguments, Interpreter};

    /// Builds an invocation whose arguments are all unquoted, the common case
    /// in scripts.
    pub(crate) fn inv(name: &str, args: &[&str]) -> RawInvocation {
        RawInvocation::new(
            name,
            args.iter().map(|arg| RawArgument::unquoted(*arg)).collect(),
        )
    }

    /// Builds an invocation from `(value, quoted)` pairs for cases where
    /// quoting matters.
    pub(crate) fn inv_q(name: &str, args: &[(&str, bool)]) -> RawInvocation {
        RawInvocation::new(
            name,
            args.iter()
                .map(|(value, quoted)| {
                    if *quoted {
                        RawArgument::quoted(*value)
                    } else {
                        RawArgument::unquoted(*value)
                    }
                })
                .collect(),
        )
    }

    /// A leaf command that records every expanded argument list it is
    /// dispatched with. Tests use it to count and inspect body replays.
    #[derive(Clone)]
    pub(crate) struct RecorderCommand {
        pub(crate) calls: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl Command for RecorderCommand {
        fn clone_command(&self) -> Box<dyn Command> {
            Box::new(self.clone())
        }

        fn execute(
            &mut self,
            _invocation: &RawInvocation,
            args: CommandArguments<'_>,
            _interp: &mut Interpreter,
        ) -> Status {
            let CommandArguments::Expanded(args) = args else {
                return Err(MortarError::new(
                    "TEST_RECORDER_ARGS",
                    "recorder expects expanded arguments",
                ));
            };
            self.calls
                .borrow_mut()
                .push(args.iter().map(|arg| arg.value.clone()).collect());
            Ok(ControlSignal::None)
        }
    }

    /// Registers a recorder under `name` and hands back the shared call log.
    pub(crate) fn install_recorder(
        interp: &mut Interpreter,
        name: &str,
    ) -> Rc<RefCell<Vec<Vec<String>>>> {
        let calls = Rc::new(RefCell::new(Vec::new()));
        interp.register_command(
            name,
            Box::new(RecorderCommand {
                calls: Rc::clone(&calls),
            }),
        );
        calls
    }
}
