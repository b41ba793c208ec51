use mortar_core::{ControlSignal, MortarError, RawInvocation, Status};

use super::state::{CommandArguments, Interpreter};

impl Interpreter {
    /// Drives one script file: every invocation in order, with blocker
    /// interception and a status check after each dispatch. `return()` is
    /// consumed here, at the file boundary. Any error marks the process-wide
    /// fatal flag and aborts the rest of the file; open blocks are left on
    /// the stack for the driver to inspect.
    pub fn run_file(&mut self, invocations: &[RawInvocation]) -> Result<(), MortarError> {
        let barrier = self.blockers.len();
        let result = self.run_file_invocations(invocations, barrier);
        if result.is_err() {
            self.fatal_occurred = true;
        }
        result
    }

    fn run_file_invocations(
        &mut self,
        invocations: &[RawInvocation],
        barrier: usize,
    ) -> Result<(), MortarError> {
        for invocation in invocations {
            match self.execute_invocation(invocation)? {
                ControlSignal::None => {}
                // break()/continue() outside a loop are rejected by their
                // commands, so only Return reaches the file boundary. An
                // early exit abandons any still-open blocks at the barrier,
                // same as a body replay cut short.
                _ => {
                    self.blockers.truncate(barrier);
                    return Ok(());
                }
            }
        }

        if self.blockers.len() > barrier {
            let opener = self
                .blockers
                .last()
                .expect("length checked above");
            return Err(MortarError::with_span(
                "SYNTAX_UNCLOSED_BLOCK",
                format!(
                    "A \"{}\" block is missing its \"{}\" before the end of the file.",
                    opener.start_keyword(),
                    opener.end_keyword(),
                ),
                opener.opener_span,
            ));
        }
        Ok(())
    }

    /// Removes every open block construct, e.g. after a fatal error when the
    /// driver wants to reuse the interpreter for another file.
    pub fn clear_open_blocks(&mut self) {
        self.blockers.clear();
    }

    /// Executes a single invocation: the active blocker (if any) gets first
    /// refusal, then normal dispatch.
    pub fn execute_invocation(&mut self, invocation: &RawInvocation) -> Status {
        if !self.blockers.is_empty() {
            if let Some(signal) = self.offer_to_blockers(invocation)? {
                return Ok(signal);
            }
        }
        self.dispatch(invocation)
    }

    /// Looks up the prototype, clones it into a working instance, supplies
    /// raw or pre-expanded arguments, and runs it. Disabled commands are a
    /// no-op success.
    fn dispatch(&mut self, invocation: &RawInvocation) -> Status {
        let key = invocation.name.to_ascii_lowercase();
        let Some(entry) = self.registry.get(&key) else {
            return Err(MortarError::with_span(
                "DISPATCH_UNKNOWN_COMMAND",
                format!("Unknown command \"{}\".", invocation.name),
                invocation.span,
            ));
        };
        if !entry.enabled {
            return Ok(ControlSignal::None);
        }
        if self.script_mode && !entry.prototype.is_scriptable() {
            return Err(MortarError::with_span(
                "DISPATCH_NOT_SCRIPTABLE",
                format!(
                    "Command \"{}\" is not allowed in script mode.",
                    invocation.name
                ),
                invocation.span,
            ));
        }

        let mut working = entry.prototype.clone_command();
        tracing::trace!(command = %key, args = invocation.args.len(), "dispatch");
        if working.wants_raw_arguments() {
            working.execute(invocation, CommandArguments::Raw(&invocation.args), self)
        } else {
            let expanded = self.expand_arguments(&invocation.args)?;
            working.execute(invocation, CommandArguments::Expanded(&expanded), self)
        }
    }
}
