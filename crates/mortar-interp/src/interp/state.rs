use std::collections::BTreeMap;
use std::sync::Arc;

use mortar_core::{ExpandedArgument, MortarError, RawArgument, RawInvocation, Status};

use super::blockers::FunctionBlocker;
use super::builtins;
use super::policy::PolicySet;

/// Capture variables populated by the `MATCHES` predicate:
/// `MORTAR_MATCH_0` .. `MORTAR_MATCH_9` plus `MORTAR_MATCH_COUNT`.
pub const MATCH_VARIABLE_PREFIX: &str = "MORTAR_MATCH_";

/// When set to a positive integer, overrides the configured recursion limit.
pub const RECURSION_DEPTH_VARIABLE: &str = "MORTAR_MAXIMUM_RECURSION_DEPTH";

pub(crate) const DEFAULT_RECURSION_LIMIT: usize = 400;

/// Filesystem and target predicates consumed by the condition evaluator.
/// The core never touches the filesystem itself; a surrounding driver decides
/// what these mean.
pub trait SystemInspector: Send + Sync {
    fn path_exists(&self, _path: &str) -> bool {
        false
    }

    fn is_directory(&self, _path: &str) -> bool {
        false
    }

    fn is_symlink(&self, _path: &str) -> bool {
        false
    }

    /// Lexical test, no filesystem access: absolute POSIX or drive-letter
    /// paths.
    fn is_absolute_path(&self, path: &str) -> bool {
        let mut chars = path.chars();
        match chars.next() {
            Some('/') | Some('~') => true,
            Some(drive) if drive.is_ascii_alphabetic() => chars.next() == Some(':'),
            _ => false,
        }
    }

    fn target_exists(&self, _name: &str) -> bool {
        false
    }
}

/// The default inspector: no files, no targets.
#[derive(Debug, Default)]
pub struct NullSystemInspector;

impl SystemInspector for NullSystemInspector {}

/// Arguments handed to a command by the dispatcher. Block-opening commands
/// opt into the raw form because they must see un-substituted tokens; leaf
/// commands get the pre-expanded form.
pub enum CommandArguments<'a> {
    Expanded(&'a [ExpandedArgument]),
    Raw(&'a [RawArgument]),
}

/// A named, invokable operation. A prototype instance sits in the registry;
/// every dispatch clones it into a throwaway working instance, so `execute`
/// may keep per-invocation state in `&mut self` without leaking between
/// calls.
pub trait Command {
    fn clone_command(&self) -> Box<dyn Command>;

    /// Opt out of argument pre-expansion. Block openers need the raw tokens.
    fn wants_raw_arguments(&self) -> bool {
        false
    }

    /// Whether the command may run in script-only mode.
    fn is_scriptable(&self) -> bool {
        true
    }

    fn execute(
        &mut self,
        invocation: &RawInvocation,
        args: CommandArguments<'_>,
        interp: &mut Interpreter,
    ) -> Status;
}

pub(crate) struct RegistryEntry {
    pub(crate) prototype: Box<dyn Command>,
    pub(crate) enabled: bool,
}

/// One variable-binding environment. `None` entries are tombstones: an
/// `unset` in an inner scope must hide a parent binding, not expose it.
#[derive(Default)]
pub(crate) struct ExecutionScope {
    pub(crate) vars: BTreeMap<String, Option<String>>,
}

pub struct InterpreterOptions {
    pub inspector: Option<Arc<dyn SystemInspector>>,
    pub recursion_limit: usize,
    /// Script-only mode: dispatching a command whose prototype is not
    /// scriptable fails instead of running.
    pub script_mode: bool,
    pub initial_variables: BTreeMap<String, String>,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            inspector: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            script_mode: false,
            initial_variables: BTreeMap::new(),
        }
    }
}

/// The execution context: command registry, variable-scope stack, blocker
/// stack, policy stack and status bookkeeping. Single-threaded and strictly
/// synchronous; replaying a body is an ordinary recursive call.
pub struct Interpreter {
    pub(crate) registry: BTreeMap<String, RegistryEntry>,
    pub(crate) scopes: Vec<ExecutionScope>,
    pub(crate) blockers: Vec<FunctionBlocker>,
    pub(crate) policies: Vec<PolicySet>,
    pub(crate) inspector: Arc<dyn SystemInspector>,
    pub(crate) script_mode: bool,
    pub(crate) recursion_depth: usize,
    pub(crate) recursion_limit: usize,
    pub(crate) loop_depth: usize,
    pub(crate) fatal_occurred: bool,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_options(InterpreterOptions::default())
    }

    pub fn with_options(options: InterpreterOptions) -> Self {
        let inspector = options
            .inspector
            .unwrap_or_else(|| Arc::new(NullSystemInspector));

        let mut root_scope = ExecutionScope::default();
        for (name, value) in options.initial_variables {
            root_scope.vars.insert(name, Some(value));
        }

        let mut interp = Self {
            registry: BTreeMap::new(),
            scopes: vec![root_scope],
            blockers: Vec::new(),
            policies: vec![PolicySet::default()],
            inspector,
            script_mode: options.script_mode,
            recursion_depth: 0,
            recursion_limit: options.recursion_limit,
            loop_depth: 0,
            fatal_occurred: false,
        };
        builtins::register_all(&mut interp);
        interp
    }

    /// Inserts or replaces a prototype. Command names are case-insensitive;
    /// the registry keys are lower-cased.
    pub fn register_command(&mut self, name: &str, prototype: Box<dyn Command>) {
        self.registry.insert(
            name.to_ascii_lowercase(),
            RegistryEntry {
                prototype,
                enabled: true,
            },
        );
    }

    /// Moves an entry to a new key. Used when a macro or function definition
    /// shadows an existing command: the old command stays callable under the
    /// new name.
    pub fn rename_command(&mut self, old_name: &str, new_name: &str) -> Result<(), MortarError> {
        let entry = self
            .registry
            .remove(&old_name.to_ascii_lowercase())
            .ok_or_else(|| {
                MortarError::new(
                    "DISPATCH_UNKNOWN_COMMAND",
                    format!("Cannot rename unknown command \"{}\".", old_name),
                )
            })?;
        self.registry.insert(new_name.to_ascii_lowercase(), entry);
        Ok(())
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.registry.contains_key(&name.to_ascii_lowercase())
    }

    /// A disabled command dispatches as a no-op success.
    pub fn set_command_enabled(&mut self, name: &str, enabled: bool) -> Result<(), MortarError> {
        let entry = self
            .registry
            .get_mut(&name.to_ascii_lowercase())
            .ok_or_else(|| {
                MortarError::new(
                    "DISPATCH_UNKNOWN_COMMAND",
                    format!("Cannot disable unknown command \"{}\".", name),
                )
            })?;
        entry.enabled = enabled;
        Ok(())
    }

    pub fn command_names(&self) -> Vec<String> {
        self.registry.keys().cloned().collect()
    }

    /// Set once any error bubbles out of `run_file`; the surrounding driver
    /// observes it after the file completes.
    pub fn fatal_error_occurred(&self) -> bool {
        self.fatal_occurred
    }

    pub fn clear_fatal_error(&mut self) {
        self.fatal_occurred = false;
    }

    /// Number of block constructs currently open (awaiting their closing
    /// keyword).
    pub fn open_block_count(&self) -> usize {
        self.blockers.len()
    }

    pub(crate) fn effective_recursion_limit(&self) -> usize {
        match self
            .get_variable(RECURSION_DEPTH_VARIABLE)
            .and_then(|value| value.parse::<usize>().ok())
        {
            Some(limit) if limit > 0 => limit,
            _ => self.recursion_limit,
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
