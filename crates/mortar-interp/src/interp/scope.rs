use mortar_core::MortarError;

use super::state::{ExecutionScope, Interpreter, MATCH_VARIABLE_PREFIX};

impl Interpreter {
    /// Reads a variable, falling through from the innermost scope outward.
    /// A tombstone (explicit unset) in an inner scope hides parent bindings.
    pub fn get_variable(&self, name: &str) -> Option<&str> {
        for scope in self.scopes.iter().rev() {
            if let Some(entry) = scope.vars.get(name) {
                return entry.as_deref();
            }
        }
        None
    }

    pub fn is_variable_defined(&self, name: &str) -> bool {
        self.get_variable(name).is_some()
    }

    /// Writes into the current scope only; a parent binding of the same name
    /// is shadowed, never mutated.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let scope = self
            .scopes
            .last_mut()
            .expect("the root scope is never popped");
        scope.vars.insert(name.into(), Some(value.into()));
    }

    /// Appends to the visible value as a list element (`;` separated), storing
    /// the result in the current scope.
    pub fn append_variable(&mut self, name: &str, value: &str) {
        let appended = match self.get_variable(name) {
            Some(current) if !current.is_empty() => format!("{};{}", current, value),
            _ => value.to_string(),
        };
        self.set_variable(name, appended);
    }

    /// At the root scope the binding is removed outright; in inner scopes a
    /// tombstone is left so the parent binding stays hidden.
    pub fn unset_variable(&mut self, name: &str) {
        let at_root = self.scopes.len() == 1;
        let scope = self
            .scopes
            .last_mut()
            .expect("the root scope is never popped");
        if at_root {
            scope.vars.remove(name);
        } else {
            scope.vars.insert(name.to_string(), None);
        }
    }

    /// The "raise one variable to the parent scope" operation. `None` raises
    /// an unset. At the root scope there is no parent; the request is dropped.
    pub fn raise_variable(&mut self, name: &str, value: Option<&str>) {
        let len = self.scopes.len();
        if len < 2 {
            tracing::debug!(name, "PARENT_SCOPE at the root scope has no effect");
            return;
        }
        self.scopes[len - 2]
            .vars
            .insert(name.to_string(), value.map(str::to_string));
    }

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(ExecutionScope::default());
    }

    pub(crate) fn pop_scope(&mut self) -> Result<(), MortarError> {
        if self.scopes.len() <= 1 {
            return Err(MortarError::new(
                "SCOPE_UNDERFLOW",
                "Attempted to pop the root execution scope.",
            ));
        }
        self.scopes.pop();
        Ok(())
    }

    /// Clears all `MORTAR_MATCH_*` capture variables. Runs before every
    /// regex predicate evaluation.
    pub(crate) fn clear_match_captures(&mut self) {
        for index in 0..10 {
            self.unset_variable(&format!("{}{}", MATCH_VARIABLE_PREFIX, index));
        }
        self.unset_variable(&format!("{}COUNT", MATCH_VARIABLE_PREFIX));
    }

    /// Populates capture variables from a successful regex match. The count
    /// covers groups that participated in the match, not every declared
    /// group: an optional group that matched nothing stays unset.
    pub(crate) fn store_match_captures(&mut self, captures: &regex::Captures<'_>) {
        let mut count = 0;
        for index in 0..captures.len().min(10) {
            if let Some(group) = captures.get(index) {
                self.set_variable(
                    format!("{}{}", MATCH_VARIABLE_PREFIX, index),
                    group.as_str(),
                );
                if index > 0 {
                    count += 1;
                }
            }
        }
        self.set_variable(
            format!("{}COUNT", MATCH_VARIABLE_PREFIX),
            count.to_string(),
        );
    }
}

#[cfg(test)]
mod scope_tests {
    use super::super::state::Interpreter;

    #[test]
    fn inner_scopes_read_through_and_shadow_on_write() {
        let mut interp = Interpreter::new();
        interp.set_variable("X", "outer");
        interp.push_scope();
        assert_eq!(interp.get_variable("X"), Some("outer"));

        interp.set_variable("X", "inner");
        assert_eq!(interp.get_variable("X"), Some("inner"));

        interp.pop_scope().expect("pop");
        assert_eq!(interp.get_variable("X"), Some("outer"));
    }

    #[test]
    fn unset_in_inner_scope_hides_the_parent_binding() {
        let mut interp = Interpreter::new();
        interp.set_variable("X", "outer");
        interp.push_scope();
        interp.unset_variable("X");
        assert_eq!(interp.get_variable("X"), None);
        interp.pop_scope().expect("pop");
        assert_eq!(interp.get_variable("X"), Some("outer"));
    }

    #[test]
    fn raise_variable_writes_into_the_parent() {
        let mut interp = Interpreter::new();
        interp.push_scope();
        interp.raise_variable("Y", Some("raised"));
        interp.pop_scope().expect("pop");
        assert_eq!(interp.get_variable("Y"), Some("raised"));

        // No parent at the root: dropped, not an error.
        interp.raise_variable("Z", Some("ignored"));
        assert_eq!(interp.get_variable("Z"), None);
    }

    #[test]
    fn append_builds_a_semicolon_list() {
        let mut interp = Interpreter::new();
        interp.append_variable("L", "a");
        interp.append_variable("L", "b");
        assert_eq!(interp.get_variable("L"), Some("a;b"));
    }

    #[test]
    fn popping_the_root_scope_is_an_error() {
        let mut interp = Interpreter::new();
        let error = interp.pop_scope().expect_err("root pop should fail");
        assert_eq!(error.code, "SCOPE_UNDERFLOW");
    }
}
