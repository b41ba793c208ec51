use mortar_core::{EmptyElements, ExpandedArgument, MortarError, RawArgument};

use super::state::Interpreter;

enum ReferenceKind {
    Variable,
    Environment,
}

impl Interpreter {
    /// Expands `${var}` and `$ENV{name}` references in the raw arguments and
    /// applies list semantics: an unquoted argument whose expansion contains
    /// unescaped `;` becomes several arguments (empty elements dropped); a
    /// quoted argument always stays a single argument.
    pub fn expand_arguments(
        &self,
        args: &[RawArgument],
    ) -> Result<Vec<ExpandedArgument>, MortarError> {
        let mut expanded = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.expand_string(&arg.value)?;
            if arg.is_quoted() {
                expanded.push(ExpandedArgument::new(unescape_separators(&value), true));
            } else {
                for element in mortar_core::split_list(&value, EmptyElements::Drop) {
                    expanded.push(ExpandedArgument::new(element, false));
                }
            }
        }
        Ok(expanded)
    }

    /// Convenience for callers that only need the expanded string values.
    pub fn expand_argument_values(
        &self,
        args: &[RawArgument],
    ) -> Result<Vec<String>, MortarError> {
        Ok(self
            .expand_arguments(args)?
            .into_iter()
            .map(|arg| arg.value)
            .collect())
    }

    /// Substitutes variable references, innermost first, so `${${A}}`
    /// dereferences through the value of `A`. Undefined variables expand to
    /// the empty string. `\$` and `\\` are resolved here; `\;` is preserved
    /// for the list-splitting stage.
    pub fn expand_string(&self, input: &str) -> Result<String, MortarError> {
        // Stack of open references: the bottom buffer is the final output.
        let mut buffers: Vec<(Option<ReferenceKind>, String)> = vec![(None, String::new())];
        let mut chars = input.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.peek() {
                    Some('$') => {
                        buffers.last_mut().expect("buffer stack").1.push('$');
                        chars.next();
                    }
                    Some('\\') => {
                        buffers.last_mut().expect("buffer stack").1.push('\\');
                        chars.next();
                    }
                    _ => buffers.last_mut().expect("buffer stack").1.push('\\'),
                },
                '$' => {
                    if chars.peek() == Some(&'{') {
                        chars.next();
                        buffers.push((Some(ReferenceKind::Variable), String::new()));
                    } else {
                        // $ENV{...} or a bare dollar sign.
                        let rest: String = chars.clone().take(4).collect();
                        if rest.starts_with("ENV{") {
                            for _ in 0..4 {
                                chars.next();
                            }
                            buffers.push((Some(ReferenceKind::Environment), String::new()));
                        } else {
                            buffers.last_mut().expect("buffer stack").1.push('$');
                        }
                    }
                }
                '}' if buffers.len() > 1 => {
                    let (kind, name) = buffers.pop().expect("checked above");
                    let resolved = match kind {
                        Some(ReferenceKind::Variable) => {
                            self.get_variable(&name).unwrap_or_default().to_string()
                        }
                        Some(ReferenceKind::Environment) => {
                            std::env::var(&name).unwrap_or_default()
                        }
                        None => unreachable!("the bottom buffer is never popped"),
                    };
                    buffers
                        .last_mut()
                        .expect("buffer stack")
                        .1
                        .push_str(&resolved);
                }
                other => buffers.last_mut().expect("buffer stack").1.push(other),
            }
        }

        if buffers.len() != 1 {
            return Err(MortarError::new(
                "EXPAND_UNTERMINATED_REFERENCE",
                format!("Unterminated variable reference in \"{}\".", input),
            ));
        }
        Ok(buffers.pop().expect("exactly one buffer left").1)
    }
}

fn unescape_separators(value: &str) -> String {
    value.replace("\\;", ";")
}
