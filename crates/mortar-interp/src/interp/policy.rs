use std::collections::BTreeMap;

/// Versioned behavior flags preserving backward-compatible evaluation
/// semantics. Each policy has a stable identifier scripts can probe with
/// `if(POLICY MOPxxxx)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Policy {
    /// MOP0001: bare tokens adjacent to a condition operator auto-dereference
    /// as variable names (`Old`) or evaluate by the modern constant rules
    /// (`New`).
    BareConstantDeref,
    /// MOP0002: quoted tokens are eligible as condition keywords and for
    /// auto-dereference (`Old`) or always taken literally (`New`).
    QuotedArgDeref,
    /// MOP0003: `IN_LIST` is recognized as an operator (`New`) or left as an
    /// ordinary token (`Old`).
    InListOperator,
    /// MOP0004: empty actual arguments survive `ARGV`/`ARGN` joining (`New`)
    /// or are dropped (`Old`).
    KeepEmptyListElements,
}

impl Policy {
    pub fn id(self) -> &'static str {
        match self {
            Policy::BareConstantDeref => "MOP0001",
            Policy::QuotedArgDeref => "MOP0002",
            Policy::InListOperator => "MOP0003",
            Policy::KeepEmptyListElements => "MOP0004",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "MOP0001" => Some(Policy::BareConstantDeref),
            "MOP0002" => Some(Policy::QuotedArgDeref),
            "MOP0003" => Some(Policy::InListOperator),
            "MOP0004" => Some(Policy::KeepEmptyListElements),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyStatus {
    Old,
    #[default]
    New,
}

/// The set of policy statuses in effect. Unset policies default to `New`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    statuses: BTreeMap<Policy, PolicyStatus>,
}

impl PolicySet {
    pub fn status(&self, policy: Policy) -> PolicyStatus {
        self.statuses.get(&policy).copied().unwrap_or_default()
    }

    pub fn set(&mut self, policy: Policy, status: PolicyStatus) {
        self.statuses.insert(policy, status);
    }
}

impl super::state::Interpreter {
    pub fn policy_status(&self, policy: Policy) -> PolicyStatus {
        self.policies
            .last()
            .expect("the root policy set is never popped")
            .status(policy)
    }

    pub fn set_policy(&mut self, policy: Policy, status: PolicyStatus) {
        self.policies
            .last_mut()
            .expect("the root policy set is never popped")
            .set(policy, status);
    }

    /// The snapshot recorded into macro/function definitions.
    pub fn policy_snapshot(&self) -> PolicySet {
        self.policies
            .last()
            .expect("the root policy set is never popped")
            .clone()
    }

    /// Replay of a recorded body runs under the definition-time policy set
    /// ("policy scope"); the caller's set is restored afterwards.
    pub(crate) fn push_policy_scope(&mut self, snapshot: PolicySet) {
        self.policies.push(snapshot);
    }

    pub(crate) fn pop_policy_scope(&mut self) {
        if self.policies.len() > 1 {
            self.policies.pop();
        }
    }
}
