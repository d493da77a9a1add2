//! Variable scopes that state snapshots are captured from and restored into.

use std::ffi::OsString;

use hashbrown::{HashMap, HashSet};

/// A set of named scalar bindings.
///
/// `get` serves capture; `slot_mut` serves restoration and only returns
/// bindings the scope explicitly declared. A declared binding holds `None`
/// until it is assigned.
pub trait VariableScope {
    /// Current value of `name`, or `None` when the name is unbound or unset.
    fn get(&self, name: &str) -> Option<&str>;

    /// Mutable slot for a binding declared by this scope.
    fn slot_mut(&mut self, name: &str) -> Option<&mut Option<String>>;

    /// Whether `name` is bound to a value that has no textual form.
    fn is_unrepresentable(&self, _name: &str) -> bool {
        false
    }
}

/// Scope whose bindings are declared explicitly by the consuming code,
/// mirroring a function's local variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalScope {
    bindings: HashMap<String, Option<String>>,
}

impl LocalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name` without a value. Re-declaring keeps the current value.
    pub fn declare(&mut self, name: impl Into<String>) -> &mut Self {
        self.bindings.entry(name.into()).or_insert(None);
        self
    }

    /// Declare `name` with an initial value.
    pub fn declare_with(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.bindings.insert(name.into(), Some(value.into()));
        self
    }

    /// Assign a declared binding. Returns `false` when `name` was never declared.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> bool {
        match self.bindings.get_mut(name) {
            Some(slot) => {
                *slot = Some(value.into());
                true
            }
            None => false,
        }
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl VariableScope for LocalScope {
    fn get(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).and_then(|value| value.as_deref())
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        self.bindings.get_mut(name)
    }
}

/// Read-only view of the process environment captured at construction.
///
/// Nothing is declared in it, so restoring into it is always a no-op.
#[derive(Debug, Clone, Default)]
pub struct EnvScope {
    vars: HashMap<String, String>,
    non_utf8: HashSet<String>,
}

impl EnvScope {
    pub fn capture() -> Self {
        Self::from_vars_os(std::env::vars_os())
    }

    /// Build from raw environment pairs. Keys that are not valid UTF-8 can
    /// never be named and are dropped; values that are not valid UTF-8 are
    /// remembered so capture can refuse them.
    pub fn from_vars_os<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut scope = Self::default();
        for (key, value) in pairs {
            let Ok(key) = key.into_string() else {
                continue;
            };
            match value.into_string() {
                Ok(value) => {
                    scope.vars.insert(key, value);
                }
                Err(_) => {
                    scope.non_utf8.insert(key);
                }
            }
        }
        scope
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            non_utf8: HashSet::new(),
        }
    }
}

impl VariableScope for EnvScope {
    fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    fn slot_mut(&mut self, _name: &str) -> Option<&mut Option<String>> {
        None
    }

    fn is_unrepresentable(&self, name: &str) -> bool {
        self.non_utf8.contains(name)
    }
}
