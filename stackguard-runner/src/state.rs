//! State persistence between paired functions.
//!
//! A [`StateSnapshot`] is an ordered list of captured `name = value` pairs.
//! It is produced by [`Persist`] in one function and applied with
//! [`StateSnapshot::apply`] in another, where only bindings the receiving
//! scope declared are written, and only while they are still empty.
//!
//! The `Display` form is a sequence of guarded bash assignments so shell
//! callers can `eval` it inside a function that declared the matching
//! `local` variables:
//!
//! ```text
//! if [[ -n "$(local -p a 2>/dev/null)" ]]; then if [[ -z "${a-}" ]]; then a='hello world'; else printf 'restore: %s is already set\n' a >&2; false; fi; fi
//! ```
//!
//! [`StateSnapshot::parse`] accepts exactly that shape back, within a time
//! budget, and never evaluates anything.

use std::borrow::Cow;
use std::fmt;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use stackguard_config::StateConfig;
use tracing::debug;

use crate::error::StateError;
use crate::scope::VariableScope;

/// Names used for internal bookkeeping; they can never be persisted.
pub const RESERVED_NAMES: &[&str] = &[
    "__var_name",
    "__existing_state",
    "__output_state_var",
    "__output",
];

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

// One guarded assignment as rendered by `render_clause`. Groups 1, 2, 3 and 5
// repeat the variable name; group 4 is the quoted value.
static CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"^if \[\[ -n "\$\(local -p ([A-Za-z_][A-Za-z0-9_]*) 2>/dev/null\)" \]\]; then "#,
        r#"if \[\[ -z "\$\{([A-Za-z_][A-Za-z0-9_]*)-\}" \]\]; then "#,
        r#"([A-Za-z_][A-Za-z0-9_]*)=((?:'[^']*'|\\[!']|[A-Za-z0-9_=/,.+\-])+); "#,
        r#"else printf 'restore: %s is already set\\n' ([A-Za-z_][A-Za-z0-9_]*) >&2; false; fi; fi"#,
    ))
    .expect("clause pattern is valid")
});

/// Returns true when `name` is usable as a variable or command name.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

fn validate_name(name: &str) -> Result<(), StateError> {
    if !is_valid_identifier(name) {
        return Err(StateError::InvalidName {
            name: name.to_owned(),
        });
    }
    if is_reserved_name(name) {
        return Err(StateError::ReservedName {
            name: name.to_owned(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub name: String,
    pub value: String,
}

/// Ordered restoration instructions produced by [`Persist`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    entries: Vec<StateEntry>,
}

/// Outcome of applying a snapshot that hit no occupied binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Names written into the scope, in snapshot order.
    pub assigned: Vec<String>,
    /// Names the scope never declared.
    pub skipped: Vec<String>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[StateEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value `name` ends up with when the snapshot is applied to a scope
    /// where it is declared and unset: the first non-empty entry, otherwise
    /// an empty one.
    pub fn get(&self, name: &str) -> Option<&str> {
        let mut values = self
            .entries
            .iter()
            .filter(|entry| entry.name == name)
            .map(|entry| entry.value.as_str());
        let first = values.next()?;
        if !first.is_empty() {
            return Some(first);
        }
        Some(values.find(|value| !value.is_empty()).unwrap_or(first))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn push(&mut self, name: &str, value: &str) {
        self.entries.push(StateEntry {
            name: name.to_owned(),
            value: value.to_owned(),
        });
    }

    /// Restore every entry into `scope`.
    ///
    /// Undeclared names are skipped. Declared bindings that are unset or empty
    /// receive the captured value. Declared bindings that already hold a value
    /// are left alone; the remaining entries are still applied and the first
    /// such name is reported as [`StateError::SlotOccupied`].
    pub fn apply<S>(&self, scope: &mut S) -> Result<RestoreReport, StateError>
    where
        S: VariableScope + ?Sized,
    {
        let mut report = RestoreReport::default();
        let mut occupied: Option<String> = None;

        for entry in &self.entries {
            match scope.slot_mut(&entry.name) {
                None => report.skipped.push(entry.name.clone()),
                Some(slot) if slot.as_deref().is_none_or(str::is_empty) => {
                    *slot = Some(entry.value.clone());
                    report.assigned.push(entry.name.clone());
                }
                Some(_) => {
                    debug!(name = %entry.name, "restore target already holds a value");
                    occupied.get_or_insert_with(|| entry.name.clone());
                }
            }
        }

        match occupied {
            Some(name) => Err(StateError::SlotOccupied { name }),
            None => Ok(report),
        }
    }

    /// Parse the textual form produced by `Display`.
    ///
    /// Anything that is not a clause of the exact rendered shape is reported
    /// as corruption. Parsing stops with [`StateError::ProbeTimeout`] once
    /// `budget` is exhausted.
    pub fn parse(text: &str, budget: Duration) -> Result<Self, StateError> {
        let deadline = Instant::now().checked_add(budget);
        let mut snapshot = Self::new();
        let mut rest = text.trim_start();

        while !rest.is_empty() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(StateError::ProbeTimeout {
                    budget_ms: budget.as_millis(),
                });
            }

            let Some(captures) = CLAUSE.captures(rest) else {
                return Err(corrupt(format!(
                    "unrecognised statement '{}'",
                    excerpt(rest)
                )));
            };

            let name = &captures[1];
            if [&captures[2], &captures[3], &captures[5]]
                .iter()
                .any(|other| *other != name)
            {
                return Err(corrupt(format!(
                    "clause guarding '{name}' assigns another variable"
                )));
            }

            let value = unquote(&captures[4])
                .ok_or_else(|| corrupt(format!("value for '{name}' is not a single word")))?;
            snapshot.push(name, &value);

            let consumed = captures.get(0).map_or(rest.len(), |m| m.end());
            rest = rest.get(consumed..).unwrap_or_default().trim_start();
        }

        Ok(snapshot)
    }
}

impl fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, entry) in self.entries.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            f.write_str(&render_clause(&entry.name, &entry.value))?;
        }
        Ok(())
    }
}

fn render_clause(name: &str, value: &str) -> String {
    let quoted = shell_escape::unix::escape(Cow::Borrowed(value));
    format!(
        r#"if [[ -n "$(local -p {name} 2>/dev/null)" ]]; then if [[ -z "${{{name}-}}" ]]; then {name}={quoted}; else printf 'restore: %s is already set\n' {name} >&2; false; fi; fi"#
    )
}

fn unquote(token: &str) -> Option<String> {
    let mut words = shell_words::split(token).ok()?;
    if words.len() == 1 { words.pop() } else { None }
}

fn corrupt(reason: String) -> StateError {
    StateError::CorruptState { reason }
}

fn excerpt(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    let mut excerpt: String = first_line.chars().take(60).collect();
    if excerpt.len() < first_line.len() {
        excerpt.push_str("...");
    }
    excerpt
}

/// Hand back restoration instructions unchanged.
///
/// Exists so call sites read as "fetch what restores the state, then apply
/// it in the scope that declared the bindings".
pub fn restore(snippet: &str) -> &str {
    snippet
}

/// Parse `text` and apply it to `scope` in one step.
pub fn apply_text<S>(text: &str, scope: &mut S, budget: Duration) -> Result<RestoreReport, StateError>
where
    S: VariableScope + ?Sized,
{
    StateSnapshot::parse(text, budget)?.apply(scope)
}

/// Capture `names` from `scope` into a fresh snapshot.
pub fn persist<S, I, N>(scope: &S, names: I) -> Result<StateSnapshot, StateError>
where
    S: VariableScope + ?Sized,
    I: IntoIterator<Item = N>,
    N: Into<String>,
{
    Persist::new().names(names).collect(scope)
}

#[derive(Debug, Clone)]
enum PriorState<'a> {
    Snapshot(&'a StateSnapshot),
    Text(Cow<'a, str>),
}

/// Builder for a persist call.
///
/// ```
/// use stackguard_runner::{LocalScope, Persist, VariableScope};
///
/// let mut producer = LocalScope::new();
/// producer.declare_with("host", "media.local");
/// let snapshot = Persist::new().name("host").collect(&producer).unwrap();
///
/// let mut consumer = LocalScope::new();
/// consumer.declare("host");
/// snapshot.apply(&mut consumer).unwrap();
/// assert_eq!(consumer.get("host"), Some("media.local"));
/// ```
#[derive(Debug, Clone)]
pub struct Persist<'a> {
    names: Vec<String>,
    priors: Vec<PriorState<'a>>,
    probe_timeout: Duration,
}

impl Default for Persist<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Persist<'a> {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            priors: Vec::new(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn from_config(config: &StateConfig) -> Self {
        Self::new().probe_timeout(config.probe_timeout())
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    pub fn names<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Extend an existing snapshot instead of starting from scratch.
    pub fn append_to(mut self, prior: &'a StateSnapshot) -> Self {
        self.priors.push(PriorState::Snapshot(prior));
        self
    }

    /// Extend a snapshot given in its textual form.
    pub fn append_text(mut self, prior: impl Into<Cow<'a, str>>) -> Self {
        self.priors.push(PriorState::Text(prior.into()));
        self
    }

    /// Time budget for inspecting a textual prior state.
    pub fn probe_timeout(mut self, budget: Duration) -> Self {
        self.probe_timeout = budget;
        self
    }

    /// Build the snapshot and return it.
    pub fn collect<S>(&self, scope: &S) -> Result<StateSnapshot, StateError>
    where
        S: VariableScope + ?Sized,
    {
        if self.priors.len() > 1 {
            return Err(StateError::MultipleStateInputs);
        }
        for name in &self.names {
            validate_name(name)?;
        }

        let mut snapshot = match self.priors.first() {
            Some(PriorState::Snapshot(prior)) => (*prior).clone(),
            Some(PriorState::Text(text)) => StateSnapshot::parse(text, self.probe_timeout)?,
            None => StateSnapshot::new(),
        };

        for name in &self.names {
            let Some(value) = scope.get(name) else {
                if scope.is_unrepresentable(name) {
                    return Err(StateError::UnrepresentableValue { name: name.clone() });
                }
                debug!(%name, "not bound in the calling scope; skipped");
                continue;
            };
            if let Some(existing) = snapshot.get(name).filter(|existing| !existing.is_empty()) {
                return Err(StateError::NameCollision {
                    name: name.clone(),
                    existing: existing.to_owned(),
                });
            }
            snapshot.push(name, value);
        }

        Ok(snapshot)
    }

    /// Build the snapshot and store its textual form in the declared binding
    /// `target` of `scope`. Nothing is written when any check fails.
    pub fn write_to<S>(&self, scope: &mut S, target: &str) -> Result<(), StateError>
    where
        S: VariableScope + ?Sized,
    {
        validate_name(target)?;
        let snapshot = self.collect(&*scope)?;
        let slot = scope
            .slot_mut(target)
            .ok_or_else(|| StateError::UndeclaredTarget {
                name: target.to_owned(),
            })?;
        *slot = Some(snapshot.to_string());
        Ok(())
    }
}
