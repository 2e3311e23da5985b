use std::collections::HashSet;

/// Flag that is always enabled and cannot be turned off
pub const ALWAYS_FLAG: &str = "true";

/// Prefix that negates a flag in `if`, `omit if` and `include if`
pub const NEGATION: char = '!';

/// Set of flag names that are "on" for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSet {
    enabled: HashSet<String>,
}

impl FlagSet {
    /// Builds a flag set from caller-supplied names, adding [`ALWAYS_FLAG`]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut enabled: HashSet<String> = names.into_iter().map(Into::into).collect();
        enabled.insert(ALWAYS_FLAG.to_string());
        Self { enabled }
    }

    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    /// Evaluates a directive condition.
    ///
    /// A condition holds when the name itself is set, or when it starts with
    /// [`NEGATION`] and the remaining name is not set.
    #[must_use]
    pub fn test(&self, condition: &str) -> bool {
        if self.is_set(condition) {
            return true;
        }
        condition
            .strip_prefix(NEGATION)
            .is_some_and(|name| !self.is_set(name))
    }

    /// Enabled names in sorted order, for diagnostics
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.enabled.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FlagSet {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl<S: Into<String>> FromIterator<S> for FlagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}
