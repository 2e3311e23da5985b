use crate::error::Result;
use indexmap::IndexMap;
use regex::bytes::{NoExpand, Regex};
use std::borrow::Cow;

#[derive(Debug, Clone)]
struct Replacement {
    matcher: Regex,
    replacement: Vec<u8>,
}

/// Literal sentinel substitutions, applied in the order sentinels were first registered
#[derive(Debug, Clone, Default)]
pub struct ReplacementTable {
    entries: IndexMap<String, Replacement>,
}

impl ReplacementTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or overwrites a sentinel. An overwritten sentinel keeps its position.
    ///
    /// # Errors
    ///
    /// Returns `PreprocessError::Regex` if the escaped sentinel fails to compile.
    pub fn insert(&mut self, sentinel: &str, replacement: &[u8]) -> Result<()> {
        let matcher = Regex::new(&regex::escape(sentinel))?;
        self.entries.insert(
            sentinel.to_string(),
            Replacement {
                matcher,
                replacement: replacement.to_vec(),
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces every occurrence of every sentinel in `line`
    #[must_use]
    pub fn apply<'a>(&self, line: &'a [u8]) -> Cow<'a, [u8]> {
        let mut result = Cow::Borrowed(line);
        for entry in self.entries.values() {
            let replaced = match entry
                .matcher
                .replace_all(&result, NoExpand(&entry.replacement))
            {
                Cow::Owned(replaced) => Some(replaced),
                Cow::Borrowed(_) => None,
            };
            if let Some(replaced) = replaced {
                result = Cow::Owned(replaced);
            }
        }
        result
    }
}
