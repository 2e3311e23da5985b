use crate::error::{PreprocessError, Result};
use regex::bytes::Regex;
use serde::Serialize;

/// Locates the directive prefix inside a line
#[derive(Debug, Clone)]
pub struct Prefix {
    literal: String,
    matcher: Regex,
}

impl Prefix {
    /// # Errors
    ///
    /// - `PreprocessError::EmptyPrefix` if `prefix` is empty.
    /// - `PreprocessError::Regex` if the escaped prefix fails to compile.
    pub fn new(prefix: &str) -> Result<Self> {
        if prefix.is_empty() {
            return Err(PreprocessError::EmptyPrefix);
        }
        Ok(Self {
            literal: prefix.to_string(),
            matcher: Regex::new(&regex::escape(prefix))?,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.literal
    }

    /// Splits a line at the first prefix occurrence into the text before it
    /// and the whitespace-separated tokens after it. `None` if the line has
    /// no prefix.
    #[must_use]
    pub fn split<'l>(&self, line: &'l [u8]) -> Option<(&'l [u8], Vec<String>)> {
        let found = self.matcher.find(line)?;
        let tokens = String::from_utf8_lossy(&line[found.end()..])
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Some((&line[..found.start()], tokens))
    }
}

/// A directive recognised by the default handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    End,
    Def { name: String },
    If { condition: String },
    /// `omit` drops the line; `omit if <flag>` drops it only when the flag holds
    Omit { condition: Option<String> },
    /// `include if <flag>` keeps the text only when the flag holds; a bare
    /// `include if` drops the line
    Include { condition: Option<String> },
    Template { name: String },
    Replace { sentinel: String, replacement: String },
}

impl Directive {
    /// Parses the tokens following the prefix. Trailing tokens beyond what a
    /// directive uses are ignored, except for `replace`.
    ///
    /// # Errors
    ///
    /// Returns the matching engine error, tagged with `line`, for an empty,
    /// unknown, or malformed directive.
    pub fn parse(tokens: &[String], line: usize) -> Result<Self> {
        let Some(keyword) = tokens.first() else {
            return Err(PreprocessError::EmptyDirective { line });
        };
        let argument = |index: usize| {
            tokens
                .get(index)
                .cloned()
                .ok_or_else(|| PreprocessError::MissingArgument {
                    line,
                    directive: keyword.clone(),
                })
        };

        match keyword.as_str() {
            "end" => Ok(Self::End),
            "def" => Ok(Self::Def { name: argument(1)? }),
            "if" => Ok(Self::If {
                condition: argument(1)?,
            }),
            "omit" => Ok(Self::Omit {
                condition: if_clause(tokens),
            }),
            "include" => {
                if !tokens.get(1).is_some_and(|t| t == "if") {
                    return Err(PreprocessError::MissingIfClause { line });
                }
                Ok(Self::Include {
                    condition: if_clause(tokens),
                })
            }
            "template" => Ok(Self::Template { name: argument(1)? }),
            "replace" => match tokens {
                [_, sentinel, replacement] => Ok(Self::Replace {
                    sentinel: sentinel.clone(),
                    replacement: replacement.clone(),
                }),
                _ => Err(PreprocessError::MalformedReplace { line }),
            },
            other => Err(PreprocessError::UnknownDirective {
                line,
                directive: other.to_string(),
            }),
        }
    }
}

/// Flag of a trailing `if <flag>` clause, if both tokens are present
fn if_clause(tokens: &[String]) -> Option<String> {
    match tokens {
        [_, keyword, flag, ..] if keyword == "if" => Some(flag.clone()),
        _ => None,
    }
}

/// A directive line found by a static scan of the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectiveLine {
    /// 1-based physical line number
    pub line: usize,
    /// Byte offset of the prefix in the input
    pub offset: usize,
    /// First token after the prefix (empty if none)
    pub keyword: String,
    /// Remaining tokens
    pub args: Vec<String>,
}

/// Lists every directive line in `text` without executing anything.
///
/// Template replays are not expanded, so line numbers refer to the input as
/// written.
///
/// # Errors
///
/// Returns `PreprocessError::EmptyPrefix` or `PreprocessError::Regex` if the
/// prefix is unusable.
pub fn find_directives(text: &str, prefix: &str) -> Result<Vec<DirectiveLine>> {
    let prefix = Prefix::new(prefix)?;
    let mut directives = Vec::new();
    let mut line_start = 0;

    for (index, line) in text.split_inclusive('\n').enumerate() {
        if let Some((before, mut tokens)) = prefix.split(line.as_bytes()) {
            let keyword = if tokens.is_empty() {
                String::new()
            } else {
                tokens.remove(0)
            };
            directives.push(DirectiveLine {
                line: index + 1,
                offset: line_start + before.len(),
                keyword,
                args: tokens,
            });
        }
        line_start += line.len();
    }

    Ok(directives)
}
