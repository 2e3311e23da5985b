use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for linepp operations
#[derive(Error, Debug)]
pub enum PreprocessError {
    /// `end` seen while only the base handler is on the stack
    #[error("line {line}: unexpected end directive")]
    UnexpectedEnd { line: usize },

    /// First directive token is not a known keyword
    #[error("line {line}: unknown directive {directive:?}")]
    UnknownDirective { line: usize, directive: String },

    /// `template` names something that was never captured
    #[error("line {line}: unknown template {name:?} - must be defined beforehand")]
    UnknownTemplate { line: usize, name: String },

    /// `replace` without exactly a sentinel and a replacement
    #[error("line {line}: replace needs both sentinel and replacement")]
    MalformedReplace { line: usize },

    /// `include` not followed by `if`
    #[error("line {line}: expected 'if' for include directive")]
    MissingIfClause { line: usize },

    /// Directive keyword given without its required argument
    #[error("line {line}: {directive} directive is missing its argument")]
    MissingArgument { line: usize, directive: String },

    /// Prefix present but nothing after it
    #[error("line {line}: empty directive")]
    EmptyDirective { line: usize },

    /// Input ended inside an `if` or `def` block (strict mode only)
    #[error("line {line}: end of input with {open} unclosed block(s)")]
    UnclosedBlock { line: usize, open: usize },

    /// Underlying read failure while fetching a line
    #[error("line {line}: read error: {source}")]
    Read {
        line: usize,
        #[source]
        source: io::Error,
    },

    /// Error raised while processing a named input
    #[error("{input}: {source}")]
    Input {
        input: String,
        #[source]
        source: Box<PreprocessError>,
    },

    /// The directive prefix must not be empty
    #[error("Directive prefix must not be empty")]
    EmptyPrefix,

    /// IO error when reading or writing files
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Input file not found
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Input is not valid UTF-8 where text was required
    #[error("Input is not valid UTF-8: {path}")]
    Utf8 { path: PathBuf },

    /// Regex compilation error
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Invalid include/exclude glob
    #[error("Glob error: {0}")]
    Glob(#[from] globset::Error),

    /// `WalkDir` error when traversing directories
    #[error("Directory traversal error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Error from the gitignore-aware walker
    #[error("Directory traversal error: {0}")]
    Ignore(#[from] ignore::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PreprocessError {
    /// Line number the error was detected at, for engine errors
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::UnexpectedEnd { line }
            | Self::UnknownDirective { line, .. }
            | Self::UnknownTemplate { line, .. }
            | Self::MalformedReplace { line }
            | Self::MissingIfClause { line }
            | Self::MissingArgument { line, .. }
            | Self::EmptyDirective { line }
            | Self::UnclosedBlock { line, .. }
            | Self::Read { line, .. } => Some(*line),
            Self::Input { source, .. } => source.line(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PreprocessError>;
