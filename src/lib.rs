//! # linepp
//!
//! A line-oriented text preprocessor. Lines carrying a configurable prefix
//! token are directives; everything else is copied to the output, with any
//! registered substitutions applied. Used to generate per-flag variants of a
//! single annotated source file.
//!
//! ## Directives
//!
//! ```text
//! #pp if <flag>                 lines up to the matching `end` kept only if <flag> is on
//! #pp if !<flag>                ... kept only if <flag> is off
//! #pp end
//! #pp def <name>                capture raw lines up to `enddef` as a template
//! #pp enddef
//! #pp template <name>           replay a template as if its lines were written here
//! #pp replace <sentinel> <text> substitute <sentinel> in all following output
//! text #pp omit                 drop this line
//! text #pp omit if <flag>       drop this line if <flag> is on, else keep `text`
//! text #pp include if <flag>    keep `text` only if <flag> is on
//! ```
//!
//! The flag `true` is always on.
//!
//! ## Usage
//!
//! ### As a Library
//!
//! ```
//! let input = "#pp if linux\nlinux only\n#pp end\nshared\n";
//! let output = linepp::process(input.as_bytes(), ["linux"], "#pp").unwrap();
//! assert_eq!(output, b"linux only\nshared\n");
//! ```
//!
//! ### As a CLI Tool
//!
//! ```bash
//! # Process a file with two flags enabled
//! linepp config.toml.in -D linux -D debug -o config.toml
//!
//! # Generate a whole tree, dropping the .in suffix
//! linepp templates/ --out-dir build/ --strip-suffix .in -D release
//! ```

pub mod directive;
pub mod error;
pub mod flags;
pub mod fs_utils;
pub mod preprocess;
pub mod replace;
pub mod source;

// Re-export main types and functions for convenience
pub use directive::{Directive, DirectiveLine, find_directives};
pub use error::{PreprocessError, Result};
pub use flags::{ALWAYS_FLAG, FlagSet};
pub use preprocess::{
    DEFAULT_PREFIX, PreprocessConfig, Preprocessor, process, process_file, process_str,
};
