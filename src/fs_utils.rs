use crate::error::{PreprocessError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Options for collecting input files from a directory tree
#[derive(Debug, Clone)]
pub struct WalkConfig {
    /// Only files matching one of these (relative to the walk root) are taken
    pub include: Option<GlobSet>,
    /// Files matching any of these are skipped
    pub exclude: Option<GlobSet>,
    /// Honour `.gitignore` and friends while walking
    pub use_gitignore: bool,
    /// Maximum directory depth below the root
    pub max_depth: Option<usize>,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            include: None,
            exclude: None,
            use_gitignore: true,
            max_depth: None,
        }
    }
}

/// Opens an input file for reading
///
/// # Errors
///
/// - `PreprocessError::FileNotFound` if the path doesn't exist or isn't a file.
/// - `PreprocessError::Io` if the file can't be opened.
pub fn open_input(path: &Path) -> Result<File> {
    if !path.is_file() {
        return Err(PreprocessError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    File::open(path).map_err(Into::into)
}

/// Reads an input file as UTF-8 text
///
/// # Errors
///
/// - `PreprocessError::FileNotFound` if the path doesn't exist or isn't a file.
/// - `PreprocessError::Utf8` if the contents are not valid UTF-8.
pub fn read_text(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(PreprocessError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    String::from_utf8(fs::read(path)?).map_err(|_| PreprocessError::Utf8 {
        path: path.to_path_buf(),
    })
}

/// Builds a glob set, or `None` when no patterns are given
///
/// # Errors
///
/// Returns `PreprocessError::Glob` for an invalid pattern.
pub fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(Some(builder.build()?))
}

fn is_selected(relative: &Path, config: &WalkConfig) -> bool {
    if let Some(exclude) = &config.exclude
        && exclude.is_match(relative)
    {
        return false;
    }
    config
        .include
        .as_ref()
        .is_none_or(|include| include.is_match(relative))
}

/// Collects input files below `root`, as paths relative to `root`, sorted.
///
/// A `root` that is itself a file yields its file name.
///
/// # Errors
///
/// - `PreprocessError::FileNotFound` if `root` doesn't exist.
/// - `PreprocessError::Ignore` or `PreprocessError::WalkDir` if traversal fails.
pub fn collect_inputs(root: &Path, config: &WalkConfig) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(root.file_name().map(PathBuf::from).into_iter().collect());
    }
    if !root.is_dir() {
        return Err(PreprocessError::FileNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    let mut take = |path: &Path| {
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        if is_selected(&relative, config) {
            files.push(relative);
        } else {
            log::debug!("Skipping {}", path.display());
        }
    };

    if config.use_gitignore {
        let mut builder = ignore::WalkBuilder::new(root);
        builder.max_depth(config.max_depth);
        for entry in builder.build() {
            let entry = entry?;
            if entry.file_type().is_some_and(|t| t.is_file()) {
                take(entry.path());
            }
        }
    } else {
        let mut walker = walkdir::WalkDir::new(root);
        if let Some(depth) = config.max_depth {
            walker = walker.max_depth(depth);
        }
        let entries = walker.into_iter().filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        });
        for entry in entries {
            let entry = entry?;
            if entry.file_type().is_file() {
                take(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Destination for an input at `relative` under `out_dir`, with `strip_suffix`
/// removed from the file name when present
#[must_use]
pub fn output_path(out_dir: &Path, relative: &Path, strip_suffix: Option<&str>) -> PathBuf {
    let target = out_dir.join(relative);
    let Some(suffix) = strip_suffix.filter(|s| !s.is_empty()) else {
        return target;
    };
    match target.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.len() > suffix.len() && name.ends_with(suffix) => {
            target.with_file_name(&name[..name.len() - suffix.len()])
        }
        _ => target,
    }
}

/// Writes an output file, creating parent directories as needed
///
/// # Errors
///
/// Returns `PreprocessError::Io` if a directory or the file can't be written.
pub fn write_output(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content).map_err(Into::into)
}
