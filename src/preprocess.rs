use crate::directive::{Directive, Prefix};
use crate::error::{PreprocessError, Result};
use crate::flags::FlagSet;
use crate::fs_utils::open_input;
use crate::replace::ReplacementTable;
use crate::source::LineSource;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Prefix used when none is configured
pub const DEFAULT_PREFIX: &str = "#pp";

/// Configuration for a preprocessing run
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Literal token marking a directive anywhere in a line
    pub prefix: String,
    /// Flags that are "on"
    pub flags: FlagSet,
    /// Fail if input ends inside an `if` or `def` block
    pub require_closed_blocks: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            flags: FlagSet::default(),
            require_closed_blocks: false,
        }
    }
}

/// One entry of the handler stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Emits ordinary lines and dispatches directives
    Default,
    /// Discards lines until the `end` matching its `if`; `depth` counts nested `if`s
    Skip { depth: usize },
    /// Collects raw lines until `enddef`
    Capture { name: String, buffer: Vec<u8> },
}

/// What the driving loop does after a line has been handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Continue,
    Push(State),
    Pop,
    Inject(Vec<u8>),
}

/// Run state of the directive engine
#[derive(Debug)]
pub struct Preprocessor {
    prefix: Prefix,
    flags: FlagSet,
    require_closed_blocks: bool,
    templates: HashMap<String, Vec<u8>>,
    replacements: ReplacementTable,
    stack: Vec<State>,
    output: Vec<u8>,
}

impl Preprocessor {
    /// # Errors
    ///
    /// Returns `PreprocessError::EmptyPrefix` if the configured prefix is empty.
    pub fn new(config: &PreprocessConfig) -> Result<Self> {
        Ok(Self {
            prefix: Prefix::new(&config.prefix)?,
            flags: config.flags.clone(),
            require_closed_blocks: config.require_closed_blocks,
            templates: HashMap::new(),
            replacements: ReplacementTable::new(),
            stack: vec![State::Default],
            output: Vec::new(),
        })
    }

    /// Processes `input` to the end and returns the output buffer.
    ///
    /// # Errors
    ///
    /// Returns the first engine or read error, annotated with its line number.
    pub fn run<R: Read>(mut self, input: R) -> Result<Vec<u8>> {
        let mut source = LineSource::new(input);

        while let Some(line) = source.next_line()? {
            let number = source.line_number();
            match self.handle_line(&line, number)? {
                Action::Continue => {}
                Action::Push(state) => self.stack.push(state),
                Action::Pop => self.pop(number)?,
                Action::Inject(content) => source.inject(content),
            }
        }

        if self.require_closed_blocks && self.stack.len() > 1 {
            return Err(PreprocessError::UnclosedBlock {
                line: source.line_number(),
                open: self.stack.len() - 1,
            });
        }

        Ok(self.output)
    }

    /// Dispatches one line to the handler on top of the stack
    fn handle_line(&mut self, line: &[u8], number: usize) -> Result<Action> {
        match self.stack.last_mut() {
            Some(State::Skip { depth }) => {
                let Some((_, tokens)) = self.prefix.split(line) else {
                    return Ok(Action::Continue);
                };
                match tokens.first().map(String::as_str) {
                    None => return Err(PreprocessError::EmptyDirective { line: number }),
                    Some("if") => *depth += 1,
                    Some("end") if *depth == 0 => return Ok(Action::Pop),
                    Some("end") => *depth -= 1,
                    _ => {}
                }
                Ok(Action::Continue)
            }
            Some(State::Capture { buffer, .. }) => {
                if let Some((_, tokens)) = self.prefix.split(line) {
                    match tokens.first().map(String::as_str) {
                        None => return Err(PreprocessError::EmptyDirective { line: number }),
                        Some("enddef") => return Ok(Action::Pop),
                        Some(_) => {}
                    }
                }
                buffer.extend_from_slice(line);
                Ok(Action::Continue)
            }
            Some(State::Default) | None => self.handle_default(line, number),
        }
    }

    fn handle_default(&mut self, line: &[u8], number: usize) -> Result<Action> {
        let Some((before, tokens)) = self.prefix.split(line) else {
            self.output
                .extend_from_slice(&self.replacements.apply(line));
            return Ok(Action::Continue);
        };

        let action = match Directive::parse(&tokens, number)? {
            Directive::End => Action::Pop,
            Directive::Def { name } => Action::Push(State::Capture {
                name,
                buffer: Vec::new(),
            }),
            Directive::If { condition } => {
                if self.flags.test(&condition) {
                    Action::Push(State::Default)
                } else {
                    Action::Push(State::Skip { depth: 0 })
                }
            }
            Directive::Omit {
                condition: Some(condition),
            } => {
                if !self.flags.test(&condition) {
                    self.emit_before(before);
                }
                Action::Continue
            }
            Directive::Omit { condition: None } => Action::Continue,
            Directive::Include {
                condition: Some(condition),
            } => {
                if self.flags.test(&condition) {
                    self.emit_before(before);
                }
                Action::Continue
            }
            Directive::Include { condition: None } => Action::Continue,
            Directive::Template { name } => match self.templates.get(&name) {
                Some(content) => Action::Inject(content.clone()),
                None => {
                    return Err(PreprocessError::UnknownTemplate { line: number, name });
                }
            },
            Directive::Replace {
                sentinel,
                replacement,
            } => {
                self.replacements
                    .insert(&sentinel, replacement.as_bytes())?;
                Action::Continue
            }
        };
        Ok(action)
    }

    /// Writes the text in front of a directive, trailing whitespace trimmed
    fn emit_before(&mut self, before: &[u8]) {
        let text = self.replacements.apply(trim_end_whitespace(before));
        self.output.extend_from_slice(&text);
        self.output.push(b'\n');
    }

    fn pop(&mut self, number: usize) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(PreprocessError::UnexpectedEnd { line: number });
        }
        if let Some(State::Capture { name, buffer }) = self.stack.pop() {
            self.templates.insert(name, buffer);
        }
        Ok(())
    }
}

/// Strips trailing Unicode whitespace. Bytes that are not valid UTF-8 stop
/// the trim and are kept.
fn trim_end_whitespace(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 {
        // Shortest valid UTF-8 suffix is the last character
        let last = (end.saturating_sub(4)..end)
            .rev()
            .find_map(|start| Some((start, std::str::from_utf8(&bytes[start..end]).ok()?)));
        match last {
            Some((start, ch)) if ch.chars().all(char::is_whitespace) => end = start,
            _ => break,
        }
    }
    &bytes[..end]
}

/// Processes `input` with the given flags and directive prefix
///
/// # Errors
///
/// Returns the first error hit while processing, annotated with its line number.
pub fn process<R, I, S>(input: R, flags: I, prefix: &str) -> Result<Vec<u8>>
where
    R: Read,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let config = PreprocessConfig {
        prefix: prefix.to_string(),
        flags: FlagSet::new(flags),
        ..PreprocessConfig::default()
    };
    Preprocessor::new(&config)?.run(input)
}

/// Processes text held in memory
///
/// # Errors
///
/// See [`Preprocessor::run`].
pub fn process_str(text: &str, config: &PreprocessConfig) -> Result<String> {
    let output = Preprocessor::new(config)?.run(text.as_bytes())?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// Process an input file
///
/// # Errors
///
/// - `PreprocessError::FileNotFound` if the file doesn't exist.
/// - Other errors from [`Preprocessor::run`].
pub fn process_file(path: &Path, config: &PreprocessConfig) -> Result<Vec<u8>> {
    let input = open_input(path)?;
    Preprocessor::new(config)?.run(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn run(input: &str, flags: &[&str]) -> Result<String> {
        let config = PreprocessConfig {
            flags: FlagSet::new(flags.iter().copied()),
            ..PreprocessConfig::default()
        };
        process_str(input, &config)
    }

    #[test]
    fn test_plain_input_verbatim() {
        assert_eq!(run("", &[]).unwrap(), "");
        assert_eq!(run("a\nb\n", &[]).unwrap(), "a\nb\n");
        assert_eq!(run("no newline", &[]).unwrap(), "no newline");
        assert_eq!(run("\n\n", &[]).unwrap(), "\n\n");
    }

    #[test]
    fn test_binary_passthrough() {
        let input: &[u8] = b"\xff\xfe raw\n";
        let output = process(input, ["x"], "#pp").unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_if_true_and_false() {
        let input = "before\n#pp if linux\ninside\n#pp end\nafter\n";
        assert_eq!(run(input, &["linux"]).unwrap(), "before\ninside\nafter\n");
        assert_eq!(run(input, &[]).unwrap(), "before\nafter\n");
    }

    #[test]
    fn test_if_always_flag() {
        let input = "#pp if true\nyes\n#pp end\n#pp if !true\nno\n#pp end\n";
        assert_eq!(run(input, &[]).unwrap(), "yes\n");
    }

    #[test]
    fn test_if_negation() {
        let input = "#pp if !debug\nrelease\n#pp end\n";
        assert_eq!(run(input, &[]).unwrap(), "release\n");
        assert_eq!(run(input, &["debug"]).unwrap(), "");
    }

    #[test]
    fn test_nested_if() {
        let input = "#pp if a\nA\n#pp if b\nAB\n#pp end\nA2\n#pp end\nout\n";
        assert_eq!(run(input, &["a", "b"]).unwrap(), "A\nAB\nA2\nout\n");
        assert_eq!(run(input, &["a"]).unwrap(), "A\nA2\nout\n");
        assert_eq!(run(input, &["b"]).unwrap(), "out\n");
    }

    #[test]
    fn test_skip_tracks_nested_if() {
        let input = "#pp if missing\n#pp if true\nx\n#pp end\ny\n#pp end\nz\n";
        assert_eq!(run(input, &[]).unwrap(), "z\n");
    }

    #[test]
    fn test_skip_ignores_other_directives() {
        let input = "#pp if missing\n#pp bogus\n#pp template nope\n#pp end\nok\n";
        assert_eq!(run(input, &[]).unwrap(), "ok\n");
    }

    #[test]
    fn test_directive_after_text() {
        let input = "code #pp if missing\nhidden\n#pp end\n";
        assert_eq!(run(input, &[]).unwrap(), "");
    }

    #[test]
    fn test_template_replay() {
        let input = "#pp def greet\nhello NAME\n#pp enddef\n#pp replace NAME world\n#pp template greet\n#pp template greet\n";
        assert_eq!(run(input, &[]).unwrap(), "hello world\nhello world\n");
    }

    #[test]
    fn test_template_directives_reinterpreted() {
        let input = "#pp def guarded\n#pp if debug\ndbg\n#pp end\n#pp enddef\n#pp template guarded\n";
        assert_eq!(run(input, &["debug"]).unwrap(), "dbg\n");
        assert_eq!(run(input, &[]).unwrap(), "");
    }

    #[test]
    fn test_template_calls_template() {
        let input = "#pp def inner\ni\n#pp enddef\n#pp def outer\no1\n#pp template inner\no2\n#pp enddef\n#pp template outer\n";
        assert_eq!(run(input, &[]).unwrap(), "o1\ni\no2\n");
    }

    #[test]
    fn test_template_on_last_unterminated_line() {
        let input = "#pp def t\nx\n#pp enddef\n#pp template t";
        assert_eq!(run(input, &[]).unwrap(), "x\n");
    }

    #[test]
    fn test_template_redefinition_overwrites() {
        let input = "#pp def t\none\n#pp enddef\n#pp def t\ntwo\n#pp enddef\n#pp template t\n";
        assert_eq!(run(input, &[]).unwrap(), "two\n");
    }

    #[test]
    fn test_capture_is_raw() {
        // A def inside a def is captured as text and only acts on replay
        let input = "#pp def a\n#pp def b\nx\n#pp enddef\n#pp template a\n#pp enddef\n#pp template b\n";
        assert_eq!(run(input, &[]).unwrap(), "x\n");
    }

    #[test]
    fn test_unknown_template() {
        let err = run("ok\n#pp template unknown\n", &[]).unwrap_err();
        assert!(matches!(
            err,
            PreprocessError::UnknownTemplate { line: 2, ref name } if name == "unknown"
        ));
    }

    #[test]
    fn test_forward_reference_is_error() {
        let input = "#pp template later\n#pp def later\nx\n#pp enddef\n";
        assert!(matches!(
            run(input, &[]),
            Err(PreprocessError::UnknownTemplate { line: 1, .. })
        ));
    }

    #[test]
    fn test_replace() {
        let input = "VERSION\n#pp replace VERSION 1.2.3\nv=VERSION, other=REL\n";
        assert_eq!(run(input, &[]).unwrap(), "VERSION\nv=1.2.3, other=REL\n");
    }

    #[test]
    fn test_replace_overwrite_and_order() {
        let input = "#pp replace AB C\n#pp replace C D\nAB\n#pp replace C E\nAB C\n";
        assert_eq!(run(input, &[]).unwrap(), "D\nE E\n");
    }

    #[test]
    fn test_malformed_replace() {
        assert!(matches!(
            run("#pp replace onlyone\n", &[]),
            Err(PreprocessError::MalformedReplace { line: 1 })
        ));
        assert!(matches!(
            run("x\n#pp replace a b c\n", &[]),
            Err(PreprocessError::MalformedReplace { line: 2 })
        ));
    }

    #[test]
    fn test_omit() {
        assert_eq!(run("keep\ngone #pp omit\n", &[]).unwrap(), "keep\n");

        let input = "TEXT  #pp omit if dbg MORE\n";
        assert_eq!(run(input, &["dbg"]).unwrap(), "");
        assert_eq!(run(input, &[]).unwrap(), "TEXT\n");
        assert_eq!(run("TEXT #pp omit if !dbg\n", &[]).unwrap(), "");
    }

    #[test]
    fn test_include_if() {
        let input = "  call();\t#pp include if dbg\n";
        assert_eq!(run(input, &["dbg"]).unwrap(), "  call();\n");
        assert_eq!(run(input, &[]).unwrap(), "");
        assert_eq!(run(input.replace("dbg", "!dbg").as_str(), &[]).unwrap(), "  call();\n");
    }

    #[test]
    fn test_guarded_text_substituted() {
        let input = "#pp replace NAME x\nuse NAME; #pp include if true\nuse NAME; #pp omit if false\n";
        assert_eq!(run(input, &[]).unwrap(), "use x;\nuse x;\n");
    }

    #[test]
    fn test_if_clause_without_flag_drops_line() {
        assert_eq!(run("keep\nx #pp omit if\n", &[]).unwrap(), "keep\n");
        assert_eq!(run("keep\nx #pp include if\n", &[]).unwrap(), "keep\n");
    }

    #[test]
    fn test_guarded_text_unicode_trim() {
        assert_eq!(run("TEXT\x0b #pp omit if x\n", &[]).unwrap(), "TEXT\n");
        assert_eq!(
            run("TEXT\u{a0} #pp include if true\n", &[]).unwrap(),
            "TEXT\n"
        );
        assert_eq!(
            run("TEXT\u{3000}\t#pp include if true\n", &[]).unwrap(),
            "TEXT\n"
        );

        let output = process(&b"ab\xff \x0b#pp omit if x\n"[..], Vec::<String>::new(), "#pp").unwrap();
        assert_eq!(output, b"ab\xff\n");
    }

    #[test]
    fn test_trim_end_whitespace() {
        assert_eq!(trim_end_whitespace(b""), b"");
        assert_eq!(trim_end_whitespace(b" \t "), b"");
        assert_eq!(trim_end_whitespace("é\u{2003}".as_bytes()), "é".as_bytes());
        assert_eq!(trim_end_whitespace(b"x\xe3\x80"), b"x\xe3\x80");
    }

    #[test]
    fn test_empty_directive_in_every_handler() {
        assert!(matches!(
            run("#pp if missing\nx\n#pp\n#pp end\n", &[]),
            Err(PreprocessError::EmptyDirective { line: 3 })
        ));
        assert!(matches!(
            run("#pp def t\nx\n#pp \n#pp enddef\n", &[]),
            Err(PreprocessError::EmptyDirective { line: 3 })
        ));
    }

    #[test]
    fn test_missing_if_clause() {
        assert!(matches!(
            run("x #pp include debug\n", &[]),
            Err(PreprocessError::MissingIfClause { line: 1 })
        ));
    }

    #[test]
    fn test_unexpected_end() {
        let err = run("a\nb\n#pp end\n", &[]).unwrap_err();
        assert!(matches!(err, PreprocessError::UnexpectedEnd { line: 3 }));
        assert_eq!(err.to_string(), "line 3: unexpected end directive");
    }

    #[test]
    fn test_unknown_directive() {
        let err = run("#pp frobnicate\n", &[]).unwrap_err();
        assert!(matches!(
            err,
            PreprocessError::UnknownDirective { line: 1, ref directive } if directive == "frobnicate"
        ));
        assert!(matches!(
            run("#pp enddef\n", &[]),
            Err(PreprocessError::UnknownDirective { .. })
        ));
    }

    #[test]
    fn test_empty_directive() {
        assert!(matches!(
            run("ok\n#pp   \n", &[]),
            Err(PreprocessError::EmptyDirective { line: 2 })
        ));
    }

    #[test]
    fn test_line_numbers_count_replayed_lines() {
        // Lines 6 and 7 come from the replayed template
        let input = "#pp def t\na\n#pp end\n#pp enddef\n#pp template t\n";
        assert!(matches!(
            run(input, &[]),
            Err(PreprocessError::UnexpectedEnd { line: 7 })
        ));
    }

    #[test]
    fn test_unclosed_blocks() {
        let input = "#pp if true\nx\n";
        assert_eq!(run(input, &[]).unwrap(), "x\n");

        let config = PreprocessConfig {
            require_closed_blocks: true,
            ..PreprocessConfig::default()
        };
        assert!(matches!(
            process_str(input, &config),
            Err(PreprocessError::UnclosedBlock { line: 2, open: 1 })
        ));
        assert!(matches!(
            process_str("#pp def t\nx\n", &config),
            Err(PreprocessError::UnclosedBlock { line: 2, open: 1 })
        ));
    }

    #[test]
    fn test_custom_prefix() {
        let output = process(&b"a //# omit if x\n//# if x\nb\n//# end\n"[..], ["x"], "//#").unwrap();
        assert_eq!(output, b"b\n");
    }

    #[test]
    fn test_empty_prefix_rejected() {
        assert!(matches!(
            process(&b"x\n"[..], Vec::<String>::new(), ""),
            Err(PreprocessError::EmptyPrefix)
        ));
    }

    #[test]
    fn test_runs_are_independent() {
        let config = PreprocessConfig::default();
        let first = "#pp def t\nx\n#pp enddef\n#pp replace x y\n";
        assert_eq!(process_str(first, &config).unwrap(), "");
        assert!(matches!(
            process_str("#pp template t\n", &config),
            Err(PreprocessError::UnknownTemplate { .. })
        ));
        assert_eq!(process_str("x\n", &config).unwrap(), "x\n");
    }

    #[test]
    fn test_handle_line_actions() {
        let config = PreprocessConfig {
            flags: FlagSet::new(["on"]),
            ..PreprocessConfig::default()
        };
        let mut pp = Preprocessor::new(&config).unwrap();
        assert_eq!(
            pp.handle_line(b"#pp if on\n", 1).unwrap(),
            Action::Push(State::Default)
        );
        assert_eq!(
            pp.handle_line(b"#pp if off\n", 1).unwrap(),
            Action::Push(State::Skip { depth: 0 })
        );
        assert_eq!(
            pp.handle_line(b"#pp def t\n", 1).unwrap(),
            Action::Push(State::Capture {
                name: "t".to_string(),
                buffer: Vec::new()
            })
        );
        assert_eq!(pp.handle_line(b"#pp end\n", 1).unwrap(), Action::Pop);
        assert_eq!(pp.handle_line(b"text\n", 1).unwrap(), Action::Continue);
        assert_eq!(pp.output, b"text\n");
    }

    #[test]
    fn test_process_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("input.txt.in");
        fs::write(&path, "#pp if gpu\ngpu\n#pp end\ncpu #pp omit if gpu\n").unwrap();

        let config = PreprocessConfig {
            flags: FlagSet::new(["gpu"]),
            ..PreprocessConfig::default()
        };
        assert_eq!(process_file(&path, &config).unwrap(), b"gpu\n");

        let missing = temp_dir.path().join("missing.in");
        assert!(matches!(
            process_file(&missing, &config),
            Err(PreprocessError::FileNotFound { .. })
        ));
    }
}
