use clap::{Parser, ValueEnum};
use linepp::fs_utils::{
    WalkConfig, build_globset, collect_inputs, output_path, read_text, write_output,
};
use linepp::{
    DEFAULT_PREFIX, DirectiveLine, FlagSet, PreprocessConfig, PreprocessError, Preprocessor,
    Result, find_directives, process_file,
};
use log::LevelFilter;
use serde::Serialize;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const LONG_HELP: &str = r##"
Directives (PREFIX defaults to "#pp"):
  PREFIX if FLAG                 - Keep lines up to the matching end if FLAG is on
  PREFIX if !FLAG                - Keep lines up to the matching end if FLAG is off
  PREFIX end                     - Close an if block
  PREFIX def NAME                - Capture raw lines up to enddef as template NAME
  PREFIX enddef                  - Close a def block
  PREFIX template NAME           - Replay template NAME at this point
  PREFIX replace SENTINEL TEXT   - Replace SENTINEL with TEXT in all later output
  text PREFIX omit               - Drop this line
  text PREFIX omit if FLAG       - Drop this line if FLAG is on, else keep text
  text PREFIX include if FLAG    - Keep text only if FLAG is on
The flag "true" is always on.

Examples:
  # Process a file with flags, write to stdout
  linepp app.conf.in -D linux -D debug
  # Read from stdin
  cat app.conf.in | linepp -D linux
  # Use a different directive prefix
  linepp main.c.in --prefix '//#' -o main.c
  # Generate a directory tree, dropping the .in suffix
  linepp templates/ --out-dir build/ --strip-suffix .in --include '**/*.in'
  # Check every input without writing anything
  linepp templates/ --dry-run -D release
  # List directives as JSON
  linepp app.conf.in --list=json
"##;

/// Line-oriented text preprocessor.
#[derive(Parser, Debug)]
#[command(
    name = "linepp",
    version,
    about = "Line-oriented text preprocessor with flag conditionals, templates and substitutions.",
    after_long_help = LONG_HELP
)]
struct Cli {
    /// Input files or directories. Omit or use '-' for stdin.
    #[arg(value_name = "INPUTS")]
    inputs: Vec<PathBuf>,

    /// Enable a flag (repeatable, or comma-separated)
    #[arg(
        short = 'D',
        long = "flag",
        value_name = "FLAG",
        env = "LINEPP_FLAGS",
        value_delimiter = ',',
        action = clap::ArgAction::Append
    )]
    flags: Vec<String>,

    /// Token that marks a directive line
    #[arg(short, long, value_name = "PREFIX", env = "LINEPP_PREFIX", default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE", conflicts_with = "out_dir")]
    output: Option<PathBuf>,

    /// Write one output per input file below this directory
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Suffix removed from output file names (with --out-dir)
    #[arg(long, value_name = "SUFFIX", requires = "out_dir")]
    strip_suffix: Option<String>,

    /// Only take files matching this glob when walking directories (repeatable)
    #[arg(short = 'i', long = "include", value_name = "GLOB", action = clap::ArgAction::Append)]
    include: Vec<String>,

    /// Skip files matching this glob when walking directories (repeatable)
    #[arg(short = 'x', long = "exclude", value_name = "GLOB", action = clap::ArgAction::Append)]
    exclude: Vec<String>,

    /// Disable compliance with .gitignore files
    #[arg(long)]
    no_gitignore: bool,

    /// Maximum directory depth when walking directories
    #[arg(short = 'd', long, value_name = "DEPTH")]
    max_depth: Option<usize>,

    /// Fail if an input ends inside an if or def block
    #[arg(long)]
    strict: bool,

    /// Process every input and report errors without writing output
    #[arg(long, conflicts_with = "list")]
    dry_run: bool,

    /// List directives in the inputs (optionally with format: plain, detailed, json)
    #[arg(long, value_name = "FORMAT", num_args = 0..=1, default_missing_value = "plain", conflicts_with = "dry_run")]
    list: Option<ListFormat>,

    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq)]
enum ListFormat {
    /// One directive per line
    Plain,
    /// Directive details grouped by input
    Detailed,
    /// JSON output for scripting
    Json,
}

/// One unit of work: stdin, or a file with its path relative to the walk root
#[derive(Debug)]
enum Job {
    Stdin,
    File { path: PathBuf, relative: PathBuf },
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Stdin => write!(f, "<stdin>"),
            Job::File { path, .. } => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Serialize)]
struct ListedInput<'a> {
    input: String,
    directives: &'a [DirectiveLine],
}

fn main() {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, 2) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .format_target(false)
        .init();

    let walk = match walk_config(&cli) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    let jobs = match collect_jobs(&cli, &walk) {
        Ok(jobs) => jobs,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let config = preprocess_config(&cli);
    log::debug!("Enabled flags: {}", config.flags.names().join(", "));

    let result = if cli.dry_run {
        dry_run(&jobs, &config)
    } else if let Some(format) = cli.list {
        list_directives(&jobs, format, &config.prefix)
    } else {
        process_jobs(&jobs, &cli, &config)
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn preprocess_config(cli: &Cli) -> PreprocessConfig {
    PreprocessConfig {
        prefix: cli.prefix.clone(),
        flags: FlagSet::new(cli.flags.iter().filter(|f| !f.is_empty()).cloned()),
        require_closed_blocks: cli.strict,
    }
}

fn walk_config(cli: &Cli) -> Result<WalkConfig> {
    Ok(WalkConfig {
        include: build_globset(&cli.include)?,
        exclude: build_globset(&cli.exclude)?,
        use_gitignore: !cli.no_gitignore,
        max_depth: cli.max_depth,
    })
}

fn collect_jobs(cli: &Cli, walk: &WalkConfig) -> Result<Vec<Job>> {
    if cli.inputs.is_empty() {
        return Ok(vec![Job::Stdin]);
    }

    let mut jobs = Vec::new();
    for input in &cli.inputs {
        if input.as_path() == Path::new("-") {
            jobs.push(Job::Stdin);
            continue;
        }
        for relative in collect_inputs(input, walk)? {
            let path = if input.is_file() {
                input.clone()
            } else {
                input.join(&relative)
            };
            jobs.push(Job::File { path, relative });
        }
    }
    log::info!("Collected {} input(s)", jobs.len());
    Ok(jobs)
}

fn run_job(job: &Job, config: &PreprocessConfig) -> Result<Vec<u8>> {
    match job {
        Job::Stdin => {
            log::info!("Reading input from stdin...");
            Preprocessor::new(config)?.run(io::stdin().lock())
        }
        Job::File { path, .. } => {
            log::info!("Processing {}", path.display());
            process_file(path, config)
        }
    }
}

fn read_job_text(job: &Job) -> Result<String> {
    match job {
        Job::Stdin => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
        Job::File { path, .. } => read_text(path),
    }
}

fn in_job(job: &Job, error: PreprocessError) -> PreprocessError {
    PreprocessError::Input {
        input: job.to_string(),
        source: Box::new(error),
    }
}

fn process_jobs(jobs: &[Job], cli: &Cli, config: &PreprocessConfig) -> Result<()> {
    if let Some(out_dir) = &cli.out_dir {
        for job in jobs {
            let Job::File { relative, .. } = job else {
                return Err(PreprocessError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "stdin cannot be used with --out-dir",
                )));
            };
            let output = run_job(job, config).map_err(|e| in_job(job, e))?;
            let target = output_path(out_dir, relative, cli.strip_suffix.as_deref());
            log::info!("Writing output to {}", target.display());
            write_output(&target, &output)?;
        }
        log::info!("Processing complete!");
        return Ok(());
    }

    let mut combined = Vec::new();
    for job in jobs {
        combined.extend(run_job(job, config).map_err(|e| in_job(job, e))?);
    }

    if let Some(output_path) = &cli.output {
        log::info!("Writing output to {}", output_path.display());
        write_output(output_path, &combined)?;
    } else {
        let mut stdout = io::stdout().lock();
        stdout.write_all(&combined)?;
        stdout.flush()?;
    }

    log::info!("Processing complete!");
    Ok(())
}

fn dry_run(jobs: &[Job], config: &PreprocessConfig) -> Result<()> {
    log::info!("Performing dry run - processing without writing...");

    let mut valid_count = 0;
    let mut invalid_count = 0;

    for job in jobs {
        match run_job(job, config) {
            Ok(output) => {
                log::info!("✓ {job} ({} bytes)", output.len());
                valid_count += 1;
            }
            Err(e) => {
                log::error!("✗ {job}: {e}");
                invalid_count += 1;
            }
        }
    }

    println!("\nSummary: {} input(s) checked", jobs.len());
    if valid_count > 0 {
        println!("  ✓ {valid_count} ok");
    }
    if invalid_count > 0 {
        println!("  ✗ {invalid_count} failed");
        std::process::exit(1);
    }

    Ok(())
}

fn list_directives(jobs: &[Job], format: ListFormat, prefix: &str) -> Result<()> {
    log::debug!("Listing directives...");

    let mut listed = Vec::new();
    for job in jobs {
        let text = read_job_text(job)?;
        listed.push((job.to_string(), find_directives(&text, prefix)?));
    }

    match format {
        ListFormat::Plain => {
            for (input, directives) in &listed {
                for d in directives {
                    if d.args.is_empty() {
                        println!("{input}:{}: {}", d.line, d.keyword);
                    } else {
                        println!("{input}:{}: {} {}", d.line, d.keyword, d.args.join(" "));
                    }
                }
            }
        }
        ListFormat::Detailed => {
            for (input, directives) in &listed {
                println!("Input: {input}");
                println!("  Directives: {}", directives.len());
                for d in directives {
                    println!("  Line {} (offset {}): {}", d.line, d.offset, d.keyword);
                    if !d.args.is_empty() {
                        println!("    Args: {}", d.args.join(", "));
                    }
                }
                println!();
            }
        }
        ListFormat::Json => {
            let infos: Vec<ListedInput<'_>> = listed
                .iter()
                .map(|(input, directives)| ListedInput {
                    input: input.clone(),
                    directives,
                })
                .collect();
            let json = serde_json::to_string_pretty(&infos)?;
            println!("{json}");
        }
    }

    Ok(())
}
