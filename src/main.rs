use anyhow::{Context, Result};
use argh::FromArgs;
use pipesh::{
    Limits, Orchestrator, OrchestratorConfig, PipelineError, SpawnFailurePolicy, StageReport,
    SyntaxError, Tokenizer,
};
use std::fs::File;
use std::io::{IsTerminal, Read, Write};
use std::os::fd::AsFd;
use std::process::ExitCode;
use tracing::{debug, error};

const PROMPT: &str = "pipesh$ ";
const SYNTAX_ERROR_EXIT: u8 = 2;
const SETUP_ERROR_EXIT: u8 = 1;

#[derive(FromArgs)]
/// Run one pipeline of commands read from standard input, one process per command.
struct Args {
    #[argh(option, short = 'c')]
    /// run this line instead of reading one from standard input
    command: Option<String>,

    #[argh(option)]
    /// reject lines with more commands than this
    max_commands: Option<usize>,

    #[argh(option)]
    /// reject commands with more words than this, program name included
    max_words: Option<usize>,

    #[argh(option)]
    /// reject words longer than this many bytes
    max_word_len: Option<usize>,

    #[argh(option)]
    /// reject lines longer than this many bytes
    max_line_len: Option<usize>,

    #[argh(switch)]
    /// start from the fixed limits of a classic array-backed shell
    classic_limits: bool,

    #[argh(option, default = "SpawnFailurePolicy::Teardown")]
    /// what to do with running stages when a later one cannot start: teardown or let-run
    on_spawn_failure: SpawnFailurePolicy,

    #[argh(switch)]
    /// do not print a status line per finished process
    quiet_status: bool,

    #[argh(switch, short = 'v')]
    /// log orchestration details to standard error
    verbose: bool,
}

impl Args {
    fn limits(&self) -> Limits {
        let base = if self.classic_limits {
            Limits::classic()
        } else {
            Limits::default()
        };
        Limits {
            max_line_len: self.max_line_len.or(base.max_line_len),
            max_commands: self.max_commands.or(base.max_commands),
            max_words_per_command: self.max_words.or(base.max_words_per_command),
            max_word_len: self.max_word_len.or(base.max_word_len),
        }
    }
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();
    if let Err(e) = init_logging(args.verbose) {
        eprintln!("pipesh: {e:#}");
    }

    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "run failed");
            eprintln!("pipesh: {e:#}");
            if is_syntax_error(&e) {
                ExitCode::from(SYNTAX_ERROR_EXIT)
            } else {
                ExitCode::from(SETUP_ERROR_EXIT)
            }
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

fn run(args: &Args) -> Result<u8> {
    let limits = args.limits();
    let line = match &args.command {
        Some(line) => line.clone(),
        None => match read_line(limits.max_line_len)? {
            Some(line) => line,
            None => return Ok(0),
        },
    };

    let pipeline = match Tokenizer::new(limits).parse(&line) {
        Ok(pipeline) => pipeline,
        Err(SyntaxError::EmptyLine) => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    debug!(%pipeline, stages = pipeline.len(), "parsed");

    let orchestrator = Orchestrator::new(OrchestratorConfig {
        on_spawn_failure: args.on_spawn_failure,
        ..OrchestratorConfig::with_limits(&limits)
    });
    // children share our stdout; nothing of ours may be left in the buffer
    std::io::stdout().flush()?;

    let mut printer = StatusPrinter::new(!args.quiet_status);
    let result = orchestrator.run_observed(&pipeline, |report| printer.print(report));
    let reports = result?;
    printer.finish()?;

    let last = reports.iter().find(|r| r.stage + 1 == pipeline.len());
    Ok(last.map_or(0, |r| r.status.code().clamp(0, 255) as u8))
}

/// Writes a status line per stage as soon as the stage is reaped. The first
/// write error stops further output and is returned by `finish`.
struct StatusPrinter {
    enabled: bool,
    failed: Option<std::io::Error>,
}

impl StatusPrinter {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            failed: None,
        }
    }

    fn print(&mut self, report: &StageReport) {
        if !self.enabled || self.failed.is_some() {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", report).and_then(|_| stdout.flush()) {
            self.failed = Some(e);
        }
    }

    fn finish(self) -> Result<()> {
        match self.failed {
            Some(e) => Err(e).context("could not write status line"),
            None => Ok(()),
        }
    }
}

/// Read one line from standard input without reading past its newline, so
/// whatever follows stays available to the pipeline's first command.
///
/// Returns `None` at end of input.
fn read_line(max_len: Option<usize>) -> Result<Option<String>> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        let mut stderr = std::io::stderr();
        write!(stderr, "{}", PROMPT)?;
        stderr.flush()?;
    }

    let fd = stdin
        .as_fd()
        .try_clone_to_owned()
        .context("could not access standard input")?;
    read_line_from(&mut File::from(fd), max_len)
}

/// Read up to and including the first newline, one byte at a time. With
/// `max_len` set, stops after `max_len + 1` bytes without a newline: enough for
/// the tokenizer to reject the line without buffering the rest of the input.
fn read_line_from(input: &mut impl Read, max_len: Option<usize>) -> Result<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
                if max_len.is_some_and(|max| line.len() > max) {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("could not read standard input"),
        }
    }

    if line.is_empty() {
        return Ok(None);
    }
    String::from_utf8(line)
        .map(Some)
        .context("input line is not valid UTF-8")
}

fn is_syntax_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<SyntaxError>().is_some()
        || matches!(
            e.downcast_ref::<PipelineError>(),
            Some(PipelineError::Syntax(_))
        )
}
