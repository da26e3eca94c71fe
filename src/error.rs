//! Error types for parsing and running pipelines.

use crate::report::StageReport;
use crate::stage::ChannelEnd;
use nix::errno::Errno;
use thiserror::Error;

/// Malformed input. Always raised before any process exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    /// The line holds nothing but whitespace
    #[error("empty command line")]
    EmptyLine,

    /// Nothing between two pipe delimiters, or a leading/trailing pipe
    #[error("empty pipeline stage at position {stage}")]
    EmptyStage { stage: usize },

    /// A word cannot be passed to exec
    #[error("word in command {stage} contains a NUL byte")]
    InteriorNul { stage: usize },

    #[error("line is {len} bytes long, limit is {limit}")]
    LineTooLong { len: usize, limit: usize },

    #[error("pipeline has {count} commands, limit is {limit}")]
    TooManyCommands { count: usize, limit: usize },

    #[error("command {stage} has {count} words, limit is {limit}")]
    TooManyWords {
        stage: usize,
        count: usize,
        limit: usize,
    },

    #[error("word `{word}` in command {stage} is longer than {limit} bytes")]
    WordTooLong {
        stage: usize,
        word: String,
        limit: usize,
    },
}

/// Setup failure of a whole orchestration run.
///
/// Failures confined to a single child (program not found, descriptor wiring)
/// are not errors of the run: they show up in that stage's exit status.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    /// The OS refused to create channel `index`. No process was created.
    #[error("could not create pipe {index}: {source}")]
    ChannelCreation {
        index: usize,
        #[source]
        source: Errno,
    },

    /// Creating the process for `stage` failed. Stages launched before it
    /// have been reaped and their reports are kept in `reaped`.
    #[error("could not create process for stage {stage}: {source}")]
    ProcessCreation {
        stage: usize,
        #[source]
        source: Errno,
        reaped: Vec<StageReport>,
    },

    /// A channel end needed for wiring was already released.
    #[error("{end} was closed before stage {stage} could use it")]
    ChannelClosed {
        stage: usize,
        end: ChannelEnd,
        reaped: Vec<StageReport>,
    },
}

impl PipelineError {
    /// Reports of the stages that were launched and reaped before the failure.
    pub fn reaped(&self) -> &[StageReport] {
        match self {
            PipelineError::ProcessCreation { reaped, .. }
            | PipelineError::ChannelClosed { reaped, .. } => reaped,
            _ => &[],
        }
    }
}
