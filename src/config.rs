//! Capacity limits and orchestrator settings.
//!
//! Nothing here is process-global: a [`Tokenizer`](crate::Tokenizer) and an
//! [`Orchestrator`](crate::Orchestrator) each receive their configuration when
//! they are constructed.

use std::fmt;
use std::str::FromStr;

/// Optional ceilings applied by the tokenizer.
///
/// A line that goes over any limit is rejected as a whole; nothing is truncated.
/// `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    /// Maximum line length in bytes.
    pub max_line_len: Option<usize>,
    /// Maximum number of commands in one pipeline.
    pub max_commands: Option<usize>,
    /// Maximum number of words in one command, program name included.
    pub max_words_per_command: Option<usize>,
    /// Maximum length of one word in bytes.
    pub max_word_len: Option<usize>,
}

impl Limits {
    /// No limits at all. Same as `Limits::default()`.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// The fixed capacities of a classic array-backed shell: 10 commands of at
    /// most 15 words of at most 19 bytes each.
    pub fn classic() -> Self {
        const COMMANDS: usize = 10;
        const WORDS: usize = 15;
        const WORD_LEN: usize = 19;
        // words, single spaces between them, and " | " between commands
        let command_len = WORDS * WORD_LEN + (WORDS - 1);
        Self {
            max_line_len: Some(COMMANDS * command_len + 3 * (COMMANDS - 1)),
            max_commands: Some(COMMANDS),
            max_words_per_command: Some(WORDS),
            max_word_len: Some(WORD_LEN),
        }
    }
}

/// What happens to already-running stages when a later stage cannot be created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpawnFailurePolicy {
    /// Send SIGTERM to every launched stage, then reap them.
    #[default]
    Teardown,
    /// Let launched stages finish on their own, then reap them.
    LetRun,
}

impl FromStr for SpawnFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teardown" => Ok(Self::Teardown),
            "let-run" => Ok(Self::LetRun),
            other => Err(format!(
                "unknown spawn failure policy `{other}`, expected `teardown` or `let-run`"
            )),
        }
    }
}

impl fmt::Display for SpawnFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Teardown => "teardown",
            Self::LetRun => "let-run",
        })
    }
}

/// Settings for [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Refuse pipelines with more stages than this.
    pub max_stages: Option<usize>,
    pub on_spawn_failure: SpawnFailurePolicy,
}

impl OrchestratorConfig {
    pub fn with_limits(limits: &Limits) -> Self {
        Self {
            max_stages: limits.max_commands,
            ..Self::default()
        }
    }
}
