//! A one-line pipeline runner.
//!
//! A line such as `printf abc | tr a-z A-Z | wc -c` is split into commands by the
//! [`Tokenizer`], then the [`Orchestrator`] starts one process per command, connects
//! neighbours with pipes, and reaps every process, reporting how each one ended.
//!
//! There is no quoting, expansion, redirection to files, job control or builtins:
//! only the plumbing between processes.

mod channel;
mod command;
pub mod config;
pub mod error;
mod launcher;
mod lexer;
mod orchestrator;
mod parser;
pub mod report;
pub mod stage;

pub use command::{Command, Pipeline};
pub use config::{Limits, OrchestratorConfig, SpawnFailurePolicy};
pub use error::{PipelineError, SyntaxError};
pub use launcher::{ChildFailure, ForkExec, Launcher, PreparedStage};
pub use orchestrator::Orchestrator;
pub use parser::Tokenizer;
pub use report::{ExitCode, ExitStatus, StageReport};
