use crate::error::SyntaxError;
use std::ffi::CString;
use std::fmt;

/// One pipeline stage: a program name followed by its arguments.
///
/// A command always holds at least one word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    words: Vec<String>,
}

impl Command {
    /// Build a command from its words. Returns `None` when `words` is empty.
    pub fn new<I, S>(words: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let words: Vec<String> = words.into_iter().map(Into::into).collect();
        if words.is_empty() {
            None
        } else {
            Some(Self { words })
        }
    }

    pub fn program(&self) -> &str {
        &self.words[0]
    }

    pub fn args(&self) -> &[String] {
        &self.words[1..]
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Convert the words into the argv vector handed to `execvp`.
    pub(crate) fn to_argv(&self, stage: usize) -> Result<Vec<CString>, SyntaxError> {
        self.words
            .iter()
            .map(|w| CString::new(w.as_bytes()).map_err(|_| SyntaxError::InteriorNul { stage }))
            .collect()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.words.join(" "))
    }
}

/// An ordered, non-empty sequence of commands connected by pipes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    /// Returns `None` when `commands` is empty.
    pub fn new(commands: Vec<Command>) -> Option<Self> {
        if commands.is_empty() {
            None
        } else {
            Some(Self { commands })
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Always false; kept for parity with `len`.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Words of every command, handy for comparing against literals in tests.
    pub fn to_words(&self) -> Vec<Vec<&str>> {
        self.commands
            .iter()
            .map(|c| c.words().iter().map(String::as_str).collect())
            .collect()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, command) in self.commands.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", command)?;
        }
        Ok(())
    }
}
