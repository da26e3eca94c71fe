use crate::command::{Command, Pipeline};
use crate::config::Limits;
use crate::error::SyntaxError;
use crate::lexer::{self, Token};

/// Turns one input line into a [`Pipeline`].
///
/// Example
/// ```
/// use pipesh::{Limits, Tokenizer};
/// let pipeline = Tokenizer::new(Limits::default()).parse("echo hi | wc -l").unwrap();
/// assert_eq!(pipeline.to_words(), vec![vec!["echo", "hi"], vec!["wc", "-l"]]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    limits: Limits,
}

impl Tokenizer {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Parse a line. The whole line is rejected on the first problem found;
    /// nothing is ever truncated to fit a limit.
    pub fn parse(&self, line: &str) -> Result<Pipeline, SyntaxError> {
        if let Some(limit) = self.limits.max_line_len {
            // the terminating newline does not count against the limit
            let len = line.strip_suffix('\n').unwrap_or(line).len();
            if len > limit {
                return Err(SyntaxError::LineTooLong { len, limit });
            }
        }

        let tokens = lexer::split_into_tokens(line);
        if tokens.is_empty() {
            return Err(SyntaxError::EmptyLine);
        }

        let mut commands = Vec::new();
        let mut words = Vec::new();
        for token in tokens {
            match token {
                Token::Word(word) => words.push(word),
                Token::PipeOp => {
                    commands.push(self.build_command(commands.len(), std::mem::take(&mut words))?)
                }
            }
        }
        commands.push(self.build_command(commands.len(), words)?);

        if let Some(limit) = self.limits.max_commands {
            if commands.len() > limit {
                return Err(SyntaxError::TooManyCommands {
                    count: commands.len(),
                    limit,
                });
            }
        }

        Pipeline::new(commands).ok_or(SyntaxError::EmptyLine)
    }

    fn build_command(&self, stage: usize, words: Vec<String>) -> Result<Command, SyntaxError> {
        if let Some(limit) = self.limits.max_words_per_command {
            if words.len() > limit {
                return Err(SyntaxError::TooManyWords {
                    stage,
                    count: words.len(),
                    limit,
                });
            }
        }
        for word in &words {
            if word.contains('\0') {
                return Err(SyntaxError::InteriorNul { stage });
            }
            if let Some(limit) = self.limits.max_word_len {
                if word.len() > limit {
                    return Err(SyntaxError::WordTooLong {
                        stage,
                        word: word.clone(),
                        limit,
                    });
                }
            }
        }
        Command::new(words).ok_or(SyntaxError::EmptyStage { stage })
    }
}
