//! Lexical analysis of a command line into words and pipe operators.
//!
//! There is no quoting and no escaping: every character that is neither
//! whitespace nor `|` is part of a word.

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A run of literal characters.
    Word(String),
    /// The pipe operator, `|`.
    PipeOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
}

struct LexingFSM<'a> {
    input: std::str::Chars<'a>,
    state: LexingState,
    buffer: String,
}

/// Whitespace as the C locale's `isspace` sees it.
pub(crate) fn is_separator(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\x0b' | '\x0c' | '\r')
}

impl<'a> LexingFSM<'a> {
    fn new(line: &'a str) -> Self {
        LexingFSM {
            input: line.chars(),
            state: LexingState::Start,
            buffer: String::new(),
        }
    }

    /// Runs the machine over the whole input. Lexing cannot fail; empty
    /// stages are the parser's business.
    fn make_tokens(&mut self) -> Vec<Token> {
        let mut out = Vec::new();

        while let Some(ch) = self.input.next() {
            match self.state {
                LexingState::Start => self.handle_start(ch, &mut out),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
            }
        }

        self.finalize_word(&mut out);
        out
    }

    fn handle_start(&mut self, ch: char, out: &mut Vec<Token>) {
        match ch {
            c if is_separator(c) => {}
            '|' => out.push(Token::PipeOp),
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<Token>) {
        match ch {
            c if is_separator(c) => {
                self.finalize_word(out);
                self.state = LexingState::Start;
            }
            '|' => {
                self.finalize_word(out);
                out.push(Token::PipeOp);
                self.state = LexingState::Start;
            }
            c => self.buffer.push(c),
        }
    }

    fn finalize_word(&mut self, out: &mut Vec<Token>) {
        if !self.buffer.is_empty() {
            out.push(Token::Word(std::mem::take(&mut self.buffer)));
        }
    }
}

/// Split a line into tokens.
pub fn split_into_tokens(line: &str) -> Vec<Token> {
    LexingFSM::new(line).make_tokens()
}
