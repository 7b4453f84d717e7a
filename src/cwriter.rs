//! Indentation-aware writer for generated C.
//!
//! Text is either emitted as plain strings, which are indented line by line
//! according to the braces and parentheses they open and close, or as source
//! tokens, whose spacing is reconstructed from their original positions so
//! spliced bodies keep the layout they were written with.

use crate::lexer::{Token, TokenKind};

#[derive(Debug, Clone, Copy)]
struct Position {
    end_line: usize,
    end_column: usize,
}

pub struct CWriter {
    out: String,
    indents: Vec<usize>,
    last_token: Option<Position>,
    newline: bool,
}

impl CWriter {
    /// `indent` is in units of four spaces.
    pub fn new(indent: usize) -> Self {
        Self {
            out: String::new(),
            indents: vec![indent * 4],
            last_token: None,
            newline: true,
        }
    }

    fn current_indent(&self) -> usize {
        self.indents.last().copied().unwrap_or(0)
    }

    pub fn indent(&mut self) {
        self.indents.push(self.current_indent() + 4);
    }

    pub fn dedent(&mut self) {
        if self.indents.len() > 1 {
            self.indents.pop();
        }
    }

    fn write_spaces(&mut self, n: usize) {
        self.out.extend(std::iter::repeat(' ').take(n));
    }

    fn maybe_dedent(&mut self, text: &str) {
        if net_count(text, '(', ')') < 0 {
            self.dedent();
        }
        if net_count(text, '{', '}') < 0 {
            self.dedent();
        }
    }

    fn maybe_indent(&mut self, text: &str) {
        if net_count(text, '(', ')') > 0 {
            let current = self.current_indent();
            let offset = match self.last_token {
                Some(last) => {
                    let offset = last.end_column.saturating_sub(1);
                    if offset <= current || offset > 40 {
                        current + 4
                    } else {
                        offset
                    }
                }
                None => current + 4,
            };
            self.indents.push(offset);
        }
        if net_count(text, '{', '}') > 0 {
            self.indent();
        }
    }

    fn set_position(&mut self, token: &Token) {
        match self.last_token {
            Some(last) if last.end_line < token.line => {
                self.out.push('\n');
                self.write_spaces(self.current_indent());
            }
            Some(last) => {
                self.write_spaces(token.column.saturating_sub(last.end_column));
            }
            None if self.newline => self.write_spaces(self.current_indent()),
            None => {}
        }
        self.last_token = Some(Position {
            end_line: token.end_line,
            end_column: token.end_column,
        });
        self.newline = false;
    }

    fn emit_multiline_comment(&mut self, token: &Token) {
        self.set_position(token);
        for (i, line) in token.text.split_inclusive('\n').enumerate() {
            let text = line.trim_start();
            if i > 0 {
                let extra = if text.starts_with('*') { 1 } else { 3 };
                self.write_spaces(self.current_indent() + extra);
            }
            self.out.push_str(text);
        }
    }

    pub fn emit_token(&mut self, token: &Token) {
        if token.kind == TokenKind::Comment && token.text.contains('\n') {
            self.emit_multiline_comment(token);
            return;
        }
        self.maybe_dedent(&token.text);
        self.set_position(token);
        self.out.push_str(&token.text);
        if token.kind == TokenKind::CMacro {
            self.newline = true;
        }
        self.maybe_indent(&token.text);
    }

    /// Emit plain text; every line is indented for the nesting it is at.
    pub fn emit(&mut self, text: &str) {
        for line in text.split_inclusive('\n') {
            self.emit_line(line);
        }
    }

    fn emit_line(&mut self, line: &str) {
        self.maybe_dedent(line);
        if self.newline && !line.is_empty() {
            if !line.starts_with('\n') {
                self.write_spaces(self.current_indent());
            }
            self.newline = false;
        }
        self.out.push_str(line);
        if line.ends_with('\n') {
            self.newline = true;
        }
        self.maybe_indent(line);
        self.last_token = None;
    }

    /// Emit `text` where `token` would have gone.
    pub fn emit_at(&mut self, text: &str, token: &Token) {
        self.set_position(token);
        self.out.push_str(text);
    }

    pub fn start_line(&mut self) {
        if !self.newline {
            self.out.push('\n');
        }
        self.newline = true;
        self.last_token = None;
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }
}

fn net_count(text: &str, open: char, close: char) -> i64 {
    text.chars().fold(0, |n, c| {
        if c == open {
            n + 1
        } else if c == close {
            n - 1
        } else {
            n
        }
    })
}
