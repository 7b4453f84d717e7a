// This module implements the tokenizer for the definitions DSL. The DSL is embedded in C
// source, so the lexer recognizes the subset of C lexical structure needed to skip over
// operation bodies safely: identifiers, numbers, string and character literals, line and
// block comments, preprocessor lines and punctuation (including the multi-character
// operators, so that `--` separating inputs from outputs is a single token). Every token
// records its line, start and end column and byte span, which the writer later uses to
// reproduce the original spacing of spliced bodies.

//! Tokenizer for the definitions DSL.

use crate::error::{CasesError, CasesResult, SourceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    Char,
    Comment,
    /// Preprocessor line, e.g. `#if ENABLE_SPECIALIZATION`.
    CMacro,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based line of the first character.
    pub line: usize,
    /// 0-based column of the first character.
    pub column: usize,
    pub end_line: usize,
    /// Column just past the last character.
    pub end_column: usize,
    /// Byte span in the lexed text.
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_ident(&self, text: &str) -> bool {
        self.kind == TokenKind::Identifier && self.text == text
    }

    pub fn is_punct(&self, text: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == text
    }

    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Comment | TokenKind::CMacro)
    }
}

// Longest first so that `<<=` wins over `<<` and `<`.
const PUNCTUATORS: &[&str] = &[
    "<<=", ">>=", "...", "--", "++", "->", "==", "!=", "<=", ">=", "&&", "||", "<<", ">>", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=", "::",
];

pub struct Lexer<'a> {
    text: &'a str,
    file: &'a str,
    pos: usize,
    line: usize,
    line_start: usize,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over `text`, which begins on line `first_line` of `file`.
    pub fn new(text: &'a str, file: &'a str, first_line: usize) -> Self {
        Self {
            text,
            file,
            pos: 0,
            line: first_line,
            line_start: 0,
        }
    }

    pub fn tokenize(mut self) -> CasesResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        log::trace!("{}: lexed {} tokens", self.file, tokens.len());
        Ok(tokens)
    }

    fn peek_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.text[self.pos..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(ch)
    }

    fn column(&self) -> usize {
        self.text[self.line_start..self.pos].chars().count()
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.file, self.line, self.column())
    }

    fn at_line_start(&self) -> bool {
        self.text[self.line_start..self.pos].chars().all(char::is_whitespace)
    }

    fn next_token(&mut self) -> CasesResult<Option<Token>> {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.advance();
        }
        let Some(ch) = self.peek_char() else {
            return Ok(None);
        };

        let start = self.pos;
        let line = self.line;
        let column = self.column();

        let kind = if ch == '#' && self.at_line_start() {
            self.lex_cmacro();
            TokenKind::CMacro
        } else if ch == '/' && self.peek_nth(1) == Some('/') {
            while self.peek_char().is_some_and(|c| c != '\n') {
                self.advance();
            }
            TokenKind::Comment
        } else if ch == '/' && self.peek_nth(1) == Some('*') {
            self.lex_block_comment()?;
            TokenKind::Comment
        } else if ch.is_ascii_alphabetic() || ch == '_' {
            while self.peek_char().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                self.advance();
            }
            TokenKind::Identifier
        } else if ch.is_ascii_digit()
            || (ch == '.' && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()))
        {
            self.lex_number();
            TokenKind::Number
        } else if ch == '"' {
            self.lex_quoted('"')?;
            TokenKind::String
        } else if ch == '\'' {
            self.lex_quoted('\'')?;
            TokenKind::Char
        } else {
            let rest = &self.text[self.pos..];
            let len = PUNCTUATORS
                .iter()
                .find(|p| rest.starts_with(**p))
                .map_or(ch.len_utf8(), |p| p.len());
            for _ in 0..rest[..len].chars().count() {
                self.advance();
            }
            TokenKind::Punct
        };

        Ok(Some(Token {
            kind,
            text: self.text[start..self.pos].to_string(),
            line,
            column,
            end_line: self.line,
            end_column: self.column(),
            start,
            end: self.pos,
        }))
    }

    fn lex_cmacro(&mut self) {
        // Backslash continuations extend the directive.
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            if ch == '\\' && self.peek_nth(1) == Some('\n') {
                self.advance();
            }
            self.advance();
        }
    }

    fn lex_block_comment(&mut self) -> CasesResult<()> {
        let location = self.location();
        self.advance();
        self.advance();
        loop {
            match self.advance() {
                Some('*') if self.peek_char() == Some('/') => {
                    self.advance();
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(CasesError::syntax(location, "unterminated comment")),
            }
        }
    }

    fn lex_number(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
                let exponent = matches!(ch, 'e' | 'E' | 'p' | 'P');
                self.advance();
                if exponent && matches!(self.peek_char(), Some('+' | '-')) {
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn lex_quoted(&mut self, quote: char) -> CasesResult<()> {
        let location = self.location();
        self.advance();
        loop {
            match self.advance() {
                Some('\\') => {
                    self.advance();
                }
                Some(c) if c == quote => return Ok(()),
                Some('\n') | None => {
                    return Err(CasesError::syntax(location, "unterminated literal"));
                }
                Some(_) => {}
            }
        }
    }
}

/// Tokenize `text` as if it started on `first_line` of `file`.
pub fn tokenize(text: &str, file: &str, first_line: usize) -> CasesResult<Vec<Token>> {
    Lexer::new(text, file, first_line).tokenize()
}
