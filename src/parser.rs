//! Declaration parser.
//!
//! Recursive descent over the token stream of the definitions region. Only the
//! effect lists and the macro/family/pseudo forms are parsed structurally;
//! operation bodies are captured as raw token spans and never interpreted.

use crate::config::GeneratorConfig;
use crate::decl::*;
use crate::error::{CasesError, CasesResult, SourceLocation};
use crate::lexer::{tokenize, Token, TokenKind};

/// Parse the definitions region of `text` using the default markers.
pub fn parse_source(text: &str, file: &str) -> CasesResult<SourceFile> {
    parse_source_with(text, file, &GeneratorConfig::default())
}

pub fn parse_source_with(text: &str, file: &str, config: &GeneratorConfig) -> CasesResult<SourceFile> {
    let (region_start, region_end) = find_region(text, file, config)?;
    let region = &text[region_start..region_end];
    let first_line = text[..region_start].matches('\n').count() + 1;
    let tokens = tokenize(region, file, first_line)?;
    let definitions = Parser::new(region, file, tokens).parse()?;
    log::debug!("{}: parsed {} definitions", file, definitions.len());
    Ok(SourceFile {
        path: file.to_string(),
        definitions,
    })
}

fn find_region(text: &str, file: &str, config: &GeneratorConfig) -> CasesResult<(usize, usize)> {
    let location_of = |offset: usize| {
        let line = text[..offset].matches('\n').count() + 1;
        SourceLocation::new(file, line, 0)
    };
    let begins: Vec<usize> = text.match_indices(&config.begin_marker).map(|(i, _)| i).collect();
    let ends: Vec<usize> = text.match_indices(&config.end_marker).map(|(i, _)| i).collect();

    let begin = match begins.as_slice() {
        [begin] => *begin,
        [] => {
            return Err(CasesError::syntax(
                SourceLocation::new(file, 1, 0),
                format!("missing '{}' marker", config.begin_marker),
            ))
        }
        [_, second, ..] => {
            return Err(CasesError::syntax(
                location_of(*second),
                format!("more than one '{}' marker", config.begin_marker),
            ))
        }
    };
    let end = match ends.as_slice() {
        [end] => *end,
        [] => {
            return Err(CasesError::syntax(
                location_of(text.len()),
                format!("missing '{}' marker", config.end_marker),
            ))
        }
        [_, second, ..] => {
            return Err(CasesError::syntax(
                location_of(*second),
                format!("more than one '{}' marker", config.end_marker),
            ))
        }
    };
    let start = begin + config.begin_marker.len();
    if end < start {
        return Err(CasesError::syntax(
            location_of(end),
            format!("'{}' before '{}'", config.end_marker, config.begin_marker),
        ));
    }
    Ok((start, end))
}

struct Parser<'a> {
    text: &'a str,
    file: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, file: &'a str, tokens: Vec<Token>) -> Self {
        Self { text, file, tokens, pos: 0 }
    }

    fn parse(mut self) -> CasesResult<Vec<Definition>> {
        let mut definitions = Vec::new();
        loop {
            self.skip_trivia();
            if self.is_eof() {
                break;
            }
            definitions.push(self.parse_definition()?);
        }
        Ok(definitions)
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn skip_trivia(&mut self) {
        while self.tokens.get(self.pos).is_some_and(Token::is_trivia) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<&Token> {
        self.skip_trivia();
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> CasesResult<Token> {
        self.skip_trivia();
        match self.tokens.get(self.pos) {
            Some(token) => {
                self.pos += 1;
                Ok(token.clone())
            }
            None => Err(self.error("unexpected end of definitions")),
        }
    }

    fn location(&self) -> SourceLocation {
        match self.tokens.get(self.pos).or(self.tokens.last()) {
            Some(token) => self.token_location(token),
            None => SourceLocation::new(self.file, 1, 0),
        }
    }

    fn token_location(&self, token: &Token) -> SourceLocation {
        SourceLocation::new(self.file, token.line, token.column)
    }

    fn error(&self, message: impl Into<String>) -> CasesError {
        CasesError::syntax(self.location(), message)
    }

    fn try_punct(&mut self, text: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(text)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, text: &str) -> CasesResult<()> {
        if !self.try_punct(text) {
            let found = self.peek().map(|t| t.text.clone());
            return Err(self.error(format!("expected '{}' but found {:?}", text, found)));
        }
        Ok(())
    }

    fn try_ident(&mut self, text: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_ident(text)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn read_identifier(&mut self) -> CasesResult<Token> {
        let token = self.next()?;
        if token.kind != TokenKind::Identifier {
            self.pos -= 1;
            return Err(self.error(format!("expected identifier but found '{}'", token.text)));
        }
        Ok(token)
    }

    fn read_number(&mut self) -> CasesResult<usize> {
        let token = self.next()?;
        match token.text.parse::<usize>() {
            Ok(n) if token.kind == TokenKind::Number => Ok(n),
            _ => {
                self.pos -= 1;
                Err(self.error(format!("expected integer but found '{}'", token.text)))
            }
        }
    }

    /// Consume tokens up to the punctuator `close` that balances an already
    /// consumed `open`, returning the source text in between.
    fn read_balanced_text(&mut self, open: &str, close: &str) -> CasesResult<String> {
        let mut depth = 1;
        let mut span: Option<(usize, usize)> = None;
        loop {
            let token = self.next()?;
            if token.is_punct(open) {
                depth += 1;
            } else if token.is_punct(close) {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            span = Some(match span {
                Some((start, _)) => (start, token.end),
                None => (token.start, token.end),
            });
        }
        match span {
            Some((start, end)) => Ok(self.text[start..end].to_string()),
            None => Err(self.error(format!("empty expression before '{}'", close))),
        }
    }

    fn parse_definition(&mut self) -> CasesResult<Definition> {
        let mut annotations = Vec::new();
        let mut is_override = false;
        loop {
            let Some(token) = self.peek() else { break };
            if token.kind != TokenKind::Identifier {
                break;
            }
            if token.text == "override" {
                is_override = true;
            } else if let Some(annotation) = Annotation::from_keyword(&token.text) {
                annotations.push(annotation);
            } else {
                break;
            }
            self.pos += 1;
        }

        let keyword = self.read_identifier()?;
        let location = self.token_location(&keyword);
        let prefixed = is_override || !annotations.is_empty();
        match keyword.text.as_str() {
            "inst" => self.parse_inst(OpKind::Inst, annotations, is_override, location),
            "op" => self.parse_inst(OpKind::Op, annotations, is_override, location),
            "macro" | "family" | "pseudo" if prefixed => Err(CasesError::syntax(
                location,
                format!("'{}' cannot be annotated or overridden", keyword.text),
            )),
            "macro" => self.parse_macro(location),
            "family" => self.parse_family(location),
            "pseudo" => self.parse_pseudo(location),
            other => Err(CasesError::syntax(
                location,
                format!("expected a definition but found '{}'", other),
            )),
        }
    }

    fn parse_inst(
        &mut self,
        kind: OpKind,
        annotations: Vec<Annotation>,
        is_override: bool,
        location: SourceLocation,
    ) -> CasesResult<Definition> {
        self.expect_punct("(")?;
        let name = self.read_identifier()?.text;
        let (inputs, outputs) = if self.try_punct(",") {
            self.expect_punct("(")?;
            let effects = self.parse_effects(true)?;
            (effects.0, effects.1)
        } else {
            (Vec::new(), Vec::new())
        };
        self.expect_punct(")")?;
        let body = self.parse_block()?;
        Ok(Definition::Inst(InstDef {
            kind,
            name,
            annotations,
            is_override,
            inputs,
            outputs,
            body,
            location,
        }))
    }

    /// Parse `INPUTS -- OUTPUTS )` after the opening parenthesis.
    fn parse_effects(
        &mut self,
        allow_caches: bool,
    ) -> CasesResult<(Vec<InputEffect>, Vec<StackEffectDecl>)> {
        let mut inputs = Vec::new();
        while !self.try_punct("--") {
            let input = self.parse_input_effect()?;
            if matches!(input, InputEffect::Cache(_)) && !allow_caches {
                return Err(self.error("cache effects are not allowed here"));
            }
            inputs.push(input);
            if !self.try_punct(",") {
                self.expect_punct("--")?;
                break;
            }
        }
        let mut outputs = Vec::new();
        while !self.try_punct(")") {
            outputs.push(self.parse_stack_effect()?);
            if !self.try_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok((inputs, outputs))
    }

    fn parse_input_effect(&mut self) -> CasesResult<InputEffect> {
        let start = self.pos;
        let name = self.read_identifier()?;
        if self.try_punct("/") {
            let size = self.read_number()?;
            let location = self.token_location(&name);
            return Ok(InputEffect::Cache(CacheEffectDecl {
                name: name.text,
                size,
                location,
            }));
        }
        self.pos = start;
        Ok(InputEffect::Stack(self.parse_stack_effect()?))
    }

    fn parse_stack_effect(&mut self) -> CasesResult<StackEffectDecl> {
        let name = self.read_identifier()?;
        let location = self.token_location(&name);
        let type_ = if self.try_punct(":") {
            let base = self.read_identifier()?.text;
            let mut stars = 0;
            while self.try_punct("*") {
                stars += 1;
            }
            Some(if stars > 0 {
                format!("{} {}", base, "*".repeat(stars))
            } else {
                base
            })
        } else {
            None
        };
        let size = if self.try_punct("[") {
            Some(self.read_balanced_text("[", "]")?)
        } else {
            None
        };
        let condition = if self.try_ident("if") {
            self.expect_punct("(")?;
            Some(self.read_balanced_text("(", ")")?)
        } else {
            None
        };
        Ok(StackEffectDecl {
            name: name.text,
            type_,
            condition,
            size,
            location,
        })
    }

    /// Capture `{ ... }` including trivia, braces balanced.
    fn parse_block(&mut self) -> CasesResult<Vec<Token>> {
        if !self.peek().is_some_and(|t| t.is_punct("{")) {
            return Err(self.error("expected '{' to open a body"));
        }
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(token) = self.tokens.get(self.pos) {
            self.pos += 1;
            if token.is_punct("{") {
                depth += 1;
            } else if token.is_punct("}") {
                depth -= 1;
                if depth == 0 {
                    return Ok(self.tokens[start..self.pos].to_vec());
                }
            }
        }
        Err(CasesError::syntax(
            self.token_location(&self.tokens[start]),
            "unterminated body",
        ))
    }

    fn parse_macro(&mut self, location: SourceLocation) -> CasesResult<Definition> {
        self.expect_punct("(")?;
        let name = self.read_identifier()?.text;
        self.expect_punct(")")?;
        self.expect_punct("=")?;
        let mut parts = Vec::new();
        loop {
            let part = self.read_identifier()?;
            if self.try_punct("/") {
                if part.text != "cache" && part.text != "unused" {
                    return Err(CasesError::syntax(
                        self.token_location(&part),
                        format!("expected 'cache/N' but found '{}/'", part.text),
                    ));
                }
                parts.push(MacroPartDecl::Cache { size: self.read_number()? });
            } else if part.text == "flush" {
                parts.push(MacroPartDecl::Flush);
            } else {
                let location = self.token_location(&part);
                parts.push(MacroPartDecl::Op { name: part.text, location });
            }
            if !self.try_punct("+") {
                break;
            }
        }
        self.expect_punct(";")?;
        Ok(Definition::Macro(MacroDef { name, parts, location }))
    }

    fn parse_family(&mut self, location: SourceLocation) -> CasesResult<Definition> {
        self.expect_punct("(")?;
        let name = self.read_identifier()?.text;
        let size = if self.try_punct(",") {
            self.read_balanced_text("(", ")")?
        } else {
            self.expect_punct(")")?;
            "0".to_string()
        };
        self.expect_punct("=")?;
        self.expect_punct("{")?;
        let members = self.parse_name_list("}")?;
        self.expect_punct(";")?;
        Ok(Definition::Family(FamilyDef {
            name,
            size,
            members,
            location,
        }))
    }

    fn parse_pseudo(&mut self, location: SourceLocation) -> CasesResult<Definition> {
        self.expect_punct("(")?;
        let name = self.read_identifier()?.text;
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut flags = Vec::new();
        let mut seen_effects = false;
        while self.try_punct(",") {
            self.expect_punct("(")?;
            // `(A, B)` of flags is told apart from `(a, b -- c)` by the separator.
            if !seen_effects && self.effect_list_ahead() {
                let (ins, outs) = self.parse_effects(false)?;
                inputs = ins
                    .into_iter()
                    .filter_map(|i| match i {
                        InputEffect::Stack(s) => Some(s),
                        InputEffect::Cache(_) => None,
                    })
                    .collect();
                outputs = outs;
                seen_effects = true;
            } else {
                flags = self.parse_name_list(")")?;
            }
        }
        self.expect_punct(")")?;
        self.expect_punct("=")?;
        let as_sequence = if self.try_punct("[") {
            true
        } else {
            self.expect_punct("{")?;
            false
        };
        let targets = self.parse_name_list(if as_sequence { "]" } else { "}" })?;
        self.expect_punct(";")?;
        Ok(Definition::Pseudo(PseudoDef {
            name,
            inputs,
            outputs,
            flags,
            targets,
            as_sequence,
            location,
        }))
    }

    fn effect_list_ahead(&self) -> bool {
        let mut depth = 0usize;
        for token in &self.tokens[self.pos..] {
            if token.is_punct("(") || token.is_punct("[") {
                depth += 1;
            } else if token.is_punct(")") || token.is_punct("]") {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            } else if depth == 0 && token.is_punct("--") {
                return true;
            }
        }
        false
    }

    /// `A, B, C` up to `close`; a trailing comma is accepted.
    fn parse_name_list(&mut self, close: &str) -> CasesResult<Vec<String>> {
        let mut names = Vec::new();
        while !self.try_punct(close) {
            names.push(self.read_identifier()?.text);
            if !self.try_punct(",") {
                self.expect_punct(close)?;
                break;
            }
        }
        Ok(names)
    }
}
