//! Splicing of operation bodies into generated code.
//!
//! Bodies are copied token by token. Only a handful of macro calls are
//! rewritten: error exits need the stack unwound to the depth that is live at
//! that point, deopt/exit checks gain their fallback instruction and
//! `DECREF_INPUTS()` expands to one release per input.

use std::collections::BTreeSet;

use crate::analyzer::Operation;
use crate::cwriter::CWriter;
use crate::error::{CasesError, CasesResult, SourceLocation};
use crate::lexer::Token;
use crate::stack::Stack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// The interpreter loop: unwinding, deopt targets, reference releases.
    Concrete,
    /// The abstract interpreter: deopt and exit checks kept verbatim, no releases.
    Abstract,
}

/// Synthesized `pop_DEPTH_LABEL:` that drops `depth` slots and jumps to `label`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PopLabel {
    pub label: String,
    pub depth: i64,
}

impl PopLabel {
    pub fn name(&self) -> String {
        format!("pop_{}_{}", self.depth, self.label)
    }
}

/// A parsed `MACRO(arg, ...);` statement inside a body.
struct MacroCall<'t> {
    lparen: &'t Token,
    args: Vec<Vec<&'t Token>>,
    /// Index just past the terminating `;`.
    end: usize,
}

pub struct Emitter {
    pub out: CWriter,
    tier: Tier,
    labels: BTreeSet<PopLabel>,
}

impl Emitter {
    pub fn new(out: CWriter, tier: Tier) -> Self {
        Self {
            out,
            tier,
            labels: BTreeSet::new(),
        }
    }

    pub fn into_parts(self) -> (CWriter, BTreeSet<PopLabel>) {
        (self.out, self.labels)
    }

    /// Emit the body of `op` without its enclosing braces.
    ///
    /// `deopt_target` is the instruction deopt and exit checks fall back to.
    pub fn emit_body(&mut self, op: &Operation, stack: &Stack, deopt_target: &str) -> CasesResult<()> {
        let tokens = match op.body.as_slice() {
            [_, inner @ .., _] if !inner.is_empty() => inner,
            _ => return Ok(()),
        };
        self.out.start_line();
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            let handled = match (self.tier, token.text.as_str()) {
                (_, "ERROR_IF") => Some(self.error_if(op, tokens, i, stack)?),
                (Tier::Concrete, "DEOPT_IF" | "EXIT_IF") => Some(self.deopt_if(op, tokens, i, deopt_target)?),
                (_, "DECREF_INPUTS") => Some(self.decref_inputs(op, tokens, i)?),
                _ => None,
            };
            match handled {
                Some(next) => i = next,
                None => {
                    self.out.emit_token(token);
                    i += 1;
                }
            }
        }
        Ok(())
    }

    fn error_if(&mut self, op: &Operation, tokens: &[Token], i: usize, stack: &Stack) -> CasesResult<usize> {
        let call = parse_call(op, tokens, i)?;
        let [condition, label] = call.args.as_slice() else {
            return Err(call_error(op, &tokens[i], "ERROR_IF expects a condition and a label"));
        };
        let label = tokens_text(label);
        self.out.emit_at("if ", &tokens[i]);
        self.out.emit_token(call.lparen);
        for token in condition {
            self.out.emit_token(token);
        }
        self.out.emit(") ");

        let depth = stack.top_offset().as_int();
        match depth {
            Some(0) if !stack.has_pending_stores() => {
                self.out.emit(&format!("goto {label};\n"));
            }
            // The abstract cases have no label section; they always unwind inline.
            Some(n) if n < 0 && !stack.has_pending_stores() && self.tier == Tier::Concrete => {
                let pop = PopLabel { label, depth: -n };
                log::trace!("{}: unwinding through {}", op.name, pop.name());
                self.out.emit(&format!("goto {};\n", pop.name()));
                self.labels.insert(pop);
            }
            _ => {
                let flush = stack
                    .flush_locally()
                    .map_err(|e| CasesError::stack(&op.name, &op.location, e))?;
                self.out.emit("{\n");
                self.out.emit(&flush);
                self.out.emit(&format!("goto {label};\n"));
                self.out.emit("}\n");
            }
        }
        Ok(call.end)
    }

    fn deopt_if(&mut self, op: &Operation, tokens: &[Token], i: usize, target: &str) -> CasesResult<usize> {
        let call = parse_call(op, tokens, i)?;
        self.out.emit_at("DEOPT_IF", &tokens[i]);
        self.out.emit_token(call.lparen);
        for (n, arg) in call.args.iter().enumerate() {
            if n > 0 {
                self.out.emit(", ");
            }
            for token in arg {
                self.out.emit_token(token);
            }
        }
        self.out.emit(", ");
        self.out.emit(target);
        self.out.emit(");\n");
        Ok(call.end)
    }

    fn decref_inputs(&mut self, op: &Operation, tokens: &[Token], i: usize) -> CasesResult<usize> {
        let call = parse_call(op, tokens, i)?;
        if self.tier == Tier::Abstract {
            return Ok(call.end);
        }
        self.out.emit_at("", &tokens[i]);
        for var in &op.inputs {
            if var.is_unused() || var.name == "null" || var.peek {
                continue;
            }
            if var.array {
                self.out.emit(&format!("for (int _i = {}; --_i >= 0;) {{\n", var.size));
                self.out.emit(&format!("PyStackRef_CLOSE({}[_i]);\n", var.name));
                self.out.emit("}\n");
                continue;
            }
            match var.condition.as_deref() {
                Some("0") => {}
                None | Some("1") => self.out.emit(&format!("PyStackRef_CLOSE({});\n", var.name)),
                Some(_) => self.out.emit(&format!("PyStackRef_XCLOSE({});\n", var.name)),
            }
        }
        Ok(call.end)
    }
}

fn call_error(op: &Operation, token: &Token, message: &str) -> CasesError {
    let location = SourceLocation::new(op.location.file.clone(), token.line, token.column);
    CasesError::analysis(&op.name, &location, message)
}

/// Split `NAME ( args ) ;` starting at `tokens[i]` into its arguments.
fn parse_call<'t>(op: &Operation, tokens: &'t [Token], i: usize) -> CasesResult<MacroCall<'t>> {
    let name = &tokens[i];
    let mut j = i + 1;
    while tokens.get(j).is_some_and(Token::is_trivia) {
        j += 1;
    }
    let lparen = match tokens.get(j) {
        Some(t) if t.is_punct("(") => t,
        _ => return Err(call_error(op, name, &format!("expected '(' after {}", name.text))),
    };
    let mut args: Vec<Vec<&Token>> = vec![Vec::new()];
    let mut depth = 0usize;
    j += 1;
    loop {
        let Some(token) = tokens.get(j) else {
            return Err(call_error(op, name, &format!("unterminated {}", name.text)));
        };
        j += 1;
        match token.text.as_str() {
            "(" | "[" | "{" if !token.is_trivia() => depth += 1,
            ")" if depth == 0 => break,
            ")" | "]" | "}" if !token.is_trivia() => depth = depth.saturating_sub(1),
            "," if depth == 0 => {
                args.push(Vec::new());
                continue;
            }
            _ => {}
        }
        if let Some(arg) = args.last_mut() {
            arg.push(token);
        }
    }
    if args.len() == 1 && args[0].is_empty() {
        args.clear();
    }
    while tokens.get(j).is_some_and(Token::is_trivia) {
        j += 1;
    }
    match tokens.get(j) {
        Some(t) if t.is_punct(";") => Ok(MacroCall { lparen, args, end: j + 1 }),
        _ => Err(call_error(op, name, &format!("expected ';' after {}(...)", name.text))),
    }
}

fn tokens_text(tokens: &[&Token]) -> String {
    tokens
        .iter()
        .filter(|t| !t.is_trivia())
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
