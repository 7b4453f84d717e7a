//! Declaration model.
//!
//! These are the shapes produced by the parser and consumed by the analyzer.
//! They mirror the surface syntax closely; resolution of names, desugaring of
//! `inst` into an operation plus an instruction and override handling all
//! happen later in [`crate::analyzer`].

use crate::error::SourceLocation;
use crate::lexer::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Annotation {
    /// Abstract operation: the optimizer pass must supply an override.
    Pure,
    Register,
    /// Tier-1 only; has no abstract counterpart.
    Specializing,
    Tier1,
    Tier2,
}

impl Annotation {
    pub fn from_keyword(text: &str) -> Option<Self> {
        match text {
            "pure" => Some(Annotation::Pure),
            "register" => Some(Annotation::Register),
            "specializing" => Some(Annotation::Specializing),
            "tier1" => Some(Annotation::Tier1),
            "tier2" => Some(Annotation::Tier2),
            _ => None,
        }
    }
}

/// One item of an effect list: `name`, `name: TYPE *`, `name[SIZE]`, `name if (COND)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEffectDecl {
    pub name: String,
    pub type_: Option<String>,
    pub condition: Option<String>,
    /// Array size expression, exactly as written.
    pub size: Option<String>,
    pub location: SourceLocation,
}

/// `name/N` inline cache reservation of `N` code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEffectDecl {
    pub name: String,
    pub size: usize,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEffect {
    Stack(StackEffectDecl),
    Cache(CacheEffectDecl),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Inst,
    Op,
}

/// `inst(...) { ... }` or `op(...) { ... }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstDef {
    pub kind: OpKind,
    pub name: String,
    pub annotations: Vec<Annotation>,
    pub is_override: bool,
    pub inputs: Vec<InputEffect>,
    pub outputs: Vec<StackEffectDecl>,
    /// Body tokens including the enclosing braces, comments and preprocessor lines.
    pub body: Vec<Token>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroPartDecl {
    Op { name: String, location: SourceLocation },
    /// `cache/N` or `unused/N`.
    Cache { size: usize },
    Flush,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDef {
    pub name: String,
    pub parts: Vec<MacroPartDecl>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyDef {
    pub name: String,
    /// Total cache units of the family, as written (usually a macro name).
    pub size: String,
    pub members: Vec<String>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseudoDef {
    pub name: String,
    pub inputs: Vec<StackEffectDecl>,
    pub outputs: Vec<StackEffectDecl>,
    pub flags: Vec<String>,
    pub targets: Vec<String>,
    /// Written with `[ ... ]` rather than `{ ... }`.
    pub as_sequence: bool,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    Inst(InstDef),
    Macro(MacroDef),
    Family(FamilyDef),
    Pseudo(PseudoDef),
}

/// Parsed definitions of one input, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub definitions: Vec<Definition>,
}
