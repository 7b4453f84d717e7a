// This module implements the composition analyzer. It turns the parsed definitions of one
// pass into operations, instructions, families and pseudo-instructions. Redefinitions are
// resolved through two explicit layers (base definitions and `override` definitions keyed
// by name) reconciled in a single step; nothing is patched in place. Each operation gets
// its effect lists converted to stack items with peek and use flags, and its body scanned
// for the properties the generators need (unconditional exits, use of `this_instr`, exit
// constructs). Finally every instruction's parts are composed on a simulated stack so that
// kind, size and unused-value inconsistencies abort the run before anything is emitted.

//! Composition analyzer: name resolution, desugaring, properties and validation.

use hashbrown::{HashMap, HashSet};
use std::rc::Rc;

use crate::decl::*;
use crate::error::{CasesError, CasesResult, SourceLocation};
use crate::lexer::{Token, TokenKind};
use crate::parser::parse_source;
use crate::stack::{Stack, StackItem, StackOffset, UNUSED};

/// Body constructs that never fall through to the next statement.
const EXITS: &[&str] = &[
    "goto",
    "return",
    "DISPATCH",
    "DISPATCH_GOTO",
    "DISPATCH_INLINED",
    "GO_TO_INSTRUCTION",
    "Py_UNREACHABLE",
];

/// Exit macros that are unconditional when their condition is literally true.
const CONDITIONAL_EXITS: &[&str] = &["ERROR_IF", "DEOPT_IF", "EXIT_IF"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub name: String,
    /// Width in 16-bit code units.
    pub size: usize,
}

impl CacheEntry {
    pub fn is_unused(&self) -> bool {
        self.name == UNUSED
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    /// Control never reaches the end of the body.
    pub always_exits: bool,
    pub needs_this: bool,
    pub uses_deopt: bool,
    pub uses_exit: bool,
    /// Instructions this body jumps to with `GO_TO_INSTRUCTION`.
    pub jump_targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Name used in generated code (`_NAME` for operations implied by `inst`).
    pub name: String,
    /// Name the operation is addressed by in macros.
    pub declared_name: String,
    pub inputs: Vec<StackItem>,
    pub outputs: Vec<StackItem>,
    pub caches: Vec<CacheEntry>,
    pub body: Vec<Token>,
    pub annotations: Vec<Annotation>,
    pub properties: Properties,
    pub location: SourceLocation,
    pub implicit: bool,
}

impl Operation {
    pub fn has_annotation(&self, annotation: Annotation) -> bool {
        self.annotations.contains(&annotation)
    }

    pub fn is_pure(&self) -> bool {
        self.has_annotation(Annotation::Pure)
    }

    /// Only meaningful for the concrete interpreter.
    pub fn is_tier1_only(&self) -> bool {
        self.has_annotation(Annotation::Specializing) || self.has_annotation(Annotation::Tier1)
    }

    /// Can run in the abstract interpreter: it reads at most one named cache entry.
    pub fn is_viable(&self) -> bool {
        self.caches.iter().filter(|c| !c.is_unused()).count() <= 1
    }

    /// Code units of cache consumed.
    pub fn size(&self) -> usize {
        self.caches.iter().map(|c| c.size).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Op(Rc<Operation>),
    Skip(usize),
    Flush,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub name: String,
    pub parts: Vec<Part>,
    /// Head of the family this instruction specializes, if any.
    pub family: Option<String>,
    /// Jumped to by name (`PREDICTED`).
    pub is_target: bool,
    pub location: SourceLocation,
}

impl Instruction {
    pub fn ops(&self) -> impl Iterator<Item = &Rc<Operation>> {
        self.parts.iter().filter_map(|part| match part {
            Part::Op(op) => Some(op),
            _ => None,
        })
    }

    /// Total length in code units: the instruction itself plus its caches.
    pub fn size(&self) -> usize {
        1 + self
            .parts
            .iter()
            .map(|part| match part {
                Part::Op(op) => op.size(),
                Part::Skip(n) => *n,
                Part::Flush => 0,
            })
            .sum::<usize>()
    }

    pub fn always_exits(&self) -> bool {
        self.ops().any(|op| op.properties.always_exits)
    }

    pub fn needs_this(&self) -> bool {
        self.ops().any(|op| op.properties.needs_this)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Family {
    pub name: String,
    pub size: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseudoInstruction {
    pub name: String,
    pub inputs: Vec<StackItem>,
    pub outputs: Vec<StackItem>,
    pub flags: Vec<String>,
    pub targets: Vec<String>,
    pub as_sequence: bool,
}

/// Net effect of an instruction, as symbolic slot counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedEffect {
    pub popped: String,
    pub pushed: String,
}

/// Resolved definitions of one pass, in declaration order.
#[derive(Debug, Default)]
pub struct Analysis {
    operations: Vec<Rc<Operation>>,
    operation_index: HashMap<String, usize>,
    instructions: Vec<Instruction>,
    instruction_index: HashMap<String, usize>,
    families: Vec<Family>,
    pseudos: Vec<PseudoInstruction>,
}

impl Analysis {
    pub fn operations(&self) -> &[Rc<Operation>] {
        &self.operations
    }

    /// Look up an operation by the name macros use for it.
    pub fn operation(&self, declared_name: &str) -> Option<&Rc<Operation>> {
        self.operation_index.get(declared_name).map(|&i| &self.operations[i])
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction(&self, name: &str) -> Option<&Instruction> {
        self.instruction_index.get(name).map(|&i| &self.instructions[i])
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }

    pub fn pseudos(&self) -> &[PseudoInstruction] {
        &self.pseudos
    }

    pub fn family(&self, name: &str) -> Option<&Family> {
        self.families.iter().find(|f| f.name == name)
    }

    /// Popped and pushed slot counts of an instruction or pseudo-instruction.
    pub fn stack_effect(&self, name: &str) -> Option<CombinedEffect> {
        if let Some(inst) = self.instruction(name) {
            return Some(instruction_effect(inst));
        }
        let pseudo = self.pseudos.iter().find(|p| p.name == name)?;
        let mut popped = StackOffset::empty();
        let mut pushed = StackOffset::empty();
        for input in &pseudo.inputs {
            popped.push(input);
        }
        for output in &pseudo.outputs {
            pushed.push(output);
        }
        Some(CombinedEffect {
            popped: popped.to_c(),
            pushed: pushed.to_c(),
        })
    }
}

fn instruction_effect(inst: &Instruction) -> CombinedEffect {
    let mut base = StackOffset::empty();
    let mut top = StackOffset::empty();
    let mut live: Vec<StackItem> = Vec::new();
    for op in inst.ops() {
        for input in op.inputs.iter().rev() {
            top.pop(input);
            if live.pop().is_none() {
                base.pop(input);
            }
        }
        for output in &op.outputs {
            top.push(output);
            live.push(output.clone());
        }
    }
    CombinedEffect {
        popped: base.negated().to_c(),
        pushed: top.minus(&base).to_c(),
    }
}

/// Parse and analyze `(path, text)` sources as one pass.
pub fn analyze_sources(sources: &[(String, String)]) -> CasesResult<Analysis> {
    let files = sources
        .iter()
        .map(|(path, text)| parse_source(text, path))
        .collect::<CasesResult<Vec<_>>>()?;
    analyze(&files)
}

/// Analyze the definitions of `files` as a single pass.
pub fn analyze(files: &[SourceFile]) -> CasesResult<Analysis> {
    let definitions: Vec<&Definition> = files.iter().flat_map(|f| f.definitions.iter()).collect();
    let layers = DefinitionLayers::collect(&definitions)?;

    let mut analysis = Analysis::default();
    for def in layers.resolved() {
        let op = make_operation(def)?;
        let declared = op.declared_name.clone();
        let op = Rc::new(op);
        analysis.operation_index.insert(declared.clone(), analysis.operations.len());
        analysis.operations.push(Rc::clone(&op));
        if def.kind == OpKind::Inst {
            let parts = desugar_inst(def, op);
            add_instruction(&mut analysis, &declared, parts, &def.location)?;
        }
    }

    for def in &definitions {
        match def {
            Definition::Macro(m) => {
                let parts = resolve_macro(&analysis, m)?;
                add_instruction(&mut analysis, &m.name, parts, &m.location)?;
            }
            Definition::Pseudo(p) => add_pseudo(&mut analysis, p)?,
            _ => {}
        }
    }
    for def in &definitions {
        if let Definition::Family(f) = def {
            add_family(&mut analysis, f)?;
        }
    }
    mark_jump_targets(&mut analysis)?;
    check_pseudo_targets(&analysis, &definitions)?;

    for inst in &analysis.instructions {
        validate_instruction(inst)?;
    }
    log::info!(
        "analyzed {} operations, {} instructions, {} families, {} pseudo-instructions",
        analysis.operations.len(),
        analysis.instructions.len(),
        analysis.families.len(),
        analysis.pseudos.len()
    );
    Ok(analysis)
}

/// `inst`/`op` definitions of a pass split into the base layer and the
/// override layer, both keyed by name.
struct DefinitionLayers<'a> {
    base: Vec<&'a InstDef>,
    base_index: HashMap<&'a str, usize>,
    overrides: HashMap<&'a str, &'a InstDef>,
}

impl<'a> DefinitionLayers<'a> {
    fn collect(definitions: &[&'a Definition]) -> CasesResult<Self> {
        let mut layers = DefinitionLayers {
            base: Vec::new(),
            base_index: HashMap::new(),
            overrides: HashMap::new(),
        };
        for &def in definitions {
            let Definition::Inst(inst) = def else { continue };
            let name = inst.name.as_str();
            if !inst.is_override {
                if layers.base_index.contains_key(name) {
                    return Err(CasesError::analysis(name, &inst.location, "Duplicate definition"));
                }
                layers.base_index.insert(name, layers.base.len());
                layers.base.push(inst);
            }
        }
        for &def in definitions {
            let Definition::Inst(inst) = def else { continue };
            let name = inst.name.as_str();
            if inst.is_override {
                if !layers.base_index.contains_key(name) {
                    return Err(CasesError::analysis(
                        name,
                        &inst.location,
                        "Override of a definition that does not exist",
                    ));
                }
                if layers.overrides.insert(name, inst).is_some() {
                    return Err(CasesError::analysis(name, &inst.location, "Duplicate override"));
                }
            }
        }
        Ok(layers)
    }

    /// Base definitions in declaration order, each replaced by its override.
    fn resolved(&self) -> impl Iterator<Item = &'a InstDef> + '_ {
        self.base.iter().map(|def| {
            let replaced = self.overrides.get(def.name.as_str()).copied();
            if replaced.is_some() {
                log::debug!("{} is overridden", def.name);
            }
            replaced.unwrap_or(def)
        })
    }
}

fn stack_item(decl: &StackEffectDecl) -> StackItem {
    let mut item = match &decl.size {
        Some(size) => StackItem::array(&decl.name, size),
        None => StackItem::scalar(&decl.name),
    };
    item.type_ = decl.type_.clone();
    item.condition = decl.condition.clone();
    item
}

fn body_identifiers(body: &[Token]) -> HashSet<&str> {
    body.iter()
        .filter(|t| t.kind == TokenKind::Identifier)
        .map(|t| t.text.as_str())
        .collect()
}

fn make_operation(def: &InstDef) -> CasesResult<Operation> {
    let mut inputs = Vec::new();
    let mut caches = Vec::new();
    for input in &def.inputs {
        match input {
            InputEffect::Stack(s) => inputs.push(stack_item(s)),
            // Unused entries of an `inst` become parts of the instruction.
            InputEffect::Cache(c) if def.kind == OpKind::Inst && c.name == UNUSED => {}
            InputEffect::Cache(c) => {
                if c.name != UNUSED && ![1, 2, 4].contains(&c.size) {
                    return Err(CasesError::analysis(
                        &def.name,
                        &c.location,
                        format!("Cache entry '{}' has unsupported width {}", c.name, c.size),
                    ));
                }
                caches.push(CacheEntry {
                    name: c.name.clone(),
                    size: c.size,
                });
            }
        }
    }
    let mut outputs: Vec<StackItem> = def.outputs.iter().map(stack_item).collect();
    mark_peeks(def, &mut inputs, &mut outputs)?;

    let identifiers = body_identifiers(&def.body);
    let decref_all = identifiers.contains("DECREF_INPUTS");
    let output_names: HashSet<String> = outputs.iter().map(|o| o.name.clone()).collect();
    for input in &mut inputs {
        input.used = identifiers.contains(input.name.as_str())
            || decref_all
            || (!input.peek && output_names.contains(&input.name));
    }
    for output in &mut outputs {
        output.used = identifiers.contains(output.name.as_str());
    }

    let properties = compute_properties(def, &caches)?;
    let (name, implicit) = match def.kind {
        OpKind::Inst => (format!("_{}", def.name), true),
        OpKind::Op => (def.name.clone(), false),
    };
    log::debug!(
        "operation {} ({} inputs, {} outputs, {} cache entries)",
        name,
        inputs.len(),
        outputs.len(),
        caches.len()
    );
    Ok(Operation {
        name,
        declared_name: def.name.clone(),
        inputs,
        outputs,
        caches,
        body: def.body.clone(),
        annotations: def.annotations.clone(),
        properties,
        location: def.location.clone(),
        implicit,
    })
}

/// Inputs and outputs matching by name from the bottom of the stack stay in
/// place. Any other reuse of an input name as an output is an error.
fn mark_peeks(def: &InstDef, inputs: &mut [StackItem], outputs: &mut [StackItem]) -> CasesResult<()> {
    let input_names: HashSet<String> = inputs
        .iter()
        .filter(|i| !i.is_unused())
        .map(|i| i.name.clone())
        .collect();
    let mut modified = false;
    for (i, output) in outputs.iter_mut().enumerate() {
        match inputs.get_mut(i) {
            Some(input) if input.name == output.name => {
                if modified {
                    continue;
                }
                if input.size != output.size || input.array != output.array {
                    return Err(CasesError::analysis(
                        &def.name,
                        &def.location,
                        format!("Peeked value '{}' changes size", output.name),
                    ));
                }
                input.peek = true;
                output.peek = true;
            }
            other => {
                if other.is_some() {
                    modified = true;
                }
                if input_names.contains(&output.name) {
                    return Err(CasesError::analysis(
                        &def.name,
                        &def.location,
                        format!("Reuse of variable '{}' at different stack location", output.name),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn compute_properties(def: &InstDef, caches: &[CacheEntry]) -> CasesResult<Properties> {
    let tokens: Vec<&Token> = def.body.iter().filter(|t| !t.is_trivia()).collect();
    let identifiers = body_identifiers(&def.body);
    let mut properties = Properties {
        always_exits: always_exits(&tokens),
        needs_this: identifiers.contains("this_instr") || caches.iter().any(|c| !c.is_unused()),
        uses_deopt: identifiers.contains("DEOPT_IF"),
        uses_exit: identifiers.contains("EXIT_IF"),
        jump_targets: Vec::new(),
    };
    if properties.uses_deopt && properties.uses_exit {
        return Err(CasesError::analysis(
            &def.name,
            &def.location,
            "No exit is allowed in the same operation as a deopt",
        ));
    }
    for window in tokens.windows(3) {
        if window[0].is_ident("GO_TO_INSTRUCTION") && window[1].is_punct("(") {
            properties.jump_targets.push(window[2].text.clone());
        }
    }
    Ok(properties)
}

/// Does the body unconditionally leave? Only statements at the outermost
/// level count; statements governed by `if`, `else` or a loop are skipped.
fn always_exits(tokens: &[&Token]) -> bool {
    // Strip the enclosing braces.
    let inner = match tokens {
        [first, inner @ .., last] if first.is_punct("{") && last.is_punct("}") => inner,
        other => other,
    };
    let mut depth = 0usize;
    let mut i = 0;
    while i < inner.len() {
        let token = inner[i];
        if token.is_punct("{") {
            depth += 1;
        } else if token.is_punct("}") {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && token.kind == TokenKind::Identifier {
            let text = token.text.as_str();
            if matches!(text, "if" | "while" | "for" | "switch") {
                i = skip_governed_statement(inner, skip_parens(inner, i + 1));
                continue;
            }
            if matches!(text, "else" | "do") {
                i = skip_governed_statement(inner, i + 1);
                continue;
            }
            if EXITS.contains(&text) {
                return true;
            }
            if CONDITIONAL_EXITS.contains(&text)
                && inner.get(i + 1).is_some_and(|t| t.is_punct("("))
                && inner.get(i + 2).is_some_and(|t| t.text == "1" || t.text == "true")
                && inner.get(i + 3).is_some_and(|t| t.is_punct(",") || t.is_punct(")"))
            {
                return true;
            }
        }
        i += 1;
    }
    false
}

/// Index just past the parenthesized group starting at `i`.
fn skip_parens(tokens: &[&Token], mut i: usize) -> usize {
    let mut depth = 0usize;
    while i < tokens.len() {
        if tokens[i].is_punct("(") {
            depth += 1;
        } else if tokens[i].is_punct(")") {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return i + 1;
            }
        }
        i += 1;
    }
    i
}

/// Index just past the statement starting at `i`: a block or up to `;`.
fn skip_governed_statement(tokens: &[&Token], i: usize) -> usize {
    let mut depth = 0usize;
    let mut j = i;
    while j < tokens.len() {
        let token = tokens[j];
        if token.is_punct("{") {
            depth += 1;
        } else if token.is_punct("}") {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return j + 1;
            }
        } else if token.is_punct(";") && depth == 0 {
            return j + 1;
        } else if depth == 0 && matches!(token.text.as_str(), "if" | "while" | "for" | "switch") {
            return skip_governed_statement(tokens, skip_parens(tokens, j + 1));
        }
        j += 1;
    }
    j
}

/// Unused cache entries of an `inst` become skip parts around its operation,
/// which sits where its first real effect was declared.
fn desugar_inst(def: &InstDef, op: Rc<Operation>) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut op_index = None;
    for input in &def.inputs {
        match input {
            InputEffect::Cache(c) if c.name == UNUSED => parts.push(Part::Skip(c.size)),
            _ => {
                if op_index.is_none() {
                    op_index = Some(parts.len());
                    parts.push(Part::Skip(0));
                }
            }
        }
    }
    match op_index {
        Some(index) => parts[index] = Part::Op(op),
        None => parts.push(Part::Op(op)),
    }
    parts
}

fn resolve_macro(analysis: &Analysis, def: &MacroDef) -> CasesResult<Vec<Part>> {
    def.parts
        .iter()
        .map(|part| match part {
            MacroPartDecl::Op { name, location } => match analysis.operation(name) {
                Some(op) => Ok(Part::Op(Rc::clone(op))),
                None => Err(CasesError::analysis(
                    &def.name,
                    location,
                    format!("Unknown operation '{}' in macro", name),
                )),
            },
            MacroPartDecl::Cache { size } => Ok(Part::Skip(*size)),
            MacroPartDecl::Flush => Ok(Part::Flush),
        })
        .collect()
}

fn add_instruction(
    analysis: &mut Analysis,
    name: &str,
    parts: Vec<Part>,
    location: &SourceLocation,
) -> CasesResult<()> {
    if analysis.instruction_index.contains_key(name) {
        return Err(CasesError::analysis(name, location, "Duplicate instruction"));
    }
    analysis.instruction_index.insert(name.to_string(), analysis.instructions.len());
    analysis.instructions.push(Instruction {
        name: name.to_string(),
        parts,
        family: None,
        is_target: false,
        location: location.clone(),
    });
    Ok(())
}

fn instruction_mut<'a>(
    analysis: &'a mut Analysis,
    name: &str,
    referrer: &str,
    location: &SourceLocation,
) -> CasesResult<&'a mut Instruction> {
    match analysis.instruction_index.get(name) {
        Some(&i) => Ok(&mut analysis.instructions[i]),
        None => Err(CasesError::analysis(
            referrer,
            location,
            format!("Unknown instruction '{}'", name),
        )),
    }
}

fn add_family(analysis: &mut Analysis, def: &FamilyDef) -> CasesResult<()> {
    if analysis.family(&def.name).is_some() {
        return Err(CasesError::analysis(&def.name, &def.location, "Duplicate family"));
    }
    instruction_mut(analysis, &def.name, &def.name, &def.location)?.is_target = true;
    for member in &def.members {
        let inst = instruction_mut(analysis, member, &def.name, &def.location)?;
        if let Some(other) = &inst.family {
            return Err(CasesError::analysis(
                &def.name,
                &def.location,
                format!("'{}' is already a member of family '{}'", member, other),
            ));
        }
        inst.family = Some(def.name.clone());
    }
    analysis.families.push(Family {
        name: def.name.clone(),
        size: def.size.clone(),
        members: def.members.clone(),
    });
    Ok(())
}

fn add_pseudo(analysis: &mut Analysis, def: &PseudoDef) -> CasesResult<()> {
    if analysis.pseudos.iter().any(|p| p.name == def.name) {
        return Err(CasesError::analysis(&def.name, &def.location, "Duplicate pseudo-instruction"));
    }
    analysis.pseudos.push(PseudoInstruction {
        name: def.name.clone(),
        inputs: def.inputs.iter().map(stack_item).collect(),
        outputs: def.outputs.iter().map(stack_item).collect(),
        flags: def.flags.clone(),
        targets: def.targets.clone(),
        as_sequence: def.as_sequence,
    });
    Ok(())
}

fn check_pseudo_targets(analysis: &Analysis, definitions: &[&Definition]) -> CasesResult<()> {
    for def in definitions {
        let Definition::Pseudo(p) = def else { continue };
        for target in &p.targets {
            if analysis.instruction(target).is_none() {
                return Err(CasesError::analysis(
                    &p.name,
                    &p.location,
                    format!("Unknown instruction '{}'", target),
                ));
            }
        }
    }
    Ok(())
}

fn mark_jump_targets(analysis: &mut Analysis) -> CasesResult<()> {
    let jumps: Vec<(String, SourceLocation, String)> = analysis
        .operations
        .iter()
        .flat_map(|op| {
            op.properties
                .jump_targets
                .iter()
                .map(|target| (op.name.clone(), op.location.clone(), target.clone()))
        })
        .collect();
    for (op, location, target) in jumps {
        instruction_mut(analysis, &target, &op, &location)?.is_target = true;
    }
    Ok(())
}

/// Compose the parts of `inst` on a simulated stack, failing on any kind,
/// size or liveness inconsistency.
pub fn validate_instruction(inst: &Instruction) -> CasesResult<()> {
    let mut stack = Stack::default();
    let result = inst.parts.iter().try_for_each(|part| match part {
        Part::Op(op) => {
            stack.pop_inputs(&op.inputs)?;
            stack.push_outputs(&op.outputs);
            Ok(())
        }
        Part::Skip(_) => Ok(()),
        Part::Flush => stack.flush().map(|_| ()),
    });
    result
        .and_then(|_| stack.flush().map(|_| ()))
        .map_err(|e| CasesError::stack(&inst.name, &inst.location, e))
}
