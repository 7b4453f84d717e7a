//! Abstract (tier 2) case generation.
//!
//! The abstract interpreter replays every micro-op on symbolic values. Its
//! cases come from two analyses: the base definitions, which fix the set of
//! operations and their stack effects, and the overrides, which replace the
//! bodies of the operations that need real symbolic reasoning. Every `pure`
//! base operation must be overridden; any other operation gets a default body
//! that binds its outputs to fresh "not null" symbols.

use hashbrown::{HashMap, HashSet};
use std::rc::Rc;

use crate::analyzer::{Analysis, Operation};
use crate::config::{declaration, GeneratorConfig};
use crate::cwriter::CWriter;
use crate::emitter::{Emitter, Tier};
use crate::error::{CasesError, CasesResult};
use crate::stack::{SlotStyle, Stack, StackItem};

/// Pairing of base operations with the overrides that replace them.
#[derive(Debug, Default)]
pub struct OverrideResolution<'a> {
    overrides: HashMap<String, &'a Rc<Operation>>,
}

impl<'a> OverrideResolution<'a> {
    /// Match every override against the base operations.
    ///
    /// Fails with [`CasesError::MissingOverrides`] listing all unmatched names
    /// on either side, and with an analysis error when a matched override's
    /// stack effect differs from the operation it replaces.
    pub fn resolve(base: &Analysis, overrides: &'a Analysis) -> CasesResult<Self> {
        let mut resolution = Self::default();
        let mut orphans = Vec::new();
        for op in overrides.operations() {
            match find_base(base, op) {
                Some(base_op) => {
                    check_signature(base_op, op)?;
                    resolution.overrides.insert(base_op.name.clone(), op);
                }
                None => orphans.push(op.declared_name.clone()),
            }
        }
        let missing: Vec<String> = base
            .operations()
            .iter()
            .filter(|op| op.is_pure() && emits_case(op))
            .filter(|op| !resolution.overrides.contains_key(&op.name))
            .map(|op| op.name.clone())
            .collect();
        if !missing.is_empty() || !orphans.is_empty() {
            return Err(CasesError::MissingOverrides { missing, orphans });
        }
        log::debug!("resolved {} abstract overrides", resolution.overrides.len());
        Ok(resolution)
    }

    pub fn get(&self, op: &Operation) -> Option<&'a Rc<Operation>> {
        self.overrides.get(&op.name).copied()
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

fn find_base<'b>(base: &'b Analysis, op: &Operation) -> Option<&'b Rc<Operation>> {
    base.operation(&op.declared_name).or_else(|| {
        base.operations()
            .iter()
            .find(|b| b.name == op.name || b.name == op.declared_name)
    })
}

/// Tier-1 only operations have no abstract counterpart at all.
fn emits_case(op: &Operation) -> bool {
    !op.is_tier1_only() && op.is_viable()
}

fn same_shape(a: &StackItem, b: &StackItem) -> bool {
    a.array == b.array && a.size == b.size && a.condition == b.condition && a.peek == b.peek
}

fn check_signature(base: &Operation, op: &Operation) -> CasesResult<()> {
    let matches = |a: &[StackItem], b: &[StackItem]| {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_shape(x, y))
    };
    if matches(&base.inputs, &op.inputs) && matches(&base.outputs, &op.outputs) {
        Ok(())
    } else {
        Err(CasesError::analysis(
            &op.name,
            &op.location,
            format!("Override does not match the stack effect of '{}'", base.name),
        ))
    }
}

/// Generate the abstract cases for `base` with bodies from `overrides`.
pub fn generate_abstract(
    base: &Analysis,
    overrides: &Analysis,
    config: &GeneratorConfig,
) -> CasesResult<String> {
    let resolution = OverrideResolution::resolve(base, overrides)?;
    let mut emitter = Emitter::new(CWriter::new(config.base_indent), Tier::Abstract);
    emitter.out.emit("\n");
    let mut cases = 0;
    for op in base.operations() {
        if op.is_tier1_only() {
            continue;
        }
        if !op.is_viable() {
            emitter
                .out
                .emit(&format!("/* {} is not a viable micro-op for tier 2 */\n\n", op.name));
            continue;
        }
        let override_ = resolution.get(op);
        log::debug!(
            "generating case {} ({})",
            op.name,
            if override_.is_some() { "override" } else { "default" }
        );
        write_case(op, override_.map(|o| o.as_ref()), &mut emitter, config)?;
        cases += 1;
    }
    log::info!("generated {} abstract cases, {} overridden", cases, resolution.len());
    let (out, _) = emitter.into_parts();
    Ok(out.into_string())
}

/// The complete generated file for `inputs` (base files first).
pub fn generate_abstract_file(
    base: &Analysis,
    overrides: &Analysis,
    inputs: &[String],
    config: &GeneratorConfig,
) -> CasesResult<String> {
    let cases = generate_abstract(base, overrides, config)?;
    let mut text = config.file_header(inputs);
    text.push_str(&cases);
    Ok(text)
}

fn symbol_declaration(var: &StackItem, config: &GeneratorConfig, out: &mut CWriter) {
    let type_ = match &var.type_ {
        Some(type_) => type_.clone(),
        None if var.array => config.symbol_array_type(),
        None => config.symbol_type.clone(),
    };
    let decl = declaration(&type_, &var.name);
    if var.condition.is_some() {
        out.emit(&format!("{decl} = {};\n", config.pointer_null));
    } else {
        out.emit(&format!("{decl};\n"));
    }
}

fn declare_variables<'v>(
    vars: impl Iterator<Item = &'v StackItem>,
    config: &GeneratorConfig,
    out: &mut CWriter,
) {
    let mut declared: HashSet<&str> = HashSet::new();
    for var in vars {
        if var.is_unused() || !declared.insert(&var.name) {
            continue;
        }
        symbol_declaration(var, config, out);
    }
}

fn write_case(
    op: &Operation,
    override_: Option<&Operation>,
    emitter: &mut Emitter,
    config: &GeneratorConfig,
) -> CasesResult<()> {
    let to_error = |e| CasesError::stack(&op.name, &op.location, e);
    let prototype = override_.unwrap_or(op);
    let out = &mut emitter.out;
    out.emit(&format!("case {}: {{\n", op.name));
    match override_ {
        Some(o) => declare_variables(
            o.inputs.iter().rev().chain(o.outputs.iter().filter(|v| !v.peek)),
            config,
            out,
        ),
        None => declare_variables(op.outputs.iter().filter(|v| !v.peek), config, out),
    }

    let mut stack = Stack::new(SlotStyle::symbolic(&config.symbol_type));
    out.start_line();
    let code = stack.pop_inputs(&prototype.inputs).map_err(to_error)?;
    if override_.is_some() {
        out.emit(&code);
    }

    match override_ {
        Some(o) => {
            out.emit(&stack.define_output_arrays(&o.outputs));
            for cache in op.caches.iter().filter(|c| !c.is_unused()) {
                let (type_, cast) = match cache.size {
                    4 => ("PyObject *".to_string(), "PyObject *".to_string()),
                    n => (format!("uint{}_t", n * 16), format!("uint{}_t", n * 16)),
                };
                let decl = declaration(&type_, &cache.name);
                out.emit(&format!("{decl} = ({cast})this_instr->operand;\n"));
            }
            emitter.emit_body(o, &stack, &op.name)?;
        }
        None => {
            let outputs: Vec<StackItem> = op.outputs.iter().map(|v| v.clone().used()).collect();
            out.emit(&stack.define_output_arrays(&outputs));
            write_default_body(op, out);
        }
    }

    stack.push_outputs(&prototype.outputs);
    emitter.out.start_line();
    let code = stack.flush().map_err(to_error)?;
    emitter.out.emit(&code);
    emitter.out.start_line();
    emitter.out.emit("break;\n");
    emitter.out.emit("}");
    emitter.out.emit("\n\n");
    Ok(())
}

fn write_default_body(op: &Operation, out: &mut CWriter) {
    for var in op.outputs.iter().filter(|v| !v.peek && !v.is_unused()) {
        if var.array {
            out.emit(&format!("for (int _i = {}; --_i >= 0;) {{\n", var.size));
            out.emit(&format!("{}[_i] = sym_new_not_null(ctx);\n", var.name));
            out.emit("}\n");
        } else if var.name == "null" {
            out.emit(&format!("{} = sym_new_null(ctx);\n", var.name));
        } else {
            out.emit(&format!("{} = sym_new_not_null(ctx);\n", var.name));
        }
    }
}
