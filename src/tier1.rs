// This module generates the concrete interpreter cases. Each instruction becomes one
// `TARGET(NAME) { ... }` block: instruction pointer bookkeeping and statistics, prediction
// and family size checks, declarations of the locals its operations use, then every part
// in order (cache skips, flush barriers, and operations with their pops, cache reads and
// spliced bodies), and finally the stores of the outputs still cached, the stack pointer
// adjustment and `DISPATCH();`. Blocks are emitted sorted by instruction name. Early exits
// that unwind a constant number of slots share synthesized `pop_N_label` labels, which are
// emitted after the last block.

//! Concrete (tier 1) case generation.

use hashbrown::HashSet;
use std::collections::BTreeSet;

use crate::analyzer::{Analysis, Instruction, Operation, Part};
use crate::config::{declaration, GeneratorConfig};
use crate::cwriter::CWriter;
use crate::emitter::{Emitter, PopLabel, Tier};
use crate::error::{CasesError, CasesResult};
use crate::stack::{SlotStyle, Stack, StackItem};

/// Generated text, without the file framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier1Output {
    /// One `TARGET` block per instruction.
    pub cases: String,
    /// Unwinding labels the cases jump to.
    pub labels: String,
}

pub fn generate_tier1(analysis: &Analysis, config: &GeneratorConfig) -> CasesResult<Tier1Output> {
    let mut emitter = Emitter::new(CWriter::new(config.base_indent), Tier::Concrete);
    emitter.out.emit("\n");

    let mut instructions: Vec<&Instruction> = analysis.instructions().iter().collect();
    instructions.sort_by(|a, b| a.name.cmp(&b.name));
    for inst in &instructions {
        log::debug!("generating TARGET({})", inst.name);
        write_instruction(analysis, inst, &mut emitter, config)?;
    }
    let (out, labels) = emitter.into_parts();
    log::info!("generated {} tier 1 cases, {} unwinding labels", instructions.len(), labels.len());
    Ok(Tier1Output {
        cases: out.into_string(),
        labels: write_labels(&labels, config),
    })
}

/// The complete generated file for `inputs`.
pub fn generate_tier1_file(
    analysis: &Analysis,
    inputs: &[String],
    config: &GeneratorConfig,
) -> CasesResult<String> {
    let output = generate_tier1(analysis, config)?;
    let mut text = config.file_header(inputs);
    text.push_str("\n#ifdef TIER_TWO\n    #error \"this header is for tier 1 only\"\n#endif\n#define TIER_ONE 1\n");
    text.push_str(&output.cases);
    text.push_str(&output.labels);
    text.push_str("#undef TIER_ONE\n");
    Ok(text)
}

fn write_labels(labels: &BTreeSet<PopLabel>, config: &GeneratorConfig) -> String {
    let mut out = CWriter::new(config.base_indent);
    for label in labels {
        out.emit("\n");
        out.emit(&format!("{}:\n", label.name()));
        out.indent();
        out.emit(&format!("stack_pointer += -{};\n", label.depth));
        out.emit("assert(WITHIN_STACK_BOUNDS());\n");
        out.emit(&format!("goto {};\n", label.label));
        out.dedent();
    }
    out.into_string()
}

fn type_and_null(var: &StackItem, config: &GeneratorConfig) -> (String, String) {
    match &var.type_ {
        Some(type_) => (type_.clone(), config.pointer_null.clone()),
        None if var.array => (config.stack_ref_array_type(), config.pointer_null.clone()),
        None => (config.stack_ref_type.clone(), config.stack_ref_null.clone()),
    }
}

fn declare_variables(inst: &Instruction, out: &mut CWriter, config: &GeneratorConfig) {
    let mut declared: HashSet<&str> = HashSet::new();
    for op in inst.ops() {
        for var in op.inputs.iter().chain(op.outputs.iter()) {
            if var.is_unused() || !var.used || declared.contains(var.name.as_str()) {
                continue;
            }
            declared.insert(&var.name);
            let (type_, null) = type_and_null(var, config);
            let decl = declaration(&type_, &var.name);
            if var.condition.is_some() {
                out.emit(&format!("{decl} = {null};\n"));
            } else {
                out.emit(&format!("{decl};\n"));
            }
        }
    }
}

fn skip_comment(size: usize) -> String {
    let entries = if size > 1 { "entries" } else { "entry" };
    format!("/* Skip {size} cache {entries} */\n")
}

fn write_instruction(
    analysis: &Analysis,
    inst: &Instruction,
    emitter: &mut Emitter,
    config: &GeneratorConfig,
) -> CasesResult<()> {
    let name = &inst.name;
    let size = inst.size();
    let needs_this = inst.needs_this();
    let out = &mut emitter.out;

    out.emit("\n");
    out.emit(&format!("TARGET({name}) {{\n"));
    if needs_this && !inst.is_target {
        out.emit("_Py_CODEUNIT *this_instr = frame->instr_ptr = next_instr;\n");
        out.emit("(void)this_instr;\n");
    } else {
        out.emit("frame->instr_ptr = next_instr;\n");
    }
    out.emit(&format!("next_instr += {size};\n"));
    out.emit(&format!("INSTRUCTION_STATS({name});\n"));
    if inst.is_target {
        out.emit(&format!("PREDICTED({name});\n"));
        if needs_this {
            out.emit(&format!("_Py_CODEUNIT *this_instr = next_instr - {size};\n"));
            out.emit("(void)this_instr;\n");
        }
    }
    if let Some(family) = inst.family.as_ref().and_then(|f| analysis.family(f)) {
        out.emit(&format!(
            "static_assert({} == {}, \"incorrect cache size\");\n",
            family.size,
            size - 1
        ));
    }
    declare_variables(inst, out, config);

    let deopt_target = inst.family.as_deref().unwrap_or(&inst.name);
    let braces = inst.ops().count() > 1;
    let mut stack = Stack::new(SlotStyle::concrete(&config.store_cast));
    let mut offset = 1;
    for part in &inst.parts {
        match part {
            Part::Skip(n) => {
                emitter.out.emit(&skip_comment(*n));
                offset += n;
            }
            Part::Flush => {
                emitter.out.emit("// flush\n");
                let code = stack.flush().map_err(|e| stack_error(inst, e))?;
                emitter.out.emit(&code);
            }
            Part::Op(op) => {
                write_op(op, emitter, &mut stack, offset, braces, deopt_target)
                    .map_err(|e| relabel(inst, e))?;
                offset += op.size();
            }
        }
    }

    emitter.out.start_line();
    if !inst.always_exits() {
        let code = stack.flush().map_err(|e| stack_error(inst, e))?;
        emitter.out.emit(&code);
        emitter.out.emit("DISPATCH();\n");
    }
    emitter.out.start_line();
    emitter.out.emit("}");
    emitter.out.emit("\n");
    Ok(())
}

fn write_op(
    op: &Operation,
    emitter: &mut Emitter,
    stack: &mut Stack,
    mut offset: usize,
    braces: bool,
    deopt_target: &str,
) -> CasesResult<()> {
    let to_error = |e| CasesError::stack(&op.name, &op.location, e);
    emitter.out.start_line();
    if braces {
        emitter.out.emit(&format!("// {}\n", op.name));
    }
    let code = stack.pop_inputs(&op.inputs).map_err(to_error)?;
    emitter.out.emit(&code);
    if braces {
        emitter.out.emit("{\n");
    }
    emitter.out.emit(&stack.define_output_arrays(&op.outputs));
    for cache in &op.caches {
        if cache.is_unused() {
            emitter.out.emit(&skip_comment(cache.size));
        } else {
            let (type_, reader) = match cache.size {
                4 => ("PyObject *".to_string(), "read_obj".to_string()),
                n => (format!("uint{}_t", n * 16), format!("read_u{}", n * 16)),
            };
            let decl = declaration(&type_, &cache.name);
            emitter.out.emit(&format!("{decl} = {reader}(&this_instr[{offset}].cache);\n"));
            emitter.out.emit(&format!("(void){};\n", cache.name));
        }
        offset += cache.size;
    }
    emitter.emit_body(op, stack, deopt_target)?;
    if braces {
        emitter.out.start_line();
        emitter.out.emit("}\n");
    }
    stack.push_outputs(&op.outputs);
    Ok(())
}

fn stack_error(inst: &Instruction, error: crate::stack::StackError) -> CasesError {
    CasesError::stack(&inst.name, &inst.location, error)
}

/// Report stack errors of a part against the instruction being generated.
fn relabel(inst: &Instruction, error: CasesError) -> CasesError {
    match error {
        CasesError::Stack { source, .. } => stack_error(inst, source),
        other => other,
    }
}
