// This module implements the stack effect engine. A StackOffset is an exact affine
// expression: an integer constant plus a coefficient per distinct textual size expression.
// Terms are bucketed by their spelling only, so `oparg` and `oparg*2` never merge. The
// Stack tracks the logical shape of the value stack while the parts of an instruction are
// composed: values popped from memory, values cached in locals, and the two offsets
// (base: lowest slot still in memory below the cached values; top: logical top). Loads and
// stores are rendered as C text indexed from `stack_pointer`, and flushing writes every
// cached value that memory does not already hold before moving the real pointer.

//! Stack effect engine: symbolic offsets, cached locals and the logical stack.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Name of an effect slot whose value is never referenced.
pub const UNUSED: &str = "unused";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("Array mismatch when popping '{popped}' from stack to assign to '{var}'. Expected {expected} got {found}")]
    KindMismatch {
        popped: String,
        var: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Size mismatch when popping '{popped}' from stack to assign to '{var}'. Expected {expected} got {found}")]
    SizeMismatch {
        popped: String,
        var: String,
        expected: String,
        found: String,
    },

    #[error("Value '{name}' is produced but never used: it is discarded by '{consumer}'")]
    UnusedValue { name: String, consumer: String },

    #[error("Stack flush is inconsistent: base offset {base} does not reach top offset {top}")]
    InconsistentFlush { base: String, top: String },
}

/// One slot (or run of slots, for arrays) of a stack effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackItem {
    pub name: String,
    pub type_: Option<String>,
    pub condition: Option<String>,
    /// Number of slots; `"1"` for a scalar.
    pub size: String,
    pub array: bool,
    pub peek: bool,
    pub used: bool,
}

impl StackItem {
    pub fn scalar(name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_: None,
            condition: None,
            size: "1".to_string(),
            array: false,
            peek: false,
            used: false,
        }
    }

    pub fn array(name: &str, size: &str) -> Self {
        Self {
            size: size.to_string(),
            array: true,
            ..Self::scalar(name)
        }
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn with_type(mut self, type_: &str) -> Self {
        self.type_ = Some(type_.to_string());
        self
    }

    pub fn used(mut self) -> Self {
        self.used = true;
        self
    }

    pub fn is_unused(&self) -> bool {
        self.name == UNUSED
    }

    /// Contribution of this item to an offset, as a single term.
    pub fn size_term(&self) -> String {
        match self.condition.as_deref() {
            None | Some("1") => self.size.clone(),
            Some("0") => "0".to_string(),
            Some(cond) => format!("(({}) ? {} : 0)", cond, self.size),
        }
    }

    fn kind(&self) -> &'static str {
        if self.array {
            "array"
        } else {
            "scalar"
        }
    }
}

/// Add parentheses unless the expression is a plain product of words or already
/// wrapped in one matching pair.
pub fn maybe_parenthesize(sym: &str) -> String {
    if is_wrapped(sym) || sym.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '*' || c.is_whitespace()) {
        sym.to_string()
    } else {
        format!("({sym})")
    }
}

fn is_wrapped(sym: &str) -> bool {
    if !sym.starts_with('(') || !sym.ends_with(')') {
        return false;
    }
    let mut depth = 0i32;
    for (i, c) in sym.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return i == sym.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Affine offset: `constant + sum(coefficient * term)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackOffset {
    constant: i64,
    terms: BTreeMap<String, i64>,
}

impl StackOffset {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: &StackItem) {
        self.add_term(&item.size_term(), 1);
    }

    pub fn pop(&mut self, item: &StackItem) {
        self.add_term(&item.size_term(), -1);
    }

    fn add_term(&mut self, term: &str, coefficient: i64) {
        if let Ok(value) = term.trim().parse::<i64>() {
            self.constant += value * coefficient;
            return;
        }
        let entry = self.terms.entry(term.to_string()).or_insert(0);
        *entry += coefficient;
        if *entry == 0 {
            self.terms.remove(term);
        }
    }

    pub fn add(&mut self, other: &StackOffset) {
        self.constant += other.constant;
        for (term, coefficient) in &other.terms {
            self.add_term(term, *coefficient);
        }
    }

    pub fn negated(&self) -> StackOffset {
        StackOffset {
            constant: -self.constant,
            terms: self.terms.iter().map(|(t, c)| (t.clone(), -c)).collect(),
        }
    }

    pub fn minus(&self, other: &StackOffset) -> StackOffset {
        let mut result = self.clone();
        result.add(&other.negated());
        result
    }

    /// The value, when it does not depend on any size expression.
    pub fn as_int(&self) -> Option<i64> {
        self.terms.is_empty().then_some(self.constant)
    }

    pub fn is_zero(&self) -> bool {
        self.as_int() == Some(0)
    }

    pub fn clear(&mut self) {
        self.constant = 0;
        self.terms.clear();
    }

    pub fn to_c(&self) -> String {
        let mut symbolic = String::new();
        for (term, coefficient) in self.terms.iter().filter(|(_, c)| **c < 0) {
            symbolic.push_str(" - ");
            symbolic.push_str(&render_term(term, -coefficient));
        }
        for (term, coefficient) in self.terms.iter().filter(|(_, c)| **c > 0) {
            symbolic.push_str(" + ");
            symbolic.push_str(&render_term(term, *coefficient));
        }
        let result = if !symbolic.is_empty() && self.constant == 0 {
            symbolic
        } else {
            format!("{}{}", self.constant, symbolic)
        };
        if let Some(rest) = result.strip_prefix(" + ") {
            rest.to_string()
        } else if let Some(rest) = result.strip_prefix(" - ") {
            format!("-{rest}")
        } else {
            result
        }
    }
}

fn render_term(term: &str, coefficient: i64) -> String {
    if coefficient == 1 {
        maybe_parenthesize(term)
    } else {
        format!("{}*{}", coefficient, maybe_parenthesize(term))
    }
}

impl fmt::Display for StackOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_c())
    }
}

/// A stack value as currently held by the generated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
    pub item: StackItem,
    /// The C variable holds the value.
    pub defined: bool,
    /// The stack slot holds the value.
    pub in_memory: bool,
}

impl Local {
    /// Placeholder for a slot nobody reads or writes.
    pub fn unused(item: &StackItem) -> Self {
        Self {
            item: item.clone(),
            defined: false,
            in_memory: item.array,
        }
    }

    /// Output computed by a body. Arrays are written in place.
    pub fn local(item: &StackItem) -> Self {
        Self {
            item: item.clone(),
            defined: !item.array,
            in_memory: item.array,
        }
    }

    /// Value popped from memory, whether or not it was loaded.
    fn from_memory(item: &StackItem, defined: bool) -> Self {
        Self {
            item: item.clone(),
            defined,
            in_memory: true,
        }
    }

    /// `var` takes over the value cached by `prev`.
    pub fn redefinition(var: &StackItem, prev: &Local) -> Self {
        Self {
            item: var.clone(),
            defined: true,
            in_memory: prev.in_memory,
        }
    }

    pub fn name(&self) -> &str {
        &self.item.name
    }

    pub fn needs_store(&self) -> bool {
        self.defined && !self.in_memory && !self.item.is_unused()
    }
}

/// How values are read from and written to stack slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStyle {
    /// Cast applied when storing an explicitly typed value.
    pub cast_type: String,
    /// Slots hold the value directly instead of in a `.bits` field.
    pub extract_bits: bool,
}

impl SlotStyle {
    pub fn concrete(cast_type: &str) -> Self {
        Self {
            cast_type: cast_type.to_string(),
            extract_bits: false,
        }
    }

    pub fn symbolic(cast_type: &str) -> Self {
        Self {
            cast_type: cast_type.to_string(),
            extract_bits: true,
        }
    }
}

impl Default for SlotStyle {
    fn default() -> Self {
        Self::concrete("uintptr_t")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Stack {
    top_offset: StackOffset,
    base_offset: StackOffset,
    variables: Vec<Local>,
    style: SlotStyle,
}

impl Stack {
    pub fn new(style: SlotStyle) -> Self {
        Self {
            style,
            ..Self::default()
        }
    }

    pub fn top_offset(&self) -> &StackOffset {
        &self.top_offset
    }

    pub fn base_offset(&self) -> &StackOffset {
        &self.base_offset
    }

    pub fn variables(&self) -> &[Local] {
        &self.variables
    }

    /// Some cached value is not yet in its stack slot.
    pub fn has_pending_stores(&self) -> bool {
        self.variables.iter().any(Local::needs_store)
    }

    /// Pop `var`, returning the C code that binds it and the local now holding it.
    pub fn pop(&mut self, var: &StackItem) -> Result<(String, Local), StackError> {
        self.top_offset.pop(var);
        if let Some(popped) = self.variables.pop() {
            if var.array != popped.item.array {
                return Err(StackError::KindMismatch {
                    popped: popped.item.name.clone(),
                    var: var.name.clone(),
                    expected: var.kind(),
                    found: popped.item.kind(),
                });
            }
            if var.size != popped.item.size {
                return Err(StackError::SizeMismatch {
                    popped: popped.item.name.clone(),
                    var: var.name.clone(),
                    expected: var.size.clone(),
                    found: popped.item.size.clone(),
                });
            }
            if var.is_unused() || (!var.used && !var.peek) {
                if popped.needs_store() {
                    return Err(StackError::UnusedValue {
                        name: popped.item.name.clone(),
                        consumer: var.name.clone(),
                    });
                }
                return Ok((String::new(), popped));
            }
            if !var.used {
                return Ok((String::new(), popped));
            }
            if popped.defined {
                if popped.item.name == var.name {
                    return Ok((String::new(), popped));
                }
                log::trace!("rebind {} = {}", var.name, popped.item.name);
                let code = format!("{} = {};\n", var.name, popped.item.name);
                return Ok((code, Local::redefinition(var, &popped)));
            }
            let code = load(&self.style, var, &self.top_offset);
            return Ok((code, Local::redefinition(var, &popped)));
        }

        self.base_offset.pop(var);
        if var.is_unused() || !var.used || var.condition.as_deref() == Some("0") {
            return Ok((String::new(), Local::from_memory(var, false)));
        }
        log::trace!("load {} from stack_pointer[{}]", var.name, self.base_offset);
        let code = load(&self.style, var, &self.base_offset);
        Ok((code, Local::from_memory(var, true)))
    }

    pub fn push(&mut self, local: Local) {
        log::trace!("push {} (defined: {}, in memory: {})", local.name(), local.defined, local.in_memory);
        self.top_offset.push(&local.item);
        self.variables.push(local);
    }

    /// Pop every input of an operation, deepest last, then push the peeked
    /// ones back so they stay on the logical stack with their values cached.
    pub fn pop_inputs(&mut self, inputs: &[StackItem]) -> Result<String, StackError> {
        let mut code = String::new();
        let mut peeks = Vec::new();
        for var in inputs.iter().rev() {
            let (text, local) = self.pop(var)?;
            code.push_str(&text);
            if var.peek {
                peeks.push(local);
            }
        }
        while let Some(local) = peeks.pop() {
            self.push(local);
        }
        Ok(code)
    }

    /// Push the outputs an operation produces; peeks are already on the stack.
    pub fn push_outputs(&mut self, outputs: &[StackItem]) {
        for var in outputs.iter().filter(|v| !v.peek) {
            let local = if var.is_unused() {
                Local::unused(var)
            } else {
                Local::local(var)
            };
            self.push(local);
        }
    }

    /// Point used array outputs at their slots above the current top.
    pub fn define_output_arrays(&self, outputs: &[StackItem]) -> String {
        let mut code = String::new();
        let mut offset = self.top_offset.clone();
        for var in outputs.iter().filter(|v| !v.peek) {
            if var.array && var.used {
                code.push_str(&format!("{} = &stack_pointer[{}];\n", var.name, offset));
            }
            offset.push(var);
        }
        code
    }

    /// Write cached values to memory and move the stack pointer to the logical top.
    pub fn flush(&mut self) -> Result<String, StackError> {
        let mut code = String::new();
        for var in &self.variables {
            if var.needs_store() {
                code.push_str(&store(&self.style, &var.item, &self.base_offset));
            }
            self.base_offset.push(&var.item);
        }
        if self.base_offset != self.top_offset {
            return Err(StackError::InconsistentFlush {
                base: self.base_offset.to_c(),
                top: self.top_offset.to_c(),
            });
        }
        let number = self.base_offset.to_c();
        if number != "0" {
            code.push_str(&format!("stack_pointer += {number};\n"));
            code.push_str("assert(WITHIN_STACK_BOUNDS());\n");
        }
        log::trace!("flush: stack_pointer += {}", number);
        self.base_offset.clear();
        self.top_offset.clear();
        self.variables.clear();
        Ok(code)
    }

    /// Code of a flush performed on an early-exit path; the stack itself is unchanged.
    pub fn flush_locally(&self) -> Result<String, StackError> {
        self.clone().flush()
    }
}

fn load(style: &SlotStyle, var: &StackItem, offset: &StackOffset) -> String {
    let assign = if var.array {
        format!("{} = &stack_pointer[{}];", var.name, offset)
    } else if let Some(type_) = &var.type_ {
        let bits = if style.extract_bits { "" } else { ".bits" };
        format!("{} = ({})stack_pointer[{}]{};", var.name, type_, offset, bits)
    } else {
        format!("{} = stack_pointer[{}];", var.name, offset)
    };
    match var.condition.as_deref() {
        None | Some("1") => format!("{assign}\n"),
        Some("0") => String::new(),
        Some(cond) => format!("if ({cond}) {{ {assign} }}\n"),
    }
}

fn store(style: &SlotStyle, var: &StackItem, offset: &StackOffset) -> String {
    let prefix = match var.condition.as_deref() {
        Some("0") => return String::new(),
        None | Some("1") => String::new(),
        Some(cond) => format!("if ({cond}) "),
    };
    let (cast, bits) = match &var.type_ {
        Some(_) => (
            format!("({})", style.cast_type),
            if style.extract_bits { "" } else { ".bits" },
        ),
        None => (String::new(), ""),
    };
    format!("{prefix}stack_pointer[{offset}]{bits} = {cast}{};\n", var.name)
}
