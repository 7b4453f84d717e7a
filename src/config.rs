//! Generator configuration.
//!
//! Every literal that depends on the target interpreter rather than on the
//! definitions themselves lives here. The defaults match the interpreter the
//! definitions DSL was designed for.

/// Marker opening the definitions region of an input file.
pub const BEGIN_MARKER: &str = "// BEGIN BYTECODES //";
/// Marker closing the definitions region of an input file.
pub const END_MARKER: &str = "// END BYTECODES //";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Name written into the "generated by" header.
    pub generator_name: String,
    pub begin_marker: String,
    pub end_marker: String,
    /// Type of a scalar stack slot.
    pub stack_ref_type: String,
    /// Null value of `stack_ref_type`, used for conditional locals.
    pub stack_ref_null: String,
    /// Null value of pointer-typed locals.
    pub pointer_null: String,
    /// Cast applied when storing an explicitly typed local into a slot.
    pub store_cast: String,
    /// Type of a symbolic value in the abstract interpreter.
    pub symbol_type: String,
    /// Indentation level (in units of four spaces) of the emitted cases.
    pub base_indent: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            generator_name: "casegen".to_string(),
            begin_marker: BEGIN_MARKER.to_string(),
            end_marker: END_MARKER.to_string(),
            stack_ref_type: "_PyStackRef".to_string(),
            stack_ref_null: "PyStackRef_NULL".to_string(),
            pointer_null: "NULL".to_string(),
            store_cast: "uintptr_t".to_string(),
            symbol_type: "_Py_UopsSymbol *".to_string(),
            base_indent: 2,
        }
    }
}

impl GeneratorConfig {
    /// Type used for stack-ref arrays (`_PyStackRef *`).
    pub fn stack_ref_array_type(&self) -> String {
        format!("{} *", self.stack_ref_type)
    }

    /// Type used for arrays of symbols (`_Py_UopsSymbol **`).
    pub fn symbol_array_type(&self) -> String {
        if self.symbol_type.ends_with('*') {
            format!("{}*", self.symbol_type)
        } else {
            format!("{} *", self.symbol_type)
        }
    }

    /// Banner that opens every generated file.
    pub fn file_header(&self, inputs: &[String]) -> String {
        format!(
            "// This file is generated by {}\n// from:\n//   {}\n// Do not edit!\n",
            self.generator_name,
            inputs.join(", ")
        )
    }
}

/// Format a C declaration, adding a space between type and name unless the
/// type ends with a pointer star.
pub fn declaration(type_name: &str, name: &str) -> String {
    let needs_space = type_name
        .chars()
        .last()
        .is_some_and(|c| c.is_alphanumeric() || c == '_');
    if needs_space {
        format!("{type_name} {name}")
    } else {
        format!("{type_name}{name}")
    }
}
