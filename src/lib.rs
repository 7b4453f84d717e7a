//! casegen - interpreter case generation from stack-effect definitions.
//!
//! Instructions are declared once, as operations with a stack effect
//! (`inst(NAME, (inputs -- outputs)) { body }`), compositions of operations
//! (`macro`), specialization families and pseudo-instructions. From these
//! definitions two artifacts are generated:
//!
//! - the concrete cases of the interpreter loop (`TARGET(NAME) { ... }`), with
//!   every stack load and store, stack pointer adjustment, cache read and
//!   error unwinding spelled out;
//! - the abstract cases of the superblock optimizer (`case NAME: { ... }`),
//!   which replay the same stack effects on symbolic values.
//!
//! # Usage
//!
//! ```ignore
//! use casegen::{analyze_sources, generate_tier1, GeneratorConfig};
//!
//! let analysis = analyze_sources(&[("bytecodes.c".to_string(), text)])?;
//! let output = generate_tier1(&analysis, &GeneratorConfig::default())?;
//! print!("{}{}", output.cases, output.labels);
//! ```
//!
//! # Architecture
//!
//! - [`lexer`], [`parser`] - definitions region to [`decl`] declarations
//! - [`stack`] - symbolic stack offsets and cached stack values
//! - [`analyzer`] - resolves declarations and validates every composition
//! - [`emitter`], [`cwriter`] - body splicing and C text layout
//! - [`tier1`] - concrete generator
//! - [`optimizer`] - abstract generator

pub mod analyzer;
pub mod config;
pub mod cwriter;
pub mod decl;
pub mod emitter;
pub mod error;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod stack;
pub mod tier1;

pub use analyzer::{analyze, analyze_sources, Analysis, CombinedEffect, Instruction, Operation, Part};
pub use config::GeneratorConfig;
pub use error::{CasesError, CasesResult, SourceLocation};
pub use optimizer::{generate_abstract, generate_abstract_file, OverrideResolution};
pub use parser::parse_source;
pub use stack::{StackError, StackItem, StackOffset};
pub use tier1::{generate_tier1, generate_tier1_file, Tier1Output};
