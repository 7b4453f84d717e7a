//! Helpers shared by the integration tests.

#![allow(dead_code)]

use casegen::{
    analyze_sources, generate_abstract_file, generate_tier1_file, Analysis, CasesResult,
    GeneratorConfig,
};

pub const BEGIN_MARKER: &str = "// BEGIN BYTECODES //";
pub const END_MARKER: &str = "// END BYTECODES //";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Wrap `body` in the definitions markers and analyze it as one file.
pub fn analyze_text(file: &str, body: &str) -> CasesResult<Analysis> {
    init_logging();
    let text = format!("{}{}{}", BEGIN_MARKER, body, END_MARKER);
    analyze_sources(&[(file.to_string(), text)])
}

/// Drop the generated file framing: leading banner, preprocessor and blank
/// lines, trailing preprocessor and blank lines.
pub fn strip_framing(text: &str) -> String {
    let mut lines: Vec<&str> = text.split_inclusive('\n').collect();
    while lines
        .first()
        .is_some_and(|l| l.starts_with("// ") || l.starts_with('#') || l.starts_with("    #") || l.starts_with('\n'))
    {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.starts_with('#') || l.starts_with('\n')) {
        lines.pop();
    }
    lines.concat()
}

pub fn tier1(input: &str) -> CasesResult<String> {
    let analysis = analyze_text("input.c", input)?;
    let text = generate_tier1_file(&analysis, &["input.c".to_string()], &GeneratorConfig::default())?;
    Ok(strip_framing(&text))
}

pub fn run_cases_test(input: &str, expected: &str) {
    let actual = match tier1(input) {
        Ok(actual) => actual,
        Err(e) => panic!("generation failed: {}", e),
    };
    assert_eq!(actual.trim(), expected.trim(), "\nActual:\n{}", actual);
}

pub fn abstract_cases(base: &str, overrides: &str) -> CasesResult<String> {
    let base_analysis = analyze_text("input.c", base)?;
    let override_analysis = analyze_text("input2.c", overrides)?;
    let text = generate_abstract_file(
        &base_analysis,
        &override_analysis,
        &["input.c".to_string(), "input2.c".to_string()],
        &GeneratorConfig::default(),
    )?;
    Ok(strip_framing(&text))
}

pub fn run_abstract_test(base: &str, overrides: &str, expected: &str) {
    let actual = match abstract_cases(base, overrides) {
        Ok(actual) => actual,
        Err(e) => panic!("generation failed: {}", e),
    };
    assert_eq!(actual.trim(), expected.trim(), "\nActual:\n{}", actual);
}
