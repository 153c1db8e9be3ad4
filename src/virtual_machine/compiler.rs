//! Source-to-program pipeline and error diagnostics.
//!
//! Runs the lexer, the builder and the resolver in order. Any failure stops
//! the pipeline and comes back as a [`VMError::Located`] pointing at the
//! offending word; [`render_diagnostic`] turns it into a compiler-style
//! message.

use crate::info;
use crate::virtual_machine::builder::build;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::lexer::tokenize;
use crate::virtual_machine::program::Program;
use crate::virtual_machine::resolver::resolve;
use crate::virtual_machine::vm::{ProgramState, VmConfig};
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Compiles source text into an executable [`Program`].
pub fn compile_source(source: &str) -> Result<Program, VMError> {
    let words = tokenize(source)?;
    let unlinked = build(&words)?;
    let program = resolve(unlinked)?;
    info!(
        "Compiled {} word(s) into {} instruction(s)",
        words.len(),
        program.len()
    );
    Ok(program)
}

/// Reads a source file.
pub fn read_source<P: AsRef<Path>>(path: P) -> Result<String, VMError> {
    let path_ref = path.as_ref();
    fs::read_to_string(path_ref).map_err(|e| VMError::IoError {
        path: path_ref.display().to_string(),
        source: e.to_string(),
    })
}

/// Convenience: compile directly from a file path.
pub fn compile_file<P: AsRef<Path>>(path: P) -> Result<Program, VMError> {
    compile_source(&read_source(path)?)
}

/// Compiles and runs `source`, writing program output to `out`.
///
/// Returns the exit code of the halted program.
pub fn run_source<W: Write>(source: &str, config: VmConfig, out: &mut W) -> Result<i32, VMError> {
    let program = compile_source(source)?;
    ProgramState::new(program, config).run(out)
}

/// Formats a compiler-style diagnostic for `err`.
///
/// Located errors show the offending source line with a caret under the
/// column; other errors render as a single `error:` line.
pub fn render_diagnostic(file: &str, source: &str, err: &VMError) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {}", err.root());

    let Some((line, column)) = err.position() else {
        return diag;
    };
    let _ = writeln!(diag, " --> {file}:{line}:{column}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let gutter = " ".repeat(line.to_string().len().max(4));
        let underline = line_text
            .chars()
            .take(column.saturating_sub(1))
            .map(|c| if c == '\t' { '\t' } else { ' ' })
            .collect::<String>();
        let _ = writeln!(diag, "{gutter} |");
        let _ = writeln!(diag, "{line:>4} | {line_text}");
        let _ = writeln!(diag, "{gutter} | {underline}^");
    }

    diag
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn compile_empty_source() {
        let program = compile_source("").unwrap();
        assert!(program.is_empty());
    }

    #[test]
    fn compile_comments_and_blank_lines() {
        let program = compile_source("# header\n\n  # another #>\n1 print\n").unwrap();
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn compile_errors_are_located() {
        let err = compile_source("1 2 +\n  foo print").unwrap_err();
        assert_eq!(err.position(), Some((2, 3)));
        assert_eq!(err.kind_name(), "SyntaxError");
    }

    #[test]
    fn compile_file_reads_source() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("hello.lan");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "\"hello\" println").unwrap();

        let program = compile_file(&path).unwrap();
        assert_eq!(program.len(), 2);
        assert_eq!(program.strings(), &["hello".to_string()]);
    }

    #[test]
    fn compile_file_missing() {
        let dir = tempdir().expect("failed to create temp dir");
        let err = compile_file(dir.path().join("missing.lan")).unwrap_err();
        assert!(matches!(err, VMError::IoError { .. }));
    }

    #[test]
    fn run_source_writes_output() {
        let mut out = Vec::new();
        let code = run_source("2 3 + println", VmConfig::default(), &mut out).unwrap();
        assert_eq!(code, 0);
        assert_eq!(String::from_utf8(out).unwrap(), "5\n");
    }

    #[test]
    fn diagnostic_points_at_column() {
        let source = "1 print\n2 bogus";
        let err = compile_source(source).unwrap_err();
        let diag = render_diagnostic("demo.lan", source, &err);
        assert_eq!(
            diag,
            "error: syntax error: undeclared identifier `bogus`\n \
             --> demo.lan:2:3\n     |\n   2 | 2 bogus\n     |   ^\n"
        );
    }

    #[test]
    fn diagnostic_without_position() {
        let diag = render_diagnostic("demo.lan", "", &VMError::DivisionByZero);
        assert_eq!(diag, "error: division by zero\n");
    }

    #[test]
    fn runtime_diagnostic_uses_instruction_position() {
        let source = "1 0 /";
        let mut out = Vec::new();
        let err = run_source(source, VmConfig::default(), &mut out).unwrap_err();
        let diag = render_diagnostic("div.lan", source, &err);
        assert!(diag.starts_with("error: division by zero\n --> div.lan:1:5\n"));
    }
}
