//! Textual IR loading.

use std::path::Path;

use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;

use crate::diagnostic::Diagnostic;
use crate::span::Span;

use super::LoadError;

/// Read a textual IR module from `path` and parse it into `context`.
pub fn load_module<'ctx>(path: &Path, context: &'ctx Context) -> Result<Module<'ctx>, LoadError> {
    let source = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_module(&source, &path.display().to_string(), context)
}

/// Parse IR text held in memory. `name` is used as the module identifier
/// and as the file name in diagnostics.
pub fn parse_module<'ctx>(
    source: &str,
    name: &str,
    context: &'ctx Context,
) -> Result<Module<'ctx>, LoadError> {
    let buffer = MemoryBuffer::create_from_memory_range_copy(source.as_bytes(), name);
    let module = context
        .create_module_from_ir(buffer)
        .map_err(|e| parse_error(name, source, &e.to_string()))?;

    if let Err(e) = module.verify() {
        let message = e.to_string();
        let diagnostic = Diagnostic::error(
            first_line(&message).to_string(),
            function_span(source, &message),
        )
        .with_note("module failed verification".to_string());
        return Err(LoadError::Parse {
            name: name.to_string(),
            source_text: source.to_string(),
            diagnostic,
        });
    }

    tracing::debug!(module = name, functions = module.get_functions().count(), "parsed IR module");
    Ok(module)
}

fn parse_error(name: &str, source: &str, raw: &str) -> LoadError {
    let (location, message) = split_location(raw);
    let span = match location {
        Some((line, column)) => Span::from_line_col(source, line, column),
        None => Span::dummy(),
    };
    LoadError::Parse {
        name: name.to_string(),
        source_text: source.to_string(),
        diagnostic: Diagnostic::error(message, span),
    }
}

/// Split an LLVM parser message of the form
/// `<buffer>:<line>:<col>: error: <message>` into its location and message.
/// Messages without a location are returned whole.
fn split_location(raw: &str) -> (Option<(u32, u32)>, String) {
    let head = first_line(raw);
    let Some((prefix, message)) = head.split_once(": error: ") else {
        return (None, head.trim().to_string());
    };

    let mut parts = prefix.rsplitn(3, ':');
    let column = parts.next().and_then(|c| c.trim().parse::<u32>().ok());
    let line = parts.next().and_then(|l| l.trim().parse::<u32>().ok());
    match (line, column) {
        (Some(line), Some(column)) => (Some((line, column)), message.trim().to_string()),
        _ => (None, message.trim().to_string()),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().find(|l| !l.trim().is_empty()).unwrap_or(text)
}

/// Verifier messages name the offending function (`@name`) but carry no
/// position; point at its definition when it can be found.
fn function_span(source: &str, message: &str) -> Span {
    let Some(at) = message.find('@') else {
        return Span::dummy();
    };
    let name: String = message[at..]
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '@' | '_' | '.' | '$'))
        .collect();
    if name.len() < 2 {
        return Span::dummy();
    }
    match source.find(&format!("{}(", name)) {
        Some(start) => Span::new(start as u32, (start + name.len()) as u32),
        None => Span::dummy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "define i32 @answer() {\nentry:\n  ret i32 42\n}\n";

    #[test]
    fn test_parse_valid_module() {
        let context = Context::create();
        let module = parse_module(VALID, "answer.ll", &context).unwrap();
        assert!(module.get_function("answer").is_some());
    }

    #[test]
    fn test_parse_reports_location() {
        let context = Context::create();
        let source = "define void @f() {\nentry:\n  bogus_opcode\n}\n";
        let err = parse_module(source, "broken.ll", &context).unwrap_err();
        let diagnostic = err.diagnostic().expect("parse errors carry a diagnostic");
        assert!(!diagnostic.message.is_empty());
        let line_three = source.find("  bogus_opcode").unwrap() as u32;
        assert!(diagnostic.span.start >= line_three);
        assert!(diagnostic.span.start < line_three + "  bogus_opcode".len() as u32);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let context = Context::create();
        let err = load_module(Path::new("does/not/exist.ll"), &context).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert!(err.diagnostic().is_none());
    }

    #[test]
    fn test_split_location() {
        let (loc, msg) = split_location("main.ll:3:5: error: expected instruction opcode\n  x\n  ^\n");
        assert_eq!(loc, Some((3, 5)));
        assert_eq!(msg, "expected instruction opcode");
    }

    #[test]
    fn test_split_location_windows_path() {
        let (loc, msg) = split_location("C:\\ir\\main.ll:12:1: error: expected top-level entity");
        assert_eq!(loc, Some((12, 1)));
        assert_eq!(msg, "expected top-level entity");
    }

    #[test]
    fn test_split_location_without_position() {
        let (loc, msg) = split_location("invalid bitcode signature");
        assert_eq!(loc, None);
        assert_eq!(msg, "invalid bitcode signature");
    }

    #[test]
    fn test_function_span() {
        let source = "define void @g() {\n  ret void\n}\n";
        let span = function_span(source, "Function return type does not match operand\n  @g");
        assert_eq!(&source[span.start as usize..span.end as usize], "@g");
    }
}
