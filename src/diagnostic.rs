use std::fmt;

use crate::span::Span;

/// An error located in IR source text.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(message: String, span: Span) -> Self {
        Self {
            message,
            span,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    fn report<'a>(
        &'a self,
        filename: &'a str,
        colored: bool,
    ) -> ariadne::Report<'a, (&'a str, std::ops::Range<usize>)> {
        use ariadne::{Color, Config, Label, Report, ReportKind};

        let mut report = Report::build(ReportKind::Error, filename, self.span.start as usize)
            .with_config(Config::default().with_color(colored))
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.start as usize..self.span.end as usize))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        report.finish()
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::Source;

        if let Err(e) = self.report(filename, true).eprint((filename, Source::from(source))) {
            tracing::warn!(error = %e, "failed to render diagnostic");
            eprintln!("error: {}", self.message);
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let span = Span::new(10, 15);
        let d = Diagnostic::error("expected instruction opcode".to_string(), span);
        assert_eq!(d.message, "expected instruction opcode");
        assert_eq!(d.span.start, 10);
        assert_eq!(d.span.end, 15);
        assert!(d.notes.is_empty());
    }

    #[test]
    fn test_notes_accumulate() {
        let d = Diagnostic::error("bad type".to_string(), Span::new(0, 5))
            .with_note("note 1".to_string())
            .with_note("note 2".to_string());
        assert_eq!(d.notes, vec!["note 1", "note 2"]);
    }

    #[test]
    fn test_display() {
        let d = Diagnostic::error("undefined value '%x'".to_string(), Span::dummy());
        assert_eq!(d.to_string(), "error: undefined value '%x'");
    }

    #[test]
    fn test_render_does_not_panic() {
        let source = "define void @f() {\n  bogus\n}\n";
        let d = Diagnostic::error("expected instruction opcode".to_string(), Span::new(21, 26))
            .with_note("while parsing function body".to_string());
        d.render("main.ll", source);
    }
}
