/// A source location: byte offset range into a single IR text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }

    /// Build a span from a 1-based `line:column` location, as reported by
    /// the LLVM parser. The span covers the token starting at that column
    /// (up to the next whitespace) and is clamped to the source length.
    pub fn from_line_col(source: &str, line: u32, column: u32) -> Self {
        let mut offset = 0usize;
        for (idx, text) in source.split_inclusive('\n').enumerate() {
            if idx + 1 == line as usize {
                let col = (column.max(1) as usize - 1).min(text.len());
                let start = offset + col;
                let rest = text.get(col..).unwrap_or("");
                let token_len = rest
                    .find(char::is_whitespace)
                    .unwrap_or(rest.len())
                    .max(1);
                let end = (start + token_len).min(source.len());
                return Span::new(start as u32, end.max(start) as u32);
            }
            offset += text.len();
        }
        let len = source.len() as u32;
        Span::new(len, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_line_col_first_line() {
        let source = "define void @f() {\n  ret void\n}\n";
        let span = Span::from_line_col(source, 1, 8);
        assert_eq!(span.start, 7);
        assert_eq!(&source[span.start as usize..span.end as usize], "void");
    }

    #[test]
    fn test_from_line_col_later_line() {
        let source = "a\n  bogus op\n";
        let span = Span::from_line_col(source, 2, 3);
        assert_eq!(&source[span.start as usize..span.end as usize], "bogus");
    }

    #[test]
    fn test_from_line_col_out_of_range_clamps_to_end() {
        let source = "x\n";
        let span = Span::from_line_col(source, 9, 1);
        assert_eq!(span.start, 2);
        assert_eq!(span.end, span.start);
    }
}
