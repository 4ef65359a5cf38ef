use crate::ast::Span;
use std::fmt::Write;

/// Diagnostic sink: renders source-position-tagged errors to stderr and
/// remembers that at least one was reported. The latch is what phase
/// boundaries consult to decide whether to keep going.
#[derive(Debug)]
pub struct Diagnostics {
    file: String,
    source: String,
    // byte offset of the start of each line
    line_offsets: Vec<usize>,
    error_reported: bool,
}

impl Diagnostics {
    pub fn new(file: &str, source: &str) -> Self {
        let mut line_offsets = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_offsets.push(i + 1);
            }
        }
        Self {
            file: file.to_string(),
            source: source.to_string(),
            line_offsets,
            error_reported: false,
        }
    }

    pub fn error_reported(&self) -> bool {
        self.error_reported
    }

    /// Report an error at `span`, print it, and set the latch.
    pub fn report(&mut self, span: Span, message: &str) {
        self.error_reported = true;
        eprint!("{}", self.render(span, message));
    }

    // `<file>:<line>:<col-begin>-<col-end>: <message>`, the offending source
    // line, and a caret-underline band.
    fn render(&self, span: Span, message: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}:{}:{}-{}: {}",
            self.file, span.line, span.col_begin, span.col_end, message
        );

        let Some(&start) = self.line_offsets.get(span.line.wrapping_sub(1)) else {
            return out;
        };
        let line = self.source[start..].lines().next().unwrap_or("");
        let _ = writeln!(out, "{:>6} | {}", span.line, line);

        let pad = " ".repeat(span.col_begin.saturating_sub(1));
        let width = span.col_end.saturating_sub(span.col_begin).max(1);
        let mut band = String::from("^");
        band.push_str(&"~".repeat(width - 1));
        let _ = writeln!(out, "         {}{}", pad, band);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_starts_clear() {
        let diag = Diagnostics::new("t.s", "mov r1, r2\n");
        assert!(!diag.error_reported());
    }

    #[test]
    fn test_report_sets_latch() {
        let mut diag = Diagnostics::new("t.s", "mov r1, r2\n");
        diag.report(
            Span {
                line: 1,
                col_begin: 1,
                col_end: 4,
            },
            "bad",
        );
        assert!(diag.error_reported());
    }

    #[test]
    fn test_render_format() {
        let diag = Diagnostics::new("t.s", "mov r1, r2\nadd r9, r9, r1\n");
        let text = diag.render(
            Span {
                line: 2,
                col_begin: 5,
                col_end: 7,
            },
            "register number must fit in 4 bits",
        );
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "t.s:2:5-7: register number must fit in 4 bits"
        );
        assert_eq!(lines.next().unwrap(), "     2 | add r9, r9, r1");
        assert_eq!(lines.next().unwrap(), "             ^~");
    }

    #[test]
    fn test_render_out_of_range_line() {
        let diag = Diagnostics::new("t.s", "mov r1, r2\n");
        let text = diag.render(
            Span {
                line: 99,
                col_begin: 1,
                col_end: 2,
            },
            "oops",
        );
        // No source line to show; the header alone is fine.
        assert_eq!(text.lines().count(), 1);
    }
}
