use std::fmt::Write;

use super::{Diagnostic, SourceMap};

const RED: &str = "1;31";
const BOLD: &str = "1";
const CYAN: &str = "36";
const DIM: &str = "2";

/// Terminal renderer in the familiar `error[CODE]: ... --> line:col` layout.
pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, style: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{style}m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();
        let head = match d.code {
            Some(code) => format!("error[{code}]"),
            None => "error".to_string(),
        };
        let _ = writeln!(out, "{}: {}", self.paint(RED, &head), self.paint(BOLD, &d.message));

        if let (Some(label), Some(source)) = (&d.label, &d.source) {
            let map = SourceMap::new(source);
            let (line, col) = map.line_col(label.span.start);
            let gutter = line.to_string().len();
            let pad = " ".repeat(gutter);
            let pipe = self.paint(CYAN, "|");

            let _ = writeln!(out, "{pad}{} {line}:{col}", self.paint(CYAN, "-->"));
            let _ = writeln!(out, "{pad} {pipe}");
            let _ = writeln!(out, "{} {pipe} {}", self.paint(CYAN, &line.to_string()), map.line(line));

            // carets stop at the end of the first line of the span
            let text = map.line(line);
            let width = text.chars().count().saturating_sub(col - 1);
            let len = label.span.end.saturating_sub(label.span.start).clamp(1, width.max(1));
            let carets = self.paint(RED, &"^".repeat(len));
            let indent = " ".repeat(col - 1);
            if label.message.is_empty() {
                let _ = writeln!(out, "{pad} {pipe} {indent}{carets}");
            } else {
                let _ = writeln!(out, "{pad} {pipe} {indent}{carets} {}", self.paint(RED, &label.message));
            }
        }

        for note in &d.notes {
            let _ = writeln!(out, "{pad}{} note: {note}", self.paint(DIM, "="), pad = "  ");
        }
        if let Some(suggestion) = &d.suggestion {
            let _ = writeln!(out, "  {} help: {suggestion}", self.paint(DIM, "="));
        }
        out
    }
}
