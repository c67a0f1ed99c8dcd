use serde::Serialize;

use super::{Diagnostic, Phase, SourceMap};

#[derive(Serialize)]
struct JsonLabel<'a> {
    start: usize,
    end: usize,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    col: Option<usize>,
}

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    severity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    phase: Phase,
    message: &'a str,
    labels: Vec<JsonLabel<'a>>,
    notes: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

/// One-line JSON object, suitable for tools reading stderr.
pub fn render(d: &Diagnostic) -> String {
    let map = d.source.as_deref().map(SourceMap::new);
    let labels = d
        .label
        .iter()
        .map(|l| {
            let pos = map.as_ref().map(|m| m.line_col(l.span.start));
            JsonLabel {
                start: l.span.start,
                end: l.span.end,
                message: &l.message,
                line: pos.map(|(line, _)| line),
                col: pos.map(|(_, col)| col),
            }
        })
        .collect();
    let out = JsonDiagnostic {
        severity: "error",
        code: d.code,
        phase: d.phase,
        message: &d.message,
        labels,
        notes: &d.notes,
        suggestion: d.suggestion.as_deref(),
    };
    serde_json::to_string(&out)
        .unwrap_or_else(|_| r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn parse_json(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn basic_fields() {
        let v = parse_json(&render(&Diagnostic::error(Phase::Runtime, "TAMA-R003", "unbound variable: x")));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["code"], "TAMA-R003");
        assert_eq!(v["phase"], "runtime");
        assert_eq!(v["message"], "unbound variable: x");
        assert!(v["labels"].as_array().unwrap().is_empty());
        assert!(v.get("suggestion").is_none());
    }

    #[test]
    fn label_gets_line_and_column_from_source() {
        let d = Diagnostic::error(Phase::Parse, "TAMA-P002", "unclosed '('")
            .with_span(Span { start: 4, end: 5 }, "opened here")
            .with_source("1\n2\n(a");
        let v = parse_json(&render(&d));
        let label = &v["labels"][0];
        assert_eq!(label["start"], 4);
        assert_eq!(label["line"], 3);
        assert_eq!(label["col"], 1);
        assert_eq!(label["message"], "opened here");
    }

    #[test]
    fn label_without_source_has_no_position() {
        let d = Diagnostic::error(Phase::Lex, "TAMA-L001", "bad").with_span(Span { start: 5, end: 8 }, "here");
        let v = parse_json(&render(&d));
        assert!(v["labels"][0].get("line").is_none());
    }

    #[test]
    fn notes_and_suggestion() {
        let d = Diagnostic::error(Phase::Compile, "TAMA-C001", "bad")
            .with_note("one")
            .with_note("two")
            .with_suggestion("fix it");
        let v = parse_json(&render(&d));
        assert_eq!(v["notes"].as_array().unwrap().len(), 2);
        assert_eq!(v["suggestion"], "fix it");
    }
}
