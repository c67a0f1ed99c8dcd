pub mod ansi;
pub mod json;
pub mod source_map;

pub use source_map::SourceMap;

use crate::compiler::CompileError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::span::Span;
use crate::vm::RuntimeError;

/// Which stage rejected the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lex,
    Parse,
    Compile,
    Runtime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// A renderable error report with a stable code.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub phase: Phase,
    pub message: String,
    pub label: Option<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(phase: Phase, code: &'static str, message: impl Into<String>) -> Self {
        Diagnostic {
            code: Some(code),
            phase,
            message: message.into(),
            label: None,
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.label = Some(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach the program text so renderers can show the offending line.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let span = Span { start: e.position, end: e.position + e.snippet.len().max(1) };
        let d = Diagnostic::error(Phase::Lex, "TAMA-L001", format!("unexpected '{}'", e.snippet))
            .with_span(span, "here");
        if e.suggestion.is_empty() { d } else { d.with_suggestion(e.suggestion.clone()) }
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        let label = if e.code == "TAMA-P002" { "opened here" } else { "here" };
        Diagnostic::error(Phase::Parse, e.code, &e.message).with_span(e.span, label)
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        match e {
            CompileError::Syntax { form, .. } => Diagnostic::error(Phase::Compile, "TAMA-C001", e.to_string())
                .with_note(format!("malformed `{}` form", form)),
            CompileError::Internal(_) => Diagnostic::error(Phase::Compile, "TAMA-C002", e.to_string()),
            CompileError::TooManyRegisters { .. } => Diagnostic::error(Phase::Compile, "TAMA-C003", e.to_string())
                .with_suggestion("split the function body into smaller procedures"),
        }
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        let d = |code| Diagnostic::error(Phase::Runtime, code, e.to_string());
        match e {
            RuntimeError::Procedure(_) => d("TAMA-R001"),
            RuntimeError::TooFewArguments { .. }
            | RuntimeError::TooManyArguments { .. }
            | RuntimeError::ArityMismatch { .. } => d("TAMA-R002"),
            RuntimeError::UnboundVariable { name } => {
                d("TAMA-R003").with_suggestion(format!("bind it first with (define {} ...)", name))
            }
            RuntimeError::NotCallable { .. } => d("TAMA-R004"),
            RuntimeError::StackOverflow { .. } => d("TAMA-R005")
                .with_note("every active call keeps its registers on the value stack")
                .with_suggestion("raise the limit with --stack-size"),
            RuntimeError::CallDepthExceeded { .. } => {
                d("TAMA-R006").with_suggestion("raise the limit with --max-depth")
            }
            RuntimeError::UnknownOpcode { .. } | RuntimeError::Internal(_) => d("TAMA-R007"),
        }
    }
}

impl From<&crate::Error> for Diagnostic {
    fn from(e: &crate::Error) -> Self {
        match e {
            crate::Error::Lex(e) => e.into(),
            crate::Error::Parse(e) => e.into(),
            crate::Error::Compile(e) => e.into(),
            crate::Error::Runtime(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn diag(src: &str) -> Diagnostic {
        let err = crate::state::Interpreter::default().exec_string(src).unwrap_err();
        Diagnostic::from(&err)
    }

    #[test]
    fn builder() {
        let d = Diagnostic::error(Phase::Runtime, "TAMA-R001", "boom")
            .with_span(Span { start: 5, end: 8 }, "here")
            .with_note("first")
            .with_suggestion("do better");
        assert_eq!(d.code, Some("TAMA-R001"));
        assert_eq!(d.label, Some(Label { span: Span { start: 5, end: 8 }, message: "here".into() }));
        assert_eq!(d.notes, vec!["first"]);
        assert_eq!(d.suggestion.as_deref(), Some("do better"));
        assert!(d.source.is_none());
    }

    #[test]
    fn lex_error_spans_the_snippet() {
        let d = diag("(a {b})");
        assert_eq!(d.phase, Phase::Lex);
        assert_eq!(d.code, Some("TAMA-L001"));
        assert_eq!(d.label.unwrap().span, Span { start: 3, end: 4 });
        assert!(d.suggestion.is_some());
    }

    #[test]
    fn parse_error_keeps_its_code() {
        let d = diag("(a (b)");
        assert_eq!(d.phase, Phase::Parse);
        assert_eq!(d.code, Some("TAMA-P002"));
        assert_eq!(d.label.unwrap().message, "opened here");
    }

    #[test]
    fn compile_and_runtime_codes() {
        assert_eq!(diag("(lambda (a))").code, Some("TAMA-C001"));
        assert_eq!(diag("(car 1)").code, Some("TAMA-R001"));
        assert_eq!(diag("((lambda (a) a))").code, Some("TAMA-R002"));
        let d = diag("nope");
        assert_eq!(d.code, Some("TAMA-R003"));
        assert!(d.suggestion.unwrap().contains("(define nope"));
        assert_eq!(diag("(1)").code, Some("TAMA-C001"));
        assert_eq!(diag("(define x 1) (x)").code, Some("TAMA-R004"));
    }
}
