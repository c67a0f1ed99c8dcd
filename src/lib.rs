//! tama: an embeddable Scheme interpreter.
//!
//! Source text is lexed and read into s-expressions, compiled into register
//! bytecode and run by a stack-allocated VM. [`Interpreter`] is the embedding
//! surface.

pub(crate) mod builtins;
pub mod compiler;
pub mod config;
pub mod diagnostic;
pub mod lexer;
pub mod object;
pub mod parser;
pub(crate) mod recursion;
pub mod span;
pub mod state;
pub mod vm;

pub use compiler::CompileError;
pub use config::Config;
pub use lexer::LexError;
pub use object::{Closure, Object, ObjectType, ProcedureError, Symbol};
pub use parser::ParseError;
pub use state::Interpreter;
pub use vm::RuntimeError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Read `source` into its top-level data without compiling it.
pub fn read(source: &str) -> Result<Vec<Object>, Error> {
    let tokens = lexer::lex(source)?;
    let forms = parser::parse(tokens.into_iter().map(|(t, r)| (t, span::Span::from(r))).collect())?;
    Ok(forms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn read_returns_every_form() {
        let forms = read("(define a 1) 'a \"s\"").unwrap();
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[1].to_string(), "(quote a)");
    }

    #[test]
    fn read_reports_the_failing_layer() {
        assert!(matches!(read("(a {"), Err(Error::Lex(_))));
        assert!(matches!(read("(a"), Err(Error::Parse(_))));
    }
}
