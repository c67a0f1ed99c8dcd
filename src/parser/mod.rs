use crate::lexer::Token;
use crate::object::Object;
use crate::recursion::ensure_sufficient_stack;
use crate::span::Span;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

impl ParseError {
    /// More input could still complete the program.
    pub fn is_incomplete(&self) -> bool {
        matches!(self.code, "TAMA-P002" | "TAMA-P004")
    }
}

type Result<T> = std::result::Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, s)) => *s,
            // at end of input, point just past the last token
            None => self.tokens.last().map(|(_, s)| Span { start: s.end, end: s.end }).unwrap_or(Span::UNKNOWN),
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError { code, position: self.pos, span: self.peek_span(), message }
    }

    fn error_at(&self, code: &'static str, position: usize, span: Span, message: String) -> ParseError {
        ParseError { code, position, span, message }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn parse_program(&mut self) -> Result<Vec<Object>> {
        let mut forms = Vec::new();
        while !self.at_end() {
            forms.push(self.datum()?);
        }
        Ok(forms)
    }

    fn datum(&mut self) -> Result<Object> {
        ensure_sufficient_stack(|| {
            let start = self.pos;
            let span = self.peek_span();
            match self.advance() {
                Some(Token::Number(n)) => Ok(Object::Number(n)),
                Some(Token::Text(s)) => Ok(Object::string(&s)),
                Some(Token::Ident(name)) => Ok(Object::symbol(&name)),
                Some(Token::True) => Ok(Object::Boolean(true)),
                Some(Token::False) => Ok(Object::Boolean(false)),
                Some(Token::Quote) => {
                    if self.at_end() {
                        return Err(self.error("TAMA-P004", "expected a datum after quote, got EOF".into()));
                    }
                    let quoted = self.datum()?;
                    Ok(Object::list([Object::symbol("quote"), quoted]))
                }
                Some(Token::LParen) => self.list(start, span),
                Some(Token::RParen) => Err(self.error_at("TAMA-P001", start, span, "unexpected ')'".into())),
                Some(Token::Dot) => Err(self.error_at("TAMA-P003", start, span, "'.' outside of a list".into())),
                None => Err(self.error("TAMA-P004", "unexpected end of input".into())),
            }
        })
    }

    /// Elements up to the matching `)`; the opening paren is already consumed.
    fn list(&mut self, open_pos: usize, open: Span) -> Result<Object> {
        let unclosed = |p: &Parser| p.error_at("TAMA-P002", open_pos, open, "unclosed '('".into());
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => return Err(unclosed(self)),
                Some(Token::RParen) => {
                    self.advance();
                    return Ok(Object::list(items));
                }
                Some(Token::Dot) => {
                    if items.is_empty() {
                        return Err(self.error("TAMA-P003", "'.' needs a datum before it".into()));
                    }
                    self.advance();
                    let tail = match self.peek() {
                        None => return Err(unclosed(self)),
                        Some(Token::RParen | Token::Dot) => {
                            return Err(self.error("TAMA-P003", "expected a datum after '.'".into()));
                        }
                        Some(_) => self.datum()?,
                    };
                    return match self.peek() {
                        Some(Token::RParen) => {
                            self.advance();
                            Ok(Object::list_with_tail(items, tail))
                        }
                        None => Err(unclosed(self)),
                        Some(_) => Err(self.error("TAMA-P003", "expected ')' after the datum following '.'".into())),
                    };
                }
                Some(_) => items.push(self.datum()?),
            }
        }
    }
}

pub fn parse(tokens: Vec<(Token, Span)>) -> Result<Vec<Object>> {
    Parser::new(tokens).parse_program()
}
