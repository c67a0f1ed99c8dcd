use logos::Logos;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r";[^\n]*", allow_greedy = true))]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("'")]
    Quote,
    #[token(".")]
    Dot,

    #[token("#t")]
    #[token("#true")]
    True,
    #[token("#f")]
    #[token("#false")]
    False,

    // Literals
    #[regex(r"[+-]?[0-9]+(\.[0-9]+)?", |lex| lex.slice().parse::<f64>().ok(), priority = 5)]
    Number(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Text(String),

    // Letters, digits and the extended set; never starts with a digit
    #[regex(r"[a-zA-Z!$%&*+\-./:<=>?@^_~][a-zA-Z0-9!$%&*+\-./:<=>?@^_~]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),
}

/// Strip the quotes and resolve `\n \t \\ \"`. Any other escape is a lex error.
fn unescape(quoted: &str) -> Option<String> {
    let body = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            _ => return None,
        }
    }
    Some(out)
}

/// Lex source code into a stream of tokens with byte ranges.
pub fn lex(source: &str) -> Result<Vec<(Token, std::ops::Range<usize>)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens: Vec<(Token, std::ops::Range<usize>)> = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => {
                let span = lexer.span();
                // `1e3`, `1abc`, `1+2`: a number must end at a delimiter
                if let Some((Token::Number(_), prev)) = tokens.last() {
                    if prev.end == span.start && matches!(token, Token::Number(_) | Token::Ident(_)) {
                        let bad = &source[prev.start..span.end];
                        return Err(LexError {
                            position: prev.start,
                            snippet: bad.to_string(),
                            suggestion: suggest_fix(bad),
                        });
                    }
                }
                tokens.push((token, span));
            }
            Err(()) => {
                let span = lexer.span();
                return Err(LexError {
                    position: span.start,
                    snippet: source[span.clone()].to_string(),
                    suggestion: suggest_fix(&source[span]),
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(bad_token: &str) -> String {
    if bad_token.trim_start_matches(['+', '-']).starts_with(|c: char| c.is_ascii_digit()) {
        return "Separate the number from what follows; exponents like 1e3 are not supported".to_string();
    }
    match bad_token.chars().next() {
        Some('"') if bad_token.len() > 1 && bad_token.ends_with('"') => {
            "Unknown escape in string; supported escapes are \\n \\t \\\\ \\\"".to_string()
        }
        Some('"') => "Unterminated string literal; close it with '\"'".to_string(),
        Some('#') => "Only #t, #f, #true and #false may follow '#'".to_string(),
        Some('[' | '{') => "Use parentheses for lists: '('".to_string(),
        Some('`' | ',') => "Quasiquote is not supported; use quote: '".to_string(),
        _ => format!("Unexpected character(s): '{}'", bad_token),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Lex error at position {position}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(source: &str) -> Vec<Token> {
        lex(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn lex_simple_call() {
        assert_eq!(
            tokens("(+ 1 2.5)"),
            vec![
                Token::LParen,
                Token::Ident("+".into()),
                Token::Number(1.0),
                Token::Number(2.5),
                Token::RParen
            ]
        );
    }

    #[test]
    fn signed_numbers_versus_identifiers() {
        assert_eq!(tokens("-5 +3 - -x ..."), vec![
            Token::Number(-5.0),
            Token::Number(3.0),
            Token::Ident("-".into()),
            Token::Ident("-x".into()),
            Token::Ident("...".into()),
        ]);
    }

    #[test]
    fn extended_identifier_characters() {
        assert_eq!(
            tokens("set! null? <= a->b *x* %y"),
            ["set!", "null?", "<=", "a->b", "*x*", "%y"].map(|s| Token::Ident(s.into())).to_vec()
        );
    }

    #[test]
    fn booleans_quote_and_dot() {
        assert_eq!(
            tokens("#t #false 'a (a . b)"),
            vec![
                Token::True,
                Token::False,
                Token::Quote,
                Token::Ident("a".into()),
                Token::LParen,
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("b".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn lex_string_literal() {
        assert_eq!(tokens(r#""hello world""#), vec![Token::Text("hello world".into())]);
        assert_eq!(tokens(r#""a\n\"b\"""#), vec![Token::Text("a\n\"b\"".into())]);
    }

    #[test]
    fn lex_comment_ignored() {
        assert_eq!(tokens("; note\n(a) ; trailing"), vec![
            Token::LParen,
            Token::Ident("a".into()),
            Token::RParen
        ]);
    }

    #[test]
    fn errors_carry_position_and_suggestion() {
        let err = lex("(a [b])").unwrap_err();
        assert_eq!(err.position, 3);
        assert_eq!(err.snippet, "[");
        assert!(err.suggestion.contains("parentheses"));

        let err = lex("#x").unwrap_err();
        assert!(err.suggestion.contains("#t"));
    }

    #[test]
    fn number_glued_to_an_identifier_is_an_error() {
        for (src, position, snippet) in [("1e3", 0, "1e3"), ("(f 1abc)", 3, "1abc"), ("1+2", 0, "1+2")] {
            let err = lex(src).unwrap_err();
            assert_eq!((err.position, err.snippet.as_str()), (position, snippet), "{src}");
            assert!(err.suggestion.contains("Separate the number"), "{src}");
        }
    }

    #[test]
    fn numbers_next_to_delimiters_are_fine() {
        assert_eq!(tokens("(1)'2"), vec![Token::LParen, Token::Number(1.0), Token::RParen, Token::Quote, Token::Number(2.0)]);
        assert_eq!(tokens("a1 x-2"), vec![Token::Ident("a1".into()), Token::Ident("x-2".into())]);
    }
}
