//! Lexer for the `{{ … }}` template expression language.
//!
//! Uses Logos for the token definitions; splicing of `{{ … }}` spans out of
//! the surrounding text happens before lexing.

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token<'src> {
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("|")]
    Pipe,

    /// A context reference segment: `.Self`, `.Source.Name`, …
    #[regex(r"\.[A-Za-z_][A-Za-z0-9_]*", |lex| &lex.slice()[1..])]
    DotIdent(&'src str),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice())]
    Ident(&'src str),

    #[regex(r#""[^"]*""#, |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    Str(String),

    #[regex(r"-?[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
}

/// Tokenize one expression span; lex errors surface as `Err` with the
/// offending source snippet.
pub fn tokenize(src: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    for (result, span) in Token::lexer(src).spanned() {
        match result {
            Ok(tok) => tokens.push(tok),
            Err(_) => return Err(format!("unexpected input at '{}'", &src[span])),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_call() {
        let toks = tokenize(r#"field_value "Subnets" .Self"#).unwrap();
        assert_eq!(
            toks,
            vec![
                Token::Ident("field_value"),
                Token::Str("Subnets".into()),
                Token::DotIdent("Self"),
            ]
        );
    }

    #[test]
    fn test_tokenize_numbers() {
        assert_eq!(
            tokenize("add 1 -2 3.5").unwrap(),
            vec![
                Token::Ident("add"),
                Token::Int(1),
                Token::Int(-2),
                Token::Float(3.5),
            ]
        );
    }

    #[test]
    fn test_tokenize_rejects_garbage() {
        assert!(tokenize("a @ b").is_err());
    }
}
