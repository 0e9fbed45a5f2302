//! Parser for template expressions.
//!
//! Grammar (function application is whitespace-separated, Go-template
//! style, with `|` piping the left result in as the last argument):
//!
//! ```text
//! pipeline := call ('|' call)*
//! call     := atom+                 // >1 atom: first must be a function name
//! atom     := STRING | INT | FLOAT | 'true' | 'false' | ref | IDENT | '(' pipeline ')'
//! ref      := ('.' IDENT)+
//! ```

use weft_construct::Value;

use super::lexer::{tokenize, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Value),
    /// A context reference chain, e.g. `.Self.Name` → `["Self", "Name"]`.
    Ref(Vec<String>),
    Call { name: String, args: Vec<Expr> },
}

pub fn parse(src: &str) -> Result<Expr, String> {
    let tokens = tokenize(src)?;
    let mut p = Parser { tokens, pos: 0 };
    let expr = p.pipeline()?;
    if p.pos != p.tokens.len() {
        return Err(format!("unexpected trailing tokens in '{src}'"));
    }
    Ok(expr)
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token<'src>> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn pipeline(&mut self) -> Result<Expr, String> {
        let mut expr = self.call()?;
        while matches!(self.peek(), Some(Token::Pipe)) {
            self.next();
            let stage = self.call()?;
            match stage {
                Expr::Call { name, mut args } => {
                    args.push(expr);
                    expr = Expr::Call { name, args };
                }
                _ => return Err("right side of '|' must be a function".to_string()),
            }
        }
        Ok(expr)
    }

    fn call(&mut self) -> Result<Expr, String> {
        let mut atoms = Vec::new();
        loop {
            match self.peek() {
                None | Some(Token::Pipe) | Some(Token::RParen) => break,
                _ => atoms.push(self.atom()?),
            }
        }
        match atoms.len() {
            0 => Err("empty expression".to_string()),
            1 => {
                // a lone identifier is a zero-argument function call
                Ok(match atoms.into_iter().next().unwrap() {
                    Atom::Ident(name) => Expr::Call {
                        name,
                        args: Vec::new(),
                    },
                    Atom::Expr(e) => e,
                })
            }
            _ => {
                let mut iter = atoms.into_iter();
                let head = match iter.next().unwrap() {
                    Atom::Ident(name) => name,
                    Atom::Expr(_) => {
                        return Err("function application must start with a name".to_string())
                    }
                };
                let mut args = Vec::new();
                for atom in iter {
                    match atom {
                        Atom::Expr(e) => args.push(e),
                        Atom::Ident(other) => {
                            return Err(format!("unexpected identifier '{other}' in arguments"))
                        }
                    }
                }
                Ok(Expr::Call { name: head, args })
            }
        }
    }

    fn atom(&mut self) -> Result<Atom, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Atom::Expr(Expr::Lit(Value::Str(s)))),
            Some(Token::Int(i)) => Ok(Atom::Expr(Expr::Lit(Value::Int(i)))),
            Some(Token::Float(f)) => Ok(Atom::Expr(Expr::Lit(Value::Float(f)))),
            Some(Token::Ident("true")) => Ok(Atom::Expr(Expr::Lit(Value::Bool(true)))),
            Some(Token::Ident("false")) => Ok(Atom::Expr(Expr::Lit(Value::Bool(false)))),
            Some(Token::Ident(name)) => Ok(Atom::Ident(name.to_string())),
            Some(Token::DotIdent(first)) => {
                let mut parts = vec![first.to_string()];
                while let Some(Token::DotIdent(_)) = self.peek() {
                    if let Some(Token::DotIdent(next)) = self.next() {
                        parts.push(next.to_string());
                    }
                }
                Ok(Atom::Expr(Expr::Ref(parts)))
            }
            Some(Token::LParen) => {
                let inner = self.pipeline()?;
                match self.next() {
                    Some(Token::RParen) => Ok(Atom::Expr(inner)),
                    _ => Err("expected ')'".to_string()),
                }
            }
            Some(Token::RParen) => Err("unexpected ')'".to_string()),
            Some(Token::Pipe) => Err("unexpected '|'".to_string()),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

enum Atom {
    Expr(Expr),
    Ident(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_call() {
        let e = parse(r#"field_value "Subnets" .Self"#).unwrap();
        assert_eq!(
            e,
            Expr::Call {
                name: "field_value".into(),
                args: vec![
                    Expr::Lit(Value::Str("Subnets".into())),
                    Expr::Ref(vec!["Self".into()]),
                ],
            }
        );
    }

    #[test]
    fn test_parse_nested_call() {
        let e = parse(r#"field_value (field_value "Ref" .Self) .Target"#).unwrap();
        match e {
            Expr::Call { name, args } => {
                assert_eq!(name, "field_value");
                assert!(matches!(args[0], Expr::Call { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_pipe_appends_arg() {
        let e = parse(r#"field_value "X" .Self | to_json"#).unwrap();
        match e {
            Expr::Call { name, args } => {
                assert_eq!(name, "to_json");
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_ref_chain() {
        let e = parse(".Source.Name").unwrap();
        assert_eq!(e, Expr::Ref(vec!["Source".into(), "Name".into()]));
    }

    #[test]
    fn test_parse_rejects_bad_head() {
        assert!(parse(r#""lit" "lit2""#).is_err());
        assert!(parse("").is_err());
    }
}
