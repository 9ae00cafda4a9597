//! Tokenizer for the expression language.

use crate::error::CmlError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, CmlError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '=' | '!' | '<' | '>' | '&' | '|' => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('=', Some('=')) => (Token::EqEq, 2),
                    // A lone `=` is accepted as equality.
                    ('=', _) => (Token::EqEq, 1),
                    ('!', Some('=')) => (Token::NotEq, 2),
                    ('!', _) => (Token::Bang, 1),
                    ('<', Some('=')) => (Token::Le, 2),
                    ('<', Some('>')) => (Token::NotEq, 2),
                    ('<', _) => (Token::Lt, 1),
                    ('>', Some('=')) => (Token::Ge, 2),
                    ('>', _) => (Token::Gt, 1),
                    ('&', Some('&')) => (Token::AndAnd, 2),
                    ('|', Some('|')) => (Token::OrOr, 2),
                    _ => {
                        return Err(CmlError::Expression(format!(
                            "unexpected '{c}' at position {i} in '{source}'"
                        )))
                    }
                };
                tokens.push(token);
                i += width;
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(CmlError::Expression(format!(
                                "unterminated string literal in '{source}'"
                            )))
                        }
                        Some('\\') => {
                            if let Some(escaped) = chars.get(i + 1) {
                                text.push(*escaped);
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while chars.get(i).is_some_and(|d| d.is_ascii_digit()) {
                    i += 1;
                }
                // A fraction only when a digit follows the dot, so `items.0.name` stays a path.
                let is_float = chars.get(i) == Some(&'.')
                    && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())
                    && tokens.last() != Some(&Token::Dot);
                if is_float {
                    i += 1;
                    while chars.get(i).is_some_and(|d| d.is_ascii_digit()) {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let token = if is_float {
                    Token::Float(text.parse().map_err(|_| bad_number(&text))?)
                } else {
                    match text.parse::<i64>() {
                        Ok(n) => Token::Int(n),
                        Err(_) => Token::Float(text.parse().map_err(|_| bad_number(&text))?),
                    }
                };
                tokens.push(token);
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|d| d.is_alphanumeric() || *d == '_' || *d == '$')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(CmlError::Expression(format!(
                    "unexpected '{other}' at position {i} in '{source}'"
                )))
            }
        }
    }
    Ok(tokens)
}

fn bad_number(text: &str) -> CmlError {
    CmlError::Expression(format!("invalid number '{text}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_mixed() {
        let tokens = tokenize("item.items.0.name == 'a\\'b' && x >= 1.5").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("item".into()),
                Token::Dot,
                Token::Ident("items".into()),
                Token::Dot,
                Token::Int(0),
                Token::Dot,
                Token::Ident("name".into()),
                Token::EqEq,
                Token::Str("a'b".into()),
                Token::AndAnd,
                Token::Ident("x".into()),
                Token::Ge,
                Token::Float(1.5),
            ]
        );
    }

    #[test]
    fn test_tokenize_errors() {
        assert!(tokenize("'open").is_err());
        assert!(tokenize("a # b").is_err());
        assert!(tokenize("a & b").is_err());
    }
}
