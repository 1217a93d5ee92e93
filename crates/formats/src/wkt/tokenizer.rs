use crate::wkt::WktError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TokenKind {
    LeftParenthesis,
    RightParenthesis,
    Comma,
    Number,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    /// Byte offset of the token in the source text.
    pub offset: usize,
}

impl Token {
    fn new(kind: TokenKind, value: impl Into<String>, offset: usize) -> Self {
        Self {
            kind,
            value: value.into(),
            offset,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    /// Case-insensitive keyword comparison for `Text` tokens.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Text && self.value.eq_ignore_ascii_case(keyword)
    }

    pub fn number(&self) -> Result<f64, WktError> {
        self.value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| WktError::InvalidNumber {
                text: self.value.clone(),
                offset: self.offset,
            })
    }
}

fn starts_number(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '-' | '+' | '.')
}

fn continues_number(c: char, buf: &str) -> bool {
    c.is_ascii_digit()
        || matches!(c, '.' | 'e' | 'E')
        || (matches!(c, '-' | '+') && (buf.ends_with('e') || buf.ends_with('E')))
}

pub fn tokenize(text: &str) -> Result<Vec<Token>, WktError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::new(TokenKind::LeftParenthesis, "(", offset));
            }
            ')' => {
                chars.next();
                tokens.push(Token::new(TokenKind::RightParenthesis, ")", offset));
            }
            ',' => {
                chars.next();
                tokens.push(Token::new(TokenKind::Comma, ",", offset));
            }
            c if starts_number(c) => {
                let mut buf = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if buf.is_empty() || continues_number(c, &buf) {
                        buf.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::new(TokenKind::Number, buf, offset));
            }
            c if c.is_ascii_alphabetic() => {
                let mut buf = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        buf.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::new(TokenKind::Text, buf, offset));
            }
            other => {
                return Err(WktError::UnexpectedCharacter {
                    character: other,
                    offset,
                });
            }
        }
    }
    Ok(tokens)
}
