use std::iter::Peekable;
use std::str::Chars;

use crate::errors::{ParseError, Result};
use crate::keywords::{Keyword, keyword_from_str};

#[derive(Debug, Clone, PartialEq)]
pub struct TokenWithLocation {
    pub token: Token,
    /// Line number, 1-based.
    pub line: usize,
    /// Column number, 1-based.
    pub col: usize,
}

impl TokenWithLocation {
    /// Return the keyword for this token if it's an unquoted keyword.
    pub fn keyword(&self) -> Option<Keyword> {
        match &self.token {
            Token::Word(w) => w.keyword,
            _ => None,
        }
    }

    pub fn is_keyword(&self, other: Keyword) -> bool {
        self.keyword() == Some(other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(Word),
    /// Unparsed number literal.
    Number(String),
    SingleQuotedString(String),
    /// Whitespace and comments.
    Whitespace,
    /// `=`
    Eq,
    /// `==`
    DoubleEq,
    /// `!=` or `<>`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `||`
    Concat,
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `,`
    Comma,
    /// `.`
    Period,
    /// `;`
    SemiColon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub value: String,
    /// Quote used for the identifier, if any.
    pub quote: Option<char>,
    /// Keyword this word maps to. Quoted words never map to a keyword.
    pub keyword: Option<Keyword>,
}

#[derive(Debug)]
struct State<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl State<'_> {
    fn next(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            s.push(c);
            self.next();
        }
        s
    }
}

#[derive(Debug)]
pub struct Tokenizer<'a> {
    query: &'a str,
}

impl<'a> Tokenizer<'a> {
    pub fn new(query: &'a str) -> Self {
        Tokenizer { query }
    }

    pub fn tokenize(&self) -> Result<Vec<TokenWithLocation>> {
        let mut state = State {
            chars: self.query.chars().peekable(),
            line: 1,
            col: 1,
        };

        let mut tokens = Vec::new();
        loop {
            let (line, col) = (state.line, state.col);
            let token = match Self::next_token(&mut state)? {
                Some(token) => token,
                None => break,
            };
            tokens.push(TokenWithLocation { token, line, col });
        }

        Ok(tokens)
    }

    /// Get the location right past the last character of the input.
    pub fn end_location(&self) -> (usize, usize) {
        let mut line = 1;
        let mut col = 1;
        for c in self.query.chars() {
            if c == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    fn next_token(state: &mut State) -> Result<Option<Token>> {
        let (line, col) = (state.line, state.col);
        let c = match state.peek() {
            Some(c) => c,
            None => return Ok(None),
        };

        let tok = match c {
            c if c.is_whitespace() => {
                state.take_while(char::is_whitespace);
                Token::Whitespace
            }
            '\'' => {
                state.next();
                Token::SingleQuotedString(Self::take_quoted(state, '\'', line, col)?)
            }
            '"' => {
                state.next();
                let value = Self::take_quoted(state, '"', line, col)?;
                Token::Word(Word {
                    value,
                    quote: Some('"'),
                    keyword: None,
                })
            }
            c if c.is_ascii_digit() => Token::Number(Self::take_number(state)),
            '.' => {
                state.next();
                match state.peek() {
                    Some(c) if c.is_ascii_digit() => {
                        let mut num = String::from("0.");
                        num.push_str(&state.take_while(|c| c.is_ascii_digit()));
                        Token::Number(num)
                    }
                    _ => Token::Period,
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let value = state.take_while(|c| c.is_alphanumeric() || c == '_');
                let keyword = keyword_from_str(&value);
                Token::Word(Word {
                    value,
                    quote: None,
                    keyword,
                })
            }
            '-' => {
                state.next();
                if state.peek() == Some('-') {
                    // Line comment.
                    state.take_while(|c| c != '\n');
                    Token::Whitespace
                } else {
                    Token::Minus
                }
            }
            '=' => {
                state.next();
                if state.peek() == Some('=') {
                    state.next();
                    Token::DoubleEq
                } else {
                    Token::Eq
                }
            }
            '!' => {
                state.next();
                if state.peek() == Some('=') {
                    state.next();
                    Token::Neq
                } else {
                    return Err(ParseError::new("Expected '=' after '!'", line, col));
                }
            }
            '<' => {
                state.next();
                match state.peek() {
                    Some('=') => {
                        state.next();
                        Token::LtEq
                    }
                    Some('>') => {
                        state.next();
                        Token::Neq
                    }
                    _ => Token::Lt,
                }
            }
            '>' => {
                state.next();
                if state.peek() == Some('=') {
                    state.next();
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            '|' => {
                state.next();
                if state.peek() == Some('|') {
                    state.next();
                    Token::Concat
                } else {
                    return Err(ParseError::new("Expected '|' after '|'", line, col));
                }
            }
            other => {
                let tok = match other {
                    '+' => Token::Plus,
                    '*' => Token::Mul,
                    '/' => Token::Div,
                    '%' => Token::Mod,
                    '(' => Token::LeftParen,
                    ')' => Token::RightParen,
                    ',' => Token::Comma,
                    ';' => Token::SemiColon,
                    other => {
                        return Err(ParseError::new(
                            format!("Unexpected character '{other}'"),
                            line,
                            col,
                        ));
                    }
                };
                state.next();
                tok
            }
        };

        Ok(Some(tok))
    }

    /// Read a quoted string, the opening quote having been consumed.
    ///
    /// A doubled quote character is an escaped quote.
    fn take_quoted(state: &mut State, quote: char, line: usize, col: usize) -> Result<String> {
        let mut s = String::new();
        loop {
            match state.next() {
                Some(c) if c == quote => {
                    if state.peek() == Some(quote) {
                        state.next();
                        s.push(quote);
                    } else {
                        return Ok(s);
                    }
                }
                Some(c) => s.push(c),
                None => {
                    return Err(ParseError::new(
                        format!("Unterminated quoted string, expected closing {quote}"),
                        line,
                        col,
                    ));
                }
            }
        }
    }

    fn take_number(state: &mut State) -> String {
        let mut num = state.take_while(|c| c.is_ascii_digit());
        if state.peek() == Some('.') {
            state.next();
            num.push('.');
            num.push_str(&state.take_while(|c| c.is_ascii_digit()));
        }
        if let Some(e @ ('e' | 'E')) = state.peek() {
            // Exponent, only consumed if followed by digits (with an optional
            // sign). `1e` is left as a number followed by a word.
            let mut lookahead = state.chars.clone();
            lookahead.next();
            let mut exp = String::from(e);
            if let Some(sign @ ('+' | '-')) = lookahead.peek().copied() {
                exp.push(sign);
                lookahead.next();
            }
            if lookahead.peek().is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..exp.len() {
                    state.next();
                }
                num.push_str(&exp);
                num.push_str(&state.take_while(|c| c.is_ascii_digit()));
            }
        }
        num
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<Token> {
        Tokenizer::new(s)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .filter(|t| t != &Token::Whitespace)
            .collect()
    }

    #[test]
    fn numbers() {
        assert_eq!(vec![Token::Number("12".to_string())], tokens("12"));
        assert_eq!(vec![Token::Number("1.5".to_string())], tokens("1.5"));
        assert_eq!(vec![Token::Number("0.5".to_string())], tokens(".5"));
        assert_eq!(vec![Token::Number("1e-3".to_string())], tokens("1e-3"));
        assert_eq!(vec![Token::Number("2.5E10".to_string())], tokens("2.5E10"));
    }

    #[test]
    fn operators() {
        assert_eq!(
            vec![
                Token::Neq,
                Token::Neq,
                Token::LtEq,
                Token::GtEq,
                Token::DoubleEq,
                Token::Eq,
                Token::Concat
            ],
            tokens("<> != <= >= == = ||")
        );
    }

    #[test]
    fn escaped_quotes() {
        assert_eq!(
            vec![Token::SingleQuotedString("it's".to_string())],
            tokens("'it''s'")
        );
    }

    #[test]
    fn comment_is_whitespace() {
        assert_eq!(
            vec![Token::Number("1".to_string())],
            tokens("-- leading comment\n1")
        );
    }

    #[test]
    fn locations() {
        let toks = Tokenizer::new("a\n  bc").tokenize().unwrap();
        assert_eq!((1, 1), (toks[0].line, toks[0].col));
        assert_eq!((2, 3), (toks[2].line, toks[2].col));
    }

    #[test]
    fn unterminated_string() {
        let err = Tokenizer::new("select 'abc").tokenize().unwrap_err();
        assert_eq!((1, 8), (err.line, err.col));
    }

    #[test]
    fn unexpected_char() {
        let err = Tokenizer::new("a # b").tokenize().unwrap_err();
        assert_eq!((1, 3), (err.line, err.col));
    }
}
