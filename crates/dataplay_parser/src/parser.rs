use crate::ast::{AstParseable, Ident, QueryNode};
use crate::errors::{ParseError, Result};
use crate::keywords::Keyword;
use crate::tokens::{Token, TokenWithLocation, Tokenizer};

#[derive(Debug)]
pub struct Parser {
    toks: Vec<TokenWithLocation>,
    /// Index of token we should process next.
    pub(crate) idx: usize,
    /// Location just past the end of the input, used for errors when the
    /// input ends early.
    end: (usize, usize),
}

impl Parser {
    pub fn with_tokens(toks: Vec<TokenWithLocation>, end: (usize, usize)) -> Self {
        Parser { toks, idx: 0, end }
    }

    pub fn with_sql_string(sql: &str) -> Result<Self> {
        let tokenizer = Tokenizer::new(sql);
        let toks = tokenizer.tokenize()?;
        Ok(Parser::with_tokens(toks, tokenizer.end_location()))
    }

    /// Parse a single query statement.
    ///
    /// A trailing semicolon is allowed, anything else after the statement is
    /// an error.
    pub fn parse_statement(&mut self) -> Result<QueryNode> {
        match self.peek() {
            Some(tok) if tok.is_keyword(Keyword::SELECT) => (),
            Some(tok) => {
                let tok = tok.clone();
                return Err(self.error_at(
                    &tok,
                    format!("Expected a SELECT statement, got {:?}", tok.token),
                ));
            }
            None => return Err(self.error_at_end("Empty SQL statement")),
        }

        let query = QueryNode::parse(self)?;
        self.consume_token(&Token::SemiColon);
        self.expect_end()?;

        Ok(query)
    }

    /// Error if there are any remaining non-whitespace tokens.
    pub fn expect_end(&mut self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => {
                let tok = tok.clone();
                Err(self.error_at(&tok, format!("Unexpected trailing token: {:?}", tok.token)))
            }
        }
    }

    /// Parse a comma separated list of items.
    pub fn parse_comma_separated<T>(
        &mut self,
        mut f: impl FnMut(&mut Parser) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut values = Vec::new();
        loop {
            values.push(f(self)?);
            if !self.consume_token(&Token::Comma) {
                break;
            }
        }
        Ok(values)
    }

    /// Parse an optional alias.
    ///
    /// An explicit `AS <ident>`, or a bare word that isn't a keyword.
    pub fn parse_alias(&mut self) -> Result<Option<Ident>> {
        if self.parse_keyword(Keyword::AS) {
            return Ok(Some(Ident::parse(self)?));
        }

        let tok = match self.peek() {
            Some(tok) => tok,
            None => return Ok(None),
        };

        match &tok.token {
            Token::Word(w) if w.quote.is_some() => {
                let ident = Ident::quoted(w.value.clone());
                self.next();
                Ok(Some(ident))
            }
            Token::Word(w) if w.keyword.is_none() => {
                let ident = Ident::new(w.value.clone());
                self.next();
                Ok(Some(ident))
            }
            _ => Ok(None),
        }
    }

    /// Parse a non-negative integer literal.
    pub fn parse_unsigned_integer(&mut self) -> Result<u64> {
        let tok = match self.next() {
            Some(tok) => tok.clone(),
            None => return Err(self.error_at_end("Expected an integer, found end of statement")),
        };

        match &tok.token {
            Token::Number(s) => s
                .parse::<u64>()
                .map_err(|_| self.error_at(&tok, format!("Expected an integer, got {s}"))),
            other => Err(self.error_at(&tok, format!("Expected an integer, got {other:?}"))),
        }
    }

    /// Parse a single keyword.
    pub fn parse_keyword(&mut self, keyword: Keyword) -> bool {
        let idx = self.idx;
        if let Some(tok) = self.next() {
            if tok.is_keyword(keyword) {
                return true;
            }
        }

        // Keyword doesn't match. Reset index and return.
        self.idx = idx;
        false
    }

    /// Parse an exact sequence of keywords.
    ///
    /// If the sequence doesn't match, idx is not changed, and false is
    /// returned.
    pub fn parse_keyword_sequence(&mut self, keywords: &[Keyword]) -> bool {
        let idx = self.idx;
        for keyword in keywords {
            if let Some(tok) = self.next() {
                if tok.is_keyword(*keyword) {
                    continue;
                }
            }

            // Keyword doesn't match. Reset index and return.
            self.idx = idx;
            return false;
        }
        true
    }

    pub fn expect_keyword(&mut self, keyword: Keyword) -> Result<()> {
        if self.parse_keyword(keyword) {
            return Ok(());
        }
        Err(self.error_at_current(format!("Expected keyword {keyword:?}")))
    }

    /// Consume the next token if it matches the expected token.
    pub fn consume_token(&mut self, expected: &Token) -> bool {
        let idx = self.idx;
        let tok = match self.next() {
            Some(tok) => tok,
            None => return false,
        };

        if &tok.token == expected {
            return true;
        }

        self.idx = idx;
        false
    }

    pub fn expect_token(&mut self, expected: &Token) -> Result<()> {
        if self.consume_token(expected) {
            return Ok(());
        }
        Err(self.error_at_current(format!("Expected {expected:?}")))
    }

    /// Get the next non-whitespace token.
    pub fn next(&mut self) -> Option<&TokenWithLocation> {
        loop {
            if self.idx >= self.toks.len() {
                return None;
            }

            let tok = &self.toks[self.idx];
            self.idx += 1;

            if matches!(&tok.token, Token::Whitespace) {
                continue;
            }

            return Some(tok);
        }
    }

    /// Get the next non-whitespace token without advancing.
    pub fn peek(&self) -> Option<&TokenWithLocation> {
        self.peek_nth(0)
    }

    /// Get the nth non-whitespace token without advancing.
    pub fn peek_nth(&self, n: usize) -> Option<&TokenWithLocation> {
        self.toks[self.idx..]
            .iter()
            .filter(|tok| !matches!(tok.token, Token::Whitespace))
            .nth(n)
    }

    pub fn error_at(&self, tok: &TokenWithLocation, msg: impl Into<String>) -> ParseError {
        ParseError::new(msg, tok.line, tok.col)
    }

    pub fn error_at_end(&self, msg: impl Into<String>) -> ParseError {
        ParseError::new(msg, self.end.0, self.end.1)
    }

    /// Error pointing at the next token, or the end of input.
    pub fn error_at_current(&self, msg: impl Into<String>) -> ParseError {
        match self.peek() {
            Some(tok) => self.error_at(tok, msg),
            None => self.error_at_end(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_statement() {
        let err = Parser::with_sql_string("  ")
            .unwrap()
            .parse_statement()
            .unwrap_err();
        assert_eq!((1, 3), (err.line, err.col));
    }

    #[test]
    fn trailing_semicolon() {
        Parser::with_sql_string("select 1;")
            .unwrap()
            .parse_statement()
            .unwrap();
    }

    #[test]
    fn trailing_garbage() {
        let err = Parser::with_sql_string("select a from d1 d2 d3")
            .unwrap()
            .parse_statement()
            .unwrap_err();
        assert_eq!((1, 21), (err.line, err.col));
    }

    #[test]
    fn not_a_select() {
        let err = Parser::with_sql_string("delete from d1")
            .unwrap()
            .parse_statement()
            .unwrap_err();
        assert_eq!((1, 1), (err.line, err.col));
    }

    #[test]
    fn keyword_sequence_resets() {
        let mut parser = Parser::with_sql_string("order limit").unwrap();
        assert!(!parser.parse_keyword_sequence(&[Keyword::ORDER, Keyword::BY]));
        assert!(parser.parse_keyword(Keyword::ORDER));
    }
}
