pub mod expr;
pub use expr::*;
pub mod query;
pub use query::*;

use std::fmt;

use crate::errors::Result;
use crate::parser::Parser;
use crate::tokens::Token;

pub trait AstParseable: Sized {
    /// Parse an instance of Self from the provided parser.
    ///
    /// It's assumed that the parser is in the correct state for parsing Self,
    /// and if it isn't, an error should be returned.
    fn parse(parser: &mut Parser) -> Result<Self>;
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident {
    pub value: String,
    /// If the identifier was double quoted. Quoted identifiers are matched
    /// exactly, unquoted ones ignoring case.
    pub quoted: bool,
}

impl Ident {
    pub fn new(value: impl Into<String>) -> Self {
        Ident {
            value: value.into(),
            quoted: false,
        }
    }

    pub fn quoted(value: impl Into<String>) -> Self {
        Ident {
            value: value.into(),
            quoted: true,
        }
    }
}

impl AstParseable for Ident {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let tok = match parser.next() {
            Some(tok) => tok.clone(),
            None => return Err(parser.error_at_end("Expected identifier, found end of statement")),
        };

        match &tok.token {
            Token::Word(w) if w.quote.is_some() => Ok(Ident::quoted(w.value.clone())),
            Token::Word(w) => match w.keyword {
                Some(kw) if kw.is_reserved() => Err(parser.error_at(
                    &tok,
                    format!("Expected identifier, found reserved keyword {kw:?}"),
                )),
                _ => Ok(Ident::new(w.value.clone())),
            },
            other => Err(parser.error_at(
                &tok,
                format!("Unexpected token: {other:?}. Expected an identifier."),
            )),
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quoted {
            write!(f, "\"{}\"", self.value.replace('"', "\"\""))
        } else {
            write!(f, "{}", self.value)
        }
    }
}

/// A possibly qualified reference to an object, e.g. `my_table` or
/// `my_table.my_column`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectReference(pub Vec<Ident>);

impl ObjectReference {
    /// Create an object from an iterator of strings.
    ///
    /// Useful in tests, probably unlikely that it should be used anywhere else.
    pub fn from_strings<S>(strings: impl IntoIterator<Item = S>) -> Self
    where
        S: Into<String>,
    {
        ObjectReference(strings.into_iter().map(Ident::new).collect())
    }

    /// The last part of the reference.
    pub fn base(&self) -> Option<&Ident> {
        self.0.last()
    }
}

impl AstParseable for ObjectReference {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let mut idents = vec![Ident::parse(parser)?];
        while parser.consume_token(&Token::Period) {
            idents.push(Ident::parse(parser)?);
        }
        Ok(ObjectReference(idents))
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strings: Vec<_> = self.0.iter().map(|ident| ident.to_string()).collect();
        write!(f, "{}", strings.join("."))
    }
}

#[cfg(test)]
mod testutil {
    use super::*;

    /// Parse an AST node directly from a string.
    pub(crate) fn parse_ast<A: AstParseable>(s: &str) -> Result<A> {
        let mut parser = Parser::with_sql_string(s)?;
        A::parse(&mut parser)
    }
}
