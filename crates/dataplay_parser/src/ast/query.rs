use super::{AstParseable, Expr, Ident, ObjectReference};
use crate::errors::Result;
use crate::keywords::Keyword;
use crate::parser::Parser;
use crate::tokens::Token;

/// A full `SELECT` query including its modifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryNode {
    pub select: SelectNode,
    pub order_by: Vec<OrderByNode>,
    pub limit: LimitModifier,
}

impl AstParseable for QueryNode {
    fn parse(parser: &mut Parser) -> Result<Self> {
        parser.expect_keyword(Keyword::SELECT)?;
        let select = SelectNode::parse(parser)?;

        let order_by = if parser.parse_keyword_sequence(&[Keyword::ORDER, Keyword::BY]) {
            parser.parse_comma_separated(OrderByNode::parse)?
        } else {
            Vec::new()
        };

        let limit = LimitModifier::parse(parser)?;

        Ok(QueryNode {
            select,
            order_by,
            limit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectNode {
    /// DISTINCT
    pub distinct: bool,
    /// Projection list. May included wildcards.
    pub projections: Vec<SelectExpr>,
    /// FROM
    pub from: Option<FromNode>,
    /// WHERE
    pub where_expr: Option<Expr>,
    /// GROUP BY
    pub group_by: Vec<Expr>,
    /// HAVING
    pub having: Option<Expr>,
}

impl AstParseable for SelectNode {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let distinct = parser.parse_keyword(Keyword::DISTINCT);
        if !distinct {
            parser.parse_keyword(Keyword::ALL);
        }

        // Select list
        let projections = parser.parse_comma_separated(SelectExpr::parse)?;

        // FROM
        let from = if parser.parse_keyword(Keyword::FROM) {
            Some(FromNode::parse(parser)?)
        } else {
            None
        };

        // WHERE
        let where_expr = if parser.parse_keyword(Keyword::WHERE) {
            Some(Expr::parse(parser)?)
        } else {
            None
        };

        // GROUP BY
        let group_by = if parser.parse_keyword_sequence(&[Keyword::GROUP, Keyword::BY]) {
            parser.parse_comma_separated(Expr::parse)?
        } else {
            Vec::new()
        };

        // HAVING
        let having = if parser.parse_keyword(Keyword::HAVING) {
            Some(Expr::parse(parser)?)
        } else {
            None
        };

        Ok(SelectNode {
            distinct,
            projections,
            from,
            where_expr,
            group_by,
            having,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectExpr {
    /// An unaliases expression.
    Expr(Expr),
    /// An aliased expression.
    ///
    /// `<expr> AS <ident>`
    AliasedExpr(Expr, Ident),
    /// A qualified wild card.
    ///
    /// `<reference>.*`
    QualifiedWildcard(ObjectReference),
    /// An unqualifed wild card.
    Wildcard,
}

impl AstParseable for SelectExpr {
    fn parse(parser: &mut Parser) -> Result<Self> {
        if parser.consume_token(&Token::Mul) {
            return Ok(SelectExpr::Wildcard);
        }

        // Possibly qualified wildcard, `table.*`
        let idx = parser.idx;
        if let Some(Token::Word(_)) = parser.peek().map(|t| &t.token) {
            if parser.peek_nth(1).is_some_and(|t| t.token == Token::Period)
                && parser.peek_nth(2).is_some_and(|t| t.token == Token::Mul)
            {
                let ident = Ident::parse(parser)?;
                parser.expect_token(&Token::Period)?;
                parser.expect_token(&Token::Mul)?;
                return Ok(SelectExpr::QualifiedWildcard(ObjectReference(vec![ident])));
            }
        }
        parser.idx = idx;

        let expr = Expr::parse(parser)?;
        match parser.parse_alias()? {
            Some(alias) => Ok(SelectExpr::AliasedExpr(expr, alias)),
            None => Ok(SelectExpr::Expr(expr)),
        }
    }
}

/// The single relation a query reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromNode {
    pub reference: ObjectReference,
    pub alias: Option<Ident>,
}

impl AstParseable for FromNode {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let reference = ObjectReference::parse(parser)?;
        let alias = parser.parse_alias()?;

        if parser.peek().is_some_and(|t| t.token == Token::Comma) {
            return Err(parser.error_at_current("Queries may only reference a single dataset"));
        }

        Ok(FromNode { reference, alias })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByNode {
    pub expr: Expr,
    /// ASC (true) or DESC (false), None if not specified.
    pub asc: Option<bool>,
    /// NULLS FIRST (true) or NULLS LAST (false), None if not specified.
    pub nulls_first: Option<bool>,
}

impl AstParseable for OrderByNode {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let expr = Expr::parse(parser)?;

        let asc = if parser.parse_keyword(Keyword::ASC) {
            Some(true)
        } else if parser.parse_keyword(Keyword::DESC) {
            Some(false)
        } else {
            None
        };

        let nulls_first = if parser.parse_keyword_sequence(&[Keyword::NULLS, Keyword::FIRST]) {
            Some(true)
        } else if parser.parse_keyword_sequence(&[Keyword::NULLS, Keyword::LAST]) {
            Some(false)
        } else {
            None
        };

        Ok(OrderByNode {
            expr,
            asc,
            nulls_first,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitModifier {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl AstParseable for LimitModifier {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let mut modifier = LimitModifier::default();

        // Accept both `LIMIT n OFFSET m` and `OFFSET m LIMIT n`.
        loop {
            if modifier.limit.is_none() && parser.parse_keyword(Keyword::LIMIT) {
                modifier.limit = Some(parser.parse_unsigned_integer()?);
            } else if modifier.offset.is_none() && parser.parse_keyword(Keyword::OFFSET) {
                modifier.offset = Some(parser.parse_unsigned_integer()?);
            } else {
                break;
            }
        }

        Ok(modifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testutil::parse_ast;
    use crate::ast::{BinaryOperator, Literal};

    #[test]
    fn select_star() {
        let got: QueryNode = parse_ast("SELECT * FROM d1").unwrap();
        assert_eq!(vec![SelectExpr::Wildcard], got.select.projections);
        assert_eq!(
            Some(FromNode {
                reference: ObjectReference::from_strings(["d1"]),
                alias: None,
            }),
            got.select.from
        );
    }

    #[test]
    fn select_where() {
        let got: QueryNode = parse_ast("SELECT a FROM d1 WHERE b = 4").unwrap();
        assert_eq!(
            vec![SelectExpr::Expr(Expr::Ident(Ident::new("a")))],
            got.select.projections
        );
        assert_eq!(
            Some(Expr::BinaryExpr {
                left: Box::new(Expr::Ident(Ident::new("b"))),
                op: BinaryOperator::Eq,
                right: Box::new(Expr::Literal(Literal::Number("4".to_string()))),
            }),
            got.select.where_expr
        );
    }

    #[test]
    fn aliases() {
        let got: QueryNode = parse_ast("select a as x, b y from d1 t").unwrap();
        assert_eq!(
            vec![
                SelectExpr::AliasedExpr(Expr::Ident(Ident::new("a")), Ident::new("x")),
                SelectExpr::AliasedExpr(Expr::Ident(Ident::new("b")), Ident::new("y")),
            ],
            got.select.projections
        );
        assert_eq!(
            Some(Ident::new("t")),
            got.select.from.and_then(|from| from.alias)
        );
    }

    #[test]
    fn qualified_wildcard() {
        let got: QueryNode = parse_ast("select t.*, a from d1 t").unwrap();
        assert_eq!(
            SelectExpr::QualifiedWildcard(ObjectReference::from_strings(["t"])),
            got.select.projections[0]
        );
    }

    #[test]
    fn group_order_limit() {
        let got: QueryNode = parse_ast(
            "select a, count(*) from d1 group by a having count(*) > 1 order by a desc nulls first limit 10 offset 5",
        )
        .unwrap();
        assert_eq!(1, got.select.group_by.len());
        assert!(got.select.having.is_some());
        assert_eq!(
            vec![OrderByNode {
                expr: Expr::Ident(Ident::new("a")),
                asc: Some(false),
                nulls_first: Some(true),
            }],
            got.order_by
        );
        assert_eq!(
            LimitModifier {
                limit: Some(10),
                offset: Some(5),
            },
            got.limit
        );
    }

    #[test]
    fn offset_before_limit() {
        let got: QueryNode = parse_ast("select a from d1 offset 2 limit 1").unwrap();
        assert_eq!(
            LimitModifier {
                limit: Some(1),
                offset: Some(2),
            },
            got.limit
        );
    }

    #[test]
    fn distinct() {
        let got: QueryNode = parse_ast("select distinct a from d1").unwrap();
        assert!(got.select.distinct);
    }

    #[test]
    fn multiple_relations_rejected() {
        let err = parse_ast::<QueryNode>("select * from d1, d2").unwrap_err();
        assert_eq!((1, 17), (err.line, err.col));
    }

    #[test]
    fn non_integer_limit_rejected() {
        parse_ast::<QueryNode>("select * from d1 limit 1.5").unwrap_err();
        parse_ast::<QueryNode>("select * from d1 limit -1").unwrap_err();
    }
}
