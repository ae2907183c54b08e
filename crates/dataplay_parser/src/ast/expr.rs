use std::fmt;

use super::{AstParseable, Ident};
use crate::errors::Result;
use crate::keywords::Keyword;
use crate::parser::Parser;
use crate::tokens::{Token, TokenWithLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// Plus, e.g. `+9`
    Plus,
    /// Minus, e.g. `-9`
    Minus,
    /// Not, e.g. `NOT(true)`
    Not,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Not => write!(f, "NOT "),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    /// Plus, e.g. `a + b`
    Plus,
    /// Minus, e.g. `a - b`
    Minus,
    /// Multiply, e.g. `a * b`
    Multiply,
    /// Divide, e.g. `a / b`
    Divide,
    /// Modulo, e.g. `a % b`
    Modulo,
    /// String concat, e.g. `a || b`
    StringConcat,
    /// Greater than, e.g. `a > b`
    Gt,
    /// Less than, e.g. `a < b`
    Lt,
    /// Greater equal, e.g. `a >= b`
    GtEq,
    /// Less equal, e.g. `a <= b`
    LtEq,
    /// Equal, e.g. `a = b`
    Eq,
    /// Not equal, e.g. `a <> b`
    NotEq,
    /// And, e.g. `a AND b`
    And,
    /// Or, e.g. `a OR b`
    Or,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::StringConcat => "||",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::GtEq => ">=",
            Self::LtEq => "<=",
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::And => "AND",
            Self::Or => "OR",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    /// Unparsed number literal.
    Number(String),
    /// String literal.
    SingleQuotedString(String),
    /// Boolean literal.
    Boolean(bool),
    /// Null literal
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::SingleQuotedString(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Boolean(true) => write!(f, "TRUE"),
            Self::Boolean(false) => write!(f, "FALSE"),
            Self::Null => write!(f, "NULL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionArg {
    /// `*` as in `count(*)`.
    Wildcard,
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Function {
    pub name: Ident,
    pub args: Vec<FunctionArg>,
    /// `count(DISTINCT a)`
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Column identifier.
    Ident(Ident),
    /// Compound identifier.
    ///
    /// `table.col`
    CompoundIdent(Vec<Ident>),
    /// An expression literal,
    Literal(Literal),
    /// A unary expression.
    UnaryExpr { op: UnaryOperator, expr: Box<Expr> },
    /// A binary expression.
    BinaryExpr {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    /// Parenthesized expression.
    Nested(Box<Expr>),
    /// `<expr> IS [NOT] NULL`
    IsNull { expr: Box<Expr>, negated: bool },
    /// `<expr> [NOT] IN (<list>)`
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// `<expr> [NOT] BETWEEN <low> AND <high>`
    Between {
        expr: Box<Expr>,
        negated: bool,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    /// `<expr> [NOT] LIKE <pattern>`
    Like {
        expr: Box<Expr>,
        negated: bool,
        pattern: Box<Expr>,
    },
    /// `CASE [<operand>] WHEN <cond> THEN <result> ... [ELSE <result>] END`
    Case {
        operand: Option<Box<Expr>>,
        when_then: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    /// Scalar or aggregate function call.
    Function(Function),
}

impl AstParseable for Expr {
    fn parse(parser: &mut Parser) -> Result<Self> {
        Self::parse_subexpr(parser, 0)
    }
}

// Precdences, ordered low to high.
const PREC_OR: u8 = 10;
const PREC_AND: u8 = 20;
const PREC_NOT: u8 = 30;
const PREC_IS: u8 = 40;
const PREC_COMPARISON: u8 = 50;
const PREC_CONTAINMENT: u8 = 60;
const PREC_EVERYTHING_ELSE: u8 = 70;
const PREC_ADD_SUB: u8 = 80;
const PREC_MUL_DIV_MOD: u8 = 90;
const PREC_UNARY: u8 = 100;

impl Expr {
    fn parse_subexpr(parser: &mut Parser, precendence: u8) -> Result<Self> {
        let mut expr = Expr::parse_prefix(parser)?;

        loop {
            let next_precedence = Self::get_infix_precedence(parser);
            if precendence >= next_precedence {
                break;
            }

            expr = Self::parse_infix(parser, expr, next_precedence)?;
        }

        Ok(expr)
    }

    fn parse_prefix(parser: &mut Parser) -> Result<Self> {
        let tok = match parser.next() {
            Some(tok) => tok.clone(),
            None => {
                return Err(parser.error_at_end("Expected expression, found end of statement"));
            }
        };

        let expr = match &tok.token {
            Token::Word(w) if w.quote.is_none() && w.keyword.is_some_and(|kw| kw.is_reserved()) => {
                match w.keyword {
                    Some(Keyword::TRUE) => Expr::Literal(Literal::Boolean(true)),
                    Some(Keyword::FALSE) => Expr::Literal(Literal::Boolean(false)),
                    Some(Keyword::NULL) => Expr::Literal(Literal::Null),
                    Some(Keyword::NOT) => Expr::UnaryExpr {
                        op: UnaryOperator::Not,
                        expr: Box::new(Expr::parse_subexpr(parser, PREC_NOT)?),
                    },
                    Some(Keyword::CASE) => Self::parse_case(parser)?,
                    _ => {
                        return Err(parser.error_at(
                            &tok,
                            format!("Unexpected keyword '{}'. Expected expression.", w.value),
                        ));
                    }
                }
            }
            Token::Word(w) => {
                let ident = if w.quote.is_some() {
                    Ident::quoted(w.value.clone())
                } else {
                    Ident::new(w.value.clone())
                };

                if parser.consume_token(&Token::LeftParen) {
                    Expr::Function(Self::parse_function_args(parser, ident)?)
                } else if parser.peek().is_some_and(|t| t.token == Token::Period) {
                    let mut idents = vec![ident];
                    while parser.consume_token(&Token::Period) {
                        idents.push(Ident::parse(parser)?);
                    }
                    Expr::CompoundIdent(idents)
                } else {
                    Expr::Ident(ident)
                }
            }
            Token::SingleQuotedString(s) => Expr::Literal(Literal::SingleQuotedString(s.clone())),
            Token::Number(s) => Expr::Literal(Literal::Number(s.clone())),
            Token::LeftParen => {
                let expr = Expr::parse(parser)?;
                parser.expect_token(&Token::RightParen)?;
                Expr::Nested(Box::new(expr))
            }
            Token::Minus => Expr::UnaryExpr {
                op: UnaryOperator::Minus,
                expr: Box::new(Expr::parse_subexpr(parser, PREC_UNARY)?),
            },
            Token::Plus => Expr::UnaryExpr {
                op: UnaryOperator::Plus,
                expr: Box::new(Expr::parse_subexpr(parser, PREC_UNARY)?),
            },
            other => {
                return Err(parser.error_at(
                    &tok,
                    format!("Unexpected token '{other:?}'. Expected expression."),
                ));
            }
        };

        Ok(expr)
    }

    /// Parse function arguments, the opening paren having been consumed.
    fn parse_function_args(parser: &mut Parser, name: Ident) -> Result<Function> {
        if parser.consume_token(&Token::RightParen) {
            return Ok(Function {
                name,
                args: Vec::new(),
                distinct: false,
            });
        }

        let distinct = parser.parse_keyword(Keyword::DISTINCT);
        if !distinct {
            // Explicit ALL is the default.
            parser.parse_keyword(Keyword::ALL);
        }

        let args = parser.parse_comma_separated(|parser| {
            if parser.consume_token(&Token::Mul) {
                Ok(FunctionArg::Wildcard)
            } else {
                Ok(FunctionArg::Expr(Expr::parse(parser)?))
            }
        })?;
        parser.expect_token(&Token::RightParen)?;

        Ok(Function {
            name,
            args,
            distinct,
        })
    }

    /// Parse a CASE expression, the CASE keyword having been consumed.
    fn parse_case(parser: &mut Parser) -> Result<Self> {
        let operand = if parser.peek().is_some_and(|t| t.is_keyword(Keyword::WHEN)) {
            None
        } else {
            Some(Box::new(Expr::parse(parser)?))
        };

        let mut when_then = Vec::new();
        while parser.parse_keyword(Keyword::WHEN) {
            let cond = Expr::parse(parser)?;
            parser.expect_keyword(Keyword::THEN)?;
            let result = Expr::parse(parser)?;
            when_then.push((cond, result));
        }
        if when_then.is_empty() {
            return Err(parser.error_at_current("Expected WHEN in CASE expression"));
        }

        let else_expr = if parser.parse_keyword(Keyword::ELSE) {
            Some(Box::new(Expr::parse(parser)?))
        } else {
            None
        };
        parser.expect_keyword(Keyword::END)?;

        Ok(Expr::Case {
            operand,
            when_then,
            else_expr,
        })
    }

    fn parse_infix(parser: &mut Parser, prefix: Expr, precendence: u8) -> Result<Self> {
        let tok: TokenWithLocation = match parser.next() {
            Some(tok) => tok.clone(),
            None => {
                return Err(parser.error_at_end("Expected infix expression, found end of statement"));
            }
        };

        let bin_op: Option<BinaryOperator> = match &tok.token {
            Token::DoubleEq => Some(BinaryOperator::Eq),
            Token::Eq => Some(BinaryOperator::Eq),
            Token::Neq => Some(BinaryOperator::NotEq),
            Token::Gt => Some(BinaryOperator::Gt),
            Token::GtEq => Some(BinaryOperator::GtEq),
            Token::Lt => Some(BinaryOperator::Lt),
            Token::LtEq => Some(BinaryOperator::LtEq),
            Token::Plus => Some(BinaryOperator::Plus),
            Token::Minus => Some(BinaryOperator::Minus),
            Token::Mul => Some(BinaryOperator::Multiply),
            Token::Div => Some(BinaryOperator::Divide),
            Token::Mod => Some(BinaryOperator::Modulo),
            Token::Concat => Some(BinaryOperator::StringConcat),
            Token::Word(_) => match tok.keyword() {
                Some(Keyword::AND) => Some(BinaryOperator::And),
                Some(Keyword::OR) => Some(BinaryOperator::Or),
                _ => None,
            },
            _ => None,
        };

        if let Some(op) = bin_op {
            return Ok(Expr::BinaryExpr {
                left: Box::new(prefix),
                op,
                right: Box::new(Expr::parse_subexpr(parser, precendence)?),
            });
        }

        match tok.keyword() {
            Some(Keyword::IS) => {
                let negated = parser.parse_keyword(Keyword::NOT);
                parser.expect_keyword(Keyword::NULL)?;
                Ok(Expr::IsNull {
                    expr: Box::new(prefix),
                    negated,
                })
            }
            Some(Keyword::NOT) => match parser.next().and_then(|t| t.keyword()) {
                Some(Keyword::IN) => Self::parse_in_list(parser, prefix, true),
                Some(Keyword::BETWEEN) => Self::parse_between(parser, prefix, true),
                Some(Keyword::LIKE) => Self::parse_like(parser, prefix, true),
                _ => Err(parser.error_at(&tok, "Expected IN, BETWEEN or LIKE after NOT")),
            },
            Some(Keyword::IN) => Self::parse_in_list(parser, prefix, false),
            Some(Keyword::BETWEEN) => Self::parse_between(parser, prefix, false),
            Some(Keyword::LIKE) => Self::parse_like(parser, prefix, false),
            _ => Err(parser.error_at(
                &tok,
                format!("Unable to parse token {:?} as an expression", tok.token),
            )),
        }
    }

    fn parse_in_list(parser: &mut Parser, expr: Expr, negated: bool) -> Result<Self> {
        parser.expect_token(&Token::LeftParen)?;
        let list = parser.parse_comma_separated(Expr::parse)?;
        parser.expect_token(&Token::RightParen)?;
        Ok(Expr::InList {
            expr: Box::new(expr),
            list,
            negated,
        })
    }

    fn parse_between(parser: &mut Parser, expr: Expr, negated: bool) -> Result<Self> {
        // Bounds bind tighter than AND so `a BETWEEN 1 AND 2 AND b` works.
        let low = Expr::parse_subexpr(parser, PREC_CONTAINMENT)?;
        parser.expect_keyword(Keyword::AND)?;
        let high = Expr::parse_subexpr(parser, PREC_CONTAINMENT)?;
        Ok(Expr::Between {
            expr: Box::new(expr),
            negated,
            low: Box::new(low),
            high: Box::new(high),
        })
    }

    fn parse_like(parser: &mut Parser, expr: Expr, negated: bool) -> Result<Self> {
        let pattern = Expr::parse_subexpr(parser, PREC_CONTAINMENT)?;
        Ok(Expr::Like {
            expr: Box::new(expr),
            negated,
            pattern: Box::new(pattern),
        })
    }

    /// Get the relative precedence of the next operator.
    ///
    /// See <https://www.postgresql.org/docs/16/sql-syntax-lexical.html#SQL-PRECEDENCE>
    fn get_infix_precedence(parser: &mut Parser) -> u8 {
        let tok = match parser.peek() {
            Some(tok) => tok,
            None => return 0,
        };

        match &tok.token {
            Token::Word(_) => match tok.keyword() {
                Some(Keyword::OR) => PREC_OR,
                Some(Keyword::AND) => PREC_AND,
                Some(Keyword::NOT) => {
                    // Precedence depends on keyword following it.
                    match parser.peek_nth(1).and_then(|t| t.keyword()) {
                        Some(Keyword::IN) | Some(Keyword::BETWEEN) | Some(Keyword::LIKE) => {
                            PREC_CONTAINMENT
                        }
                        _ => 0,
                    }
                }
                Some(Keyword::IS) => PREC_IS,
                Some(Keyword::IN) | Some(Keyword::BETWEEN) | Some(Keyword::LIKE) => {
                    PREC_CONTAINMENT
                }
                _ => 0,
            },

            // Equalities
            Token::Eq
            | Token::DoubleEq
            | Token::Neq
            | Token::Lt
            | Token::LtEq
            | Token::Gt
            | Token::GtEq => PREC_COMPARISON,

            // Numeric operators
            Token::Plus | Token::Minus => PREC_ADD_SUB,
            Token::Mul | Token::Div | Token::Mod => PREC_MUL_DIV_MOD,

            Token::Concat => PREC_EVERYTHING_ELSE,

            _ => 0,
        }
    }

    /// Returns true if this expression is, or contains, an aggregate call.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Function(func) => {
                is_aggregate_name(&func.name.value)
                    || func.args.iter().any(|arg| match arg {
                        FunctionArg::Expr(expr) => expr.contains_aggregate(),
                        FunctionArg::Wildcard => false,
                    })
            }
            Expr::Ident(_) | Expr::CompoundIdent(_) | Expr::Literal(_) => false,
            Expr::UnaryExpr { expr, .. } | Expr::Nested(expr) | Expr::IsNull { expr, .. } => {
                expr.contains_aggregate()
            }
            Expr::BinaryExpr { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(|e| e.contains_aggregate())
            }
            Expr::Between {
                expr, low, high, ..
            } => expr.contains_aggregate() || low.contains_aggregate() || high.contains_aggregate(),
            Expr::Like { expr, pattern, .. } => {
                expr.contains_aggregate() || pattern.contains_aggregate()
            }
            Expr::Case {
                operand,
                when_then,
                else_expr,
            } => {
                operand.as_ref().is_some_and(|e| e.contains_aggregate())
                    || when_then
                        .iter()
                        .any(|(w, t)| w.contains_aggregate() || t.contains_aggregate())
                    || else_expr.as_ref().is_some_and(|e| e.contains_aggregate())
            }
        }
    }
}

/// Names of the supported aggregate functions.
pub const AGGREGATE_FUNCTIONS: &[&str] = &["avg", "count", "max", "min", "sum"];

/// Check if a function name refers to an aggregate, ignoring case.
pub fn is_aggregate_name(name: &str) -> bool {
    AGGREGATE_FUNCTIONS
        .iter()
        .any(|agg| agg.eq_ignore_ascii_case(name))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(ident) => write!(f, "{ident}"),
            Expr::CompoundIdent(idents) => {
                let parts: Vec<_> = idents.iter().map(|i| i.to_string()).collect();
                write!(f, "{}", parts.join("."))
            }
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::UnaryExpr { op, expr } => write!(f, "{op}{expr}"),
            Expr::BinaryExpr { left, op, right } => write!(f, "{left} {op} {right}"),
            Expr::Nested(expr) => write!(f, "({expr})"),
            Expr::IsNull { expr, negated } => {
                write!(f, "{expr} IS {}NULL", if *negated { "NOT " } else { "" })
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let items: Vec<_> = list.iter().map(|e| e.to_string()).collect();
                write!(
                    f,
                    "{expr} {}IN ({})",
                    if *negated { "NOT " } else { "" },
                    items.join(", ")
                )
            }
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => write!(
                f,
                "{expr} {}BETWEEN {low} AND {high}",
                if *negated { "NOT " } else { "" }
            ),
            Expr::Like {
                expr,
                negated,
                pattern,
            } => write!(
                f,
                "{expr} {}LIKE {pattern}",
                if *negated { "NOT " } else { "" }
            ),
            Expr::Case {
                operand,
                when_then,
                else_expr,
            } => {
                write!(f, "CASE")?;
                if let Some(operand) = operand {
                    write!(f, " {operand}")?;
                }
                for (when, then) in when_then {
                    write!(f, " WHEN {when} THEN {then}")?;
                }
                if let Some(else_expr) = else_expr {
                    write!(f, " ELSE {else_expr}")?;
                }
                write!(f, " END")
            }
            Expr::Function(func) => {
                let args: Vec<_> = func
                    .args
                    .iter()
                    .map(|arg| match arg {
                        FunctionArg::Wildcard => "*".to_string(),
                        FunctionArg::Expr(expr) => expr.to_string(),
                    })
                    .collect();
                write!(
                    f,
                    "{}({}{})",
                    func.name,
                    if func.distinct { "DISTINCT " } else { "" },
                    args.join(", ")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testutil::parse_ast;

    fn ident(s: &str) -> Box<Expr> {
        Box::new(Expr::Ident(Ident::new(s)))
    }

    fn number(s: &str) -> Box<Expr> {
        Box::new(Expr::Literal(Literal::Number(s.to_string())))
    }

    #[test]
    fn precedence_mul_over_add() {
        let got: Expr = parse_ast("a + b * 2").unwrap();
        let expected = Expr::BinaryExpr {
            left: ident("a"),
            op: BinaryOperator::Plus,
            right: Box::new(Expr::BinaryExpr {
                left: ident("b"),
                op: BinaryOperator::Multiply,
                right: number("2"),
            }),
        };
        assert_eq!(expected, got);
    }

    #[test]
    fn precedence_and_over_or() {
        let got: Expr = parse_ast("a = 1 or b = 2 and c = 3").unwrap();
        assert_eq!("a = 1 OR b = 2 AND c = 3", got.to_string());
        match got {
            Expr::BinaryExpr { op, right, .. } => {
                assert_eq!(BinaryOperator::Or, op);
                assert!(matches!(
                    *right,
                    Expr::BinaryExpr {
                        op: BinaryOperator::And,
                        ..
                    }
                ));
            }
            other => panic!("unexpected expr: {other:?}"),
        }
    }

    #[test]
    fn between_and() {
        let got: Expr = parse_ast("a between 1 and 3 and b").unwrap();
        let expected = Expr::BinaryExpr {
            left: Box::new(Expr::Between {
                expr: ident("a"),
                negated: false,
                low: number("1"),
                high: number("3"),
            }),
            op: BinaryOperator::And,
            right: ident("b"),
        };
        assert_eq!(expected, got);
    }

    #[test]
    fn not_in_list() {
        let got: Expr = parse_ast("a not in (1, 2)").unwrap();
        let expected = Expr::InList {
            expr: ident("a"),
            list: vec![*number("1"), *number("2")],
            negated: true,
        };
        assert_eq!(expected, got);
    }

    #[test]
    fn is_not_null() {
        let got: Expr = parse_ast("a is not null").unwrap();
        let expected = Expr::IsNull {
            expr: ident("a"),
            negated: true,
        };
        assert_eq!(expected, got);
    }

    #[test]
    fn prefix_not() {
        let got: Expr = parse_ast("not a = 1").unwrap();
        let expected = Expr::UnaryExpr {
            op: UnaryOperator::Not,
            expr: Box::new(Expr::BinaryExpr {
                left: ident("a"),
                op: BinaryOperator::Eq,
                right: number("1"),
            }),
        };
        assert_eq!(expected, got);
    }

    #[test]
    fn count_star() {
        let got: Expr = parse_ast("COUNT(*)").unwrap();
        assert!(got.contains_aggregate());
        assert_eq!("COUNT(*)", got.to_string());
    }

    #[test]
    fn count_distinct() {
        let got: Expr = parse_ast("count(distinct a)").unwrap();
        let expected = Expr::Function(Function {
            name: Ident::new("count"),
            args: vec![FunctionArg::Expr(*ident("a"))],
            distinct: true,
        });
        assert_eq!(expected, got);
    }

    #[test]
    fn searched_case() {
        let got: Expr = parse_ast("case when a > 1 then 'big' else 'small' end").unwrap();
        assert_eq!("CASE WHEN a > 1 THEN 'big' ELSE 'small' END", got.to_string());
        assert!(!got.contains_aggregate());
    }

    #[test]
    fn nested_aggregate_detected() {
        let got: Expr = parse_ast("round(avg(b), 2) + 1").unwrap();
        assert!(got.contains_aggregate());
    }

    #[test]
    fn missing_operand() {
        let err = parse_ast::<Expr>("a +").unwrap_err();
        assert_eq!((1, 4), (err.line, err.col));
    }
}
