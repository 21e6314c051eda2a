//! Recursive-descent parser for `$filter`, `$orderby`, `$select`, `$expand`
//! and key predicates.
//!
//! Precedence, lowest first: `or`, `and`, `not`, comparison and `in`,
//! additive, multiplicative, unary minus, primary. Binary operators of equal
//! precedence associate to the left.

use crate::ast::{BinaryOp, Expr, Function, OrderItem, PropertyPath, Select, SortDir};
use crate::error::{Error, Result};
use crate::lexer::Lexer;
use crate::options::{ExpandItem, QueryOptions};
use crate::value::Value;

/// Nesting beyond this depth is rejected before the stack is at risk.
const MAX_NESTING: usize = 64;

pub struct Parser<'l, 'a> {
    lexer: &'l mut Lexer<'a>,
    nesting: usize,
}

impl<'l, 'a> Parser<'l, 'a> {
    pub fn new(lexer: &'l mut Lexer<'a>) -> Self {
        Self { lexer, nesting: 0 }
    }

    fn enter(&mut self) -> Result<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.lexer.error("expression is nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    /// # Errors
    /// Returns a syntax error at the offending offset.
    pub fn expression(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.lexer.maybe_keyword("or") {
            let right = self.and_expr()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.not_expr()?;
        while self.lexer.maybe_keyword("and") {
            let right = self.not_expr()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.lexer.maybe_keyword("not") {
            self.enter()?;
            let inner = self.not_expr()?;
            self.leave();
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.additive()?;
        loop {
            if self.lexer.maybe_keyword("in") {
                self.lexer.expect_char('(')?;
                self.enter()?;
                let items = self.expression_list(')')?;
                self.leave();
                if items.is_empty() {
                    return Err(self.lexer.error("'in' requires at least one value"));
                }
                left = Expr::In(Box::new(left), items);
                continue;
            }
            let Some(op) = BinaryOp::COMPARISONS
                .into_iter()
                .find(|op| self.lexer.maybe_keyword(op.keyword()))
            else {
                break;
            };
            let right = self.additive()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.lexer.maybe_keyword("add") {
                BinaryOp::Add
            } else if self.lexer.maybe_keyword("sub") {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.multiplicative()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = if self.lexer.maybe_keyword("mul") {
                BinaryOp::Mul
            } else if self.lexer.maybe_keyword("div") {
                BinaryOp::Div
            } else if self.lexer.maybe_keyword("mod") {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.unary()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        self.lexer.skip_whitespace();
        let rest = self.lexer.rest();
        let mut chars = rest.chars();
        let minus = chars.next() == Some('-');
        let negative_literal =
            rest.starts_with("-INF") || chars.next().is_some_and(|c| c.is_ascii_digit());
        if minus && !negative_literal {
            self.lexer.expect_char('-')?;
            self.enter()?;
            let inner = self.unary()?;
            self.leave();
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        if self.lexer.maybe_char('(') {
            self.enter()?;
            let inner = self.expression()?;
            self.lexer.expect_char(')')?;
            self.leave();
            return Ok(inner);
        }
        if let Some(value) = self.lexer.maybe_literal()? {
            return Ok(Expr::Literal(value));
        }
        let start = self.lexer.offset();
        let Some(name) = self.lexer.maybe_qualified_identifier() else {
            return Err(self.lexer.error(format!(
                "expected expression at '{}'",
                self.lexer.fragment()
            )));
        };
        if self.lexer.maybe_char('(') {
            let func = Function::from_name(name)
                .ok_or_else(|| Error::syntax(format!("unknown function '{name}'"), start))?;
            self.enter()?;
            let args = self.expression_list(')')?;
            self.leave();
            return Ok(Expr::Call(func, args));
        }
        let mut segments = vec![name.to_owned()];
        while self.lexer.maybe_char('/') {
            let segment = self
                .lexer
                .maybe_qualified_identifier()
                .ok_or_else(|| self.lexer.error("expected path segment after '/'"))?;
            segments.push(segment.to_owned());
        }
        Ok(Expr::Path(PropertyPath(segments)))
    }

    /// Comma-separated expressions up to `close`; the opening delimiter has
    /// already been consumed.
    fn expression_list(&mut self, close: char) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.lexer.maybe_char(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.lexer.maybe_char(',') {
                continue;
            }
            self.lexer.expect_char(close)?;
            return Ok(items);
        }
    }

    fn path(&mut self) -> Result<PropertyPath> {
        let first = self
            .lexer
            .maybe_qualified_identifier()
            .ok_or_else(|| self.lexer.error("expected property path"))?;
        let mut segments = vec![first.to_owned()];
        while self.lexer.maybe_char('/') {
            let segment = self
                .lexer
                .maybe_qualified_identifier()
                .ok_or_else(|| self.lexer.error("expected path segment after '/'"))?;
            segments.push(segment.to_owned());
        }
        Ok(PropertyPath(segments))
    }

    /// # Errors
    /// Returns a syntax error for malformed order items.
    pub fn orderby(&mut self) -> Result<Vec<OrderItem>> {
        let mut items = Vec::new();
        loop {
            let path = self.path()?;
            let dir = if self.lexer.maybe_keyword("desc") {
                SortDir::Desc
            } else {
                self.lexer.maybe_keyword("asc");
                SortDir::Asc
            };
            items.push(OrderItem { path, dir });
            if !self.lexer.maybe_char(',') {
                return Ok(items);
            }
        }
    }

    /// # Errors
    /// Returns a syntax error for malformed select lists.
    pub fn select(&mut self) -> Result<Select> {
        if self.lexer.maybe_char('*') {
            return Ok(Select::All);
        }
        let mut paths = vec![self.path()?];
        while self.lexer.maybe_char(',') {
            paths.push(self.path()?);
        }
        Ok(Select::Properties(paths))
    }

    /// # Errors
    /// Returns a syntax error for malformed expand items or nested options.
    pub fn expand(&mut self) -> Result<Vec<ExpandItem>> {
        let mut items = Vec::new();
        loop {
            let navigation = self
                .lexer
                .maybe_identifier()
                .ok_or_else(|| self.lexer.error("expected navigation property"))?
                .to_owned();
            let mut options = QueryOptions::default();
            if self.lexer.maybe_char('(') {
                self.enter()?;
                loop {
                    self.nested_option(&mut options)?;
                    if self.lexer.maybe_char(';') {
                        continue;
                    }
                    self.lexer.expect_char(')')?;
                    break;
                }
                self.leave();
            }
            items.push(ExpandItem {
                navigation,
                options,
            });
            if !self.lexer.maybe_char(',') {
                return Ok(items);
            }
        }
    }

    fn nested_option(&mut self, options: &mut QueryOptions) -> Result<()> {
        let start = self.lexer.offset();
        let name = self
            .lexer
            .maybe_system_name()
            .ok_or_else(|| self.lexer.error("expected '$' query option"))?;
        self.lexer.expect_char('=')?;
        let duplicate = || {
            Error::syntax(format!("query option '{name}' is specified twice"), start)
        };
        match name {
            "$filter" => {
                if options.filter.is_some() {
                    return Err(duplicate());
                }
                options.filter = Some(self.expression()?);
            }
            "$orderby" => {
                if !options.orderby.is_empty() {
                    return Err(duplicate());
                }
                options.orderby = self.orderby()?;
            }
            "$select" => {
                if options.select.is_some() {
                    return Err(duplicate());
                }
                options.select = Some(self.select()?);
            }
            "$expand" => {
                if !options.expand.is_empty() {
                    return Err(duplicate());
                }
                options.expand = self.expand()?;
            }
            "$top" => options.top = Some(self.unsigned()?),
            "$skip" => options.skip = Some(self.unsigned()?),
            "$count" => options.count = self.boolean()?,
            other => {
                return Err(Error::syntax(
                    format!("query option '{other}' is not supported inside $expand"),
                    start,
                ));
            }
        }
        Ok(())
    }

    /// # Errors
    /// Returns a syntax error unless a non-negative integer is next.
    pub fn unsigned(&mut self) -> Result<u64> {
        self.lexer
            .maybe_unsigned()
            .ok_or_else(|| self.lexer.error("expected a non-negative integer"))
    }

    /// # Errors
    /// Returns a syntax error unless `true` or `false` is next.
    pub fn boolean(&mut self) -> Result<bool> {
        if self.lexer.maybe_keyword("true") {
            Ok(true)
        } else if self.lexer.maybe_keyword("false") {
            Ok(false)
        } else {
            Err(self.lexer.error("expected 'true' or 'false'"))
        }
    }

    /// # Errors
    /// Returns a syntax error if unconsumed input remains.
    pub fn finish(self) -> Result<()> {
        self.lexer.expect_end()
    }
}

fn parse_whole<T>(text: &str, rule: impl FnOnce(&mut Parser<'_, '_>) -> Result<T>) -> Result<T> {
    let mut lexer = Lexer::new(text);
    let mut parser = Parser::new(&mut lexer);
    let out = rule(&mut parser)?;
    parser.finish()?;
    Ok(out)
}

/// # Errors
/// Returns `Error::BadRequest` with the cursor offset on malformed input.
pub fn parse_filter(text: &str) -> Result<Expr> {
    parse_whole(text, |p| p.expression())
}

/// # Errors
/// Returns `Error::BadRequest` with the cursor offset on malformed input.
pub fn parse_orderby(text: &str) -> Result<Vec<OrderItem>> {
    parse_whole(text, |p| p.orderby())
}

/// # Errors
/// Returns `Error::BadRequest` with the cursor offset on malformed input.
pub fn parse_select(text: &str) -> Result<Select> {
    parse_whole(text, |p| p.select())
}

/// # Errors
/// Returns `Error::BadRequest` with the cursor offset on malformed input.
pub fn parse_expand(text: &str) -> Result<Vec<ExpandItem>> {
    parse_whole(text, |p| p.expand())
}

/// # Errors
/// Returns `Error::BadRequest` with the cursor offset on malformed input.
pub fn parse_unsigned(text: &str) -> Result<u64> {
    parse_whole(text, |p| p.unsigned())
}

/// # Errors
/// Returns `Error::BadRequest` with the cursor offset on malformed input.
pub fn parse_bool(text: &str) -> Result<bool> {
    parse_whole(text, |p| p.boolean())
}

/// Key predicate text found between the parentheses of `Set(...)`.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyPredicate {
    Single(Value),
    Named(Vec<(String, Value)>),
}

/// Parse `1`, `'abc'` or `a=1,b='x'`.
///
/// # Errors
/// Returns `Error::BadRequest` on malformed key text.
pub fn parse_key(text: &str) -> Result<KeyPredicate> {
    let mut lexer = Lexer::new(text);
    let start = lexer.offset();
    let named = lexer.maybe_identifier().is_some() && lexer.maybe_char('=');
    lexer.rewind(start);

    let key = if named {
        let mut pairs = Vec::new();
        loop {
            let name = lexer.expect_identifier()?.to_owned();
            lexer.expect_char('=')?;
            let value = lexer
                .maybe_literal()?
                .ok_or_else(|| lexer.error("expected key value"))?;
            pairs.push((name, value));
            if !lexer.maybe_char(',') {
                break;
            }
        }
        KeyPredicate::Named(pairs)
    } else {
        let value = lexer
            .maybe_literal()?
            .ok_or_else(|| lexer.error("expected key value"))?;
        KeyPredicate::Single(value)
    };
    lexer.expect_end()?;
    Ok(key)
}
