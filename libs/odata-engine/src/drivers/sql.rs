//! Bound plan → `sea_query` statement compiler.
//!
//! Only builds statements; executing them is up to the driver that owns the
//! connection. Constructs without a portable SQL rendering are rejected with
//! `untranslatable_expression` so such a driver can fall back to in-process
//! evaluation.

use sea_query::{
    Alias, Asterisk, BinOper, Expr, Func, Keyword, LikeExpr, Order, Query, SelectStatement,
    SimpleExpr, SqliteQueryBuilder, Value as SqlValue, Values,
};

use crate::ast::{BinaryOp, Function, SortDir};
use crate::edm::EntityType;
use crate::error::{Error, Result};
use crate::eval::{BoundExpr, QueryPlan};
use crate::value::Value;

fn untranslatable(what: &str) -> Error {
    Error::bad_request(
        "untranslatable_expression",
        format!("{what} has no SQL translation"),
    )
}

fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn sql_value(value: &Value) -> SimpleExpr {
    let value = match value {
        Value::Null => return SimpleExpr::Keyword(Keyword::Null),
        Value::Bool(b) => SqlValue::Bool(Some(*b)),
        Value::Int(i) => SqlValue::BigInt(Some(*i)),
        Value::Decimal(d) => SqlValue::BigDecimal(Some(Box::new(d.clone()))),
        Value::Double(d) => SqlValue::Double(Some(*d)),
        Value::String(s) => SqlValue::String(Some(Box::new(s.clone()))),
        Value::Guid(u) => SqlValue::Uuid(Some(Box::new(*u))),
        Value::Date(d) => SqlValue::ChronoDate(Some(Box::new(*d))),
        Value::DateTimeOffset(dt) => SqlValue::ChronoDateTimeUtc(Some(Box::new(*dt))),
        Value::TimeOfDay(t) => SqlValue::ChronoTime(Some(Box::new(*t))),
        Value::Binary(b) => SqlValue::Bytes(Some(Box::new(b.clone()))),
    };
    SimpleExpr::Value(value)
}

fn binary(left: SimpleExpr, op: BinOper, right: SimpleExpr) -> SimpleExpr {
    SimpleExpr::Binary(Box::new(left), op, Box::new(right))
}

fn bin_oper(op: BinaryOp) -> BinOper {
    match op {
        BinaryOp::Or => BinOper::Or,
        BinaryOp::And => BinOper::And,
        BinaryOp::Eq => BinOper::Equal,
        BinaryOp::Ne => BinOper::NotEqual,
        BinaryOp::Gt => BinOper::GreaterThan,
        BinaryOp::Ge => BinOper::GreaterThanOrEqual,
        BinaryOp::Lt => BinOper::SmallerThan,
        BinaryOp::Le => BinOper::SmallerThanOrEqual,
        BinaryOp::Add => BinOper::Add,
        BinaryOp::Sub => BinOper::Sub,
        BinaryOp::Mul => BinOper::Mul,
        BinaryOp::Div => BinOper::Div,
        BinaryOp::Mod => BinOper::Mod,
    }
}

/// Compiles plans for one table of one entity type.
#[derive(Debug, Clone, Copy)]
pub struct SqlTranslator<'t> {
    table: &'t str,
    entity_type: &'t EntityType,
}

impl<'t> SqlTranslator<'t> {
    #[must_use]
    pub fn new(table: &'t str, entity_type: &'t EntityType) -> Self {
        Self { table, entity_type }
    }

    /// WHERE expression for a bound filter.
    ///
    /// # Errors
    /// Returns `untranslatable_expression` for functions without a SQL
    /// rendering and for pattern functions over non-literal patterns.
    pub fn condition(&self, expr: &BoundExpr) -> Result<SimpleExpr> {
        Ok(match expr {
            BoundExpr::Literal(value) => sql_value(value),
            BoundExpr::Property(name, _) => Expr::col(Alias::new(name.as_str())).into(),
            BoundExpr::Compare(op, l, r) if r.is_null_literal() || l.is_null_literal() => {
                let operand = if r.is_null_literal() { l } else { r };
                let operand = Expr::expr(self.condition(operand)?);
                match op {
                    BinaryOp::Eq => operand.is_null(),
                    BinaryOp::Ne => operand.is_not_null(),
                    _ => Expr::cust("1=0"),
                }
            }
            BoundExpr::Compare(op, l, r) | BoundExpr::Arithmetic(op, l, r) => {
                binary(self.condition(l)?, bin_oper(*op), self.condition(r)?)
            }
            BoundExpr::And(l, r) => self.condition(l)?.and(self.condition(r)?),
            BoundExpr::Or(l, r) => self.condition(l)?.or(self.condition(r)?),
            // A comparison over null is false before negation, so NOT must
            // see FALSE where SQL would propagate NULL.
            BoundExpr::Not(inner) => SimpleExpr::from(Func::coalesce([
                self.condition(inner)?,
                SimpleExpr::Value(SqlValue::Bool(Some(false))),
            ]))
            .not(),
            BoundExpr::Negate(inner) => binary(
                SimpleExpr::Value(SqlValue::BigInt(Some(0))),
                BinOper::Sub,
                self.condition(inner)?,
            ),
            BoundExpr::In(l, items) => {
                let values = items
                    .iter()
                    .filter(|item| !item.is_null_literal())
                    .map(|item| self.condition(item))
                    .collect::<Result<Vec<_>>>()?;
                if values.is_empty() {
                    Expr::cust("1=0")
                } else {
                    Expr::expr(self.condition(l)?).is_in(values)
                }
            }
            BoundExpr::Call(func, args) => self.call(*func, args)?,
        })
    }

    fn call(&self, func: Function, args: &[BoundExpr]) -> Result<SimpleExpr> {
        let pattern = |wrap: fn(&str) -> String| -> Result<SimpleExpr> {
            match args {
                [subject, BoundExpr::Literal(Value::String(s))] => Ok(Expr::expr(
                    self.condition(subject)?,
                )
                .like(LikeExpr::new(wrap(&like_escape(s))).escape('\\'))),
                _ => Err(untranslatable(&format!("{func} with a non-literal pattern"))),
            }
        };
        let single = || -> Result<SimpleExpr> {
            match args {
                [arg] => self.condition(arg),
                _ => Err(untranslatable(&func.to_string())),
            }
        };
        Ok(match func {
            Function::Contains => pattern(|s| format!("%{s}%"))?,
            Function::StartsWith => pattern(|s| format!("{s}%"))?,
            Function::EndsWith => pattern(|s| format!("%{s}"))?,
            Function::ToLower => Func::lower(single()?).into(),
            Function::ToUpper => Func::upper(single()?).into(),
            Function::Length => Func::char_length(single()?).into(),
            Function::Trim => Func::cust(Alias::new("TRIM")).arg(single()?).into(),
            Function::Round => Func::round(single()?).into(),
            Function::Concat
            | Function::IndexOf
            | Function::Substring
            | Function::Year
            | Function::Month
            | Function::Day
            | Function::Hour
            | Function::Minute
            | Function::Second
            | Function::Floor
            | Function::Ceiling => return Err(untranslatable(&func.to_string())),
        })
    }

    fn base(&self, plan: &QueryPlan) -> Result<SelectStatement> {
        let mut select = Query::select();
        select.from(Alias::new(self.table));
        if let Some(filter) = &plan.filter {
            select.and_where(self.condition(filter)?);
        }
        Ok(select)
    }

    /// Page query: projection, filter, order, offset and limit.
    ///
    /// # Errors
    /// See [`SqlTranslator::condition`].
    pub fn select_statement(&self, plan: &QueryPlan, offset: u64, limit: u64) -> Result<SelectStatement> {
        let mut select = self.base(plan)?;
        let columns: Vec<Alias> = match &plan.select {
            Some(names) => names.iter().map(|n| Alias::new(n.as_str())).collect(),
            None => self
                .entity_type
                .properties()
                .iter()
                .map(|p| Alias::new(p.name.as_str()))
                .collect(),
        };
        select.columns(columns);
        for key in &plan.order {
            let order = match key.dir {
                SortDir::Asc => Order::Asc,
                SortDir::Desc => Order::Desc,
            };
            select.order_by(Alias::new(key.property.as_str()), order);
        }
        select.limit(limit).offset(offset);
        Ok(select)
    }

    /// `SELECT COUNT(*)` under the plan's filter.
    ///
    /// # Errors
    /// See [`SqlTranslator::condition`].
    pub fn count_statement(&self, plan: &QueryPlan) -> Result<SelectStatement> {
        let mut select = self.base(plan)?;
        select.expr(Func::count(Expr::col(Asterisk)));
        Ok(select)
    }

    /// Parameterized SQLite rendering.
    #[must_use]
    pub fn build(statement: &SelectStatement) -> (String, Values) {
        statement.build(SqliteQueryBuilder)
    }

    /// Inline rendering for logs and diagnostics.
    #[must_use]
    pub fn render(statement: &SelectStatement) -> String {
        statement.to_string(SqliteQueryBuilder)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::eval::{bind_filter, bind_orderby, bind_select};
    use crate::identifier::Identifier;
    use crate::parser::{parse_filter, parse_orderby, parse_select};
    use crate::value::PrimitiveType;

    fn pet_type() -> EntityType {
        EntityType::new(Identifier::new("Pet").unwrap())
            .with_property("id", PrimitiveType::Int64, false)
            .unwrap()
            .with_property("name", PrimitiveType::String, true)
            .unwrap()
            .with_property("age", PrimitiveType::Int32, true)
            .unwrap()
            .with_key(&["id"])
            .unwrap()
    }

    fn filter(text: &str) -> BoundExpr {
        bind_filter(&parse_filter(text).unwrap(), &pet_type()).unwrap()
    }

    fn render(text: &str) -> String {
        let ty = pet_type();
        let condition = SqlTranslator::new("pets", &ty).condition(&filter(text)).unwrap();
        Query::select()
            .column(Asterisk)
            .from(Alias::new("pets"))
            .and_where(condition)
            .to_string(SqliteQueryBuilder)
    }

    #[test]
    fn comparisons_and_logic() {
        let sql = render("age gt 3 and (name eq 'rex' or not (age le 1))");
        assert!(sql.contains(r#""age" > 3"#), "{sql}");
        assert!(sql.contains(r#""name" = 'rex'"#), "{sql}");
        assert!(sql.contains(r#""age" <= 1"#), "{sql}");
        assert!(sql.contains("NOT"), "{sql}");
    }

    #[test]
    fn negation_collapses_null_to_false() {
        let sql = render("not (age eq 1)");
        assert!(sql.contains(r#"NOT COALESCE("age" = 1, "#), "{sql}");
        let sql = render("not (name eq 'rex' and age gt 2)");
        assert!(sql.contains("NOT COALESCE("), "{sql}");
    }

    #[test]
    fn null_comparisons_use_is_null() {
        assert!(render("name eq null").contains(r#""name" IS NULL"#));
        assert!(render("name ne null").contains(r#""name" IS NOT NULL"#));
    }

    #[test]
    fn patterns_are_escaped() {
        let ty = pet_type();
        let plan = QueryPlan {
            filter: Some(filter("contains(name, '50%_off')")),
            ..QueryPlan::default()
        };
        let statement = SqlTranslator::new("pets", &ty).count_statement(&plan).unwrap();
        let (sql, values) = SqlTranslator::build(&statement);
        assert!(sql.contains("LIKE ?"), "{sql}");
        assert!(sql.contains("ESCAPE"), "{sql}");
        assert_eq!(
            values.0,
            vec![SqlValue::String(Some(Box::new(r"%50\%\_off%".to_owned())))]
        );
    }

    #[test]
    fn in_lists() {
        assert!(render("age in (1, 2)").contains(r#""age" IN (1, 2)"#));
    }

    #[test]
    fn unsupported_functions_are_rejected() {
        let ty = pet_type();
        let err = SqlTranslator::new("pets", &ty)
            .condition(&filter("substring(name, 1) eq 'ex'"))
            .unwrap_err();
        assert_eq!(err.code(), "untranslatable_expression");
    }

    #[test]
    fn select_statement_orders_and_pages() {
        let ty = pet_type();
        let plan = QueryPlan {
            filter: Some(filter("age ge 2")),
            order: bind_orderby(&parse_orderby("name desc").unwrap(), &ty).unwrap(),
            select: bind_select(Some(&parse_select("name").unwrap()), &ty).unwrap(),
        };
        let translator = SqlTranslator::new("pets", &ty);
        let sql = SqlTranslator::render(&translator.select_statement(&plan, 20, 10).unwrap());
        assert!(sql.starts_with(r#"SELECT "id", "name" FROM "pets""#), "{sql}");
        assert!(sql.contains(r#"ORDER BY "name" DESC, "id" ASC"#), "{sql}");
        assert!(sql.contains("LIMIT 10 OFFSET 20"), "{sql}");

        let (count_sql, values) = SqlTranslator::build(&translator.count_statement(&plan).unwrap());
        assert!(count_sql.starts_with("SELECT COUNT(*)"), "{count_sql}");
        assert_eq!(values.0.len(), 1);
    }
}
