//! Expression binding and in-process evaluation.
//!
//! Binding resolves property references against an entity type, checks
//! operand and argument types, and coerces numeric literals to the type of
//! the property they meet. The resulting [`BoundExpr`] is either evaluated
//! against materialized records or handed to a driver translator.

use std::cmp::Ordering;
use std::fmt;

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use chrono::{Datelike, Timelike};
use sha2::{Digest, Sha256};

use crate::ast::{BinaryOp, Expr, Function, OrderItem, PropertyPath, Select, SortDir};
use crate::edm::EntityType;
use crate::entity::Record;
use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::model::Model;
use crate::options::ExpandItem;
use crate::value::{PrimitiveType, Value};

/// A type-checked expression over the properties of one entity type.
#[derive(Clone, Debug, PartialEq)]
pub enum BoundExpr {
    Literal(Value),
    Property(Identifier, PrimitiveType),
    Compare(BinaryOp, Box<BoundExpr>, Box<BoundExpr>),
    And(Box<BoundExpr>, Box<BoundExpr>),
    Or(Box<BoundExpr>, Box<BoundExpr>),
    Not(Box<BoundExpr>),
    Arithmetic(BinaryOp, Box<BoundExpr>, Box<BoundExpr>),
    Negate(Box<BoundExpr>),
    In(Box<BoundExpr>, Vec<BoundExpr>),
    Call(Function, Vec<BoundExpr>),
}

fn type_mismatch(message: String) -> Error {
    Error::bad_request("type_mismatch", message)
}

fn widen(a: Option<PrimitiveType>, b: Option<PrimitiveType>) -> Option<PrimitiveType> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if a.numeric_rank() >= b.numeric_rank() {
                Some(a)
            } else {
                Some(b)
            }
        }
        (a, None) => a,
        (None, b) => b,
    }
}

/// Whether a numeric literal of type `literal` may meet a value of `target`.
/// Integers widen to every numeric type; decimals and doubles only to the
/// non-integral ones.
fn literal_widens(literal: PrimitiveType, target: PrimitiveType) -> bool {
    match literal {
        PrimitiveType::Int64 | PrimitiveType::Int32 => target.is_numeric(),
        PrimitiveType::Decimal | PrimitiveType::Double => !target.is_integral(),
        _ => literal == target,
    }
}

impl BoundExpr {
    /// Conjunction of all expressions; `None` when empty.
    #[must_use]
    pub fn conjunction(parts: impl IntoIterator<Item = BoundExpr>) -> Option<BoundExpr> {
        parts
            .into_iter()
            .reduce(|acc, next| BoundExpr::And(Box::new(acc), Box::new(next)))
    }

    #[must_use]
    pub fn is_null_literal(&self) -> bool {
        matches!(self, BoundExpr::Literal(Value::Null))
    }

    /// Static result type; `None` only for the `null` literal and
    /// arithmetic over it.
    #[must_use]
    pub fn result_type(&self) -> Option<PrimitiveType> {
        match self {
            BoundExpr::Literal(v) => v.type_of(),
            BoundExpr::Property(_, ty) => Some(*ty),
            BoundExpr::Compare(..)
            | BoundExpr::And(..)
            | BoundExpr::Or(..)
            | BoundExpr::Not(_)
            | BoundExpr::In(..) => Some(PrimitiveType::Boolean),
            BoundExpr::Arithmetic(_, l, r) => widen(l.result_type(), r.result_type()),
            BoundExpr::Negate(inner) => inner.result_type(),
            BoundExpr::Call(func, args) => match func {
                Function::Contains | Function::StartsWith | Function::EndsWith => {
                    Some(PrimitiveType::Boolean)
                }
                Function::Length
                | Function::IndexOf
                | Function::Year
                | Function::Month
                | Function::Day
                | Function::Hour
                | Function::Minute
                | Function::Second => Some(PrimitiveType::Int32),
                Function::ToLower
                | Function::ToUpper
                | Function::Trim
                | Function::Concat
                | Function::Substring => Some(PrimitiveType::String),
                Function::Round | Function::Floor | Function::Ceiling => {
                    args.first().and_then(BoundExpr::result_type)
                }
            },
        }
    }

    /// Convert back to a syntax tree, used for canonical rendering.
    #[must_use]
    pub fn to_expr(&self) -> Expr {
        let boxed = |e: &BoundExpr| Box::new(e.to_expr());
        match self {
            BoundExpr::Literal(v) => Expr::Literal(v.clone()),
            BoundExpr::Property(name, _) => Expr::Path(PropertyPath::single(name.as_str())),
            BoundExpr::Compare(op, l, r) | BoundExpr::Arithmetic(op, l, r) => {
                Expr::Binary(*op, boxed(l), boxed(r))
            }
            BoundExpr::And(l, r) => Expr::Binary(BinaryOp::And, boxed(l), boxed(r)),
            BoundExpr::Or(l, r) => Expr::Binary(BinaryOp::Or, boxed(l), boxed(r)),
            BoundExpr::Not(inner) => Expr::Not(boxed(inner)),
            BoundExpr::Negate(inner) => Expr::Negate(boxed(inner)),
            BoundExpr::In(l, items) => {
                Expr::In(boxed(l), items.iter().map(BoundExpr::to_expr).collect())
            }
            BoundExpr::Call(func, args) => {
                Expr::Call(*func, args.iter().map(BoundExpr::to_expr).collect())
            }
        }
    }

    /// Evaluate against one record. Missing properties read as null.
    #[must_use]
    pub fn evaluate(&self, record: &Record) -> Value {
        match self {
            BoundExpr::Literal(v) => v.clone(),
            BoundExpr::Property(name, _) => record.get(name).cloned().unwrap_or(Value::Null),
            BoundExpr::Compare(op, l, r) => {
                let lv = l.evaluate(record);
                let rv = r.evaluate(record);
                Value::Bool(compare_values(*op, l.is_null_literal() || r.is_null_literal(), &lv, &rv))
            }
            BoundExpr::And(l, r) => Value::Bool(l.matches(record) && r.matches(record)),
            BoundExpr::Or(l, r) => Value::Bool(l.matches(record) || r.matches(record)),
            BoundExpr::Not(inner) => Value::Bool(!inner.matches(record)),
            BoundExpr::Arithmetic(op, l, r) => {
                arithmetic(*op, &l.evaluate(record), &r.evaluate(record))
            }
            BoundExpr::Negate(inner) => negate(inner.evaluate(record)),
            BoundExpr::In(l, items) => {
                let lv = l.evaluate(record);
                if lv.is_null() {
                    return Value::Bool(false);
                }
                let hit = items
                    .iter()
                    .any(|item| lv.compare(&item.evaluate(record)) == Some(Ordering::Equal));
                Value::Bool(hit)
            }
            BoundExpr::Call(func, args) => {
                let values: Vec<Value> = args.iter().map(|a| a.evaluate(record)).collect();
                call(*func, &values)
            }
        }
    }

    /// Two-valued predicate: anything but `true` is false.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        matches!(self.evaluate(record), Value::Bool(true))
    }
}

impl fmt::Display for BoundExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}

fn compare_values(op: BinaryOp, null_literal: bool, lv: &Value, rv: &Value) -> bool {
    if null_literal {
        let both_null = lv.is_null() && rv.is_null();
        return match op {
            BinaryOp::Eq => both_null,
            BinaryOp::Ne => !both_null,
            _ => false,
        };
    }
    let Some(ord) = lv.compare(rv) else {
        return false;
    };
    match op {
        BinaryOp::Eq => ord == Ordering::Equal,
        BinaryOp::Ne => ord != Ordering::Equal,
        BinaryOp::Gt => ord == Ordering::Greater,
        BinaryOp::Ge => ord != Ordering::Less,
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::Le => ord != Ordering::Greater,
        _ => false,
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Option<Value> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div if b == 0 => return Some(Value::Null),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Mod if b == 0 => return Some(Value::Null),
        BinaryOp::Mod => a.checked_rem(b),
        _ => return Some(Value::Null),
    };
    result.map(Value::Int)
}

fn decimal_arithmetic(op: BinaryOp, a: &BigDecimal, b: &BigDecimal) -> Value {
    match op {
        BinaryOp::Add => Value::Decimal(a + b),
        BinaryOp::Sub => Value::Decimal(a - b),
        BinaryOp::Mul => Value::Decimal(a * b),
        BinaryOp::Div | BinaryOp::Mod if b.is_zero() => Value::Null,
        BinaryOp::Div => Value::Decimal(a / b),
        BinaryOp::Mod => Value::Decimal(a % b),
        _ => Value::Null,
    }
}

fn double_arithmetic(op: BinaryOp, a: f64, b: f64) -> Value {
    match op {
        BinaryOp::Add => Value::Double(a + b),
        BinaryOp::Sub => Value::Double(a - b),
        BinaryOp::Mul => Value::Double(a * b),
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => Value::Null,
        BinaryOp::Div => Value::Double(a / b),
        BinaryOp::Mod => Value::Double(a % b),
        _ => Value::Null,
    }
}

/// Numeric promotion: integers, then decimals, then doubles. Integer
/// overflow falls back to decimal; division by zero yields null.
fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (Value::Int(x), Value::Int(y)) => int_arithmetic(op, *x, *y).unwrap_or_else(|| {
            decimal_arithmetic(op, &BigDecimal::from(*x), &BigDecimal::from(*y))
        }),
        (Value::Double(_), _) | (_, Value::Double(_)) => match (a.to_f64(), b.to_f64()) {
            (Some(x), Some(y)) => double_arithmetic(op, x, y),
            _ => Value::Null,
        },
        _ => match (a.to_decimal(), b.to_decimal()) {
            (Some(x), Some(y)) => decimal_arithmetic(op, &x, &y),
            _ => Value::Null,
        },
    }
}

fn negate(v: Value) -> Value {
    match v {
        Value::Int(i) => i
            .checked_neg()
            .map_or_else(|| Value::Decimal(-BigDecimal::from(i)), Value::Int),
        Value::Decimal(d) => Value::Decimal(-d),
        Value::Double(f) => Value::Double(-f),
        _ => Value::Null,
    }
}

fn char_count(s: &str) -> i64 {
    i64::try_from(s.chars().count()).unwrap_or(i64::MAX)
}

fn substring(s: &str, start: i64, length: Option<i64>) -> String {
    let skip = usize::try_from(start.max(0)).unwrap_or(usize::MAX);
    let rest = s.chars().skip(skip);
    match length {
        Some(n) => rest
            .take(usize::try_from(n.max(0)).unwrap_or(usize::MAX))
            .collect(),
        None => rest.collect(),
    }
}

fn round_decimal(d: &BigDecimal, func: Function) -> BigDecimal {
    let mode = match func {
        Function::Floor => RoundingMode::Floor,
        Function::Ceiling => RoundingMode::Ceiling,
        _ => RoundingMode::HalfUp,
    };
    d.with_scale_round(0, mode)
}

fn call(func: Function, args: &[Value]) -> Value {
    use Value::{Bool, Date, DateTimeOffset, Decimal, Double, Int, Null, String as Str, TimeOfDay};

    match (func, args) {
        (Function::Contains, [Str(a), Str(b)]) => Bool(a.contains(b.as_str())),
        (Function::StartsWith, [Str(a), Str(b)]) => Bool(a.starts_with(b.as_str())),
        (Function::EndsWith, [Str(a), Str(b)]) => Bool(a.ends_with(b.as_str())),
        (Function::Length, [Str(a)]) => Int(char_count(a)),
        (Function::ToLower, [Str(a)]) => Str(a.to_lowercase()),
        (Function::ToUpper, [Str(a)]) => Str(a.to_uppercase()),
        (Function::Trim, [Str(a)]) => Str(a.trim().to_owned()),
        (Function::Concat, [Str(a), Str(b)]) => Str(format!("{a}{b}")),
        (Function::IndexOf, [Str(a), Str(b)]) => {
            Int(a.find(b.as_str()).map_or(-1, |idx| char_count(&a[..idx])))
        }
        (Function::Substring, [Str(a), Int(start)]) => Str(substring(a, *start, None)),
        (Function::Substring, [Str(a), Int(start), Int(len)]) => {
            Str(substring(a, *start, Some(*len)))
        }
        (Function::Year, [Date(d)]) => Int(i64::from(d.year())),
        (Function::Year, [DateTimeOffset(d)]) => Int(i64::from(d.year())),
        (Function::Month, [Date(d)]) => Int(i64::from(d.month())),
        (Function::Month, [DateTimeOffset(d)]) => Int(i64::from(d.month())),
        (Function::Day, [Date(d)]) => Int(i64::from(d.day())),
        (Function::Day, [DateTimeOffset(d)]) => Int(i64::from(d.day())),
        (Function::Hour, [DateTimeOffset(d)]) => Int(i64::from(d.hour())),
        (Function::Hour, [TimeOfDay(t)]) => Int(i64::from(t.hour())),
        (Function::Minute, [DateTimeOffset(d)]) => Int(i64::from(d.minute())),
        (Function::Minute, [TimeOfDay(t)]) => Int(i64::from(t.minute())),
        (Function::Second, [DateTimeOffset(d)]) => Int(i64::from(d.second())),
        (Function::Second, [TimeOfDay(t)]) => Int(i64::from(t.second())),
        (Function::Round | Function::Floor | Function::Ceiling, [Int(i)]) => Int(*i),
        (Function::Round | Function::Floor | Function::Ceiling, [Decimal(d)]) => {
            Decimal(round_decimal(d, func))
        }
        (Function::Round, [Double(f)]) => Double(f.round()),
        (Function::Floor, [Double(f)]) => Double(f.floor()),
        (Function::Ceiling, [Double(f)]) => Double(f.ceil()),
        _ => Null,
    }
}

/// Binds syntax trees against one entity type.
pub struct Binder<'t> {
    ty: &'t EntityType,
}

impl<'t> Binder<'t> {
    #[must_use]
    pub fn new(ty: &'t EntityType) -> Self {
        Self { ty }
    }

    fn property(&self, path: &PropertyPath) -> Result<BoundExpr> {
        let Some(name) = path.as_single() else {
            return Err(Error::bad_request(
                "unsupported_property_path",
                format!("property path '{path}' is not supported here"),
            ));
        };
        if let Some(property) = self.ty.property(name) {
            return Ok(BoundExpr::Property(property.name.clone(), property.ty));
        }
        if self.ty.navigation(name).is_some() {
            return Err(Error::bad_request(
                "navigation_not_allowed",
                format!("navigation property '{name}' cannot be used as a value"),
            ));
        }
        Err(Error::bad_request(
            "unknown_property",
            format!("'{name}' is not a property of '{}'", self.ty.name),
        ))
    }

    /// # Errors
    /// Returns `Error::BadRequest` for unknown properties and type errors.
    pub fn bind(&self, expr: &Expr) -> Result<BoundExpr> {
        match expr {
            Expr::Literal(v) => Ok(BoundExpr::Literal(v.clone())),
            Expr::Path(path) => self.property(path),
            Expr::Binary(op, l, r) if op.is_logical() => {
                let l = self.boolean(l)?;
                let r = self.boolean(r)?;
                Ok(if *op == BinaryOp::And {
                    BoundExpr::And(Box::new(l), Box::new(r))
                } else {
                    BoundExpr::Or(Box::new(l), Box::new(r))
                })
            }
            Expr::Binary(op, l, r) if op.is_comparison() => {
                let (l, r) = coerce_pair(self.bind(l)?, self.bind(r)?)?;
                Ok(BoundExpr::Compare(*op, Box::new(l), Box::new(r)))
            }
            Expr::Binary(op, l, r) => {
                let l = self.numeric(l)?;
                let r = self.numeric(r)?;
                Ok(BoundExpr::Arithmetic(*op, Box::new(l), Box::new(r)))
            }
            Expr::Not(inner) => Ok(BoundExpr::Not(Box::new(self.boolean(inner)?))),
            Expr::Negate(inner) => Ok(BoundExpr::Negate(Box::new(self.numeric(inner)?))),
            Expr::In(left, items) => {
                let mut left = self.bind(left)?;
                let mut bound = Vec::with_capacity(items.len());
                for item in items {
                    let (l, item) = coerce_pair(left, self.bind(item)?)?;
                    left = l;
                    bound.push(item);
                }
                Ok(BoundExpr::In(Box::new(left), bound))
            }
            Expr::Call(func, args) => self.call(*func, args),
        }
    }

    fn boolean(&self, expr: &Expr) -> Result<BoundExpr> {
        let bound = self.bind(expr)?;
        match bound.result_type() {
            Some(PrimitiveType::Boolean) => Ok(bound),
            other => Err(type_mismatch(format!(
                "'{expr}' is {} where Edm.Boolean is required",
                describe(other)
            ))),
        }
    }

    fn numeric(&self, expr: &Expr) -> Result<BoundExpr> {
        let bound = self.bind(expr)?;
        match bound.result_type() {
            None => Ok(bound),
            Some(ty) if ty.is_numeric() => Ok(bound),
            other => Err(type_mismatch(format!(
                "'{expr}' is {} where a number is required",
                describe(other)
            ))),
        }
    }

    fn call(&self, func: Function, args: &[Expr]) -> Result<BoundExpr> {
        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            return Err(Error::bad_request(
                "invalid_function_arguments",
                format!("{func} takes {min}..={max} arguments, got {}", args.len()),
            ));
        }
        let bound = args
            .iter()
            .map(|a| self.bind(a))
            .collect::<Result<Vec<_>>>()?;
        for (position, arg) in bound.iter().enumerate() {
            let Some(ty) = arg.result_type() else {
                continue;
            };
            if !accepts(func, position, ty) {
                return Err(Error::bad_request(
                    "invalid_function_arguments",
                    format!("{func} does not accept {ty} as argument {}", position + 1),
                ));
            }
        }
        Ok(BoundExpr::Call(func, bound))
    }
}

fn describe(ty: Option<PrimitiveType>) -> String {
    ty.map_or_else(|| "null".to_owned(), |t| t.edm_name().to_owned())
}

fn accepts(func: Function, position: usize, ty: PrimitiveType) -> bool {
    match func {
        Function::Contains
        | Function::StartsWith
        | Function::EndsWith
        | Function::Length
        | Function::ToLower
        | Function::ToUpper
        | Function::Trim
        | Function::Concat
        | Function::IndexOf => ty == PrimitiveType::String,
        Function::Substring if position == 0 => ty == PrimitiveType::String,
        Function::Substring => ty.is_integral(),
        Function::Year | Function::Month | Function::Day => {
            matches!(ty, PrimitiveType::Date | PrimitiveType::DateTimeOffset)
        }
        Function::Hour | Function::Minute | Function::Second => {
            matches!(ty, PrimitiveType::DateTimeOffset | PrimitiveType::TimeOfDay)
        }
        Function::Round | Function::Floor | Function::Ceiling => ty.is_numeric(),
    }
}

/// Check that two operands may be compared and coerce a numeric literal to
/// the type of the other side.
fn coerce_pair(l: BoundExpr, r: BoundExpr) -> Result<(BoundExpr, BoundExpr)> {
    let (Some(lt), Some(rt)) = (l.result_type(), r.result_type()) else {
        return Ok((l, r));
    };
    if lt == rt {
        return Ok((l, r));
    }
    if !(lt.is_numeric() && rt.is_numeric()) {
        return Err(type_mismatch(format!(
            "cannot compare {lt} with {rt} in '{} ... {}'",
            l.to_expr(),
            r.to_expr()
        )));
    }
    match (l, r) {
        (BoundExpr::Literal(lv), BoundExpr::Literal(rv)) => {
            Ok((BoundExpr::Literal(lv), BoundExpr::Literal(rv)))
        }
        (BoundExpr::Literal(lv), r) => {
            if !literal_widens(lt, rt) {
                return Err(type_mismatch(format!("literal {lv} is not compatible with {rt}")));
            }
            Ok((BoundExpr::Literal(lv.coerce_to(rt)?), r))
        }
        (l, BoundExpr::Literal(rv)) => {
            if !literal_widens(rt, lt) {
                return Err(type_mismatch(format!("literal {rv} is not compatible with {lt}")));
            }
            Ok((l, BoundExpr::Literal(rv.coerce_to(lt)?)))
        }
        pair => Ok(pair),
    }
}

/// # Errors
/// Returns `Error::BadRequest` when binding fails or the filter is not a
/// boolean expression.
pub fn bind_filter(expr: &Expr, ty: &EntityType) -> Result<BoundExpr> {
    let bound = Binder::new(ty).bind(expr)?;
    match bound.result_type() {
        Some(PrimitiveType::Boolean) => Ok(bound),
        other => Err(Error::bad_request(
            "filter_not_boolean",
            format!("$filter must be Edm.Boolean, found {}", describe(other)),
        )),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundOrder {
    pub property: Identifier,
    pub ty: PrimitiveType,
    pub dir: SortDir,
}

/// Bind `$orderby` and append key properties as a tiebreaker so paging
/// over equal sort values stays deterministic.
///
/// # Errors
/// Returns `Error::BadRequest` for unknown or non-primitive properties.
pub fn bind_orderby(items: &[OrderItem], ty: &EntityType) -> Result<Vec<BoundOrder>> {
    let binder = Binder::new(ty);
    let mut order = Vec::with_capacity(items.len() + ty.key().len());
    for item in items {
        let BoundExpr::Property(property, pty) = binder.property(&item.path)? else {
            continue;
        };
        if !order.iter().any(|o: &BoundOrder| o.property == property) {
            order.push(BoundOrder {
                property,
                ty: pty,
                dir: item.dir,
            });
        }
    }
    for key in ty.key_properties() {
        if !order.iter().any(|o| o.property == key.name) {
            order.push(BoundOrder {
                property: key.name.clone(),
                ty: key.ty,
                dir: SortDir::Asc,
            });
        }
    }
    Ok(order)
}

/// Bind `$select`. Key properties are always retained; `*` selects all.
///
/// # Errors
/// Returns `Error::BadRequest` for unknown properties.
pub fn bind_select(select: Option<&Select>, ty: &EntityType) -> Result<Option<Vec<Identifier>>> {
    let Some(Select::Properties(paths)) = select else {
        return Ok(None);
    };
    let binder = Binder::new(ty);
    let mut selected: Vec<Identifier> = ty.key().to_vec();
    for path in paths {
        if let BoundExpr::Property(name, _) = binder.property(path)?
            && !selected.contains(&name)
        {
            selected.push(name);
        }
    }
    Ok(Some(selected))
}

/// Validate `$expand` items and their nested options against the model
/// before any data is read.
///
/// # Errors
/// Returns `Error::BadRequest` for unknown or non-expandable navigation
/// properties and for invalid nested options.
pub fn bind_expand(model: &Model, ty: &EntityType, items: &[ExpandItem]) -> Result<()> {
    for item in items {
        let Some(navigation) = ty.navigation(&item.navigation) else {
            return Err(Error::bad_request(
                "unknown_navigation_property",
                format!("'{}' is not a navigation property of '{}'", item.navigation, ty.name),
            ));
        };
        if !navigation.expandable {
            return Err(Error::bad_request(
                "navigation_not_expandable",
                format!("navigation property '{}' cannot be expanded", navigation.name),
            ));
        }
        let target = model.entity_type(navigation.target.as_str()).ok_or_else(|| {
            Error::configuration(
                "unknown_entity_type",
                format!("entity type '{}' is not registered", navigation.target),
            )
        })?;
        if let Some(filter) = &item.options.filter {
            bind_filter(filter, target)?;
        }
        bind_orderby(&item.options.orderby, target)?;
        bind_select(item.options.select.as_ref(), target)?;
        bind_expand(model, target, &item.options.expand)?;
    }
    Ok(())
}

/// Filter, order and projection for one entity set query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryPlan {
    pub filter: Option<BoundExpr>,
    pub order: Vec<BoundOrder>,
    pub select: Option<Vec<Identifier>>,
}

impl QueryPlan {
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(record))
    }

    /// Compare two records under the plan's order; nulls sort first.
    #[must_use]
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.order {
            let av = a.get(&key.property).unwrap_or(&Value::Null);
            let bv = b.get(&key.property).unwrap_or(&Value::Null);
            let ord = match key.dir {
                SortDir::Asc => av.sort_cmp(bv),
                SortDir::Desc => bv.sort_cmp(av),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// AND an additional restriction into the filter.
    #[must_use]
    pub fn restrict(mut self, scope: BoundExpr) -> Self {
        self.filter = BoundExpr::conjunction(self.filter.take().into_iter().chain([scope]));
        self
    }

    /// Short stable hash of filter and order, embedded in skip tokens.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        if let Some(filter) = &self.filter {
            hasher.update(filter.to_string().as_bytes());
        }
        hasher.update(b"|");
        for key in &self.order {
            let sign = match key.dir {
                SortDir::Asc => '+',
                SortDir::Desc => '-',
            };
            hasher.update(format!("{sign}{},", key.property).as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_owned()
    }
}
