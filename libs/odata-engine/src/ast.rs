//! Syntax trees for query options.
//!
//! Every node renders to canonical text through `Display`; parsing the
//! rendered text yields an equal tree.

use std::fmt;

use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub const COMPARISONS: [BinaryOp; 6] = [
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::Lt,
        BinaryOp::Le,
    ];

    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
        }
    }

    #[must_use]
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::Lt
            | BinaryOp::Le => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
        }
    }

    #[must_use]
    pub fn is_comparison(self) -> bool {
        self.precedence() == 4
    }

    #[must_use]
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    #[must_use]
    pub fn is_arithmetic(self) -> bool {
        self.precedence() >= 5
    }
}

const NOT_PRECEDENCE: u8 = 3;
const COMPARISON_PRECEDENCE: u8 = 4;
const UNARY_PRECEDENCE: u8 = 7;
const PRIMARY_PRECEDENCE: u8 = 8;

/// Built-in functions callable from `$filter`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Function {
    Contains,
    StartsWith,
    EndsWith,
    Length,
    ToLower,
    ToUpper,
    Trim,
    Concat,
    IndexOf,
    Substring,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Round,
    Floor,
    Ceiling,
}

impl Function {
    pub const ALL: [Function; 19] = [
        Function::Contains,
        Function::StartsWith,
        Function::EndsWith,
        Function::Length,
        Function::ToLower,
        Function::ToUpper,
        Function::Trim,
        Function::Concat,
        Function::IndexOf,
        Function::Substring,
        Function::Year,
        Function::Month,
        Function::Day,
        Function::Hour,
        Function::Minute,
        Function::Second,
        Function::Round,
        Function::Floor,
        Function::Ceiling,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Function::Contains => "contains",
            Function::StartsWith => "startswith",
            Function::EndsWith => "endswith",
            Function::Length => "length",
            Function::ToLower => "tolower",
            Function::ToUpper => "toupper",
            Function::Trim => "trim",
            Function::Concat => "concat",
            Function::IndexOf => "indexof",
            Function::Substring => "substring",
            Function::Year => "year",
            Function::Month => "month",
            Function::Day => "day",
            Function::Hour => "hour",
            Function::Minute => "minute",
            Function::Second => "second",
            Function::Round => "round",
            Function::Floor => "floor",
            Function::Ceiling => "ceiling",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Accepted argument counts, inclusive.
    #[must_use]
    pub fn arity(self) -> (usize, usize) {
        match self {
            Function::Contains
            | Function::StartsWith
            | Function::EndsWith
            | Function::Concat
            | Function::IndexOf => (2, 2),
            Function::Substring => (2, 3),
            _ => (1, 1),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A `/`-separated member path; segments may be namespace-qualified.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PropertyPath(pub Vec<String>);

impl PropertyPath {
    #[must_use]
    pub fn single(name: impl Into<String>) -> Self {
        PropertyPath(vec![name.into()])
    }

    /// The sole segment of a one-segment path.
    #[must_use]
    pub fn as_single(&self) -> Option<&str> {
        match self.0.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(PropertyPath),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Negate(Box<Expr>),
    In(Box<Expr>, Vec<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    #[must_use]
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    #[must_use]
    pub fn path(name: &str) -> Expr {
        Expr::Path(PropertyPath::single(name))
    }

    /// Combine with AND: `self and other`
    #[must_use]
    pub fn and(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::And, self, other)
    }

    #[must_use]
    pub fn or(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Or, self, other)
    }

    #[must_use]
    pub fn precedence(&self) -> u8 {
        match self {
            Expr::Binary(op, _, _) => op.precedence(),
            Expr::Not(_) => NOT_PRECEDENCE,
            Expr::In(_, _) => COMPARISON_PRECEDENCE,
            Expr::Negate(_) => UNARY_PRECEDENCE,
            Expr::Literal(_) | Expr::Path(_) | Expr::Call(_, _) => PRIMARY_PRECEDENCE,
        }
    }

    /// Number of nodes, used for complexity budgets.
    #[must_use]
    pub fn node_count(&self) -> usize {
        match self {
            Expr::Literal(_) | Expr::Path(_) => 1,
            Expr::Not(x) | Expr::Negate(x) => 1 + x.node_count(),
            Expr::Binary(_, a, b) => 1 + a.node_count() + b.node_count(),
            Expr::In(x, items) => {
                1 + x.node_count() + items.iter().map(Expr::node_count).sum::<usize>()
            }
            Expr::Call(_, args) => 1 + args.iter().map(Expr::node_count).sum::<usize>(),
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, parenthesize: bool) -> fmt::Result {
    if parenthesize {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Path(p) => write!(f, "{p}"),
            Expr::Binary(op, left, right) => {
                let prec = op.precedence();
                write_operand(f, left, left.precedence() < prec)?;
                write!(f, " {} ", op.keyword())?;
                write_operand(f, right, right.precedence() <= prec)
            }
            Expr::Not(inner) => {
                f.write_str("not ")?;
                write_operand(f, inner, inner.precedence() < NOT_PRECEDENCE)
            }
            Expr::Negate(inner) => {
                f.write_str("-")?;
                write_operand(f, inner, !matches!(**inner, Expr::Path(_) | Expr::Call(_, _)))
            }
            Expr::In(left, items) => {
                write_operand(f, left, left.precedence() < COMPARISON_PRECEDENCE)?;
                f.write_str(" in (")?;
                write_list(f, items)?;
                f.write_str(")")
            }
            Expr::Call(func, args) => {
                write!(f, "{func}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrderItem {
    pub path: PropertyPath,
    pub dir: SortDir,
}

impl fmt::Display for OrderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dir {
            SortDir::Asc => write!(f, "{}", self.path),
            SortDir::Desc => write!(f, "{} desc", self.path),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Select {
    All,
    Properties(Vec<PropertyPath>),
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Select::All => f.write_str("*"),
            Select::Properties(paths) => {
                let joined: Vec<String> = paths.iter().map(ToString::to_string).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn renders_minimal_parentheses() {
        let e = Expr::binary(
            BinaryOp::And,
            Expr::binary(BinaryOp::Or, Expr::path("a"), Expr::path("b")),
            Expr::Not(Box::new(Expr::binary(
                BinaryOp::Eq,
                Expr::path("c"),
                Expr::Literal(Value::Int(1)),
            ))),
        );
        assert_eq!(e.to_string(), "(a or b) and not c eq 1");
    }

    #[test]
    fn right_operand_of_equal_precedence_is_parenthesized() {
        let e = Expr::binary(
            BinaryOp::Sub,
            Expr::path("a"),
            Expr::binary(BinaryOp::Sub, Expr::path("b"), Expr::path("c")),
        );
        assert_eq!(e.to_string(), "a sub (b sub c)");
    }

    #[test]
    fn negation_of_literal_keeps_parentheses() {
        let e = Expr::Negate(Box::new(Expr::Literal(Value::Int(3))));
        assert_eq!(e.to_string(), "-(3)");
        let e = Expr::Negate(Box::new(Expr::path("price")));
        assert_eq!(e.to_string(), "-price");
    }

    #[test]
    fn node_count_includes_every_node() {
        let e = Expr::In(
            Box::new(Expr::path("type")),
            vec![
                Expr::Literal(Value::String("dog".into())),
                Expr::Literal(Value::String("cat".into())),
            ],
        );
        assert_eq!(e.node_count(), 4);
        assert_eq!(e.to_string(), "type in ('dog', 'cat')");
    }

    #[test]
    fn functions_resolve_by_name() {
        assert_eq!(Function::from_name("substring"), Some(Function::Substring));
        assert_eq!(Function::Substring.arity(), (2, 3));
        assert!(Function::from_name("geo.distance").is_none());
    }
}
