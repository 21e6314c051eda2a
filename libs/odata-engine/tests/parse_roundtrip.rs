#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property tests: canonical rendering parses back to the same tree, and
//! arbitrary input never panics the parsers.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime};
use odata_engine::SkipToken;
use odata_engine::Value;
use odata_engine::ast::{BinaryOp, Expr, Function, OrderItem, PropertyPath, SortDir};
use odata_engine::parser::{parse_filter, parse_orderby};
use proptest::prelude::*;
use uuid::Uuid;

const PATHS: [&str; 3] = ["a", "b", "c"];

fn arb_path() -> impl Strategy<Value = Expr> {
    prop::sample::select(PATHS.to_vec()).prop_map(Expr::path)
}

fn arb_temporal() -> impl Strategy<Value = Value> {
    prop_oneof![
        (1900_i32..2100, 1_u32..=12, 1_u32..=28).prop_map(|(y, m, d)| {
            Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
        }),
        (0_i64..4_102_444_800, 0_u32..1000).prop_map(|(secs, millis)| {
            Value::DateTimeOffset(DateTime::from_timestamp(secs, millis * 1_000_000).unwrap())
        }),
        (0_u32..24, 0_u32..60, 0_u32..60, 0_u32..1000).prop_map(|(h, m, s, ms)| {
            Value::TimeOfDay(NaiveTime::from_hms_milli_opt(h, m, s, ms).unwrap())
        }),
    ]
}

fn arb_literal() -> impl Strategy<Value = Value> {
    prop_oneof![
        (-100_000_i64..100_000).prop_map(Value::Int),
        (-1_000_000_i64..1_000_000, 0_i64..4)
            .prop_map(|(digits, scale)| Value::Decimal(BigDecimal::new(digits.into(), scale))),
        (-1.0e6_f64..1.0e6).prop_map(Value::Double),
        any::<bool>().prop_map(Value::Bool),
        "[a-zA-Z0-9' ]{0,8}".prop_map(Value::String),
        any::<[u8; 16]>().prop_map(|bytes| Value::Guid(Uuid::from_bytes(bytes))),
        prop::collection::vec(any::<u8>(), 0..12).prop_map(Value::Binary),
        arb_temporal(),
    ]
}

fn arb_leaf() -> impl Strategy<Value = Expr> {
    prop_oneof![
        arb_path(),
        arb_literal().prop_map(Expr::Literal),
        arb_path().prop_map(|p| Expr::Negate(Box::new(p))),
        arb_path().prop_map(|p| Expr::Call(Function::Length, vec![p])),
        (arb_path(), "[a-z]{1,4}").prop_map(|(p, s)| {
            Expr::Call(Function::Contains, vec![p, Expr::Literal(Value::String(s))])
        }),
    ]
}

fn arb_op() -> impl Strategy<Value = BinaryOp> {
    prop::sample::select(vec![
        BinaryOp::Or,
        BinaryOp::And,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Lt,
        BinaryOp::Ge,
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Mod,
    ])
}

fn arb_expr() -> impl Strategy<Value = Expr> {
    arb_leaf().prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (arb_op(), inner.clone(), inner.clone())
                .prop_map(|(op, l, r)| Expr::binary(op, l, r)),
            inner.clone().prop_map(|e| Expr::Not(Box::new(e))),
            (
                arb_path(),
                prop::collection::vec(arb_literal().prop_map(Expr::Literal), 1..4)
            )
                .prop_map(|(p, items)| Expr::In(Box::new(p), items)),
        ]
    })
}

fn arb_order() -> impl Strategy<Value = Vec<OrderItem>> {
    prop::collection::vec(
        (
            prop::sample::select(PATHS.to_vec()),
            prop_oneof![Just(SortDir::Asc), Just(SortDir::Desc)],
        )
            .prop_map(|(path, dir)| OrderItem {
                path: PropertyPath::single(path),
                dir,
            }),
        1..4,
    )
}

proptest! {
    #[test]
    fn rendered_filters_parse_back(expr in arb_expr()) {
        let text = expr.to_string();
        let parsed = parse_filter(&text).unwrap();
        prop_assert_eq!(&parsed, &expr, "via {}", text);
        prop_assert_eq!(parsed.to_string(), text);
    }

    #[test]
    fn rendered_literals_parse_back(value in arb_literal()) {
        let text = value.to_string();
        prop_assert_eq!(parse_filter(&text).unwrap(), Expr::Literal(value), "via {}", text);
    }

    #[test]
    fn rendered_orderby_parses_back(items in arb_order()) {
        let text: Vec<String> = items.iter().map(ToString::to_string).collect();
        let text = text.join(",");
        prop_assert_eq!(parse_orderby(&text).unwrap(), items);
    }

    #[test]
    fn filter_parser_never_panics(text in "\\PC{0,64}") {
        let _ = parse_filter(&text);
    }

    #[test]
    fn skiptoken_decoder_never_panics(text in "[A-Za-z0-9_\\-=+/]{0,64}") {
        if let Ok(token) = SkipToken::decode(&text) {
            prop_assert_eq!(token.v, 1);
        }
    }
}
