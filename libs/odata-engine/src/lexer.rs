//! Cursor-based lexer for query options, key predicates and resource paths.
//!
//! Tokens are recognized by matching anchored regexes at the current
//! cursor. The `maybe_*` family tries to read a token and returns `None`
//! without moving the cursor when it is absent; the `expect_*` family turns
//! absence into a syntax error carrying the cursor offset.

use std::str::FromStr;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::value::Value;

macro_rules! static_regex {
    ($name:ident, $re:expr) => {
        #[allow(clippy::expect_used)] // literal pattern, compiles
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect("static regex should not panic"));
    };
}

static_regex!(IDENTIFIER, r"^[A-Za-z_][A-Za-z0-9_]*");
static_regex!(QUALIFIED, r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*");
static_regex!(STRING, r"^'(?:[^']|'')*'");
static_regex!(BINARY, r"^binary'([A-Za-z0-9_-]*)'");
static_regex!(
    GUID,
    r"^[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}\b"
);
static_regex!(
    DATETIME,
    r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2})(:\d{2}(?:\.\d+)?)?(Z|[+-]\d{2}:\d{2})"
);
static_regex!(DATE, r"^\d{4}-\d{2}-\d{2}\b");
static_regex!(TIME, r"^\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?");
static_regex!(NUMBER, r"^-?\d+(\.\d+)?([eE][+-]?\d+)?");
static_regex!(UNSIGNED, r"^\d+");
static_regex!(SYSTEM_SEGMENT, r"^\$[A-Za-z]+");

pub struct Lexer<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    /// Move the cursor back to an offset previously read from `offset()`.
    pub fn rewind(&mut self, offset: usize) {
        debug_assert!(offset <= self.pos);
        self.pos = offset;
    }

    pub fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.text.len() - trimmed.len();
    }

    /// True when only whitespace remains.
    pub fn at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.pos == self.text.len()
    }

    #[must_use]
    pub fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Match `re` (anchored with `^`) at the cursor without skipping
    /// whitespace.
    pub fn maybe_regex(&mut self, re: &Regex) -> Option<&'a str> {
        let rest = self.rest();
        let m = re.find(rest)?;
        self.pos += m.end();
        Some(&rest[..m.end()])
    }

    pub fn maybe_char(&mut self, c: char) -> bool {
        self.skip_whitespace();
        if self.peek_char() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    /// # Errors
    /// Returns a syntax error when `c` is not next.
    pub fn expect_char(&mut self, c: char) -> Result<()> {
        if self.maybe_char(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    /// Consume `keyword` if it appears as a whole word.
    pub fn maybe_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let rest = self.rest();
        if !rest.starts_with(keyword) {
            return false;
        }
        let boundary = rest[keyword.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '_'));
        if boundary {
            self.pos += keyword.len();
        }
        boundary
    }

    /// Peek for a keyword without consuming it.
    #[must_use]
    pub fn peek_keyword(&self, keyword: &str) -> bool {
        let mut ahead = Lexer {
            text: self.text,
            pos: self.pos,
        };
        ahead.maybe_keyword(keyword)
    }

    pub fn maybe_identifier(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        self.maybe_regex(&IDENTIFIER)
    }

    /// Dotted name such as `Namespace.Type` or a plain identifier.
    pub fn maybe_qualified_identifier(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        self.maybe_regex(&QUALIFIED)
    }

    /// # Errors
    /// Returns a syntax error when no identifier is next.
    pub fn expect_identifier(&mut self) -> Result<&'a str> {
        self.maybe_identifier()
            .ok_or_else(|| self.error("expected identifier"))
    }

    /// A `$name` system segment or option name.
    pub fn maybe_system_name(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        self.maybe_regex(&SYSTEM_SEGMENT)
    }

    pub fn maybe_unsigned(&mut self) -> Option<u64> {
        self.skip_whitespace();
        let start = self.pos;
        let digits = self.maybe_regex(&UNSIGNED)?;
        match digits.parse() {
            Ok(n) => Some(n),
            Err(_) => {
                self.pos = start;
                None
            }
        }
    }

    /// If the cursor sits on `(`, return the text up to the matching `)`
    /// and move past it. Quoted strings are skipped while balancing.
    pub fn maybe_matching_parenthesis(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        let rest = self.rest();
        if !rest.starts_with('(') {
            return None;
        }
        let mut depth = 0usize;
        let mut in_string = false;
        for (i, c) in rest.char_indices() {
            match c {
                '\'' => in_string = !in_string,
                '(' if !in_string => depth += 1,
                ')' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += i + 1;
                        return Some(&rest[1..i]);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Read any primitive literal.
    ///
    /// # Errors
    /// Returns a syntax error when text shaped like a literal does not
    /// denote a valid value (e.g. `2024-02-30`).
    pub fn maybe_literal(&mut self) -> Result<Option<Value>> {
        self.skip_whitespace();
        let start = self.pos;

        if let Some(quoted) = self.maybe_regex(&STRING) {
            let inner = &quoted[1..quoted.len() - 1];
            return Ok(Some(Value::String(inner.replace("''", "'"))));
        }
        if let Some(caps) = BINARY.captures(self.rest()) {
            let whole = caps.get(0).map_or(0, |m| m.end());
            let payload = caps.get(1).map_or("", |m| m.as_str());
            let bytes = URL_SAFE_NO_PAD
                .decode(payload)
                .map_err(|_| Error::syntax("invalid binary literal", start))?;
            self.pos += whole;
            return Ok(Some(Value::Binary(bytes)));
        }
        if let Some(text) = self.maybe_regex(&GUID) {
            let guid = Uuid::parse_str(text).map_err(|_| Error::syntax("invalid guid", start))?;
            return Ok(Some(Value::Guid(guid)));
        }
        if let Some(caps) = DATETIME.captures(self.rest()) {
            let whole = caps.get(0).map_or(0, |m| m.end());
            let head = caps.get(1).map_or("", |m| m.as_str());
            let seconds = caps.get(2).map_or(":00", |m| m.as_str());
            let zone = caps.get(3).map_or("Z", |m| m.as_str());
            let dt = DateTime::parse_from_rfc3339(&format!("{head}{seconds}{zone}"))
                .map_err(|_| Error::syntax("invalid date-time literal", start))?;
            self.pos += whole;
            return Ok(Some(Value::DateTimeOffset(dt.with_timezone(&Utc))));
        }
        if let Some(text) = self.maybe_regex(&DATE) {
            let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map_err(|_| Error::syntax("invalid date literal", start))?;
            return Ok(Some(Value::Date(date)));
        }
        if let Some(text) = self.maybe_regex(&TIME) {
            let time = NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
                .map_err(|_| Error::syntax("invalid time-of-day literal", start))?;
            return Ok(Some(Value::TimeOfDay(time)));
        }
        if let Some(caps) = NUMBER.captures(self.rest()) {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            let value = if caps.get(2).is_some() {
                Value::Double(
                    f64::from_str(whole).map_err(|_| Error::syntax("invalid number", start))?,
                )
            } else if caps.get(1).is_some() {
                Value::Decimal(
                    BigDecimal::from_str(whole)
                        .map_err(|_| Error::syntax("invalid number", start))?,
                )
            } else if let Ok(i) = whole.parse::<i64>() {
                Value::Int(i)
            } else {
                Value::Decimal(
                    BigDecimal::from_str(whole)
                        .map_err(|_| Error::syntax("invalid number", start))?,
                )
            };
            self.pos += whole.len();
            return Ok(Some(value));
        }

        let keywords = [
            ("null", Value::Null),
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("NaN", Value::Double(f64::NAN)),
            ("INF", Value::Double(f64::INFINITY)),
            ("-INF", Value::Double(f64::NEG_INFINITY)),
        ];
        for (keyword, value) in keywords {
            if self.maybe_keyword(keyword) {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// # Errors
    /// Returns a syntax error if anything but whitespace remains.
    pub fn expect_end(&mut self) -> Result<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error(format!("unexpected '{}'", self.fragment())))
        }
    }

    /// Short excerpt of the remaining text for diagnostics.
    #[must_use]
    pub fn fragment(&self) -> &'a str {
        let rest = self.rest();
        match rest.char_indices().nth(16) {
            Some((i, _)) => &rest[..i],
            None => rest,
        }
    }

    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Error {
        Error::syntax(message, self.pos)
    }
}
