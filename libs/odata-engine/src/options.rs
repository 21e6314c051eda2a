//! Parsed system query options.

use std::fmt;

use crate::ast::{Expr, OrderItem, Select};
use crate::error::{Error, Result};
use crate::limits::QueryLimits;
use crate::parser;

/// The system query options of one request or one `$expand` item.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    pub filter: Option<Expr>,
    pub orderby: Vec<OrderItem>,
    pub select: Option<Select>,
    pub expand: Vec<ExpandItem>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub count: bool,
    pub skiptoken: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExpandItem {
    pub navigation: String,
    pub options: QueryOptions,
}

impl QueryOptions {
    /// Parse decoded `$name=value` pairs. Names without a `$` prefix are
    /// ignored; they are custom parameters.
    ///
    /// # Errors
    /// Returns `Error::BadRequest` for unknown, duplicated, malformed or
    /// oversize options.
    pub fn from_pairs<'p>(
        pairs: impl IntoIterator<Item = (&'p str, &'p str)>,
        limits: &QueryLimits,
    ) -> Result<Self> {
        let mut options = QueryOptions::default();
        let mut seen: Vec<&str> = Vec::new();
        for (name, value) in pairs {
            if !name.starts_with('$') || name == "$id" {
                continue;
            }
            if seen.contains(&name) {
                return Err(Error::bad_request(
                    "duplicate_query_option",
                    format!("query option '{name}' is specified twice"),
                ));
            }
            seen.push(name);
            match name {
                "$filter" => {
                    limits.validate_filter_length(value)?;
                    options.filter = Some(parser::parse_filter(value)?);
                }
                "$orderby" => options.orderby = parser::parse_orderby(value)?,
                "$select" => options.select = Some(parser::parse_select(value)?),
                "$expand" => options.expand = parser::parse_expand(value)?,
                "$top" => options.top = Some(parser::parse_unsigned(value)?),
                "$skip" => options.skip = Some(parser::parse_unsigned(value)?),
                "$count" => options.count = parser::parse_bool(value)?,
                "$skiptoken" => options.skiptoken = Some(value.to_owned()),
                "$format" if value == "json" || value == "application/json" => {}
                other => {
                    return Err(Error::bad_request(
                        "unsupported_query_option",
                        format!("query option '{other}' is not supported"),
                    ));
                }
            }
        }
        options.validate(limits, 0)?;
        Ok(options)
    }

    /// Check complexity budgets for these options and every nested
    /// expansion. `depth` is the expansion depth of `self`; filters below
    /// the top level are length-checked here.
    ///
    /// # Errors
    /// Returns `Error::BadRequest` for the first exceeded limit.
    pub fn validate(&self, limits: &QueryLimits, depth: usize) -> Result<()> {
        limits.validate_expand_depth(depth)?;
        if let Some(filter) = &self.filter {
            limits.validate_filter_nodes(filter.node_count())?;
            // Nested filters have no raw text of their own; measure the
            // canonical rendering instead.
            if depth > 0 {
                limits.validate_filter_length(&filter.to_string())?;
            }
        }
        limits.validate_orderby_count(self.orderby.len())?;
        if let Some(Select::Properties(paths)) = &self.select {
            limits.validate_select_count(paths.len())?;
        }
        for item in &self.expand {
            item.options.validate(limits, depth + 1)?;
        }
        Ok(())
    }

    /// Deepest expansion below these options; zero without `$expand`.
    #[must_use]
    pub fn expand_depth(&self) -> usize {
        self.expand
            .iter()
            .map(|item| 1 + item.options.expand_depth())
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == QueryOptions::default()
    }

    /// Options as canonical `(name, value)` pairs, `$skiptoken` excluded.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(filter) = &self.filter {
            pairs.push(("$filter", filter.to_string()));
        }
        if !self.orderby.is_empty() {
            let items: Vec<String> = self.orderby.iter().map(ToString::to_string).collect();
            pairs.push(("$orderby", items.join(",")));
        }
        if let Some(select) = &self.select {
            pairs.push(("$select", select.to_string()));
        }
        if !self.expand.is_empty() {
            let items: Vec<String> = self.expand.iter().map(ToString::to_string).collect();
            pairs.push(("$expand", items.join(",")));
        }
        if let Some(top) = self.top {
            pairs.push(("$top", top.to_string()));
        }
        if let Some(skip) = self.skip {
            pairs.push(("$skip", skip.to_string()));
        }
        if self.count {
            pairs.push(("$count", "true".to_owned()));
        }
        pairs
    }
}

/// Options rendered in the `;`-separated form used inside `$expand`.
impl fmt::Display for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .to_pairs()
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        f.write_str(&parts.join(";"))
    }
}

impl fmt::Display for ExpandItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.options.is_empty() {
            f.write_str(&self.navigation)
        } else {
            write!(f, "{}({})", self.navigation, self.options)
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn parse(pairs: &[(&str, &str)]) -> Result<QueryOptions> {
        QueryOptions::from_pairs(pairs.iter().copied(), &QueryLimits::default())
    }

    #[test]
    fn parses_every_system_option() {
        let options = parse(&[
            ("$filter", "type eq 'dog'"),
            ("$orderby", "name desc"),
            ("$select", "name"),
            ("$expand", "Owner"),
            ("$top", "15"),
            ("$skip", "2"),
            ("$count", "true"),
            ("$skiptoken", "abc"),
            ("id", "Pets(1)"),
        ])
        .unwrap();
        assert!(options.filter.is_some());
        assert_eq!(options.top, Some(15));
        assert_eq!(options.skip, Some(2));
        assert!(options.count);
        assert_eq!(options.skiptoken.as_deref(), Some("abc"));
        assert_eq!(options.expand.len(), 1);
    }

    #[test]
    fn rejects_unknown_and_duplicate_options() {
        assert_eq!(
            parse(&[("$search", "x")]).unwrap_err().code(),
            "unsupported_query_option"
        );
        assert_eq!(
            parse(&[("$top", "1"), ("$top", "2")]).unwrap_err().code(),
            "duplicate_query_option"
        );
        assert!(parse(&[("$top", "-1")]).is_err());
        assert!(parse(&[("$count", "yes")]).is_err());
    }

    #[test]
    fn enforces_expand_depth() {
        let limits = QueryLimits::default().with_max_expand_depth(1);
        let ok = QueryOptions::from_pairs([("$expand", "Owner")], &limits);
        assert!(ok.is_ok());
        let err = QueryOptions::from_pairs([("$expand", "Owner($expand=MyPets)")], &limits)
            .unwrap_err();
        assert_eq!(err.code(), "expand_too_deep");
    }

    #[test]
    fn enforces_filter_budgets() {
        let limits = QueryLimits::default().with_max_filter_nodes(3);
        assert!(QueryOptions::from_pairs([("$filter", "a eq 1")], &limits).is_ok());
        let err =
            QueryOptions::from_pairs([("$filter", "a eq 1 and b eq 2")], &limits).unwrap_err();
        assert_eq!(err.code(), "filter_too_complex");
    }

    #[test]
    fn nested_filters_obey_the_length_limit() {
        let limits = QueryLimits::default().with_max_filter_length(20);
        let ok = QueryOptions::from_pairs([("$expand", "MyPets($filter=id eq 1)")], &limits);
        assert!(ok.is_ok());
        let long = format!("MyPets($filter=name eq '{}')", "x".repeat(40));
        let err = QueryOptions::from_pairs([("$expand", long.as_str())], &limits).unwrap_err();
        assert_eq!(err.code(), "filter_too_long");
    }

    #[test]
    fn expand_items_render_back_to_parsable_text() {
        let items =
            parser::parse_expand("MyPets($filter=type eq 'dog';$top=2;$count=true),Owner").unwrap();
        let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered.join(","),
            "MyPets($filter=type eq 'dog';$top=2;$count=true),Owner"
        );
        assert_eq!(parser::parse_expand(&rendered.join(",")).unwrap(), items);
    }
}
