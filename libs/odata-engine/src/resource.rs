//! Resource path parsing: `Set(key)/Nav(key)/$ref`, `$count`, `$metadata`.

use std::fmt;

use crate::error::Result;
use crate::lexer::Lexer;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    /// Raw key predicate text between the parentheses.
    pub key: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suffix {
    Count,
    Ref,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourcePath {
    ServiceDocument,
    Metadata,
    Resource {
        segments: Vec<Segment>,
        suffix: Option<Suffix>,
    },
}

impl ResourcePath {
    /// Parse a path relative to the service root.
    ///
    /// # Errors
    /// Returns a syntax error for malformed paths and unknown `$` segments.
    pub fn parse(path: &str) -> Result<Self> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Ok(ResourcePath::ServiceDocument);
        }
        let mut lexer = Lexer::new(path);
        let mut segments = Vec::new();
        let mut suffix = None;
        loop {
            let start = lexer.offset();
            if let Some(system) = lexer.maybe_system_name() {
                suffix = Some(match system {
                    "$metadata" if segments.is_empty() => {
                        lexer.expect_end()?;
                        return Ok(ResourcePath::Metadata);
                    }
                    "$count" if !segments.is_empty() => Suffix::Count,
                    "$ref" if !segments.is_empty() => Suffix::Ref,
                    other => {
                        lexer.rewind(start);
                        return Err(lexer.error(format!("unexpected segment '{other}'")));
                    }
                });
                lexer.expect_end()?;
                break;
            }
            let name = lexer.expect_identifier()?.to_owned();
            let key = lexer.maybe_matching_parenthesis().map(ToOwned::to_owned);
            segments.push(Segment { name, key });
            if lexer.at_end() {
                break;
            }
            lexer.expect_char('/')?;
        }
        Ok(ResourcePath::Resource { segments, suffix })
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePath::ServiceDocument => Ok(()),
            ResourcePath::Metadata => f.write_str("$metadata"),
            ResourcePath::Resource { segments, suffix } => {
                let mut parts: Vec<String> = segments
                    .iter()
                    .map(|s| match &s.key {
                        Some(key) => format!("{}({key})", s.name),
                        None => s.name.clone(),
                    })
                    .collect();
                match suffix {
                    Some(Suffix::Count) => parts.push("$count".to_owned()),
                    Some(Suffix::Ref) => parts.push("$ref".to_owned()),
                    None => {}
                }
                f.write_str(&parts.join("/"))
            }
        }
    }
}
