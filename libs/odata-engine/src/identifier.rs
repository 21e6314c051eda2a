//! Validated schema names.

use std::borrow::Borrow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

#[allow(clippy::expect_used)] // literal pattern, compiles
static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex should not panic")
});

/// A simple identifier: letters, digits and underscore, not starting with a
/// digit. Equality is by value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// # Errors
    /// Returns `Error::Configuration` if `name` is not a valid identifier.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Identifier(name))
        } else {
            Err(Error::configuration(
                "invalid_identifier",
                format!("'{name}' is not a valid identifier"),
            ))
        }
    }

    #[must_use]
    pub fn is_valid(name: &str) -> bool {
        IDENTIFIER_RE.is_match(name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl TryFrom<&str> for Identifier {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Identifier::new(value)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Identifier::new(raw).map_err(serde::de::Error::custom)
    }
}

/// A namespace-qualified name such as `com.example.Pet`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub namespace: String,
    pub name: Identifier,
}

impl QualifiedName {
    /// Split `Namespace.Name` at the last dot; every dotted part must be an
    /// identifier.
    ///
    /// # Errors
    /// Returns `Error::Configuration` if any segment is not an identifier.
    pub fn parse(text: &str) -> Result<Self> {
        let Some((namespace, name)) = text.rsplit_once('.') else {
            return Err(Error::configuration(
                "invalid_qualified_name",
                format!("'{text}' is not namespace-qualified"),
            ));
        };
        if !namespace.split('.').all(Identifier::is_valid) {
            return Err(Error::configuration(
                "invalid_qualified_name",
                format!("'{namespace}' is not a valid namespace"),
            ));
        }
        Ok(QualifiedName {
            namespace: namespace.to_owned(),
            name: Identifier::new(name)?,
        })
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn accepts_letters_digits_and_underscore() {
        assert!(Identifier::new("Pets").is_ok());
        assert!(Identifier::new("_owner_id2").is_ok());
    }

    #[test]
    fn rejects_leading_digit_and_symbols() {
        assert!(matches!(
            Identifier::new("2pets"),
            Err(Error::Configuration { .. })
        ));
        assert!(Identifier::new("pet-name").is_err());
        assert!(Identifier::new("").is_err());
    }

    #[test]
    fn equality_is_by_value() {
        let a = Identifier::new("name").unwrap();
        let b = Identifier::new(String::from("name")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "name");
    }

    #[test]
    fn qualified_name_splits_at_last_dot() {
        let q = QualifiedName::parse("com.example.Pet").unwrap();
        assert_eq!(q.namespace, "com.example");
        assert_eq!(q.name, "Pet");
        assert_eq!(q.to_string(), "com.example.Pet");
        assert!(QualifiedName::parse("Pet").is_err());
        assert!(QualifiedName::parse("com.9x.Pet").is_err());
    }

    #[test]
    fn deserializes_with_validation() {
        let ok: Identifier = serde_json::from_str("\"Owner\"").unwrap();
        assert_eq!(ok.as_str(), "Owner");
        assert!(serde_json::from_str::<Identifier>("\"Own er\"").is_err());
    }
}
