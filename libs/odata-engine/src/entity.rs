//! Records, keys and materialized entities.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde_json::Map;

use crate::edm::EntityType;
use crate::entity_set::EntitySet;
use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::pagination::Paginator;
use crate::parser::{KeyPredicate, parse_key};
use crate::value::Value;

/// Raw property values of one stored entity, as exchanged with drivers.
pub type Record = BTreeMap<Identifier, Value>;

/// Key values in the declaration order of the entity type key.
#[derive(Clone, Debug, PartialEq)]
pub struct Key(Vec<(Identifier, Value)>);

impl Key {
    /// Extract the key of a stored record.
    ///
    /// # Errors
    /// Returns `Error::Driver` if the record lacks a key property.
    pub fn from_record(ty: &EntityType, record: &Record) -> Result<Self> {
        ty.key()
            .iter()
            .map(|name| match record.get(name) {
                Some(v) if !v.is_null() => Ok((name.clone(), v.clone())),
                _ => Err(Error::driver(format!(
                    "record of '{}' has no value for key property '{name}'",
                    ty.name
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Key)
    }

    /// Build a key from parsed predicate text, coercing each value to the
    /// declared key property type.
    ///
    /// # Errors
    /// Returns `Error::BadRequest` with code `invalid_key` when names or
    /// types do not match the key of `ty`.
    pub fn from_predicate(ty: &EntityType, predicate: KeyPredicate) -> Result<Self> {
        let invalid = |message: String| Error::bad_request("invalid_key", message);
        let key_props = ty.key_properties();
        let pairs: Vec<(String, Value)> = match predicate {
            KeyPredicate::Single(value) => {
                let [only] = key_props.as_slice() else {
                    return Err(invalid(format!(
                        "'{}' has a composite key; name every key property",
                        ty.name
                    )));
                };
                vec![(only.name.to_string(), value)]
            }
            KeyPredicate::Named(pairs) => pairs,
        };
        if pairs.len() != key_props.len() {
            return Err(invalid(format!(
                "'{}' expects {} key values, got {}",
                ty.name,
                key_props.len(),
                pairs.len()
            )));
        }
        let mut values = Vec::with_capacity(key_props.len());
        for property in key_props {
            let Some((_, value)) = pairs.iter().find(|(n, _)| property.name == n.as_str()) else {
                return Err(invalid(format!("missing key property '{}'", property.name)));
            };
            let value = value.clone().coerce_to(property.ty).map_err(|_| {
                invalid(format!(
                    "{value} is not a valid value for key property '{}' ({})",
                    property.name, property.ty
                ))
            })?;
            values.push((property.name.clone(), value));
        }
        Ok(Key(values))
    }

    /// Parse the text between the parentheses of `Set(...)`.
    ///
    /// # Errors
    /// Returns `Error::BadRequest` on malformed or mistyped key text.
    pub fn parse(ty: &EntityType, text: &str) -> Result<Self> {
        Key::from_predicate(ty, parse_key(text)?)
    }

    #[must_use]
    pub fn values(&self) -> &[(Identifier, Value)] {
        &self.0
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Whether `record` carries exactly these key values.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.0.iter().all(|(name, value)| {
            record
                .get(name)
                .and_then(|v| v.compare(value))
                .is_some_and(|o| o == Ordering::Equal)
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [(_, value)] => write!(f, "({value})"),
            pairs => {
                let parts: Vec<String> = pairs.iter().map(|(n, v)| format!("{n}={v}")).collect();
                write!(f, "({})", parts.join(","))
            }
        }
    }
}

#[derive(Debug)]
pub enum PropertyContent {
    Primitive(Value),
    /// Single-valued navigation; `None` renders as `null`.
    Entity(Option<Box<Entity>>),
    /// Collection-valued navigation, positioned for iteration and rendered
    /// lazily.
    Collection(Box<EntitySet>),
}

#[derive(Debug)]
pub struct PropertyValue {
    pub name: Identifier,
    pub content: PropertyContent,
}

/// A materialized entity: selected primitive values plus expansions.
#[derive(Debug)]
pub struct Entity {
    set: Identifier,
    key: Key,
    properties: Vec<PropertyValue>,
}

impl Entity {
    #[must_use]
    pub fn new(set: Identifier, key: Key, properties: Vec<PropertyValue>) -> Self {
        Self {
            set,
            key,
            properties,
        }
    }

    #[must_use]
    pub fn set(&self) -> &Identifier {
        &self.set
    }

    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    #[must_use]
    pub fn properties(&self) -> &[PropertyValue] {
        &self.properties
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyContent> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.content)
    }

    /// Primitive value of a property; `None` if absent or not primitive.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.get(name)? {
            PropertyContent::Primitive(v) => Some(v),
            _ => None,
        }
    }

    /// Entity identity, `Set(key)`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}{}", self.set, self.key)
    }

    /// Render as a JSON object. Collection expansions are materialized here
    /// as their first page, with a next link when more entities remain.
    ///
    /// # Errors
    /// Propagates driver and skip-token errors from collection expansions.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut object = Map::new();
        for property in &self.properties {
            let name = property.name.to_string();
            match &property.content {
                PropertyContent::Primitive(v) => {
                    object.insert(name, v.to_json());
                }
                PropertyContent::Entity(None) => {
                    object.insert(name, serde_json::Value::Null);
                }
                PropertyContent::Entity(Some(entity)) => {
                    object.insert(name, entity.to_json()?);
                }
                PropertyContent::Collection(set) => {
                    let mut pager = Paginator::new(set)?;
                    let page = pager.next_page()?.unwrap_or_default();
                    if let Some(count) = page.count {
                        object.insert(format!("{name}@odata.count"), count.into());
                    }
                    let items = page
                        .entities
                        .iter()
                        .map(Entity::to_json)
                        .collect::<Result<Vec<_>>>()?;
                    if let Some(token) = &page.skiptoken
                        && let Some(link) = set.expansion_next_link(token)?
                    {
                        object.insert(format!("{name}@odata.nextLink"), link.into());
                    }
                    object.insert(name, serde_json::Value::Array(items));
                }
            }
        }
        Ok(serde_json::Value::Object(object))
    }
}
