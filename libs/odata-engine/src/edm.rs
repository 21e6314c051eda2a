//! Entity data model: entity types, properties and navigation properties.
//!
//! Schema objects are assembled once and become immutable when they are
//! registered with a [`crate::model::Model`]. Navigation properties name
//! their target type by identifier; the type graph may be cyclic and is
//! resolved through the model registry.

use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::value::PrimitiveType;

/// A primitive, structural property of an entity type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub name: Identifier,
    pub ty: PrimitiveType,
    pub nullable: bool,
}

impl Property {
    #[must_use]
    pub fn new(name: Identifier, ty: PrimitiveType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// `property` on the owning type must equal `referenced_property` on the
/// target type for two entities to be related.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferentialConstraint {
    pub property: Identifier,
    pub referenced_property: Identifier,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigationProperty {
    pub name: Identifier,
    pub target: Identifier,
    pub collection: bool,
    pub expandable: bool,
    pub nullable: bool,
    pub partner: Option<Identifier>,
    pub constraints: Vec<ReferentialConstraint>,
}

impl NavigationProperty {
    /// Declare a navigation property pointing at `target`.
    ///
    /// # Errors
    /// Returns `Error::Configuration` with code `missing_entity_type_key` if
    /// the target type has no key: a keyless target can never be addressed.
    pub fn new(name: Identifier, target: &EntityType) -> Result<Self> {
        if target.key.is_empty() {
            return Err(Error::configuration(
                "missing_entity_type_key",
                format!(
                    "navigation property '{name}' targets entity type '{}' which has no key",
                    target.name
                ),
            ));
        }
        Ok(Self {
            name,
            target: target.name.clone(),
            collection: false,
            expandable: true,
            nullable: true,
            partner: None,
            constraints: Vec::new(),
        })
    }

    #[must_use]
    pub fn collection(mut self) -> Self {
        self.collection = true;
        self
    }

    #[must_use]
    pub fn expandable(mut self, expandable: bool) -> Self {
        self.expandable = expandable;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn partner(mut self, partner: Identifier) -> Self {
        self.partner = Some(partner);
        self
    }

    #[must_use]
    pub fn constraint(mut self, property: Identifier, referenced_property: Identifier) -> Self {
        self.constraints.push(ReferentialConstraint {
            property,
            referenced_property,
        });
        self
    }
}

/// Ordered properties, a key and navigation properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityType {
    pub name: Identifier,
    properties: Vec<Property>,
    key: Vec<Identifier>,
    navigation_properties: Vec<NavigationProperty>,
}

impl EntityType {
    #[must_use]
    pub fn new(name: Identifier) -> Self {
        Self {
            name,
            properties: Vec::new(),
            key: Vec::new(),
            navigation_properties: Vec::new(),
        }
    }

    /// # Errors
    /// Returns `Error::Configuration` if the name is already declared.
    pub fn add_property(&mut self, property: Property) -> Result<()> {
        self.ensure_unique(&property.name)?;
        self.properties.push(property);
        Ok(())
    }

    /// Designate the key. Key properties become non-nullable.
    ///
    /// # Errors
    /// Returns `Error::Configuration` if a key name is not a declared
    /// property or the key is empty.
    pub fn set_key(&mut self, names: &[Identifier]) -> Result<()> {
        if names.is_empty() {
            return Err(Error::configuration(
                "empty_key",
                format!("entity type '{}' declares an empty key", self.name),
            ));
        }
        for name in names {
            let property = self
                .properties
                .iter_mut()
                .find(|p| &p.name == name)
                .ok_or_else(|| {
                    Error::configuration(
                        "unknown_key_property",
                        format!("key property '{name}' is not declared on '{}'", self.name),
                    )
                })?;
            property.nullable = false;
        }
        self.key = names.to_vec();
        Ok(())
    }

    /// # Errors
    /// Returns `Error::Configuration` if the name is already declared.
    pub fn add_navigation_property(&mut self, navigation: NavigationProperty) -> Result<()> {
        self.ensure_unique(&navigation.name)?;
        self.navigation_properties.push(navigation);
        Ok(())
    }

    /// Chaining form of [`EntityType::add_property`].
    ///
    /// # Errors
    /// See [`EntityType::add_property`].
    pub fn with_property(mut self, name: &str, ty: PrimitiveType, nullable: bool) -> Result<Self> {
        let mut property = Property::new(Identifier::new(name)?, ty);
        property.nullable = nullable;
        self.add_property(property)?;
        Ok(self)
    }

    /// Chaining form of [`EntityType::set_key`].
    ///
    /// # Errors
    /// See [`EntityType::set_key`].
    pub fn with_key(mut self, names: &[&str]) -> Result<Self> {
        let names = names
            .iter()
            .map(|n| Identifier::new(*n))
            .collect::<Result<Vec<_>>>()?;
        self.set_key(&names)?;
        Ok(self)
    }

    /// Chaining form of [`EntityType::add_navigation_property`].
    ///
    /// # Errors
    /// See [`EntityType::add_navigation_property`].
    pub fn with_navigation(mut self, navigation: NavigationProperty) -> Result<Self> {
        self.add_navigation_property(navigation)?;
        Ok(self)
    }

    fn ensure_unique(&self, name: &Identifier) -> Result<()> {
        if self.property(name.as_str()).is_some() || self.navigation(name.as_str()).is_some() {
            return Err(Error::configuration(
                "duplicate_property",
                format!("'{name}' is declared twice on '{}'", self.name),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    #[must_use]
    pub fn key(&self) -> &[Identifier] {
        &self.key
    }

    #[must_use]
    pub fn navigation_properties(&self) -> &[NavigationProperty] {
        &self.navigation_properties
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn navigation(&self, name: &str) -> Option<&NavigationProperty> {
        self.navigation_properties.iter().find(|n| n.name == name)
    }

    #[must_use]
    pub fn key_properties(&self) -> Vec<&Property> {
        self.key
            .iter()
            .filter_map(|k| self.property(k.as_str()))
            .collect()
    }

    #[must_use]
    pub fn is_key(&self, name: &str) -> bool {
        self.key.iter().any(|k| k == name)
    }
}
