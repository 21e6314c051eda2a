//! The model registry: entity types and entity sets of one service.
//!
//! A [`Model`] is assembled with [`ModelBuilder`] (or from a YAML
//! [`ModelConfig`]), validated once in [`ModelBuilder::build`], and is
//! read-only afterwards. Navigation properties refer to their target and
//! partner by identifier, so cyclic type graphs are resolved through the
//! registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::edm::{EntityType, NavigationProperty, Property};
use crate::entity_set::{Capabilities, Capability, EntitySetDriver};
use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::value::PrimitiveType;

/// A referenced CSDL document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    pub uri: String,
    pub namespace: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{alias}={}", self.namespace),
            None => f.write_str(&self.namespace),
        }
    }
}

/// A registered entity set.
#[derive(Debug)]
pub struct EntitySetDef {
    pub name: Identifier,
    pub entity_type: Arc<EntityType>,
    /// Navigation property name to target entity set name.
    pub bindings: BTreeMap<Identifier, Identifier>,
    pub driver: Arc<dyn EntitySetDriver>,
    /// Driver capabilities, possibly narrowed at registration.
    pub capabilities: Capabilities,
    pub chunk_size: Option<u64>,
}

#[derive(Debug)]
pub struct Model {
    namespace: String,
    alias: Option<String>,
    references: Vec<Reference>,
    types: BTreeMap<Identifier, Arc<EntityType>>,
    sets: BTreeMap<Identifier, Arc<EntitySetDef>>,
}

impl Model {
    #[must_use]
    pub fn builder(namespace: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            namespace: namespace.into(),
            alias: None,
            references: Vec::new(),
            types: Vec::new(),
            sets: Vec::new(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    #[must_use]
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// `Alias.Name` when an alias is declared, else `Namespace.Name`.
    #[must_use]
    pub fn qualified(&self, name: &str) -> String {
        format!("{}.{name}", self.alias.as_deref().unwrap_or(&self.namespace))
    }

    #[must_use]
    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.types.get(name).map(AsRef::as_ref)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.types.values()
    }

    #[must_use]
    pub fn entity_set(&self, name: &str) -> Option<&Arc<EntitySetDef>> {
        self.sets.get(name)
    }

    pub fn entity_sets(&self) -> impl Iterator<Item = &Arc<EntitySetDef>> {
        self.sets.values()
    }

    /// Target set of `navigation` as bound on `set`. Without an explicit
    /// binding the only set of the target type is used.
    ///
    /// # Errors
    /// Returns `Error::Configuration` when no unique target set exists.
    pub fn binding_target(
        &self,
        set: &EntitySetDef,
        navigation: &NavigationProperty,
    ) -> Result<Arc<EntitySetDef>> {
        if let Some(target) = set.bindings.get(&navigation.name) {
            return self.sets.get(target).cloned().ok_or_else(|| {
                Error::configuration(
                    "unknown_entity_set",
                    format!("binding target '{target}' is not registered"),
                )
            });
        }
        let mut candidates = self
            .sets
            .values()
            .filter(|s| s.entity_type.name == navigation.target);
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => Ok(only.clone()),
            _ => Err(Error::configuration(
                "missing_navigation_binding",
                format!(
                    "'{}' has no binding for navigation property '{}'",
                    set.name, navigation.name
                ),
            )),
        }
    }
}

/// Declaration of an entity set, validated when the model is built.
#[derive(Debug)]
pub struct EntitySetBuilder {
    name: String,
    entity_type: String,
    bindings: Vec<(String, String)>,
    driver: Arc<dyn EntitySetDriver>,
    chunk_size: Option<u64>,
    capabilities: Option<Capabilities>,
}

impl EntitySetBuilder {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        driver: Arc<dyn EntitySetDriver>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            bindings: Vec::new(),
            driver,
            chunk_size: None,
            capabilities: None,
        }
    }

    #[must_use]
    pub fn bind(mut self, navigation: impl Into<String>, target_set: impl Into<String>) -> Self {
        self.bindings.push((navigation.into(), target_set.into()));
        self
    }

    #[must_use]
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Narrow the driver's capabilities to `mask`.
    #[must_use]
    pub fn restrict(mut self, mask: Capabilities) -> Self {
        self.capabilities = Some(mask);
        self
    }
}

pub struct ModelBuilder {
    namespace: String,
    alias: Option<String>,
    references: Vec<Reference>,
    types: Vec<EntityType>,
    sets: Vec<EntitySetBuilder>,
}

impl ModelBuilder {
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn reference(mut self, reference: Reference) -> Self {
        self.references.push(reference);
        self
    }

    #[must_use]
    pub fn entity_type(mut self, ty: EntityType) -> Self {
        self.types.push(ty);
        self
    }

    #[must_use]
    pub fn entity_set(mut self, set: EntitySetBuilder) -> Self {
        self.sets.push(set);
        self
    }

    /// Validate every declaration and freeze the model.
    ///
    /// # Errors
    /// Returns `Error::Configuration` for the first violated rule.
    pub fn build(self) -> Result<Model> {
        validate_namespace(&self.namespace)?;
        if let Some(alias) = &self.alias {
            Identifier::new(alias.as_str())?;
        }

        let mut types: BTreeMap<Identifier, Arc<EntityType>> = BTreeMap::new();
        for ty in self.types {
            if ty.key().is_empty() {
                return Err(Error::configuration(
                    "missing_entity_type_key",
                    format!("entity type '{}' declares no key", ty.name),
                ));
            }
            if types.contains_key(&ty.name) {
                return Err(Error::configuration(
                    "duplicate_entity_type",
                    format!("entity type '{}' is registered twice", ty.name),
                ));
            }
            types.insert(ty.name.clone(), Arc::new(ty));
        }
        for ty in types.values() {
            for navigation in ty.navigation_properties() {
                validate_navigation(&types, ty, navigation)?;
            }
        }

        let mut sets: BTreeMap<Identifier, Arc<EntitySetDef>> = BTreeMap::new();
        let set_types: BTreeMap<String, String> = self
            .sets
            .iter()
            .map(|s| (s.name.clone(), s.entity_type.clone()))
            .collect();
        for set in self.sets {
            let def = build_set(&types, &set_types, set)?;
            if sets.contains_key(&def.name) {
                return Err(Error::configuration(
                    "duplicate_entity_set",
                    format!("entity set '{}' is registered twice", def.name),
                ));
            }
            sets.insert(def.name.clone(), Arc::new(def));
        }

        info!(
            namespace = %self.namespace,
            entity_types = types.len(),
            entity_sets = sets.len(),
            "model built"
        );
        Ok(Model {
            namespace: self.namespace,
            alias: self.alias,
            references: self.references,
            types,
            sets,
        })
    }
}

fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.split('.').all(Identifier::is_valid) {
        Ok(())
    } else {
        Err(Error::configuration(
            "invalid_namespace",
            format!("'{namespace}' is not a valid namespace"),
        ))
    }
}

fn validate_navigation(
    types: &BTreeMap<Identifier, Arc<EntityType>>,
    ty: &EntityType,
    navigation: &NavigationProperty,
) -> Result<()> {
    let Some(target) = types.get(&navigation.target) else {
        return Err(Error::configuration(
            "unknown_entity_type",
            format!(
                "navigation property '{}.{}' targets unregistered type '{}'",
                ty.name, navigation.name, navigation.target
            ),
        ));
    };
    if let Some(partner) = &navigation.partner {
        let valid = target
            .navigation(partner.as_str())
            .is_some_and(|p| p.target == ty.name);
        if !valid {
            return Err(Error::configuration(
                "invalid_partner",
                format!(
                    "partner '{partner}' of '{}.{}' is not a navigation property of '{}' back to '{}'",
                    ty.name, navigation.name, target.name, ty.name
                ),
            ));
        }
    }
    for constraint in &navigation.constraints {
        let source_ty = ty.property(constraint.property.as_str()).map(|p| p.ty);
        let target_ty = target
            .property(constraint.referenced_property.as_str())
            .map(|p| p.ty);
        match (source_ty, target_ty) {
            (Some(a), Some(b)) if a == b || (a.is_integral() && b.is_integral()) => {}
            _ => {
                return Err(Error::configuration(
                    "invalid_referential_constraint",
                    format!(
                        "constraint {}.{} -> {}.{} on '{}' does not join properties of one type",
                        ty.name,
                        constraint.property,
                        target.name,
                        constraint.referenced_property,
                        navigation.name
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn build_set(
    types: &BTreeMap<Identifier, Arc<EntityType>>,
    set_types: &BTreeMap<String, String>,
    set: EntitySetBuilder,
) -> Result<EntitySetDef> {
    let name = Identifier::new(set.name.as_str())?;
    let Some(entity_type) = types.get(set.entity_type.as_str()).cloned() else {
        return Err(Error::configuration(
            "unknown_entity_type",
            format!("entity set '{name}' uses unregistered type '{}'", set.entity_type),
        ));
    };

    let mut bindings = BTreeMap::new();
    for (navigation, target) in set.bindings {
        let Some(nav) = entity_type.navigation(&navigation) else {
            return Err(Error::configuration(
                "unknown_navigation_property",
                format!("'{navigation}' is not a navigation property of '{}'", entity_type.name),
            ));
        };
        let target_type = set_types.get(&target).ok_or_else(|| {
            Error::configuration(
                "unknown_entity_set",
                format!("binding target '{target}' of '{name}' is not registered"),
            )
        })?;
        if nav.target != target_type.as_str() {
            return Err(Error::configuration(
                "invalid_navigation_binding",
                format!(
                    "'{name}/{navigation}' targets '{}' but '{target}' holds '{target_type}'",
                    nav.target
                ),
            ));
        }
        bindings.insert(nav.name.clone(), Identifier::new(target)?);
    }

    let offered = set.driver.capabilities();
    let capabilities = match set.capabilities {
        Some(mask) => offered.intersect(mask),
        None => offered,
    };
    for required in [Capability::Read, Capability::Query] {
        if !capabilities.contains(required) {
            return Err(Error::configuration(
                "missing_capability",
                format!("driver of '{name}' does not support {required}"),
            ));
        }
    }

    Ok(EntitySetDef {
        name,
        entity_type,
        bindings,
        driver: set.driver,
        capabilities,
        chunk_size: set.chunk_size,
    })
}

/// How entity sets of a YAML model are backed. Chosen once at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStrategy {
    #[default]
    Memory,
    MemoryReadOnly,
}

/// Creates drivers for entity sets declared in a [`ModelConfig`].
pub trait DriverFactory {
    /// # Errors
    /// Factory-specific failures.
    fn driver(
        &self,
        strategy: DriverStrategy,
        set: &str,
        entity_type: &EntityType,
    ) -> Result<Arc<dyn EntitySetDriver>>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: PrimitiveType,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintConfig {
    pub property: String,
    pub referenced_property: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavigationConfig {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub collection: bool,
    #[serde(default = "default_true")]
    pub expandable: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub partner: Option<String>,
    #[serde(default)]
    pub constraints: Vec<ConstraintConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityTypeConfig {
    pub name: String,
    pub key: Vec<String>,
    pub properties: Vec<PropertyConfig>,
    #[serde(default)]
    pub navigation_properties: Vec<NavigationConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntitySetConfig {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
    #[serde(default)]
    pub driver: DriverStrategy,
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

/// Schema file layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub namespace: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub references: Vec<Reference>,
    pub entity_types: Vec<EntityTypeConfig>,
    pub entity_sets: Vec<EntitySetConfig>,
}

fn default_true() -> bool {
    true
}

impl ModelConfig {
    /// Parse a YAML schema document.
    ///
    /// # Errors
    /// Returns `Error::Configuration` for malformed documents.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_saphyr::from_str(text)
            .map_err(|e| Error::configuration("invalid_model", format!("invalid model file: {e}")))
    }

    /// Build the model, asking `factory` for one driver per entity set.
    ///
    /// # Errors
    /// Returns `Error::Configuration` for invalid declarations.
    pub fn build(&self, factory: &dyn DriverFactory) -> Result<Model> {
        // Keys first, so navigation properties can be declared against any
        // type regardless of order.
        let mut bases: BTreeMap<String, EntityType> = BTreeMap::new();
        for decl in &self.entity_types {
            let mut ty = EntityType::new(Identifier::new(decl.name.as_str())?);
            for p in &decl.properties {
                let mut property = Property::new(Identifier::new(p.name.as_str())?, p.ty);
                property.nullable = p.nullable;
                ty.add_property(property)?;
            }
            let key = decl
                .key
                .iter()
                .map(|k| Identifier::new(k.as_str()))
                .collect::<Result<Vec<_>>>()?;
            ty.set_key(&key)?;
            bases.insert(decl.name.clone(), ty);
        }

        let mut builder = Model::builder(self.namespace.clone());
        if let Some(alias) = &self.alias {
            builder = builder.alias(alias.clone());
        }
        for reference in &self.references {
            builder = builder.reference(reference.clone());
        }

        let mut built: BTreeMap<String, EntityType> = BTreeMap::new();
        for decl in &self.entity_types {
            let Some(mut ty) = bases.get(&decl.name).cloned() else {
                continue;
            };
            for nav in &decl.navigation_properties {
                let Some(target) = bases.get(&nav.target) else {
                    return Err(Error::configuration(
                        "unknown_entity_type",
                        format!(
                            "navigation property '{}.{}' targets unregistered type '{}'",
                            decl.name, nav.name, nav.target
                        ),
                    ));
                };
                let mut navigation =
                    NavigationProperty::new(Identifier::new(nav.name.as_str())?, target)?
                        .expandable(nav.expandable);
                if nav.collection {
                    navigation = navigation.collection();
                }
                if !nav.nullable {
                    navigation = navigation.required();
                }
                if let Some(partner) = &nav.partner {
                    navigation = navigation.partner(Identifier::new(partner.as_str())?);
                }
                for c in &nav.constraints {
                    navigation = navigation.constraint(
                        Identifier::new(c.property.as_str())?,
                        Identifier::new(c.referenced_property.as_str())?,
                    );
                }
                ty.add_navigation_property(navigation)?;
            }
            built.insert(decl.name.clone(), ty.clone());
            builder = builder.entity_type(ty);
        }

        for decl in &self.entity_sets {
            let Some(ty) = built.get(&decl.entity_type) else {
                return Err(Error::configuration(
                    "unknown_entity_type",
                    format!(
                        "entity set '{}' uses unregistered type '{}'",
                        decl.name, decl.entity_type
                    ),
                ));
            };
            let driver = factory.driver(decl.driver, &decl.name, ty)?;
            let mut set = EntitySetBuilder::new(decl.name.clone(), decl.entity_type.clone(), driver);
            for (navigation, target) in &decl.bindings {
                set = set.bind(navigation.clone(), target.clone());
            }
            if let Some(chunk) = decl.chunk_size {
                set = set.chunk_size(chunk);
            }
            builder = builder.entity_set(set);
        }
        builder.build()
    }
}
