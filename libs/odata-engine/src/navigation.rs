//! Navigation resolution, expansion and relationship maintenance.
//!
//! Two entities are related through a navigation property when, for every
//! referential constraint, the referenced property of the target equals the
//! constrained property of the source. The foreign key lives on the source
//! when the referenced properties form the target key, otherwise on the
//! target.

use tracing::{debug, info};

use crate::ast::BinaryOp;
use crate::edm::{EntityType, NavigationProperty};
use crate::entity::{Key, PropertyContent, PropertyValue, Record};
use crate::entity_set::{Capability, EntitySet, LinkChange, NavigationSource};
use crate::error::{Error, Result};
use crate::eval::BoundExpr;
use crate::identifier::Identifier;
use crate::options::ExpandItem;
use crate::transaction::Transaction;
use crate::value::Value;

/// Where an explicit navigation target came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSource {
    InlineKey,
    IdParameter,
    BodyReference,
}

/// Outcome of resolving a navigation property for one source entity.
#[derive(Debug)]
pub enum Resolved {
    Entity(Option<crate::entity::Entity>),
    Collection(EntitySet),
}

/// Whether the foreign key of `navigation` is stored on the source entity.
#[must_use]
pub fn foreign_key_on_source(navigation: &NavigationProperty, target: &EntityType) -> bool {
    !navigation.constraints.is_empty()
        && navigation
            .constraints
            .iter()
            .all(|c| target.is_key(c.referenced_property.as_str()))
}

/// Restriction a navigation source puts on its target set.
///
/// # Errors
/// Returns `Error::Configuration` when the navigation property declares no
/// referential constraints or names unknown target properties.
pub fn scope_filter(source: &NavigationSource, target: &EntityType) -> Result<BoundExpr> {
    let navigation = &source.navigation;
    if navigation.constraints.is_empty() {
        return Err(Error::configuration(
            "missing_referential_constraint",
            format!("navigation property '{}' has no referential constraints", navigation.name),
        ));
    }
    let mut parts = Vec::with_capacity(navigation.constraints.len());
    for constraint in &navigation.constraints {
        let Some(property) = target.property(constraint.referenced_property.as_str()) else {
            return Err(Error::configuration(
                "unknown_constraint_property",
                format!(
                    "'{}' is not a property of '{}'",
                    constraint.referenced_property, target.name
                ),
            ));
        };
        let value = source
            .record
            .get(&constraint.property)
            .cloned()
            .unwrap_or(Value::Null);
        // A null foreign key relates to nothing.
        if value.is_null() {
            return Ok(BoundExpr::Literal(Value::Bool(false)));
        }
        parts.push(BoundExpr::Compare(
            BinaryOp::Eq,
            Box::new(BoundExpr::Property(property.name.clone(), property.ty)),
            Box::new(BoundExpr::Literal(value)),
        ));
    }
    BoundExpr::conjunction(parts).ok_or_else(|| {
        Error::configuration("missing_referential_constraint", "empty constraint list")
    })
}

/// Clone the bound target set of `name` and attach the source entity.
///
/// # Errors
/// `BadRequest` for unknown navigation properties, `Configuration` when the
/// set has no binding for it.
pub fn navigate(
    source: &EntitySet,
    record: &Record,
    name: &str,
    transaction: Transaction,
) -> Result<EntitySet> {
    let Some(navigation) = source.entity_type().navigation(name) else {
        return Err(Error::bad_request(
            "unknown_navigation_property",
            format!("'{name}' is not a navigation property of '{}'", source.entity_type().name),
        ));
    };
    let ctx = source.context();
    let target = ctx.model.binding_target(source.definition(), navigation)?;
    Ok(EntitySet::new(ctx.clone(), target, transaction).with_source(NavigationSource {
        set: source.definition().clone(),
        navigation: navigation.clone(),
        record: record.clone(),
    }))
}

/// Parse an entity reference `[<base>/][<route>/]<Set>(<key>)` addressed at
/// `target`.
///
/// # Errors
/// Returns `Error::BadRequest` with code `navigation_reference_invalid` when
/// the reference is malformed or names another entity set.
pub fn parse_reference(target: &EntitySet, reference: &str) -> Result<Key> {
    let invalid = |why: &str| {
        Error::bad_request(
            "navigation_reference_invalid",
            format!("invalid entity reference '{reference}': {why}"),
        )
    };
    let endpoint = &target.context().config.endpoint;
    let mut text = reference.trim();
    let url = endpoint.endpoint_url();
    if let Some(rest) = text.strip_prefix(url.as_str()) {
        text = rest;
    }
    text = text.trim_start_matches('/');
    let route = endpoint.route();
    if let Some(rest) = text.strip_prefix(route.as_str()) {
        text = rest.trim_start_matches('/');
    }
    let Some((set, key)) = text.split_once('(') else {
        return Err(invalid("expected <set>(<key>)"));
    };
    let Some(key) = key.strip_suffix(')') else {
        return Err(invalid("unbalanced parentheses"));
    };
    if target.name() != set {
        return Err(invalid(&format!("expected an entity of '{}'", target.name())));
    }
    Key::parse(target.entity_type(), key)
}

/// Explicit target identity for a navigation: inline segment key, then the
/// `id` query parameter, then the body `@odata.id` (not for GET). The first
/// one present wins.
///
/// # Errors
/// Returns `Error::BadRequest` for malformed identities.
pub fn explicit_target(
    target: &EntitySet,
    inline_key: Option<&str>,
) -> Result<Option<(Key, TargetSource)>> {
    if let Some(text) = inline_key {
        return Ok(Some((target.key(text)?, TargetSource::InlineKey)));
    }
    let transaction = target.transaction();
    if let Some(id) = transaction.param("$id").or_else(|| transaction.param("id")) {
        return Ok(Some((parse_reference(target, id)?, TargetSource::IdParameter)));
    }
    if transaction.method != http::Method::GET
        && let Some(id) = transaction
            .body
            .as_ref()
            .and_then(|b| b.get("@odata.id"))
            .and_then(serde_json::Value::as_str)
    {
        return Ok(Some((parse_reference(target, id)?, TargetSource::BodyReference)));
    }
    Ok(None)
}

/// Resolve a navigation-scoped target set: an explicit target wins, then a
/// collection stays lazy, then a single navigation yields its first match.
/// A missing explicit target falls through to the scoped result.
///
/// # Errors
/// Propagates parse and driver errors.
pub fn resolve(target: EntitySet, inline_key: Option<&str>) -> Result<Resolved> {
    if let Some((key, origin)) = explicit_target(&target, inline_key)? {
        match target.read_record(&key) {
            Ok(record) => {
                let select = target.plan()?.select;
                return Ok(Resolved::Entity(Some(
                    target.materialize(record, select.as_deref())?,
                )));
            }
            Err(err) if err.is_not_found() => {
                debug!(set = %target.name(), key = %key, ?origin, "explicit navigation target not found");
            }
            Err(err) => return Err(err),
        }
    }
    let collection = target
        .source()
        .is_some_and(|source| source.navigation.collection);
    if collection {
        Ok(Resolved::Collection(target))
    } else {
        Ok(Resolved::Entity(target.first()?))
    }
}

/// Expand one `$expand` item for a materialized source record.
///
/// # Errors
/// `BadRequest` for unknown or non-expandable navigation properties and
/// when the expansion nests deeper than the configured limit.
pub fn expand(set: &EntitySet, record: &Record, item: &ExpandItem) -> Result<PropertyValue> {
    let child = set.transaction().for_expansion(item);
    set.context()
        .config
        .limits
        .validate_expand_depth(child.depth)?;
    let target = navigate(set, record, &item.navigation, child)?;
    let Some(source) = target.source() else {
        return Err(Error::driver("navigation target lost its source"));
    };
    if !source.navigation.expandable {
        return Err(Error::bad_request(
            "navigation_not_expandable",
            format!("navigation property '{}' cannot be expanded", source.navigation.name),
        ));
    }
    let name = source.navigation.name.clone();
    debug!(
        set = %set.name(),
        navigation = %name,
        depth = target.transaction().depth,
        "expanding navigation property"
    );
    let content = match resolve(target, None)? {
        Resolved::Entity(entity) => PropertyContent::Entity(entity.map(Box::new)),
        Resolved::Collection(set) => PropertyContent::Collection(Box::new(set)),
    };
    Ok(PropertyValue { name, content })
}

fn same(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.compare(b) == Some(std::cmp::Ordering::Equal),
        _ => false,
    }
}

struct Relationship {
    source_key: Key,
    source_record: Record,
    target: EntitySet,
    fk_on_source: bool,
}

impl Relationship {
    fn open(source: &EntitySet, source_key: &Key, navigation: &str) -> Result<Self> {
        let source_record = source.read_scoped(source_key)?;
        let target = navigate(source, &source_record, navigation, source.transaction().clone())?;
        let fk_on_source = target
            .source()
            .is_some_and(|s| foreign_key_on_source(&s.navigation, target.entity_type()));
        Ok(Self {
            source_key: source_key.clone(),
            source_record,
            target,
            fk_on_source,
        })
    }

    fn navigation(&self) -> Result<&NavigationProperty> {
        self.target
            .source()
            .map(|s| &s.navigation)
            .ok_or_else(|| Error::driver("navigation target lost its source"))
    }

    fn is_related(&self, target_record: &Record) -> Result<bool> {
        let navigation = self.navigation()?;
        Ok(navigation.constraints.iter().all(|c| {
            same(
                self.source_record.get(&c.property),
                target_record.get(&c.referenced_property),
            )
        }))
    }

    /// The change that points the foreign key at `target_record`, or clears
    /// it.
    fn change(&self, target_record: &Record, clear: bool) -> Result<LinkChange> {
        let navigation = self.navigation()?;
        let pick = |record: &Record, name: &Identifier| {
            if clear {
                Value::Null
            } else {
                record.get(name).cloned().unwrap_or(Value::Null)
            }
        };
        if self.fk_on_source {
            Ok(LinkChange {
                key: self.source_key.clone(),
                assignments: navigation
                    .constraints
                    .iter()
                    .map(|c| (c.property.clone(), pick(target_record, &c.referenced_property)))
                    .collect(),
            })
        } else {
            Ok(LinkChange {
                key: Key::from_record(self.target.entity_type(), target_record)?,
                assignments: navigation
                    .constraints
                    .iter()
                    .map(|c| (c.referenced_property.clone(), pick(&self.source_record, &c.property)))
                    .collect(),
            })
        }
    }

    fn optional(&self) -> Result<bool> {
        let navigation = self.navigation()?;
        let optional = if self.fk_on_source {
            let Some(source) = self.target.source() else {
                return Err(Error::driver("navigation target lost its source"));
            };
            navigation.constraints.iter().all(|c| {
                source
                    .set
                    .entity_type
                    .property(c.property.as_str())
                    .is_some_and(|p| p.nullable)
            })
        } else {
            navigation.constraints.iter().all(|c| {
                self.target
                    .entity_type()
                    .property(c.referenced_property.as_str())
                    .is_some_and(|p| p.nullable)
            })
        };
        Ok(optional)
    }

    fn apply(&self, change: &LinkChange, unlink: bool) -> Result<()> {
        let def = if self.fk_on_source {
            let Some(source) = self.target.source() else {
                return Err(Error::driver("navigation target lost its source"));
            };
            source.set.clone()
        } else {
            self.target.definition().clone()
        };
        def.capabilities.require(Capability::Link)?;
        if unlink {
            def.driver.unlink(change)
        } else {
            def.driver.link(change)
        }
    }
}

/// Relate `source(source_key)` to the explicit target named by the request.
///
/// # Errors
/// `NotFound` for missing source or target entities, `BadRequest` when no
/// target identity is given, `NotImplemented` when the set owning the
/// foreign key cannot link.
pub fn link(
    source: &EntitySet,
    source_key: &Key,
    navigation: &str,
    inline_key: Option<&str>,
) -> Result<()> {
    let relationship = Relationship::open(source, source_key, navigation)?;
    let Some((key, origin)) = explicit_target(&relationship.target, inline_key)? else {
        return Err(Error::bad_request(
            "missing_reference",
            "no target entity given; supply $id or @odata.id",
        ));
    };
    let target_record = relationship.target.read_record(&key)?;
    let change = relationship.change(&target_record, false)?;
    relationship.apply(&change, false)?;
    info!(
        set = %source.name(),
        key = %source_key,
        navigation,
        target = %key,
        ?origin,
        "relationship linked"
    );
    Ok(())
}

/// Remove the relationship between `source(source_key)` and its target.
///
/// Unlinking entities that are not related succeeds without side effects
/// when the relationship is optional. A required relationship can be
/// neither removed nor found missing.
///
/// # Errors
/// `NotFound` for missing entities or a missing required relationship,
/// `BadRequest` when removing a required relationship.
pub fn unlink(
    source: &EntitySet,
    source_key: &Key,
    navigation: &str,
    inline_key: Option<&str>,
) -> Result<()> {
    let relationship = Relationship::open(source, source_key, navigation)?;
    let collection = relationship.navigation()?.collection;
    let target_record = match explicit_target(&relationship.target, inline_key)? {
        Some((key, _)) => Some(relationship.target.read_record(&key)?),
        None if collection => {
            return Err(Error::bad_request(
                "missing_reference",
                "unlinking from a collection requires $id",
            ));
        }
        None => relationship.target.first_record()?,
    };
    let related = match &target_record {
        Some(record) => relationship.is_related(record)?,
        None => false,
    };
    let optional = relationship.optional()?;
    match (related, optional, target_record) {
        (false, true, _) => {
            debug!(set = %source.name(), key = %source_key, navigation, "nothing to unlink");
            Ok(())
        }
        (false, false, _) => Err(Error::not_found(
            "relationship_not_found",
            format!("{}{source_key} is not related through '{navigation}'", source.name()),
        )),
        (true, false, _) => Err(Error::bad_request(
            "relationship_required",
            format!("relationship '{navigation}' is required and cannot be removed"),
        )),
        (true, true, Some(record)) => {
            let change = relationship.change(&record, true)?;
            relationship.apply(&change, true)?;
            info!(set = %source.name(), key = %source_key, navigation, "relationship unlinked");
            Ok(())
        }
        (true, true, None) => Ok(()),
    }
}
