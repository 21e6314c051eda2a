//! Entity sets: the driver contract and the per-request set handle.
//!
//! A registered [`EntitySetDef`] is immutable and shared through the model.
//! Every request works on an [`EntitySet`], a cheap clone carrying the
//! request transaction and, for navigation-scoped sets, the source entity
//! the set was reached from.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::edm::{EntityType, NavigationProperty};
use crate::entity::{Entity, Key, PropertyContent, PropertyValue, Record};
use crate::error::{Error, Result};
use crate::eval::{QueryPlan, bind_expand, bind_filter, bind_orderby, bind_select};
use crate::identifier::Identifier;
use crate::model::EntitySetDef;
use crate::navigation;
use crate::service::ServiceContext;
use crate::transaction::Transaction;
use crate::value::{PrimitiveType, Value};

/// Operations a driver may offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Read,
    Query,
    Count,
    Create,
    Update,
    Delete,
    Link,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Read,
        Capability::Query,
        Capability::Count,
        Capability::Create,
        Capability::Update,
        Capability::Delete,
        Capability::Link,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Read => "read",
            Capability::Query => "query",
            Capability::Count => "count",
            Capability::Create => "create",
            Capability::Update => "update",
            Capability::Delete => "delete",
            Capability::Link => "link",
        };
        f.write_str(name)
    }
}

/// Bit set of [`Capability`] values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    #[must_use]
    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    #[must_use]
    pub fn read_only() -> Self {
        [Capability::Read, Capability::Query, Capability::Count]
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn with(self, capability: Capability) -> Self {
        Capabilities(self.0 | capability.bit())
    }

    #[must_use]
    pub fn without(self, capability: Capability) -> Self {
        Capabilities(self.0 & !capability.bit())
    }

    #[must_use]
    pub fn intersect(self, other: Capabilities) -> Self {
        Capabilities(self.0 & other.0)
    }

    #[must_use]
    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// # Errors
    /// Returns `Error::NotImplemented` if `capability` is missing.
    pub fn require(self, capability: Capability) -> Result<()> {
        if self.contains(capability) {
            Ok(())
        } else {
            Err(Error::NotImplemented(capability))
        }
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Capabilities::default(), Capabilities::with)
    }
}

/// Foreign-key assignments applied to one stored entity by link/unlink.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkChange {
    pub key: Key,
    pub assignments: Vec<(Identifier, Value)>,
}

/// Storage behind one entity set.
///
/// `fetch` receives the full plan; drivers that cannot evaluate it natively
/// may evaluate it in-process. Write operations default to
/// [`Error::NotImplemented`].
pub trait EntitySetDriver: Send + Sync + fmt::Debug {
    fn capabilities(&self) -> Capabilities;

    /// Up to `limit` records matching `plan`, in plan order, after skipping
    /// `offset` matches.
    ///
    /// # Errors
    /// Driver-specific failures.
    fn fetch(&self, plan: &QueryPlan, offset: u64, limit: u64) -> Result<Vec<Record>>;

    /// # Errors
    /// Driver-specific failures; a missing key is `Ok(None)`.
    fn read(&self, key: &Key) -> Result<Option<Record>>;

    /// # Errors
    /// Driver-specific failures.
    fn count(&self, plan: &QueryPlan) -> Result<u64>;

    /// # Errors
    /// `NotImplemented` unless overridden.
    fn create(&self, _record: Record) -> Result<Record> {
        Err(Error::NotImplemented(Capability::Create))
    }

    /// Merge `changes` into the stored record and return the new state.
    ///
    /// # Errors
    /// `NotImplemented` unless overridden.
    fn update(&self, _key: &Key, _changes: Record) -> Result<Record> {
        Err(Error::NotImplemented(Capability::Update))
    }

    /// Remove the record and return its last state.
    ///
    /// # Errors
    /// `NotImplemented` unless overridden.
    fn delete(&self, _key: &Key) -> Result<Record> {
        Err(Error::NotImplemented(Capability::Delete))
    }

    /// # Errors
    /// `NotImplemented` unless overridden.
    fn link(&self, _change: &LinkChange) -> Result<()> {
        Err(Error::NotImplemented(Capability::Link))
    }

    /// # Errors
    /// `NotImplemented` unless overridden.
    fn unlink(&self, _change: &LinkChange) -> Result<()> {
        Err(Error::NotImplemented(Capability::Link))
    }
}

/// The entity a navigation-scoped set was reached from.
#[derive(Clone, Debug)]
pub struct NavigationSource {
    pub set: Arc<EntitySetDef>,
    pub navigation: NavigationProperty,
    pub record: Record,
}

/// Per-request handle on a registered entity set.
#[derive(Clone, Debug)]
pub struct EntitySet {
    ctx: Arc<ServiceContext>,
    def: Arc<EntitySetDef>,
    transaction: Transaction,
    source: Option<NavigationSource>,
}

impl EntitySet {
    #[must_use]
    pub fn new(ctx: Arc<ServiceContext>, def: Arc<EntitySetDef>, transaction: Transaction) -> Self {
        Self {
            ctx,
            def,
            transaction,
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: NavigationSource) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn with_transaction(mut self, transaction: Transaction) -> Self {
        self.transaction = transaction;
        self
    }

    #[must_use]
    pub fn name(&self) -> &Identifier {
        &self.def.name
    }

    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        &self.def.entity_type
    }

    #[must_use]
    pub fn definition(&self) -> &Arc<EntitySetDef> {
        &self.def
    }

    #[must_use]
    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    #[must_use]
    pub fn source(&self) -> Option<&NavigationSource> {
        self.source.as_ref()
    }

    /// Next link for a truncated collection expansion: the navigation URL
    /// of the source entity with this set's options and `token`. `None` for
    /// sets not reached through a navigation property.
    ///
    /// # Errors
    /// Returns `Error::Driver` when the source record has no complete key.
    pub fn expansion_next_link(&self, token: &str) -> Result<Option<String>> {
        let Some(source) = &self.source else {
            return Ok(None);
        };
        let key = Key::from_record(&source.set.entity_type, &source.record)?;
        let mut pairs = self.transaction.options.to_pairs();
        pairs.push(("$skiptoken", token.to_owned()));
        let query = serde_urlencoded::to_string(&pairs).map_err(Error::driver)?;
        Ok(Some(format!(
            "{}/{}{key}/{}?{query}",
            self.ctx.config.endpoint.endpoint_url(),
            source.set.name,
            source.navigation.name,
        )))
    }

    /// # Errors
    /// Returns `Error::NotImplemented` if the set lacks `capability`.
    pub fn require(&self, capability: Capability) -> Result<()> {
        self.def.capabilities.require(capability)
    }

    /// Records pulled from the driver per round trip.
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.def
            .chunk_size
            .unwrap_or(self.ctx.config.pagination.chunk_size)
            .max(1)
    }

    /// Bind the transaction's options against this set. All validation
    /// happens here, before any driver call.
    ///
    /// # Errors
    /// Returns `Error::BadRequest` for invalid filter, order, select or
    /// expand options.
    pub fn plan(&self) -> Result<QueryPlan> {
        let ty = self.entity_type();
        let options = &self.transaction.options;
        let filter = options
            .filter
            .as_ref()
            .map(|f| bind_filter(f, ty))
            .transpose()?;
        let order = bind_orderby(&options.orderby, ty)?;
        let select = bind_select(options.select.as_ref(), ty)?;
        bind_expand(&self.ctx.model, ty, &options.expand)?;

        let mut plan = QueryPlan {
            filter,
            order,
            select,
        };
        if let Some(source) = &self.source {
            plan = plan.restrict(navigation::scope_filter(source, ty)?);
        }
        debug!(
            set = %self.def.name,
            filter = plan.filter.as_ref().map(ToString::to_string),
            order_keys = plan.order.len(),
            "query planned"
        );
        Ok(plan)
    }

    /// Lazy record sequence over `plan`, starting at `offset`.
    ///
    /// # Errors
    /// Returns `Error::NotImplemented` without the `Query` capability.
    pub fn stream(&self, plan: QueryPlan, offset: u64, limit: Option<u64>) -> Result<EntityStream> {
        self.require(Capability::Query)?;
        Ok(EntityStream {
            set: self.clone(),
            plan,
            offset,
            remaining: limit,
            chunk: self.chunk_size(),
            buffer: VecDeque::new(),
            drained: false,
        })
    }

    /// All entities matching the transaction options, unpaginated.
    ///
    /// # Errors
    /// See [`EntitySet::plan`] and [`EntitySet::stream`].
    pub fn query(&self) -> Result<EntityStream> {
        self.stream(self.plan()?, 0, None)
    }

    /// Number of entities matching the filter; pagination is ignored.
    ///
    /// # Errors
    /// Returns `Error::NotImplemented` without the `Count` capability.
    pub fn count(&self) -> Result<u64> {
        self.count_plan(&self.plan()?)
    }

    pub(crate) fn count_plan(&self, plan: &QueryPlan) -> Result<u64> {
        self.require(Capability::Count)?;
        self.def.driver.count(plan)
    }

    /// First entity of the query, if any.
    ///
    /// # Errors
    /// See [`EntitySet::query`].
    pub fn first(&self) -> Result<Option<Entity>> {
        let plan = self.plan()?;
        self.stream(plan, 0, Some(1))?.next().transpose()
    }

    pub(crate) fn first_record(&self) -> Result<Option<Record>> {
        let plan = self.plan()?;
        self.stream(plan, 0, Some(1))?.next_record()
    }

    /// Stored record by key, ignoring any navigation scope.
    ///
    /// # Errors
    /// Returns `Error::NotFound` when no record has this key.
    pub fn read_record(&self, key: &Key) -> Result<Record> {
        self.require(Capability::Read)?;
        self.def.driver.read(key)?.ok_or_else(|| {
            Error::not_found(
                "entity_not_found",
                format!("{}{key} does not exist", self.def.name),
            )
        })
    }

    /// Entity by key. A navigation-scoped set only finds related entities.
    ///
    /// # Errors
    /// Returns `Error::NotFound` when the key misses or the entity is not
    /// related to the navigation source.
    pub fn read(&self, key: &Key) -> Result<Entity> {
        let record = self.read_scoped(key)?;
        let plan = self.plan()?;
        self.materialize(record, plan.select.as_deref())
    }

    pub(crate) fn read_scoped(&self, key: &Key) -> Result<Record> {
        let record = self.read_record(key)?;
        if let Some(source) = &self.source {
            let scope = navigation::scope_filter(source, self.entity_type())?;
            if !scope.matches(&record) {
                return Err(Error::not_found(
                    "entity_not_found",
                    format!(
                        "{}{key} is not related through '{}'",
                        self.def.name, source.navigation.name
                    ),
                ));
            }
        }
        Ok(record)
    }

    /// Parse key text against this set's entity type.
    ///
    /// # Errors
    /// Returns `Error::BadRequest` for malformed keys.
    pub fn key(&self, text: &str) -> Result<Key> {
        Key::parse(self.entity_type(), text)
    }

    /// Project a record through `select` and apply the transaction's
    /// `$expand` items.
    ///
    /// # Errors
    /// Propagates expansion failures.
    pub fn materialize(&self, record: Record, select: Option<&[Identifier]>) -> Result<Entity> {
        let ty = self.entity_type();
        let key = Key::from_record(ty, &record)?;
        let mut properties = Vec::with_capacity(ty.properties().len());
        for property in ty.properties() {
            if select.is_some_and(|s| !s.contains(&property.name)) {
                continue;
            }
            properties.push(PropertyValue {
                name: property.name.clone(),
                content: PropertyContent::Primitive(
                    record.get(&property.name).cloned().unwrap_or(Value::Null),
                ),
            });
        }
        for item in &self.transaction.options.expand {
            properties.push(navigation::expand(self, &record, item)?);
        }
        Ok(Entity::new(self.def.name.clone(), key, properties))
    }

    /// Convert a JSON request body into a record of declared properties.
    fn record_from_body(&self, body: Option<&serde_json::Value>) -> Result<Record> {
        let ty = self.entity_type();
        let Some(object) = body.and_then(serde_json::Value::as_object) else {
            return Err(Error::bad_request(
                "invalid_body",
                "request body must be a JSON object",
            ));
        };
        let mut record = Record::new();
        for (name, json) in object {
            if name.contains('@') {
                continue;
            }
            if ty.navigation(name).is_some() {
                return Err(Error::bad_request(
                    "deep_insert_not_supported",
                    format!("navigation property '{name}' cannot be written inline"),
                ));
            }
            let Some(property) = ty.property(name) else {
                return Err(Error::bad_request(
                    "unknown_property",
                    format!("'{name}' is not a property of '{}'", ty.name),
                ));
            };
            let value = Value::from_json(property.ty, json)?;
            if value.is_null() && !property.nullable {
                return Err(Error::bad_request(
                    "null_not_allowed",
                    format!("property '{name}' is not nullable"),
                ));
            }
            record.insert(property.name.clone(), value);
        }
        Ok(record)
    }

    /// Insert an entity from a JSON body. Inside a navigation scope the
    /// foreign key is taken from the source entity when it lives on the
    /// target.
    ///
    /// # Errors
    /// `BadRequest` for invalid bodies, `NotImplemented` without `Create`.
    pub fn create(&self, body: Option<&serde_json::Value>) -> Result<Entity> {
        self.require(Capability::Create)?;
        let ty = self.entity_type();
        let mut record = self.record_from_body(body)?;
        if let Some(source) = &self.source
            && !navigation::foreign_key_on_source(&source.navigation, ty)
        {
            for constraint in &source.navigation.constraints {
                let value = source
                    .record
                    .get(&constraint.property)
                    .cloned()
                    .unwrap_or(Value::Null);
                record.insert(constraint.referenced_property.clone(), value);
            }
        }
        let generated = match ty.key_properties().as_slice() {
            [only] => only.ty.is_integral() || only.ty == PrimitiveType::Guid,
            _ => false,
        };
        for property in ty.properties() {
            let missing = record.get(&property.name).is_none_or(Value::is_null);
            if missing && !property.nullable && !(generated && ty.is_key(property.name.as_str())) {
                return Err(Error::bad_request(
                    "missing_property",
                    format!("required property '{}' is missing", property.name),
                ));
            }
        }
        let stored = self.def.driver.create(record)?;
        let entity = self.materialize(stored, None)?;
        info!(set = %self.def.name, id = %entity.id(), "entity created");
        Ok(entity)
    }

    /// Merge the JSON body into an existing entity.
    ///
    /// # Errors
    /// `NotFound` for unknown keys, `BadRequest` when the body changes a key
    /// property, `NotImplemented` without `Update`.
    pub fn update(&self, key: &Key, body: Option<&serde_json::Value>) -> Result<Entity> {
        self.require(Capability::Update)?;
        let mut changes = self.record_from_body(body)?;
        self.read_scoped(key)?;
        for (name, value) in key.values() {
            if let Some(new) = changes.remove(name)
                && new.compare(value) != Some(std::cmp::Ordering::Equal)
            {
                return Err(Error::bad_request(
                    "key_immutable",
                    format!("key property '{name}' cannot be changed"),
                ));
            }
        }
        let stored = self.def.driver.update(key, changes)?;
        let entity = self.materialize(stored, None)?;
        info!(set = %self.def.name, id = %entity.id(), "entity updated");
        Ok(entity)
    }

    /// # Errors
    /// `NotFound` for unknown keys, `NotImplemented` without `Delete`.
    pub fn delete(&self, key: &Key) -> Result<()> {
        self.require(Capability::Delete)?;
        self.read_scoped(key)?;
        self.def.driver.delete(key)?;
        info!(set = %self.def.name, key = %key, "entity deleted");
        Ok(())
    }
}

/// Lazy, finite, non-restartable sequence of query results.
///
/// Records are pulled from the driver in chunks of the set's chunk size;
/// the chunk size never changes which records are produced.
#[derive(Debug)]
pub struct EntityStream {
    set: EntitySet,
    plan: QueryPlan,
    offset: u64,
    remaining: Option<u64>,
    chunk: u64,
    buffer: VecDeque<Record>,
    drained: bool,
}

impl EntityStream {
    fn pull(&mut self) -> Result<()> {
        let take = self.remaining.map_or(self.chunk, |r| r.min(self.chunk));
        if take == 0 {
            self.drained = true;
            return Ok(());
        }
        let records = self.set.def.driver.fetch(&self.plan, self.offset, take)?;
        let pulled = u64::try_from(records.len()).unwrap_or(u64::MAX);
        debug!(
            set = %self.set.def.name,
            offset = self.offset,
            requested = take,
            pulled,
            "pulled chunk"
        );
        if pulled < take {
            self.drained = true;
        }
        self.offset += pulled;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(pulled);
        }
        self.buffer.extend(records);
        Ok(())
    }

    /// Next raw record, without projection or expansion.
    ///
    /// # Errors
    /// Propagates driver failures.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.buffer.is_empty() && !self.drained {
            self.pull()?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Materialize a record pulled from this stream.
    ///
    /// # Errors
    /// See [`EntitySet::materialize`].
    pub fn materialize(&self, record: Record) -> Result<Entity> {
        self.set.materialize(record, self.plan.select.as_deref())
    }
}

impl Iterator for EntityStream {
    type Item = Result<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(self.materialize(record)),
            Ok(None) => None,
            Err(err) => {
                self.drained = true;
                self.buffer.clear();
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn capability_masks() {
        let caps = Capabilities::read_only();
        assert!(caps.contains(Capability::Read));
        assert!(!caps.contains(Capability::Create));
        assert_eq!(
            caps.require(Capability::Link),
            Err(Error::NotImplemented(Capability::Link))
        );
        let all = Capabilities::all();
        assert!(Capability::ALL.iter().all(|c| all.contains(*c)));
        assert!(!all.without(Capability::Delete).contains(Capability::Delete));
    }

    #[test]
    fn capability_names() {
        let names: Vec<String> = Capability::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            ["read", "query", "count", "create", "update", "delete", "link"]
        );
    }
}
