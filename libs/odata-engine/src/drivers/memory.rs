//! Reference driver keeping rows in process memory.
//!
//! Plans are evaluated in-process: filter, stable sort by the plan order,
//! then offset/limit. Every table lives behind one shared lock so that
//! drivers created from the same [`MemoryStore`] observe each other's writes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::edm::EntityType;
use crate::entity::{Key, Record};
use crate::entity_set::{Capabilities, EntitySetDriver, LinkChange};
use crate::error::{Error, Result};
use crate::eval::QueryPlan;
use crate::model::{DriverFactory, DriverStrategy, Model};
use crate::value::{PrimitiveType, Value};

type Tables = BTreeMap<String, Vec<Record>>;

/// Shared row storage for any number of [`MemoryDriver`]s.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    fetches: Arc<AtomicU64>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, record: Record) {
        self.tables
            .write()
            .entry(table.to_owned())
            .or_default()
            .push(record);
    }

    /// Snapshot of a table in insertion order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Number of `fetch` round trips served so far.
    #[must_use]
    pub fn fetches(&self) -> u64 {
        self.fetches.load(AtomicOrdering::Relaxed)
    }

    /// Load a dataset shaped `{"<set>": [{...}, ...], ...}`.
    ///
    /// # Errors
    /// Returns `Error::Configuration` for unknown sets or properties and for
    /// values that do not fit the declared types.
    pub fn seed(&self, model: &Model, data: &serde_json::Value) -> Result<usize> {
        let invalid = |message: String| Error::configuration("invalid_dataset", message);
        let Some(sets) = data.as_object() else {
            return Err(invalid("dataset must be a JSON object keyed by entity set".to_owned()));
        };
        let mut loaded = 0;
        for (name, rows) in sets {
            let Some(def) = model.entity_set(name) else {
                return Err(invalid(format!("unknown entity set '{name}'")));
            };
            let Some(rows) = rows.as_array() else {
                return Err(invalid(format!("rows of '{name}' must be an array")));
            };
            for row in rows {
                let record = record_from_json(&def.entity_type, row).map_err(|e| {
                    invalid(format!("{name}: {e}"))
                })?;
                Key::from_record(&def.entity_type, &record)
                    .map_err(|_| invalid(format!("{name}: row without complete key")))?;
                self.insert(name, record);
                loaded += 1;
            }
        }
        info!(rows = loaded, "dataset loaded");
        Ok(loaded)
    }

    /// A driver over `table` rows of `entity_type`.
    #[must_use]
    pub fn table_driver(
        &self,
        table: &str,
        entity_type: &EntityType,
        capabilities: Capabilities,
    ) -> MemoryDriver {
        MemoryDriver {
            store: self.clone(),
            table: table.to_owned(),
            entity_type: entity_type.clone(),
            capabilities,
        }
    }
}

impl DriverFactory for MemoryStore {
    fn driver(
        &self,
        strategy: DriverStrategy,
        set: &str,
        entity_type: &EntityType,
    ) -> Result<Arc<dyn EntitySetDriver>> {
        let capabilities = match strategy {
            DriverStrategy::Memory => Capabilities::all(),
            DriverStrategy::MemoryReadOnly => Capabilities::read_only(),
        };
        Ok(Arc::new(self.table_driver(set, entity_type, capabilities)))
    }
}

fn record_from_json(ty: &EntityType, row: &serde_json::Value) -> Result<Record> {
    let Some(object) = row.as_object() else {
        return Err(Error::bad_request("invalid_body", "row must be a JSON object"));
    };
    let mut record = Record::new();
    for (name, json) in object {
        let Some(property) = ty.property(name) else {
            return Err(Error::bad_request(
                "unknown_property",
                format!("'{name}' is not a property of '{}'", ty.name),
            ));
        };
        record.insert(property.name.clone(), Value::from_json(property.ty, json)?);
    }
    Ok(record)
}

/// One table of a [`MemoryStore`] exposed as an entity set.
#[derive(Debug)]
pub struct MemoryDriver {
    store: MemoryStore,
    table: String,
    entity_type: EntityType,
    capabilities: Capabilities,
}

impl MemoryDriver {
    /// Fill a missing single-property key: next integer or a fresh UUID.
    fn generate_key(&self, rows: &[Record], record: &mut Record) -> Result<()> {
        let key = self.entity_type.key_properties();
        let [property] = key.as_slice() else {
            return Ok(());
        };
        if record.get(&property.name).is_some_and(|v| !v.is_null()) {
            return Ok(());
        }
        let value = if property.ty.is_integral() {
            let next = rows
                .iter()
                .filter_map(|row| row.get(&property.name).and_then(Value::as_i64))
                .max()
                .unwrap_or(0)
                .checked_add(1)
                .ok_or_else(|| Error::driver("key space exhausted"))?;
            Value::Int(next)
        } else if property.ty == PrimitiveType::Guid {
            Value::Guid(Uuid::new_v4())
        } else {
            return Ok(());
        };
        record.insert(property.name.clone(), value);
        Ok(())
    }

    fn not_found(&self, key: &Key) -> Error {
        Error::not_found(
            "entity_not_found",
            format!("{}{key} does not exist", self.table),
        )
    }

    fn assign(&self, change: &LinkChange) -> Result<()> {
        let mut tables = self.store.tables.write();
        let row = tables
            .get_mut(&self.table)
            .and_then(|rows| rows.iter_mut().find(|row| change.key.matches(row)))
            .ok_or_else(|| self.not_found(&change.key))?;
        for (name, value) in &change.assignments {
            row.insert(name.clone(), value.clone());
        }
        debug!(table = %self.table, key = %change.key, "foreign key assigned");
        Ok(())
    }
}

impl EntitySetDriver for MemoryDriver {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn fetch(&self, plan: &QueryPlan, offset: u64, limit: u64) -> Result<Vec<Record>> {
        self.store.fetches.fetch_add(1, AtomicOrdering::Relaxed);
        let tables = self.store.tables.read();
        let mut rows: Vec<&Record> = tables
            .get(&self.table)
            .into_iter()
            .flatten()
            .filter(|row| plan.matches(row))
            .collect();
        rows.sort_by(|a, b| plan.compare(a, b));
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).cloned().collect())
    }

    fn read(&self, key: &Key) -> Result<Option<Record>> {
        let tables = self.store.tables.read();
        Ok(tables
            .get(&self.table)
            .and_then(|rows| rows.iter().find(|row| key.matches(row)))
            .cloned())
    }

    fn count(&self, plan: &QueryPlan) -> Result<u64> {
        let tables = self.store.tables.read();
        let matched = tables
            .get(&self.table)
            .into_iter()
            .flatten()
            .filter(|row| plan.matches(row))
            .count();
        Ok(u64::try_from(matched).unwrap_or(u64::MAX))
    }

    fn create(&self, mut record: Record) -> Result<Record> {
        let mut tables = self.store.tables.write();
        let rows = tables.entry(self.table.clone()).or_default();
        self.generate_key(rows, &mut record)?;
        for property in self.entity_type.properties() {
            record.entry(property.name.clone()).or_insert(Value::Null);
        }
        let key = Key::from_record(&self.entity_type, &record)?;
        if rows.iter().any(|row| key.matches(row)) {
            return Err(Error::bad_request(
                "duplicate_key",
                format!("{}{key} already exists", self.table),
            ));
        }
        rows.push(record.clone());
        Ok(record)
    }

    fn update(&self, key: &Key, changes: Record) -> Result<Record> {
        let mut tables = self.store.tables.write();
        let row = tables
            .get_mut(&self.table)
            .and_then(|rows| rows.iter_mut().find(|row| key.matches(row)))
            .ok_or_else(|| self.not_found(key))?;
        row.extend(changes);
        Ok(row.clone())
    }

    fn delete(&self, key: &Key) -> Result<Record> {
        let mut tables = self.store.tables.write();
        let rows = tables
            .get_mut(&self.table)
            .ok_or_else(|| self.not_found(key))?;
        let index = rows
            .iter()
            .position(|row| key.matches(row))
            .ok_or_else(|| self.not_found(key))?;
        Ok(rows.remove(index))
    }

    fn link(&self, change: &LinkChange) -> Result<()> {
        self.assign(change)
    }

    fn unlink(&self, change: &LinkChange) -> Result<()> {
        self.assign(change)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::eval::{bind_filter, bind_orderby};
    use crate::identifier::Identifier;
    use crate::parser::{parse_filter, parse_orderby};

    fn pet_type() -> EntityType {
        EntityType::new(Identifier::new("Pet").unwrap())
            .with_property("id", PrimitiveType::Int64, false)
            .unwrap()
            .with_property("name", PrimitiveType::String, true)
            .unwrap()
            .with_key(&["id"])
            .unwrap()
    }

    fn record(id: i64, name: &str) -> Record {
        Record::from([
            (Identifier::new("id").unwrap(), Value::Int(id)),
            (Identifier::new("name").unwrap(), Value::String(name.to_owned())),
        ])
    }

    fn driver() -> MemoryDriver {
        let store = MemoryStore::new();
        for (id, name) in [(3, "c"), (1, "a"), (2, "b"), (4, "a")] {
            store.insert("Pets", record(id, name));
        }
        store.table_driver("Pets", &pet_type(), Capabilities::all())
    }

    fn plan(filter: Option<&str>, orderby: &str) -> QueryPlan {
        let ty = pet_type();
        QueryPlan {
            filter: filter.map(|f| bind_filter(&parse_filter(f).unwrap(), &ty).unwrap()),
            order: bind_orderby(&parse_orderby(orderby).unwrap(), &ty).unwrap(),
            select: None,
        }
    }

    fn ids(rows: &[Record]) -> Vec<i64> {
        rows.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)).collect()
    }

    #[test]
    fn fetch_filters_sorts_and_slices() {
        let driver = driver();
        let plan = plan(None, "name desc");
        assert_eq!(ids(&driver.fetch(&plan, 0, 10).unwrap()), vec![3, 2, 1, 4]);
        assert_eq!(ids(&driver.fetch(&plan, 1, 2).unwrap()), vec![2, 1]);

        let filtered = self::plan(Some("name eq 'a'"), "id");
        assert_eq!(ids(&driver.fetch(&filtered, 0, 10).unwrap()), vec![1, 4]);
        assert_eq!(driver.count(&filtered).unwrap(), 2);
        assert_eq!(driver.store.fetches(), 3);
    }

    #[test]
    fn create_generates_integer_keys() {
        let driver = driver();
        let mut body = Record::new();
        body.insert(Identifier::new("name").unwrap(), Value::String("e".to_owned()));
        let created = driver.create(body).unwrap();
        assert_eq!(created.get("id"), Some(&Value::Int(5)));

        let err = driver.create(record(1, "dup")).unwrap_err();
        assert_eq!(err.code(), "duplicate_key");
    }

    #[test]
    fn update_delete_and_assign() {
        let driver = driver();
        let key = Key::from_record(&pet_type(), &record(2, "")).unwrap();
        let mut changes = Record::new();
        changes.insert(Identifier::new("name").unwrap(), Value::String("z".to_owned()));
        let updated = driver.update(&key, changes).unwrap();
        assert_eq!(updated.get("name"), Some(&Value::String("z".to_owned())));

        driver
            .link(&LinkChange {
                key: key.clone(),
                assignments: vec![(Identifier::new("name").unwrap(), Value::Null)],
            })
            .unwrap();
        assert_eq!(driver.read(&key).unwrap().unwrap().get("name"), Some(&Value::Null));

        assert!(driver.delete(&key).is_ok());
        assert_eq!(driver.read(&key).unwrap(), None);
        assert!(driver.delete(&key).unwrap_err().is_not_found());
    }
}
