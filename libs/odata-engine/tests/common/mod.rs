#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

//! Shared zoo fixture: three owners, fifty pets and four toys.

use http::Method;
use odata_engine::drivers::MemoryStore;
use odata_engine::{EngineConfig, ModelConfig, Response, Service};
use serde_json::{Value, json};

pub const ZOO: &str = r"
namespace: Acme.Zoo
entity_types:
  - name: Owner
    key: [id]
    properties:
      - { name: id, type: Edm.Int64, nullable: false }
      - { name: name, type: Edm.String }
    navigation_properties:
      - name: MyPets
        target: Pet
        collection: true
        partner: Owner
        constraints:
          - { property: id, referenced_property: owner_id }
  - name: Pet
    key: [id]
    properties:
      - { name: id, type: Edm.Int64, nullable: false }
      - { name: name, type: Edm.String, nullable: false }
      - { name: type, type: Edm.String }
      - { name: owner_id, type: Edm.Int64 }
    navigation_properties:
      - name: Owner
        target: Owner
        partner: MyPets
        constraints:
          - { property: owner_id, referenced_property: id }
      - name: Toys
        target: Toy
        collection: true
        constraints:
          - { property: id, referenced_property: pet_id }
  - name: Toy
    key: [id]
    properties:
      - { name: id, type: Edm.Int64, nullable: false }
      - { name: label, type: Edm.String }
      - { name: pet_id, type: Edm.Int64, nullable: false }
    navigation_properties:
      - name: Pet
        target: Pet
        nullable: false
        expandable: false
        constraints:
          - { property: pet_id, referenced_property: id }
entity_sets:
  - name: Owners
    entity_type: Owner
    bindings: { MyPets: Pets }
  - name: Pets
    entity_type: Pet
    bindings: { Owner: Owners, Toys: Toys }
  - name: Toys
    entity_type: Toy
    driver: memory_read_only
";

pub fn pet_type(id: i64) -> &'static str {
    if id % 5 == 0 { "cat" } else { "dog" }
}

pub fn dataset() -> Value {
    let owners: Vec<Value> = (1..=3)
        .map(|id| json!({"id": id, "name": format!("owner{id}")}))
        .collect();
    let pets: Vec<Value> = (1..=50_i64)
        .map(|id| {
            let owner = if id > 45 { Value::Null } else { json!(id % 3 + 1) };
            json!({
                "id": id,
                "name": format!("pet{id:02}"),
                "type": pet_type(id),
                "owner_id": owner,
            })
        })
        .collect();
    let toys = json!([
        {"id": 1, "label": "ball", "pet_id": 1},
        {"id": 2, "label": "rope", "pet_id": 1},
        {"id": 3, "label": "bone", "pet_id": 2},
        {"id": 4, "label": "mouse", "pet_id": 3},
    ]);
    json!({"Owners": owners, "Pets": pets, "Toys": toys})
}

pub fn config(chunk_size: u64, max_page_size: u64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.endpoint.namespace = "Acme.Zoo".to_owned();
    config.pagination.chunk_size = chunk_size;
    config.pagination.max_page_size = max_page_size;
    config
}

pub fn zoo_with(config: EngineConfig) -> (Service, MemoryStore) {
    let store = MemoryStore::new();
    let model = ModelConfig::from_yaml(ZOO).unwrap().build(&store).unwrap();
    store.seed(&model, &dataset()).unwrap();
    (Service::new(model, config).unwrap(), store)
}

pub fn zoo(chunk_size: u64, max_page_size: u64) -> (Service, MemoryStore) {
    zoo_with(config(chunk_size, max_page_size))
}

pub fn request(service: &Service, method: Method, uri: &str, body: Option<Value>) -> Response {
    let tx = service.transaction(method, uri, body).unwrap();
    service.execute(&tx).unwrap()
}

pub fn get(service: &Service, uri: &str) -> Response {
    request(service, Method::GET, uri, None)
}

pub fn get_json(service: &Service, uri: &str) -> Value {
    get(service, uri).as_json().cloned().unwrap()
}

/// Error code of a failing request.
pub fn error_code(service: &Service, method: Method, uri: &str, body: Option<Value>) -> String {
    let tx = match service.transaction(method, uri, body) {
        Ok(tx) => tx,
        Err(err) => return err.code().to_owned(),
    };
    service.execute(&tx).unwrap_err().code().to_owned()
}

pub fn ids(page: &Value) -> Vec<i64> {
    page["value"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_i64().unwrap())
        .collect()
}
