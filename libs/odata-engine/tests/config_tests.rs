#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Configuration files as an operator writes them.

mod common;

use std::io::Write;

use odata_engine::drivers::MemoryStore;
use odata_engine::{EngineConfig, ModelConfig, Service};

#[test]
fn engine_config_loads_from_yaml() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(
        file,
        r"
pagination:
  max_page_size: 25
  default_page_size: 10
limits:
  max_expand_depth: 1
endpoint:
  prefix: api
  namespace: Acme.Zoo
  version: '2'
  base_url: https://zoo.example.com
"
    )
    .unwrap();

    let config = EngineConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.pagination.max_page_size, 25);
    assert_eq!(config.pagination.default_page_size, Some(10));
    assert_eq!(config.pagination.chunk_size, 1000);
    assert_eq!(config.limits.max_expand_depth, 1);
    assert_eq!(config.limits.max_filter_nodes, 256);
    assert_eq!(
        config.endpoint.endpoint_url(),
        "https://zoo.example.com/api/Acme/Zoo@2"
    );

    let (service, _) = common::zoo_with(config);
    let page = common::get_json(&service, "https://zoo.example.com/api/Acme/Zoo@2/Pets");
    assert_eq!(common::ids(&page).len(), 10);
    assert!(
        page["@odata.nextLink"]
            .as_str()
            .unwrap()
            .starts_with("https://zoo.example.com/api/Acme/Zoo@2/Pets?")
    );
    assert_eq!(
        common::error_code(
            &service,
            http::Method::GET,
            "/api/Acme/Zoo@2/Owners?$expand=MyPets($expand=Owner)",
            None
        ),
        "expand_too_deep"
    );
}

#[test]
fn unknown_keys_are_rejected() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "pagination:\n  page_size: 10").unwrap();
    let err = EngineConfig::load(Some(file.path())).unwrap_err();
    assert_eq!(err.code(), "invalid_config");
}

#[test]
fn invalid_configuration_is_refused_by_the_service() {
    let store = MemoryStore::new();
    let model = ModelConfig::from_yaml(common::ZOO).unwrap().build(&store).unwrap();
    let mut config = EngineConfig::default();
    config.pagination.chunk_size = 0;
    let err = Service::new(model, config).unwrap_err();
    assert_eq!(err.code(), "invalid_config");
}

#[test]
fn datasets_must_match_the_model() {
    let store = MemoryStore::new();
    let model = ModelConfig::from_yaml(common::ZOO).unwrap().build(&store).unwrap();
    for data in [
        serde_json::json!({"Vets": []}),
        serde_json::json!({"Pets": {}}),
        serde_json::json!({"Pets": [{"id": 1, "colour": "red"}]}),
        serde_json::json!({"Pets": [{"id": "one"}]}),
        serde_json::json!({"Pets": [{"name": "keyless"}]}),
        serde_json::json!([]),
    ] {
        let err = store.seed(&model, &data).unwrap_err();
        assert_eq!(err.code(), "invalid_dataset", "{data}");
    }
    assert_eq!(store.seed(&model, &common::dataset()).unwrap(), 57);
}
