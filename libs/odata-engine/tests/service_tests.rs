#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Request dispatch: service document, metadata, CRUD and error mapping.

mod common;

use std::io::Write;

use common::{config, error_code, get, get_json, ids, request, zoo, zoo_with};
use http::{Method, StatusCode};
use odata_engine::{Body, error_to_problem};
use serde_json::json;

const ROOT: &str = "/odata/Acme/Zoo";

fn uri(path: &str) -> String {
    format!("{ROOT}/{path}")
}

#[test]
fn service_document_lists_entity_sets() {
    let (service, _) = zoo(10, 100);
    let document = get_json(&service, ROOT);
    assert_eq!(document["@odata.context"], "http://localhost/odata/Acme/Zoo/$metadata");
    let mut names: Vec<&str> = document["value"]
        .as_array()
        .unwrap()
        .iter()
        .map(|set| set["name"].as_str().unwrap())
        .collect();
    names.sort_unstable();
    assert_eq!(names, ["Owners", "Pets", "Toys"]);
    assert_eq!(document["value"][0]["kind"], "EntitySet");

    // Absolute URLs address the same resource.
    let absolute = get_json(&service, "http://localhost/odata/Acme/Zoo/");
    assert_eq!(absolute, document);
}

#[test]
fn metadata_document_is_built_from_the_model() {
    let (service, _) = zoo(10, 100);
    let edmx = get_json(&service, &uri("$metadata"));
    assert_eq!(edmx["version"], "4.0");
    let schema = &edmx["schemas"][0];
    assert_eq!(schema["namespace"], "Acme.Zoo");
    let pet = schema["entity_types"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "Pet")
        .unwrap();
    assert_eq!(pet["key"], json!(["id"]));
    assert_eq!(pet["navigation_properties"][1]["type"], "Collection(Acme.Zoo.Toy)");

    assert_eq!(
        error_code(&service, Method::POST, &uri("$metadata"), None),
        "method_not_allowed"
    );
}

#[test]
fn cached_metadata_is_served_verbatim() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "<edmx:Edmx Version=\"4.0\"/>").unwrap();
    let mut cfg = config(10, 100);
    cfg.endpoint.cached_metadata_path = Some(file.path().to_path_buf());
    let (service, _) = zoo_with(cfg);
    let response = get(&service, &uri("$metadata"));
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, Body::Text("<edmx:Edmx Version=\"4.0\"/>".to_owned()));
}

#[test]
fn missing_cached_metadata_is_a_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(10, 100);
    cfg.endpoint.cached_metadata_path = Some(dir.path().join("metadata.xml"));
    let (service, _) = zoo_with(cfg);
    let tx = service.transaction(Method::GET, &uri("$metadata"), None).unwrap();
    let problem = service.handle(&tx).unwrap_err();
    assert_eq!(problem.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(problem.code, "storage_error");
    assert!(!problem.detail.contains("metadata.xml"));
}

#[test]
fn create_update_delete() {
    let (service, store) = zoo(10, 100);
    let created = request(
        &service,
        Method::POST,
        &uri("Pets"),
        Some(json!({"name": "rex", "type": "dog"})),
    );
    assert_eq!(created.status, StatusCode::CREATED);
    let body = created.as_json().unwrap();
    assert_eq!(body["id"], 51);
    assert_eq!(body["owner_id"], serde_json::Value::Null);
    assert_eq!(body["@odata.id"], "http://localhost/odata/Acme/Zoo/Pets(51)");
    assert_eq!(
        body["@odata.context"],
        "http://localhost/odata/Acme/Zoo/$metadata#Pets/$entity"
    );
    assert_eq!(store.rows("Pets").len(), 51);

    let updated = request(&service, Method::PATCH, &uri("Pets(51)"), Some(json!({"name": "max"})));
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.as_json().unwrap()["name"], "max");
    assert_eq!(updated.as_json().unwrap()["type"], "dog");

    assert_eq!(
        error_code(&service, Method::PATCH, &uri("Pets(51)"), Some(json!({"id": 52}))),
        "key_immutable"
    );

    let deleted = request(&service, Method::DELETE, &uri("Pets(51)"), None);
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    assert_eq!(
        error_code(&service, Method::GET, &uri("Pets(51)"), None),
        "entity_not_found"
    );
    assert_eq!(
        error_code(&service, Method::DELETE, &uri("Pets(51)"), None),
        "entity_not_found"
    );
}

#[test]
fn create_through_navigation_fills_the_foreign_key() {
    let (service, _) = zoo(10, 100);
    let created = request(
        &service,
        Method::POST,
        &uri("Owners(2)/MyPets"),
        Some(json!({"name": "tom", "type": "cat"})),
    );
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.as_json().unwrap()["owner_id"], 2);
    assert_eq!(
        get(&service, &uri("Owners(2)/MyPets/$count")).body,
        Body::Text("16".to_owned())
    );

    assert_eq!(
        error_code(&service, Method::POST, &uri("Pets(1)/Owner"), Some(json!({"name": "x"}))),
        "method_not_allowed"
    );
}

#[test]
fn invalid_bodies_are_rejected_before_writing() {
    let (service, store) = zoo(10, 100);
    let cases = [
        (json!({"type": "dog"}), "missing_property"),
        (json!({"name": "x", "color": "red"}), "unknown_property"),
        (json!({"name": "x", "Owner": {"id": 1}}), "deep_insert_not_supported"),
        (json!({"name": null}), "null_not_allowed"),
        (json!({"name": 7}), "invalid_property_value"),
        (json!(["name"]), "invalid_body"),
    ];
    for (body, code) in cases {
        assert_eq!(
            error_code(&service, Method::POST, &uri("Pets"), Some(body.clone())),
            code,
            "{body}"
        );
    }
    assert_eq!(
        error_code(&service, Method::POST, &uri("Pets(1)"), Some(json!({"name": "x"}))),
        "method_not_allowed"
    );
    assert_eq!(store.rows("Pets").len(), 50);
}

#[test]
fn read_only_sets_report_not_implemented() {
    let (service, _) = zoo(10, 100);
    let tx = service
        .transaction(Method::POST, &uri("Toys"), Some(json!({"label": "kite", "pet_id": 1})))
        .unwrap();
    let problem = service.handle(&tx).unwrap_err();
    assert_eq!(problem.status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(problem.code, "capability_not_supported");
    assert_eq!(problem.instance, uri("Toys"));
}

#[test]
fn select_projects_properties() {
    let (service, _) = zoo(10, 100);
    let pet = get_json(&service, &uri("Pets(2)?$select=name"));
    assert_eq!(pet["id"], 2);
    assert_eq!(pet["name"], "pet02");
    assert!(pet.get("type").is_none());
    assert!(pet.get("owner_id").is_none());

    let page = get_json(&service, &uri("Pets?$select=*&$top=1"));
    assert_eq!(page["value"][0]["type"], "dog");
}

#[test]
fn counting() {
    let (service, _) = zoo(10, 100);
    let cats = get(&service, &uri("Pets/$count?$filter=type%20eq%20'cat'"));
    assert_eq!(cats.body, Body::Text("10".to_owned()));
    assert_eq!(
        error_code(&service, Method::GET, &uri("Pets(1)/$count"), None),
        "invalid_count_target"
    );
    assert_eq!(
        error_code(&service, Method::DELETE, &uri("Pets/$count"), None),
        "method_not_allowed"
    );
}

#[test]
fn filtering_and_ordering() {
    let (service, _) = zoo(10, 100);
    let page = get_json(
        &service,
        &uri("Pets?$filter=owner_id%20eq%20null%20and%20id%20gt%2047&$orderby=id%20desc"),
    );
    assert_eq!(ids(&page), vec![50, 49, 48]);

    let page = get_json(
        &service,
        &uri("Pets?$filter=contains(name,'4')%20and%20type%20ne%20'cat'&$orderby=owner_id,id"),
    );
    assert_eq!(ids(&page), vec![46, 47, 48, 49, 24, 42, 4, 34, 43, 14, 41, 44]);
}

#[test]
fn default_page_size_applies_without_top() {
    let mut cfg = config(10, 100);
    cfg.pagination.default_page_size = Some(12);
    let (service, _) = zoo_with(cfg);
    let page = get_json(&service, &uri("Pets"));
    assert_eq!(ids(&page).len(), 12);
    assert!(page["@odata.nextLink"].is_string());
}

#[test]
fn request_errors_map_to_problems() {
    let (service, _) = zoo(10, 100);
    let err = service
        .transaction(Method::GET, &uri("Pets?$filter=name%20eq"), None)
        .unwrap_err();
    let problem = error_to_problem(&err, &uri("Pets"), None);
    assert_eq!(problem.status, StatusCode::BAD_REQUEST);
    assert_eq!(problem.code, "syntax_error");
    assert!(problem.offset.is_some());

    assert_eq!(
        error_code(&service, Method::GET, &uri("Pets?$search=rex"), None),
        "unsupported_query_option"
    );
    assert_eq!(
        error_code(&service, Method::GET, &uri("Pets?$filter=color%20eq%201"), None),
        "unknown_property"
    );

    let tx = service.transaction(Method::GET, &uri("Vets"), None).unwrap();
    let problem = service.handle(&tx).unwrap_err();
    assert_eq!(problem.status, StatusCode::NOT_FOUND);
    assert_eq!(problem.code, "entity_set_not_found");
    assert_eq!(
        error_code(&service, Method::GET, &uri("Pets/$batch"), None),
        "syntax_error"
    );
}
