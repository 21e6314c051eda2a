#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Navigation, expansion and relationship maintenance.

mod common;

use common::{error_code, get, get_json, ids, request, zoo};
use http::{Method, StatusCode};
use odata_engine::navigation::{self, TargetSource};
use odata_engine::{Body, EntitySet, Value};
use serde_json::json;

const ROOT: &str = "/odata/Acme/Zoo";

fn uri(path: &str) -> String {
    format!("{ROOT}/{path}")
}

fn owner_of(service: &odata_engine::Service, pet: i64) -> Option<i64> {
    let response = get(service, &uri(&format!("Pets({pet})/Owner")));
    response.as_json().map(|owner| owner["id"].as_i64().unwrap())
}

#[test]
fn collection_navigation_is_scoped_to_the_source() {
    let (service, _) = zoo(10, 100);
    let page = get_json(&service, &uri("Owners(1)/MyPets?$top=3"));
    assert_eq!(ids(&page), vec![3, 6, 9]);
    assert_eq!(page["@odata.context"], "http://localhost/odata/Acme/Zoo/$metadata#Pets");

    let count = get(&service, &uri("Owners(1)/MyPets/$count"));
    assert_eq!(count.body, Body::Text("15".to_owned()));

    let toys = get_json(&service, &uri("Owners(2)/MyPets(1)/Toys"));
    assert_eq!(ids(&toys), vec![1, 2]);
}

#[test]
fn scoped_key_outside_the_relationship_is_not_found() {
    let (service, _) = zoo(10, 100);
    let pet = get_json(&service, &uri("Owners(1)/MyPets(3)"));
    assert_eq!(pet["name"], "pet03");
    assert_eq!(pet["@odata.id"], "http://localhost/odata/Acme/Zoo/Pets(3)");

    assert_eq!(
        error_code(&service, Method::GET, &uri("Owners(1)/MyPets(1)"), None),
        "entity_not_found"
    );
    assert_eq!(
        error_code(&service, Method::GET, &uri("Owners(1)/MyPets(1)/Toys"), None),
        "entity_not_found"
    );
    assert_eq!(
        error_code(&service, Method::GET, &uri("Owners(1)/Friends"), None),
        "unknown_navigation_property"
    );
}

#[test]
fn single_valued_navigation() {
    let (service, _) = zoo(10, 100);
    assert_eq!(owner_of(&service, 1), Some(2));
    let unowned = get(&service, &uri("Pets(47)/Owner"));
    assert_eq!(unowned.status, StatusCode::NO_CONTENT);
    assert_eq!(unowned.body, Body::Empty);

    let toy_pet = get_json(&service, &uri("Toys(3)/Pet"));
    assert_eq!(toy_pet["id"], 2);
    assert_eq!(
        error_code(&service, Method::GET, &uri("Toys(3)/Pet/$count"), None),
        "invalid_count_target"
    );
}

#[test]
fn expansion_applies_nested_options() {
    let (service, _) = zoo(10, 100);
    let owner = get_json(
        &service,
        &uri("Owners(2)?$expand=MyPets($filter=type%20eq%20'cat';$orderby=id%20desc;$top=2;$count=true)"),
    );
    let pets: Vec<i64> = owner["MyPets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_i64().unwrap())
        .collect();
    assert_eq!(pets, vec![40, 25]);
    assert_eq!(owner["MyPets@odata.count"], 3);

    let page = get_json(&service, &uri("Pets?$filter=id%20le%202&$expand=Owner($select=name)"));
    assert_eq!(page["value"][0]["Owner"], json!({"id": 2, "name": "owner2"}));
    assert_eq!(page["value"][1]["Owner"]["id"], 3);

    let stray = get_json(&service, &uri("Pets(47)?$expand=Owner,Toys"));
    assert_eq!(stray["Owner"], serde_json::Value::Null);
    assert_eq!(stray["Toys"], json!([]));
}

#[test]
fn truncated_expansions_link_to_the_rest() {
    let (service, _) = zoo(10, 2);
    let owner = get_json(&service, &uri("Owners(1)?$expand=MyPets"));
    let first: Vec<i64> = owner["MyPets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_i64().unwrap())
        .collect();
    assert_eq!(first, vec![3, 6]);
    let mut next = owner["MyPets@odata.nextLink"].as_str().map(ToOwned::to_owned);
    assert!(
        next.as_deref()
            .unwrap()
            .starts_with("http://localhost/odata/Acme/Zoo/Owners(1)/MyPets?%24skiptoken=")
    );

    let mut all = first;
    while let Some(link) = next {
        let page = get_json(&service, &link);
        all.extend(ids(&page));
        next = page["@odata.nextLink"].as_str().map(ToOwned::to_owned);
        assert!(all.len() <= 15, "paging does not terminate");
    }
    assert_eq!(all, (1..=15).map(|i| i * 3).collect::<Vec<_>>());

    // Nested options travel with the link.
    let owner = get_json(
        &service,
        &uri("Owners(2)?$expand=MyPets($filter=type%20eq%20'cat';$orderby=id%20desc)"),
    );
    let link = owner["MyPets@odata.nextLink"].as_str().unwrap();
    assert!(link.contains("%24filter=type+eq+%27cat%27"), "{link}");
    assert_eq!(ids(&get_json(&service, link)), vec![10]);

    // A page that holds everything has no link.
    let (service, _) = zoo(10, 100);
    let owner = get_json(&service, &uri("Owners(1)?$expand=MyPets"));
    assert!(owner.get("MyPets@odata.nextLink").is_none());
}

#[test]
fn expansion_rejections() {
    let (service, _) = zoo(10, 100);
    assert_eq!(
        error_code(&service, Method::GET, &uri("Toys?$expand=Pet"), None),
        "navigation_not_expandable"
    );
    assert_eq!(
        error_code(&service, Method::GET, &uri("Pets?$expand=Vet"), None),
        "unknown_navigation_property"
    );
    assert_eq!(
        error_code(
            &service,
            Method::GET,
            &uri("Owners?$expand=MyPets($expand=Owner($expand=MyPets($expand=Owner)))"),
            None
        ),
        "expand_too_deep"
    );
}

#[test]
fn explicit_target_precedence() {
    let (service, _) = zoo(10, 100);
    let ctx = service.context().clone();
    let owners = ctx.model.entity_set("Owners").unwrap().clone();

    let scoped = |method: Method, query: &str, body: Option<serde_json::Value>| -> EntitySet {
        let tx = service
            .transaction(method, &uri(&format!("Owners(1)/MyPets/$ref{query}")), body)
            .unwrap();
        let source = EntitySet::new(ctx.clone(), owners.clone(), tx.clone());
        let record = source.read_record(&source.key("1").unwrap()).unwrap();
        navigation::navigate(&source, &record, "MyPets", tx).unwrap()
    };
    let body = Some(json!({"@odata.id": "Pets(9)"}));

    let target = scoped(Method::POST, "?$id=Pets(6)", body.clone());
    let (key, origin) = navigation::explicit_target(&target, Some("3")).unwrap().unwrap();
    assert_eq!((key.get("id"), origin), (Some(&Value::Int(3)), TargetSource::InlineKey));

    let (key, origin) = navigation::explicit_target(&target, None).unwrap().unwrap();
    assert_eq!((key.get("id"), origin), (Some(&Value::Int(6)), TargetSource::IdParameter));

    let target = scoped(Method::POST, "", body.clone());
    let (key, origin) = navigation::explicit_target(&target, None).unwrap().unwrap();
    assert_eq!((key.get("id"), origin), (Some(&Value::Int(9)), TargetSource::BodyReference));

    let target = scoped(Method::GET, "", body);
    assert!(navigation::explicit_target(&target, None).unwrap().is_none());
}

#[test]
fn link_through_body_and_id_parameter() {
    let (service, store) = zoo(10, 100);
    let linked = request(
        &service,
        Method::POST,
        &uri("Owners(3)/MyPets/$ref"),
        Some(json!({"@odata.id": "http://localhost/odata/Acme/Zoo/Pets(46)"})),
    );
    assert_eq!(linked.status, StatusCode::NO_CONTENT);
    assert_eq!(owner_of(&service, 46), Some(3));

    let linked = request(&service, Method::PUT, &uri("Pets(47)/Owner/$ref?$id=Owners(1)"), None);
    assert_eq!(linked.status, StatusCode::NO_CONTENT);
    assert_eq!(owner_of(&service, 47), Some(1));

    let stored = store.rows("Pets");
    let pet47 = stored
        .iter()
        .find(|row| row.values().any(|v| *v == Value::String("pet47".to_owned())))
        .unwrap();
    assert!(pet47.values().any(|v| *v == Value::Int(1)));
}

#[test]
fn link_prefers_inline_key_then_id_parameter_then_body() {
    let (service, _) = zoo(10, 100);
    let linked = request(
        &service,
        Method::POST,
        &uri("Owners(2)/MyPets(3)/$ref?$id=Pets(6)"),
        Some(json!({"@odata.id": "Pets(9)"})),
    );
    assert_eq!(linked.status, StatusCode::NO_CONTENT);
    assert_eq!(owner_of(&service, 3), Some(2));
    assert_eq!(owner_of(&service, 6), Some(1));
    assert_eq!(owner_of(&service, 9), Some(1));

    let linked = request(
        &service,
        Method::POST,
        &uri("Owners(2)/MyPets/$ref?$id=Pets(12)"),
        Some(json!({"@odata.id": "Pets(15)"})),
    );
    assert_eq!(linked.status, StatusCode::NO_CONTENT);
    assert_eq!(owner_of(&service, 12), Some(2));
    assert_eq!(owner_of(&service, 15), Some(1));
}

#[test]
fn link_failures() {
    let (service, _) = zoo(10, 100);
    let missing = Some(json!({"@odata.id": "Pets(99)"}));
    assert_eq!(
        error_code(&service, Method::POST, &uri("Owners(1)/MyPets/$ref"), missing),
        "entity_not_found"
    );
    assert_eq!(
        error_code(&service, Method::POST, &uri("Owners(1)/MyPets/$ref"), None),
        "missing_reference"
    );
    let wrong_set = Some(json!({"@odata.id": "Owners(2)"}));
    assert_eq!(
        error_code(&service, Method::POST, &uri("Owners(1)/MyPets/$ref"), wrong_set),
        "navigation_reference_invalid"
    );
    assert_eq!(
        error_code(&service, Method::POST, &uri("Pets/$ref"), None),
        "invalid_ref_target"
    );
    // Toys is read-only, so neither side of Toy.Pet can be rewritten.
    assert_eq!(
        error_code(&service, Method::PUT, &uri("Toys(1)/Pet/$ref?$id=Pets(2)"), None),
        "capability_not_supported"
    );
    assert_eq!(
        error_code(&service, Method::POST, &uri("Pets(2)/Toys/$ref?$id=Toys(1)"), None),
        "capability_not_supported"
    );
}

#[test]
fn unlink_optional_relationships() {
    let (service, _) = zoo(10, 100);
    let first = request(&service, Method::DELETE, &uri("Owners(1)/MyPets(6)/$ref"), None);
    assert_eq!(first.status, StatusCode::NO_CONTENT);
    assert_eq!(owner_of(&service, 6), None);

    // Already unrelated: nothing to do.
    let again = request(&service, Method::DELETE, &uri("Owners(1)/MyPets(6)/$ref"), None);
    assert_eq!(again.status, StatusCode::NO_CONTENT);

    let single = request(&service, Method::DELETE, &uri("Pets(1)/Owner/$ref"), None);
    assert_eq!(single.status, StatusCode::NO_CONTENT);
    assert_eq!(get(&service, &uri("Pets(1)/Owner")).status, StatusCode::NO_CONTENT);

    assert_eq!(
        error_code(&service, Method::DELETE, &uri("Owners(1)/MyPets/$ref"), None),
        "missing_reference"
    );
}

#[test]
fn unlink_of_a_missing_target_is_not_found() {
    let (service, store) = zoo(10, 100);
    let tx = service
        .transaction(Method::DELETE, &uri("Owners(1)/MyPets(99)/$ref"), None)
        .unwrap();
    let problem = service.handle(&tx).unwrap_err();
    assert_eq!(problem.status, StatusCode::NOT_FOUND);
    assert_eq!(problem.code, "entity_not_found");
    assert_eq!(
        error_code(&service, Method::DELETE, &uri("Owners(1)/MyPets/$ref?$id=Pets(99)"), None),
        "entity_not_found"
    );
    assert_eq!(store.rows("Pets").len(), 50);
    assert_eq!(owner_of(&service, 3), Some(1));
}

#[test]
fn unlink_required_relationships() {
    let (service, _) = zoo(10, 100);
    assert_eq!(
        error_code(&service, Method::DELETE, &uri("Toys(1)/Pet/$ref"), None),
        "relationship_required"
    );
    let tx = service
        .transaction(Method::DELETE, &uri("Toys(1)/Pet(2)/$ref"), None)
        .unwrap();
    let problem = service.handle(&tx).unwrap_err();
    assert_eq!(problem.status, StatusCode::NOT_FOUND);
    assert_eq!(problem.code, "relationship_not_found");
}

#[test]
fn reference_collections() {
    let (service, _) = zoo(10, 100);
    let refs = get_json(&service, &uri("Pets(1)/Toys/$ref"));
    assert_eq!(
        refs["value"],
        json!([
            {"@odata.id": "http://localhost/odata/Acme/Zoo/Toys(1)"},
            {"@odata.id": "http://localhost/odata/Acme/Zoo/Toys(2)"},
        ])
    );
    assert_eq!(
        refs["@odata.context"],
        "http://localhost/odata/Acme/Zoo/$metadata#Collection($ref)"
    );
    let single = get_json(&service, &uri("Pets(1)/Owner/$ref"));
    assert_eq!(single["@odata.id"], "http://localhost/odata/Acme/Zoo/Owners(2)");
}
