//! Serializer-agnostic `$metadata` document tree.
//!
//! The tree mirrors CSDL structure; turning it into XML or CSDL JSON bytes
//! is left to the host. The JSON rendering produced by `serde` is what the
//! service returns for `$metadata` when no cached document is configured.

use serde::Serialize;

use crate::edm::{EntityType, NavigationProperty};
use crate::model::{EntitySetDef, Model, Reference};

pub const CSDL_VERSION: &str = "4.0";
pub const CONTAINER_NAME: &str = "Container";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Edmx {
    pub version: &'static str,
    pub references: Vec<ReferenceDoc>,
    pub schemas: Vec<Schema>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReferenceDoc {
    pub uri: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub entity_types: Vec<EntityTypeDoc>,
    pub entity_container: EntityContainerDoc,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityContainerDoc {
    pub name: &'static str,
    pub entity_sets: Vec<EntitySetDoc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityTypeDoc {
    pub name: String,
    pub key: Vec<String>,
    pub properties: Vec<PropertyDoc>,
    pub navigation_properties: Vec<NavigationPropertyDoc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PropertyDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NavigationPropertyDoc {
    pub name: String,
    /// Qualified target, wrapped in `Collection(...)` for collections.
    #[serde(rename = "type")]
    pub ty: String,
    /// Absent for collections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<String>,
    pub referential_constraints: Vec<ReferentialConstraintDoc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReferentialConstraintDoc {
    pub property: String,
    pub referenced_property: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntitySetDoc {
    pub name: String,
    pub entity_type: String,
    pub navigation_bindings: Vec<NavigationBindingDoc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NavigationBindingDoc {
    pub path: String,
    pub target: String,
}

impl From<&Reference> for ReferenceDoc {
    fn from(reference: &Reference) -> Self {
        Self {
            uri: reference.uri.clone(),
            namespace: reference.namespace.clone(),
            alias: reference.alias.clone(),
        }
    }
}

fn navigation_doc(model: &Model, navigation: &NavigationProperty) -> NavigationPropertyDoc {
    let target = model.qualified(navigation.target.as_str());
    NavigationPropertyDoc {
        name: navigation.name.to_string(),
        ty: if navigation.collection {
            format!("Collection({target})")
        } else {
            target
        },
        nullable: (!navigation.collection).then_some(navigation.nullable),
        partner: navigation.partner.as_ref().map(ToString::to_string),
        referential_constraints: navigation
            .constraints
            .iter()
            .map(|c| ReferentialConstraintDoc {
                property: c.property.to_string(),
                referenced_property: c.referenced_property.to_string(),
            })
            .collect(),
    }
}

fn entity_type_doc(model: &Model, ty: &EntityType) -> EntityTypeDoc {
    EntityTypeDoc {
        name: ty.name.to_string(),
        key: ty.key().iter().map(ToString::to_string).collect(),
        properties: ty
            .properties()
            .iter()
            .map(|p| PropertyDoc {
                name: p.name.to_string(),
                ty: p.ty.edm_name(),
                nullable: p.nullable,
            })
            .collect(),
        navigation_properties: ty
            .navigation_properties()
            .iter()
            .map(|n| navigation_doc(model, n))
            .collect(),
    }
}

fn entity_set_doc(model: &Model, set: &EntitySetDef) -> EntitySetDoc {
    EntitySetDoc {
        name: set.name.to_string(),
        entity_type: model.qualified(set.entity_type.name.as_str()),
        navigation_bindings: set
            .bindings
            .iter()
            .map(|(path, target)| NavigationBindingDoc {
                path: path.to_string(),
                target: target.to_string(),
            })
            .collect(),
    }
}

impl Edmx {
    /// Assemble the document for `model`.
    #[must_use]
    pub fn from_model(model: &Model) -> Self {
        let schema = Schema {
            namespace: model.namespace().to_owned(),
            alias: model.alias().map(ToOwned::to_owned),
            entity_types: model
                .entity_types()
                .map(|ty| entity_type_doc(model, ty))
                .collect(),
            entity_container: EntityContainerDoc {
                name: CONTAINER_NAME,
                entity_sets: model
                    .entity_sets()
                    .map(|set| entity_set_doc(model, set))
                    .collect(),
            },
        };
        Self {
            version: CSDL_VERSION,
            references: model.references().iter().map(ReferenceDoc::from).collect(),
            schemas: vec![schema],
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::drivers::MemoryStore;
    use crate::model::ModelConfig;

    const SHOP: &str = r"
namespace: Acme.Shop
references:
  - { uri: core.xml, namespace: Org.OData.Core.V1, alias: Core }
entity_types:
  - name: Customer
    key: [id]
    properties:
      - { name: id, type: Edm.Guid }
    navigation_properties:
      - name: Orders
        target: Order
        collection: true
        partner: Customer
        constraints: [{ property: id, referenced_property: customer_id }]
  - name: Order
    key: [id]
    properties:
      - { name: id, type: Edm.Int32 }
      - { name: customer_id, type: Edm.Guid, nullable: false }
    navigation_properties:
      - name: Customer
        target: Customer
        nullable: false
        expandable: false
        partner: Orders
        constraints: [{ property: customer_id, referenced_property: id }]
entity_sets:
  - { name: Customers, entity_type: Customer, bindings: { Orders: Orders } }
  - { name: Orders, entity_type: Order }
";

    fn document() -> Edmx {
        let model = ModelConfig::from_yaml(SHOP)
            .unwrap()
            .build(&MemoryStore::new())
            .unwrap();
        Edmx::from_model(&model)
    }

    #[test]
    fn assembles_schema_tree() {
        let edmx = document();
        assert_eq!(edmx.version, "4.0");
        assert_eq!(edmx.references[0].alias.as_deref(), Some("Core"));
        let schema = &edmx.schemas[0];
        assert_eq!(schema.namespace, "Acme.Shop");

        let order = schema.entity_types.iter().find(|t| t.name == "Order").unwrap();
        assert_eq!(order.key, vec!["id"]);
        assert_eq!(order.properties[1].ty, "Edm.Guid");
        assert!(!order.properties[1].nullable);
        let customer = &order.navigation_properties[0];
        assert_eq!(customer.ty, "Acme.Shop.Customer");
        assert_eq!(customer.nullable, Some(false));
        assert_eq!(customer.partner.as_deref(), Some("Orders"));

        let owner = schema.entity_types.iter().find(|t| t.name == "Customer").unwrap();
        assert_eq!(owner.navigation_properties[0].ty, "Collection(Acme.Shop.Order)");
        assert_eq!(owner.navigation_properties[0].nullable, None);
    }

    #[test]
    fn container_lists_sets_and_bindings() {
        let edmx = document();
        let container = &edmx.schemas[0].entity_container;
        assert_eq!(container.name, "Container");
        let customers = container
            .entity_sets
            .iter()
            .find(|s| s.name == "Customers")
            .unwrap();
        assert_eq!(customers.entity_type, "Acme.Shop.Customer");
        assert_eq!(
            customers.navigation_bindings,
            vec![NavigationBindingDoc {
                path: "Orders".to_owned(),
                target: "Orders".to_owned(),
            }]
        );
    }

    #[test]
    fn serializes_without_absent_fields() {
        let json = serde_json::to_value(document()).unwrap();
        let types = &json["schemas"][0]["entity_types"];
        let customer = types
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "Customer")
            .unwrap();
        assert!(customer["navigation_properties"][0].get("nullable").is_none());
        assert!(json["schemas"][0].get("alias").is_none());
    }
}
