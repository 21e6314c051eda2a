//! OData v4 query engine.
//!
//! The engine owns the entity data model, the query-option language
//! (`$filter`, `$orderby`, `$select`, `$expand`), navigation with
//! referential-constraint semantics and resumable pagination. Storage sits
//! behind [`EntitySetDriver`]; HTTP hosting sits behind [`Service`].
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod ast;
pub mod config;
pub mod drivers;
pub mod edm;
pub mod endpoint;
pub mod entity;
pub mod entity_set;
pub mod error;
pub mod eval;
pub mod identifier;
pub mod lexer;
pub mod limits;
pub mod metadata;
pub mod model;
pub mod navigation;
pub mod options;
pub mod pagination;
pub mod parser;
pub mod problem_mapping;
pub mod resource;
pub mod service;
pub mod transaction;
pub mod value;

pub use config::{EngineConfig, PaginationConfig};
pub use edm::{EntityType, NavigationProperty, Property, ReferentialConstraint};
pub use endpoint::Endpoint;
pub use entity::{Entity, Key, PropertyContent, PropertyValue, Record};
pub use entity_set::{Capabilities, Capability, EntitySet, EntitySetDriver, EntityStream, LinkChange};
pub use error::{Error, Result};
pub use eval::{BoundExpr, QueryPlan};
pub use identifier::{Identifier, QualifiedName};
pub use limits::QueryLimits;
pub use metadata::Edmx;
pub use model::{
    DriverFactory, DriverStrategy, EntitySetBuilder, EntitySetDef, Model, ModelBuilder, ModelConfig,
    Reference,
};
pub use options::{ExpandItem, QueryOptions};
pub use pagination::{Page, Paginator, SkipToken};
pub use problem_mapping::error_to_problem;
pub use service::{Body, Response, Service, ServiceContext};
pub use transaction::Transaction;
pub use value::{PrimitiveType, Value};
