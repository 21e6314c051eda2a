//! Request execution against a built model.
//!
//! [`Service`] is the seam an HTTP host plugs into: it takes a
//! [`Transaction`], walks the resource path and returns a [`Response`] or an
//! [`Error`]; [`Service::handle`] additionally maps failures to a
//! [`Problem`].

use std::sync::Arc;

use http::{Method, StatusCode};
use odata_errors::Problem;
use serde_json::{Map, json};
use tracing::{debug, info_span};

use crate::config::EngineConfig;
use crate::entity::{Entity, Key};
use crate::entity_set::EntitySet;
use crate::error::{Error, Result};
use crate::metadata::Edmx;
use crate::model::Model;
use crate::navigation::{self, Resolved};
use crate::pagination::Paginator;
use crate::problem_mapping::error_to_problem;
use crate::resource::{ResourcePath, Segment, Suffix};
use crate::transaction::Transaction;

/// Immutable state shared by every request of one service.
#[derive(Debug)]
pub struct ServiceContext {
    pub model: Model,
    pub config: EngineConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Json(serde_json::Value),
    /// `$count` values and cached `$metadata` documents.
    Text(String),
    Empty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub body: Body,
}

impl Response {
    fn json(status: StatusCode, value: serde_json::Value) -> Self {
        Self {
            status,
            body: Body::Json(value),
        }
    }

    fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            body: Body::Empty,
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match &self.body {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// The navigation that led to the addressed set.
struct Parent {
    set: EntitySet,
    key: Key,
    navigation: String,
}

/// Result of walking a resource path: the last set, the raw key of the last
/// segment, and where the set was reached from.
struct Addressed {
    set: EntitySet,
    key_text: Option<String>,
    parent: Option<Parent>,
}

impl Addressed {
    fn single_valued(&self) -> bool {
        self.set
            .source()
            .is_some_and(|source| !source.navigation.collection)
    }

    /// Key of the addressed entity: the segment key, or the related entity
    /// of a single-valued navigation.
    fn key(&self) -> Result<Key> {
        entity_key(&self.set, self.key_text.as_deref())
    }
}

fn entity_key(set: &EntitySet, key_text: Option<&str>) -> Result<Key> {
    if let Some(text) = key_text {
        return set.key(text);
    }
    if set.source().is_some_and(|s| !s.navigation.collection) {
        let Some(record) = set.first_record()? else {
            return Err(Error::not_found(
                "entity_not_found",
                format!("no related entity in '{}'", set.name()),
            ));
        };
        return Key::from_record(set.entity_type(), &record);
    }
    Err(Error::bad_request(
        "key_required",
        format!("a key is required to address a single entity of '{}'", set.name()),
    ))
}

/// An OData service over one model.
#[derive(Clone, Debug)]
pub struct Service {
    ctx: Arc<ServiceContext>,
}

impl Service {
    /// # Errors
    /// Returns `Error::Configuration` when `config` is inconsistent.
    pub fn new(model: Model, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ctx: Arc::new(ServiceContext { model, config }),
        })
    }

    #[must_use]
    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    #[must_use]
    pub fn model(&self) -> &Model {
        &self.ctx.model
    }

    /// Build a transaction for `uri` using the configured limits.
    ///
    /// # Errors
    /// Returns `Error::BadRequest` for malformed query strings or options.
    pub fn transaction(
        &self,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Transaction> {
        Transaction::from_uri(method, uri, body, &self.ctx.config.limits)
    }

    /// Handle a request, mapping failures to a problem document.
    ///
    /// # Errors
    /// The problem for any failure raised by [`Service::execute`].
    pub fn handle(&self, tx: &Transaction) -> std::result::Result<Response, Problem> {
        self.execute(tx)
            .map_err(|err| error_to_problem(&err, &tx.path, None))
    }

    /// Execute one request.
    ///
    /// # Errors
    /// Any engine error; nothing is written when validation fails.
    pub fn execute(&self, tx: &Transaction) -> Result<Response> {
        let span = info_span!("odata_request", method = %tx.method, path = %tx.path);
        let _entered = span.enter();
        let endpoint = &self.ctx.config.endpoint;
        let path = ResourcePath::parse(endpoint.resource_path(&tx.path))?;
        let response = match &path {
            ResourcePath::ServiceDocument => {
                Self::require_get(tx)?;
                self.service_document()
            }
            ResourcePath::Metadata => {
                Self::require_get(tx)?;
                self.metadata()?
            }
            ResourcePath::Resource { segments, suffix } => {
                let addressed = self.walk(tx, segments)?;
                match suffix {
                    None => self.entity_request(tx, &path, &addressed)?,
                    Some(Suffix::Count) => Self::count_request(tx, &addressed)?,
                    Some(Suffix::Ref) => self.reference_request(tx, &path, &addressed)?,
                }
            }
        };
        debug!(status = response.status.as_u16(), "request completed");
        Ok(response)
    }

    fn require_get(tx: &Transaction) -> Result<()> {
        if tx.method == Method::GET {
            Ok(())
        } else {
            Err(Self::method_not_allowed(tx))
        }
    }

    fn method_not_allowed(tx: &Transaction) -> Error {
        Error::bad_request(
            "method_not_allowed",
            format!("{} is not allowed on {}", tx.method, tx.path),
        )
    }

    fn root_set(&self, tx: &Transaction, name: &str) -> Result<EntitySet> {
        let Some(def) = self.ctx.model.entity_set(name) else {
            return Err(Error::not_found(
                "entity_set_not_found",
                format!("entity set '{name}' does not exist"),
            ));
        };
        Ok(EntitySet::new(self.ctx.clone(), def.clone(), tx.clone()))
    }

    /// Resolve every segment but the last to a concrete entity and navigate
    /// from it.
    fn walk(&self, tx: &Transaction, segments: &[Segment]) -> Result<Addressed> {
        let Some((first, rest)) = segments.split_first() else {
            return Err(Error::bad_request("invalid_path", "empty resource path"));
        };
        let mut addressed = Addressed {
            set: self.root_set(tx, &first.name)?,
            key_text: first.key.clone(),
            parent: None,
        };
        for segment in rest {
            let key = addressed.key()?;
            let record = addressed.set.read_scoped(&key)?;
            let next = navigation::navigate(&addressed.set, &record, &segment.name, tx.clone())?;
            addressed = Addressed {
                set: next,
                key_text: segment.key.clone(),
                parent: Some(Parent {
                    set: addressed.set,
                    key,
                    navigation: segment.name.clone(),
                }),
            };
        }
        Ok(addressed)
    }

    fn context_url(&self, fragment: &str) -> String {
        format!("{}/$metadata#{fragment}", self.ctx.config.endpoint.endpoint_url())
    }

    fn entity_url(&self, entity: &Entity) -> String {
        format!("{}/{}", self.ctx.config.endpoint.endpoint_url(), entity.id())
    }

    fn service_document(&self) -> Response {
        let sets: Vec<serde_json::Value> = self
            .ctx
            .model
            .entity_sets()
            .map(|set| json!({"name": set.name.as_str(), "kind": "EntitySet", "url": set.name.as_str()}))
            .collect();
        Response::json(
            StatusCode::OK,
            json!({
                "@odata.context": format!("{}/$metadata", self.ctx.config.endpoint.endpoint_url()),
                "value": sets,
            }),
        )
    }

    fn metadata(&self) -> Result<Response> {
        if let Some(path) = self.ctx.config.endpoint.cached_metadata_path() {
            let document = std::fs::read_to_string(path).map_err(|e| {
                Error::driver(format!("cannot read cached metadata {}: {e}", path.display()))
            })?;
            debug!(path = %path.display(), "serving cached metadata document");
            return Ok(Response {
                status: StatusCode::OK,
                body: Body::Text(document),
            });
        }
        let document = serde_json::to_value(Edmx::from_model(&self.ctx.model)).map_err(Error::driver)?;
        Ok(Response::json(StatusCode::OK, document))
    }

    fn entity_json(&self, entity: &Entity) -> Result<serde_json::Value> {
        let mut value = entity.to_json()?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "@odata.context".to_owned(),
                self.context_url(&format!("{}/$entity", entity.set())).into(),
            );
            object.insert("@odata.id".to_owned(), self.entity_url(entity).into());
        }
        Ok(value)
    }

    fn next_link(&self, tx: &Transaction, path: &ResourcePath, token: &str) -> Result<String> {
        let mut query = tx.query_without_skiptoken()?;
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&serde_urlencoded::to_string([("$skiptoken", token)]).map_err(Error::driver)?);
        Ok(format!(
            "{}/{path}?{query}",
            self.ctx.config.endpoint.endpoint_url()
        ))
    }

    /// First page of `set`, rendered through `render`.
    fn page_response(
        &self,
        tx: &Transaction,
        path: &ResourcePath,
        set: &EntitySet,
        fragment: &str,
        render: impl Fn(&Entity) -> Result<serde_json::Value>,
    ) -> Result<Response> {
        let mut pager = Paginator::new(set)?;
        let page = pager.next_page()?.unwrap_or_default();
        let mut object = Map::new();
        object.insert("@odata.context".to_owned(), self.context_url(fragment).into());
        if let Some(count) = page.count {
            object.insert("@odata.count".to_owned(), count.into());
        }
        let items = page
            .entities
            .iter()
            .map(render)
            .collect::<Result<Vec<_>>>()?;
        object.insert("value".to_owned(), serde_json::Value::Array(items));
        if let Some(token) = &page.skiptoken {
            object.insert(
                "@odata.nextLink".to_owned(),
                self.next_link(tx, path, token)?.into(),
            );
        }
        Ok(Response::json(StatusCode::OK, serde_json::Value::Object(object)))
    }

    fn entity_request(
        &self,
        tx: &Transaction,
        path: &ResourcePath,
        addressed: &Addressed,
    ) -> Result<Response> {
        let set = &addressed.set;
        match tx.method {
            Method::GET => {
                if let Some(text) = &addressed.key_text {
                    let entity = set.read(&set.key(text)?)?;
                    return Ok(Response::json(StatusCode::OK, self.entity_json(&entity)?));
                }
                if set.source().is_none() {
                    return self.page_response(tx, path, set, set.name().as_str(), Entity::to_json);
                }
                match navigation::resolve(addressed.set.clone(), None)? {
                    Resolved::Entity(Some(entity)) => {
                        Ok(Response::json(StatusCode::OK, self.entity_json(&entity)?))
                    }
                    Resolved::Entity(None) => Ok(Response::no_content()),
                    Resolved::Collection(target) => {
                        let fragment = target.name().to_string();
                        self.page_response(tx, path, &target, &fragment, Entity::to_json)
                    }
                }
            }
            Method::POST => {
                if addressed.key_text.is_some() || addressed.single_valued() {
                    return Err(Self::method_not_allowed(tx));
                }
                let entity = set.create(tx.body.as_ref())?;
                Ok(Response::json(StatusCode::CREATED, self.entity_json(&entity)?))
            }
            Method::PATCH | Method::PUT => {
                let entity = set.update(&addressed.key()?, tx.body.as_ref())?;
                Ok(Response::json(StatusCode::OK, self.entity_json(&entity)?))
            }
            Method::DELETE => {
                set.delete(&addressed.key()?)?;
                Ok(Response::no_content())
            }
            _ => Err(Self::method_not_allowed(tx)),
        }
    }

    fn count_request(tx: &Transaction, addressed: &Addressed) -> Result<Response> {
        Self::require_get(tx)?;
        if addressed.key_text.is_some() || addressed.single_valued() {
            return Err(Error::bad_request(
                "invalid_count_target",
                "$count applies to collections only",
            ));
        }
        let count = addressed.set.count()?;
        Ok(Response {
            status: StatusCode::OK,
            body: Body::Text(count.to_string()),
        })
    }

    fn reference_request(
        &self,
        tx: &Transaction,
        path: &ResourcePath,
        addressed: &Addressed,
    ) -> Result<Response> {
        if tx.method == Method::GET {
            let reference = |entity: &Entity| -> Result<serde_json::Value> {
                Ok(json!({"@odata.id": self.entity_url(entity)}))
            };
            if addressed.key_text.is_some() || addressed.single_valued() {
                let entity = addressed.set.read(&addressed.key()?)?;
                let mut value = reference(&entity)?;
                if let Some(object) = value.as_object_mut() {
                    object.insert("@odata.context".to_owned(), self.context_url("$ref").into());
                }
                return Ok(Response::json(StatusCode::OK, value));
            }
            return self.page_response(tx, path, &addressed.set, "Collection($ref)", reference);
        }
        let Some(parent) = &addressed.parent else {
            return Err(Error::bad_request(
                "invalid_ref_target",
                "$ref must address a navigation property",
            ));
        };
        let inline_key = addressed.key_text.as_deref();
        match tx.method {
            Method::POST | Method::PUT => {
                navigation::link(&parent.set, &parent.key, &parent.navigation, inline_key)?;
            }
            Method::DELETE => {
                navigation::unlink(&parent.set, &parent.key, &parent.navigation, inline_key)?;
            }
            _ => return Err(Self::method_not_allowed(tx)),
        }
        Ok(Response::no_content())
    }
}
