use std::any::Any;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::authz::channel::ResourceQuery;
use crate::authz::errors::AuthzError;

/// Validated resource type name, e.g. "Post".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceType(String);

impl ResourceType {
    pub fn new(name: impl Into<String>) -> Result<Self, AuthzError> {
        let name = name.into();
        let valid = !name.is_empty()
            && !name
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | ':' | '>' | '(' | ')'));
        if valid {
            Ok(Self(name))
        } else {
            Err(AuthzError::InvalidResourceType(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourceType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// inbound = client to system, outbound = system to client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Subscribe,
    Publish,
}

impl Action {
    /// Map a client event name onto a CRUD action. Other events are not
    /// this engine's concern.
    pub fn from_crud_event(event: &str) -> Option<Self> {
        match event {
            "create" => Some(Action::Create),
            "read" => Some(Action::Read),
            "update" => Some(Action::Update),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Subscribe => "subscribe",
            Action::Publish => "publish",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The requesting connection, as seen by the engine.
pub trait Socket: fmt::Debug + Send + Sync {
    fn id(&self) -> &str;

    /// Verified token claims, `None` for anonymous connections.
    fn auth_token(&self) -> Option<Value>;
}

/// Capability for the query layer, handed through to evaluators untouched.
pub type QueryHandle = Arc<dyn Any + Send + Sync>;

/// What an operation targets: the client's raw CRUD payload, or the
/// resource parsed from a channel name.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Request(Value),
    Channel(ResourceQuery),
}

impl Query {
    pub fn resource_type(&self) -> Option<&str> {
        match self {
            Query::Request(data) => data.get("type").and_then(Value::as_str),
            Query::Channel(query) => Some(query.resource_type()),
        }
    }

    pub fn id(&self) -> Option<String> {
        match self {
            Query::Request(data) => match data.get("id")? {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            },
            Query::Channel(query) => query.id().map(str::to_string),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Query::Request(data) => data.clone(),
            Query::Channel(query) => serde_json::to_value(query).unwrap_or(Value::Null),
        }
    }
}

/// Everything an evaluator gets to see about one decision.
#[derive(Clone)]
pub struct AccessContext {
    pub query_handle: Option<QueryHandle>,
    pub socket: Arc<dyn Socket>,
    pub auth_token: Option<Value>,
    pub action: Action,
    pub query: Query,
    pub resource: Option<Value>,
}

impl AccessContext {
    pub fn new(socket: Arc<dyn Socket>, action: Action, query: Query) -> Self {
        let auth_token = socket.auth_token();
        Self {
            query_handle: None,
            socket,
            auth_token,
            action,
            query,
            resource: None,
        }
    }

    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_query_handle(mut self, handle: Option<QueryHandle>) -> Self {
        self.query_handle = handle;
        self
    }

    /// JSON view used by condition expressions.
    pub fn to_value(&self) -> Value {
        json!({
            "action": self.action.as_str(),
            "authToken": self.auth_token.clone().unwrap_or(Value::Null),
            "query": self.query.to_value(),
            "resource": self.resource.clone().unwrap_or(Value::Null),
            "socket": { "id": self.socket.id() },
        })
    }
}

impl fmt::Debug for AccessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessContext")
            .field("socket", &self.socket.id())
            .field("authenticated", &self.auth_token.is_some())
            .field("action", &self.action)
            .field("query", &self.query)
            .field("has_resource", &self.resource.is_some())
            .field("has_query_handle", &self.query_handle.is_some())
            .finish()
    }
}

// ---------- Hook requests ----------

/// A client event (create/read/update/delete or anything else).
#[derive(Debug, Clone)]
pub struct EmitRequest {
    pub event: String,
    pub data: Value,
    pub socket: Arc<dyn Socket>,
}

#[derive(Debug, Clone)]
pub struct PublishInRequest {
    pub channel: String,
    pub data: Value,
    pub socket: Arc<dyn Socket>,
}

#[derive(Debug, Clone)]
pub struct PublishOutRequest {
    pub channel: String,
    pub data: Value,
    pub socket: Arc<dyn Socket>,
}

#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub channel: String,
    pub socket: Arc<dyn Socket>,
    /// Set by trusted server code that already checked access for this
    /// subscription.
    pub allow_crud_access: bool,
}

// ---------- API request/response types ----------

/// Connection as described by a remote transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSocket {
    pub id: String,
    #[serde(default)]
    pub auth_token: Option<Value>,
}

impl Socket for RemoteSocket {
    fn id(&self) -> &str {
        &self.id
    }

    fn auth_token(&self) -> Option<Value> {
        self.auth_token.clone()
    }
}

#[derive(Debug, Deserialize)]
pub struct EmitBody {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub socket: RemoteSocket,
}

#[derive(Debug, Deserialize)]
pub struct PublishBody {
    pub channel: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub socket: RemoteSocket,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeBody {
    pub channel: String,
    #[serde(default)]
    pub socket: RemoteSocket,
    #[serde(default)]
    pub allow_crud_access: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReadFilterBody {
    pub query: Value,
    #[serde(default)]
    pub resource: Option<Value>,
    #[serde(default)]
    pub socket: RemoteSocket,
}

#[derive(Debug, Deserialize)]
pub struct ParseBody {
    pub channel: String,
}

#[derive(Debug, Serialize)]
pub struct ParseResponse {
    pub query: Option<ResourceQuery>,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub allowed: bool,
}
