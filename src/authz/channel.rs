//! Channel-name parsing.
//!
//! CRUD channels encode the resource they carry in their name:
//!
//! - `crud>Post`, `crud>Post/42`, `crud>Post/42/title` for models
//! - `crud>recent({"limit":10}):Post` for views, where the parenthesized
//!   predicate is JSON and the type follows the last `:`
//!
//! Anything else is not a CRUD channel and is left alone by the hooks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const CRUD_PREFIX: &str = "crud";

/// Structured identification of what a CRUD channel refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceQuery {
    View {
        view: String,
        #[serde(rename = "type")]
        resource_type: String,
        #[serde(
            rename = "predicateData",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        predicate_data: Option<Value>,
    },
    Model {
        #[serde(rename = "type")]
        resource_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
}

impl ResourceQuery {
    pub fn resource_type(&self) -> &str {
        match self {
            ResourceQuery::Model { resource_type, .. } | ResourceQuery::View { resource_type, .. } => {
                resource_type
            }
        }
    }

    /// Record id for model channels that address a single record.
    pub fn id(&self) -> Option<&str> {
        match self {
            ResourceQuery::Model { id, .. } => id.as_deref(),
            ResourceQuery::View { .. } => None,
        }
    }
}

/// What a channel name says about the resource it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Channel {
    /// `crud>` channel naming a resource.
    Resource(ResourceQuery),
    /// `crud>` channel whose resource segment cannot be read, e.g. `crud>/1`
    /// or `crud>Post:1`. Hooks must not treat these as ordinary channels.
    Malformed,
    /// Not a CRUD channel.
    Other,
}

/// Classify a channel name.
pub fn classify_channel(channel: &str) -> Channel {
    let mut segments = channel.split('>');
    if segments.next() != Some(CRUD_PREFIX) {
        return Channel::Other;
    }
    // Only the segment right after `crud>` is significant.
    let Some(resource) = segments.next().filter(|s| !s.is_empty()) else {
        return Channel::Other;
    };

    let query = if resource.contains(':') {
        parse_view(resource)
    } else {
        Some(parse_model(resource))
    };

    match query {
        Some(query) if !query.resource_type().is_empty() => Channel::Resource(query),
        _ => Channel::Malformed,
    }
}

/// Parse a channel name into a [`ResourceQuery`].
///
/// Returns `None` when the channel is not a CRUD channel or its resource
/// segment is malformed. Use [`classify_channel`] to tell the two apart.
pub fn parse_channel(channel: &str) -> Option<ResourceQuery> {
    match classify_channel(channel) {
        Channel::Resource(query) => Some(query),
        Channel::Malformed | Channel::Other => None,
    }
}

fn parse_model(resource: &str) -> ResourceQuery {
    let mut parts = resource.split('/');
    let resource_type = parts.next().unwrap_or_default().to_string();
    let id = non_empty(parts.next());
    let field = non_empty(parts.next());
    ResourceQuery::Model {
        resource_type,
        id,
        field,
    }
}

/// `view(predicate):Type`. The type is whatever follows the last `:`, and
/// the predicate runs from the first `(` to the `)` that closes right before
/// that colon, so predicates may themselves contain `:` and parentheses.
fn parse_view(resource: &str) -> Option<ResourceQuery> {
    let colon = resource.rfind(':')?;
    let resource_type = &resource[colon + 1..];
    let head = resource[..colon].strip_suffix(')')?;
    let open = head.find('(')?;
    let view = &head[..open];
    let predicate = &head[open + 1..];

    if predicate.chars().any(is_line_terminator) {
        return None;
    }

    let predicate_data = serde_json::from_str::<Value>(predicate).ok();
    if predicate_data.is_none() {
        tracing::trace!(view, predicate, "View predicate is not valid JSON, ignoring it");
    }

    Some(ResourceQuery::View {
        view: view.to_string(),
        resource_type: resource_type.to_string(),
        predicate_data,
    })
}

fn non_empty(part: Option<&str>) -> Option<String> {
    part.filter(|p| !p.is_empty()).map(str::to_string)
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}
