use kdl::{KdlDocument, KdlNode};

use crate::authz::condition::Condition;
use crate::authz::errors::AuthzError;
use crate::authz::types::ResourceType;

/// Rule declaration for one resource type, as written in a policy file.
#[derive(Debug, Clone)]
pub struct ResourcePolicy {
    pub resource_type: ResourceType,
    pub inbound: Option<Condition>,
    pub outbound: Option<Condition>,
}

/// Parse a KDL policy document.
///
/// ```kdl
/// resource "Post" {
///     inbound "authToken != null"
///     outbound "resource.published == true || resource.ownerId == authToken.id"
/// }
/// ```
pub fn parse_kdl_document(source: &str) -> Result<Vec<ResourcePolicy>, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut policies = Vec::new();
    for node in doc.nodes() {
        match node.name().value() {
            "resource" => policies.push(parse_resource(node)?),
            other => {
                return Err(AuthzError::InvalidPolicy(format!(
                    "unexpected top-level node `{other}` (expected `resource`)"
                )));
            }
        }
    }
    Ok(policies)
}

fn parse_resource(node: &KdlNode) -> Result<ResourcePolicy, AuthzError> {
    let name = first_string_arg(node).ok_or_else(|| {
        AuthzError::InvalidPolicy(
            "resource node requires a string argument (e.g. resource \"Post\")".into(),
        )
    })?;
    let resource_type = ResourceType::new(name)?;

    let mut inbound = None;
    let mut outbound = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let slot = match child.name().value() {
                "inbound" => &mut inbound,
                "outbound" => &mut outbound,
                other => {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "unexpected child `{other}` in resource `{resource_type}` (expected `inbound` or `outbound`)"
                    )));
                }
            };
            if slot.is_some() {
                return Err(AuthzError::InvalidPolicy(format!(
                    "resource `{resource_type}` declares `{}` more than once",
                    child.name().value()
                )));
            }
            let source = first_string_arg(child).ok_or_else(|| {
                AuthzError::InvalidPolicy(format!(
                    "`{}` in resource `{resource_type}` requires a condition string",
                    child.name().value()
                ))
            })?;
            *slot = Some(Condition::parse(&source)?);
        }
    }

    Ok(ResourcePolicy {
        resource_type,
        inbound,
        outbound,
    })
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}
