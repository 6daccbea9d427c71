use std::path::Path;

use crate::authz::errors::AuthzError;
use crate::authz::policy::{parse_kdl_document, ResourcePolicy};
use crate::authz::registry::{AccessRule, RuleRegistry};

/// Load all `.kdl` policy files from `dir` into a registry.
///
/// Files are read in path order; when two files declare the same resource,
/// slots from the later file replace those from the earlier one.
pub fn load_policies(dir: &Path) -> Result<RuleRegistry, AuthzError> {
    if !dir.is_dir() {
        return Err(AuthzError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "kdl").unwrap_or(false))
        .collect();
    entries.sort();

    let mut policies = Vec::new();
    for path in &entries {
        let contents =
            std::fs::read_to_string(path).map_err(|source| AuthzError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        let parsed = parse_kdl_document(&contents)?;
        tracing::debug!(path = %path.display(), resources = parsed.len(), "Parsed policy file");
        policies.extend(parsed);
    }

    let registry = compile_policies(policies)?;

    tracing::info!(
        files = entries.len(),
        resources = registry.len(),
        "Loaded access control policies"
    );

    Ok(registry)
}

/// Turn parsed resource policies into a registry of condition evaluators.
pub fn compile_policies(policies: Vec<ResourcePolicy>) -> Result<RuleRegistry, AuthzError> {
    let mut builder = RuleRegistry::builder();
    for policy in policies {
        let mut rule = AccessRule::new();
        if let Some(condition) = policy.inbound {
            rule = rule.inbound(condition);
        }
        if let Some(condition) = policy.outbound {
            rule = rule.outbound(condition);
        }
        builder = builder.rule(policy.resource_type.as_str(), rule)?;
    }
    Ok(builder.build())
}
