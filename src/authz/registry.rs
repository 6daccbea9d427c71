use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::authz::engine::Evaluator;
use crate::authz::errors::AuthzError;
use crate::authz::types::{Direction, ResourceType};

/// Evaluator slots for one resource type. Either slot may be empty, which
/// means "no rule" for that direction.
#[derive(Clone, Default)]
pub struct AccessRule {
    pub inbound: Option<Arc<dyn Evaluator>>,
    pub outbound: Option<Arc<dyn Evaluator>>,
}

impl AccessRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inbound(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.inbound = Some(Arc::new(evaluator));
        self
    }

    pub fn outbound(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.outbound = Some(Arc::new(evaluator));
        self
    }

    pub fn slot(&self, direction: Direction) -> Option<&Arc<dyn Evaluator>> {
        match direction {
            Direction::Inbound => self.inbound.as_ref(),
            Direction::Outbound => self.outbound.as_ref(),
        }
    }

    /// Slots set on `other` replace ours; unset ones leave ours alone.
    fn overlay(&mut self, other: AccessRule) {
        if other.inbound.is_some() {
            self.inbound = other.inbound;
        }
        if other.outbound.is_some() {
            self.outbound = other.outbound;
        }
    }
}

impl fmt::Debug for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessRule")
            .field("inbound", &self.inbound.is_some())
            .field("outbound", &self.outbound.is_some())
            .finish()
    }
}

/// Resource type -> access rule. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: HashMap<ResourceType, AccessRule>,
}

impl RuleRegistry {
    pub fn builder() -> RuleRegistryBuilder {
        RuleRegistryBuilder::default()
    }

    /// Registry without any rules: every decision falls back to the defaults.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Evaluator for `resource_type` in `direction`, if one is configured.
    pub fn lookup(&self, resource_type: &str, direction: Direction) -> Option<&Arc<dyn Evaluator>> {
        self.rules.get(resource_type)?.slot(direction)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.rules.keys().map(ResourceType::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Start a builder seeded with this registry's rules, e.g. to layer
    /// programmatic rules over file-loaded ones.
    pub fn into_builder(self) -> RuleRegistryBuilder {
        RuleRegistryBuilder { rules: self.rules }
    }
}

#[derive(Default)]
pub struct RuleRegistryBuilder {
    rules: HashMap<ResourceType, AccessRule>,
}

impl RuleRegistryBuilder {
    /// Add or overlay the rule for `resource_type`.
    pub fn rule(mut self, resource_type: &str, rule: AccessRule) -> Result<Self, AuthzError> {
        let key = ResourceType::new(resource_type)?;
        self.rules.entry(key).or_default().overlay(rule);
        Ok(self)
    }

    pub fn inbound(
        self,
        resource_type: &str,
        evaluator: impl Evaluator + 'static,
    ) -> Result<Self, AuthzError> {
        self.rule(resource_type, AccessRule::new().inbound(evaluator))
    }

    pub fn outbound(
        self,
        resource_type: &str,
        evaluator: impl Evaluator + 'static,
    ) -> Result<Self, AuthzError> {
        self.rule(resource_type, AccessRule::new().outbound(evaluator))
    }

    pub fn build(self) -> RuleRegistry {
        RuleRegistry { rules: self.rules }
    }
}
