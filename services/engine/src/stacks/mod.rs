//! Deployable Stacks
//!
//! A stack is an independently deployable unit targeting one [`Scope`].
//! Stacks never reference each other's resources; they hand identifiers over
//! through the parameter exchange under the [`ContractKey`]s they declare.

pub mod certificate;
pub mod dns;
pub mod edge_functions;
pub mod identity;
pub mod website;

pub use certificate::{CertificateStack, ValidationSettings};
pub use edge_functions::{EdgeFunctionDefinition, EdgeFunctionStack};
pub use website::{EdgeBinding, WebsiteStack};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{DeployError, DeployResult};
use crate::exchange::{ContractKey, Parameter, ParameterExchange, ParameterWrite};
use crate::provider::{CloudProvider, Provisioned, ResourceAction, Scope};

#[async_trait]
pub trait Stack: Send + Sync {
    fn name(&self) -> &str;

    fn scope(&self) -> &Scope;

    /// Keys this stack publishes
    fn produces(&self) -> Vec<ContractKey>;

    /// Keys this stack reads; each must be produced by another stack
    fn consumes(&self) -> Vec<ContractKey>;

    async fn deploy(&self, ctx: &StackContext<'_>) -> DeployResult<StackReport>;
}

/// Everything a stack sees while deploying
pub struct StackContext<'a> {
    pub provider: &'a dyn CloudProvider,
    exchange: ParameterExchange<'a, dyn CloudProvider + 'a>,
    stack: String,
    produces: Vec<ContractKey>,
    /// Consumed key -> scope of the stack producing it
    producers: BTreeMap<ContractKey, Scope>,
}

impl<'a> StackContext<'a> {
    pub fn new(
        provider: &'a dyn CloudProvider,
        stack: &dyn Stack,
        producers: BTreeMap<ContractKey, Scope>,
    ) -> Self {
        Self {
            provider,
            exchange: ParameterExchange::new(provider, stack.scope().clone()),
            stack: stack.name().to_string(),
            produces: stack.produces(),
            producers,
        }
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn scope(&self) -> &Scope {
        self.exchange.caller()
    }

    /// Read a consumed key from its producer's scope
    pub async fn resolve(&self, key: &ContractKey) -> DeployResult<Parameter> {
        let producer = self.producers.get(key).ok_or_else(|| {
            DeployError::Configuration(format!(
                "stack {} reads {} without declaring it",
                self.stack, key
            ))
        })?;

        Ok(self.exchange.resolve(producer, key).await?)
    }

    /// Publish a produced key in this stack's scope
    pub async fn publish(&self, key: &ContractKey, value: &str) -> DeployResult<ParameterWrite> {
        if !self.produces.contains(key) {
            return Err(DeployError::Configuration(format!(
                "stack {} publishes {} without declaring it",
                self.stack, key
            )));
        }

        Ok(self.exchange.publish(key, value, &self.stack).await?)
    }
}

/// One resource touched by a stack deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceChange {
    pub kind: String,
    pub logical_id: String,
    pub physical_id: String,
    pub action: ResourceAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedParameter {
    pub name: String,
    pub version: u64,
    pub changed: bool,
}

/// Outcome of a single stack deploy
#[derive(Debug, Clone, Serialize)]
pub struct StackReport {
    pub stack: String,
    pub scope: Scope,
    pub changes: Vec<ResourceChange>,
    pub published: Vec<PublishedParameter>,
    /// Consumed key -> parameter version the stack bound to
    pub resolved: BTreeMap<String, u64>,
    pub outputs: BTreeMap<String, String>,
}

impl StackReport {
    pub fn new(ctx: &StackContext<'_>) -> Self {
        Self {
            stack: ctx.stack().to_string(),
            scope: ctx.scope().clone(),
            changes: Vec::new(),
            published: Vec::new(),
            resolved: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Record a provisioning result and hand the resource back
    pub fn record<T>(
        &mut self,
        kind: &str,
        logical_id: &str,
        physical_id: impl Into<String>,
        provisioned: Provisioned<T>,
    ) -> T {
        self.changes.push(ResourceChange {
            kind: kind.to_string(),
            logical_id: logical_id.to_string(),
            physical_id: physical_id.into(),
            action: provisioned.action,
        });
        provisioned.resource
    }

    pub fn record_published(&mut self, key: &ContractKey, write: ParameterWrite) {
        self.published.push(PublishedParameter {
            name: key.parameter_name(),
            version: write.version,
            changed: write.changed,
        });
    }

    pub fn record_resolved(&mut self, key: &ContractKey, parameter: &Parameter) {
        self.resolved.insert(key.parameter_name(), parameter.version);
    }

    pub fn output(&mut self, name: &str, value: impl Into<String>) {
        self.outputs.insert(name.to_string(), value.into());
    }

    /// Resources that were not left as they were
    pub fn changed(&self) -> impl Iterator<Item = &ResourceChange> {
        self.changes
            .iter()
            .filter(|c| c.action != ResourceAction::Unchanged)
    }

    pub fn is_unchanged(&self) -> bool {
        self.changed().next().is_none() && self.published.iter().all(|p| !p.changed)
    }
}
