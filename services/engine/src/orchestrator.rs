//! Deployment Orchestrator
//!
//! Orders stacks from their declared produce/consume keys and deploys them
//! one at a time. A consumer only runs after every producer of a key it reads;
//! the parameter store itself knows nothing about ordering.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{DeployError, DeployResult};
use crate::exchange::ContractKey;
use crate::provider::simulated::SimulatedCloud;
use crate::provider::{CloudProvider, Scope};
use crate::stacks::{Stack, StackContext, StackReport};

/// Default budget for a single stack deploy
pub const DEFAULT_STACK_TIMEOUT: Duration = Duration::from_secs(1800);

/// Somewhere to save provider state between stacks
#[async_trait]
pub trait Checkpoint: Send + Sync {
    async fn save(&self) -> DeployResult<()>;
}

#[async_trait]
impl Checkpoint for SimulatedCloud {
    async fn save(&self) -> DeployResult<()> {
        self.persist().await
    }
}

/// Validated, ordered set of stacks
pub struct DeploymentPlan {
    stacks: Vec<Box<dyn Stack>>,
    /// Indices into `stacks`, dependencies first
    order: Vec<usize>,
    /// Key -> index of the producing stack
    producers: BTreeMap<ContractKey, usize>,
}

impl std::fmt::Debug for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentPlan")
            .field("order", &self.order())
            .finish()
    }
}

impl DeploymentPlan {
    /// Check the declarations and derive a deploy order
    ///
    /// Rejects duplicate stack names, keys produced twice, consumed keys
    /// nobody produces and dependency cycles. Among stacks that are ready at
    /// the same time, declaration order wins.
    pub fn new(stacks: Vec<Box<dyn Stack>>) -> DeployResult<Self> {
        let mut names = BTreeSet::new();
        let mut producers: BTreeMap<ContractKey, usize> = BTreeMap::new();

        for (i, stack) in stacks.iter().enumerate() {
            if !names.insert(stack.name().to_string()) {
                return Err(DeployError::Configuration(format!(
                    "stack {} declared twice",
                    stack.name()
                )));
            }
            for key in stack.produces() {
                if let Some(&other) = producers.get(&key) {
                    return Err(DeployError::Configuration(format!(
                        "{} is produced by both {} and {}",
                        key,
                        stacks[other].name(),
                        stack.name()
                    )));
                }
                producers.insert(key, i);
            }
        }

        // Edges: producer -> consumer
        let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); stacks.len()];
        let mut in_degree = vec![0usize; stacks.len()];
        for (i, stack) in stacks.iter().enumerate() {
            let mut depends_on = BTreeSet::new();
            for key in stack.consumes() {
                let producer = *producers.get(&key).ok_or_else(|| {
                    DeployError::Configuration(format!(
                        "{} consumes {} but no stack produces it",
                        stack.name(),
                        key
                    ))
                })?;
                if producer == i {
                    return Err(DeployError::Configuration(format!(
                        "{} consumes its own key {}",
                        stack.name(),
                        key
                    )));
                }
                depends_on.insert(producer);
            }
            for producer in depends_on {
                dependents[producer].insert(i);
                in_degree[i] += 1;
            }
        }

        let mut order = Vec::with_capacity(stacks.len());
        let mut ready: BTreeSet<usize> =
            (0..stacks.len()).filter(|&i| in_degree[i] == 0).collect();
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != stacks.len() {
            let stuck: Vec<&str> = (0..stacks.len())
                .filter(|i| !order.contains(i))
                .map(|i| stacks[i].name())
                .collect();
            return Err(DeployError::Configuration(format!(
                "dependency cycle between stacks: {}",
                stuck.join(", ")
            )));
        }

        Ok(Self {
            stacks,
            order,
            producers,
        })
    }

    /// Stack names in deploy order
    pub fn order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.stacks[i].name()).collect()
    }

    pub fn stack(&self, name: &str) -> Option<&dyn Stack> {
        self.stacks
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    /// Where each key `stack` consumes will be read from
    pub fn producer_scopes(&self, stack: &dyn Stack) -> BTreeMap<ContractKey, Scope> {
        stack
            .consumes()
            .into_iter()
            .filter_map(|key| {
                let producer = self.producers.get(&key)?;
                let scope = self.stacks[*producer].scope().clone();
                Some((key, scope))
            })
            .collect()
    }

    /// Stacks a given stack waits for
    pub fn dependencies(&self, stack: &dyn Stack) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for key in stack.consumes() {
            if let Some(&producer) = self.producers.get(&key) {
                let name = self.stacks[producer].name();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// Result of a deploy run
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reports: Vec<StackReport>,
}

impl DeploymentSummary {
    /// Resources created, updated or replaced across all stacks
    pub fn changed_resources(&self) -> usize {
        self.reports.iter().map(|r| r.changed().count()).sum()
    }

    pub fn is_unchanged(&self) -> bool {
        self.reports.iter().all(|r| r.is_unchanged())
    }
}

pub struct Orchestrator<'a> {
    provider: &'a dyn CloudProvider,
    plan: DeploymentPlan,
    stack_timeout: Duration,
    checkpoint: Option<&'a dyn Checkpoint>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(provider: &'a dyn CloudProvider, plan: DeploymentPlan) -> Self {
        Self {
            provider,
            plan,
            stack_timeout: DEFAULT_STACK_TIMEOUT,
            checkpoint: None,
        }
    }

    pub fn with_stack_timeout(mut self, stack_timeout: Duration) -> Self {
        self.stack_timeout = stack_timeout;
        self
    }

    /// Save provider state after every stack, successful or not
    pub fn with_checkpoint(mut self, checkpoint: &'a dyn Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    /// Deploy one stack, regardless of whether its producers have run
    pub async fn deploy_stack(&self, name: &str) -> DeployResult<StackReport> {
        let stack = self
            .plan
            .stack(name)
            .ok_or_else(|| DeployError::Configuration(format!("unknown stack {}", name)))?;

        let ctx = StackContext::new(self.provider, stack, self.plan.producer_scopes(stack));
        info!(stack = %name, scope = %stack.scope(), "Deploying stack");

        let result = match timeout(self.stack_timeout, stack.deploy(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(DeployError::StackTimeout {
                stack: name.to_string(),
                timeout: self.stack_timeout,
            }),
        };

        if let Some(checkpoint) = self.checkpoint {
            match (checkpoint.save().await, &result) {
                (Ok(()), _) => {}
                (Err(e), Ok(_)) => return Err(e),
                // Keep the stack's own error
                (Err(e), Err(_)) => warn!(stack = %name, error = %e, "Failed to save state"),
            }
        }

        match &result {
            Ok(report) => info!(
                stack = %name,
                changed = report.changed().count(),
                published = report.published.len(),
                "Stack deployed"
            ),
            Err(e) => error!(stack = %name, error = %e, retryable = e.is_retryable(), "Stack failed"),
        }

        result
    }

    /// Deploy the selected stacks (all when empty) in plan order
    ///
    /// Stops at the first failing stack; earlier stacks stay deployed.
    pub async fn deploy(&self, selection: &[String]) -> DeployResult<DeploymentSummary> {
        for name in selection {
            if self.plan.stack(name).is_none() {
                return Err(DeployError::Configuration(format!("unknown stack {}", name)));
            }
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("deploy", run_id = %run_id);

        async move {
            let started_at = Utc::now();
            let mut reports = Vec::new();

            for name in self.plan.order() {
                if !selection.is_empty() && !selection.iter().any(|s| s == name) {
                    continue;
                }
                reports.push(self.deploy_stack(name).await?);
            }

            let summary = DeploymentSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                reports,
            };
            info!(
                stacks = summary.reports.len(),
                changed = summary.changed_resources(),
                "Deploy finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::EdgeFunctionKey;

    struct Declared {
        name: &'static str,
        produces: Vec<ContractKey>,
        consumes: Vec<ContractKey>,
        delay: Duration,
    }

    #[async_trait]
    impl Stack for Declared {
        fn name(&self) -> &str {
            self.name
        }

        fn scope(&self) -> &Scope {
            static SCOPE: std::sync::OnceLock<Scope> = std::sync::OnceLock::new();
            SCOPE.get_or_init(|| Scope::new("1", "us-east-1"))
        }

        fn produces(&self) -> Vec<ContractKey> {
            self.produces.clone()
        }

        fn consumes(&self) -> Vec<ContractKey> {
            self.consumes.clone()
        }

        async fn deploy(&self, ctx: &StackContext<'_>) -> DeployResult<StackReport> {
            tokio::time::sleep(self.delay).await;
            Ok(StackReport::new(ctx))
        }
    }

    fn stack(
        name: &'static str,
        produces: Vec<ContractKey>,
        consumes: Vec<ContractKey>,
    ) -> Box<dyn Stack> {
        Box::new(Declared {
            name,
            produces,
            consumes,
            delay: Duration::ZERO,
        })
    }

    fn function(key: EdgeFunctionKey) -> ContractKey {
        ContractKey::EdgeFunction(key)
    }

    #[test]
    fn test_consumer_ordered_after_producers() {
        let plan = DeploymentPlan::new(vec![
            stack(
                "WebsiteStack",
                vec![],
                vec![ContractKey::IdentityCertificate, function(EdgeFunctionKey::Subdomain)],
            ),
            stack("CertificateStack", vec![ContractKey::IdentityCertificate], vec![]),
            stack("EdgeFunctionStack", vec![function(EdgeFunctionKey::Subdomain)], vec![]),
        ])
        .unwrap();

        assert_eq!(
            plan.order(),
            vec!["CertificateStack", "EdgeFunctionStack", "WebsiteStack"]
        );
        let website = plan.stack("WebsiteStack").unwrap();
        assert_eq!(
            plan.dependencies(website),
            vec!["CertificateStack", "EdgeFunctionStack"]
        );
    }

    #[test]
    fn test_missing_producer_rejected() {
        let err = DeploymentPlan::new(vec![stack(
            "WebsiteStack",
            vec![],
            vec![ContractKey::IdentityCertificate],
        )])
        .unwrap_err();
        assert!(err.to_string().contains("CognitoCertArn"));
    }

    #[test]
    fn test_cycle_rejected() {
        let a = function(EdgeFunctionKey::Subdomain);
        let b = function(EdgeFunctionKey::PrivateRedirect);
        let err = DeploymentPlan::new(vec![
            stack("A", vec![a.clone()], vec![b.clone()]),
            stack("B", vec![b], vec![a]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_duplicate_producer_rejected() {
        let key = ContractKey::IdentityCertificate;
        let result = DeploymentPlan::new(vec![
            stack("A", vec![key.clone()], vec![]),
            stack("B", vec![key], vec![]),
        ]);
        assert!(matches!(result, Err(DeployError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_stack_timeout() {
        let cloud = SimulatedCloud::new();
        let slow: Box<dyn Stack> = Box::new(Declared {
            name: "Slow",
            produces: vec![],
            consumes: vec![],
            delay: Duration::from_secs(5),
        });
        let plan = DeploymentPlan::new(vec![slow]).unwrap();

        let orchestrator =
            Orchestrator::new(&cloud, plan).with_stack_timeout(Duration::from_millis(20));
        let err = orchestrator.deploy(&[]).await.unwrap_err();
        assert!(matches!(err, DeployError::StackTimeout { .. }));
        assert!(err.is_retryable());
    }

    struct BrokenCheckpoint;

    #[async_trait]
    impl Checkpoint for BrokenCheckpoint {
        async fn save(&self) -> DeployResult<()> {
            Err(DeployError::State("disk full".to_string()))
        }
    }

    struct Conflicting;

    #[async_trait]
    impl Stack for Conflicting {
        fn name(&self) -> &str {
            "Conflicting"
        }

        fn scope(&self) -> &Scope {
            static SCOPE: std::sync::OnceLock<Scope> = std::sync::OnceLock::new();
            SCOPE.get_or_init(|| Scope::new("1", "eu-west-1"))
        }

        fn produces(&self) -> Vec<ContractKey> {
            Vec::new()
        }

        fn consumes(&self) -> Vec<ContractKey> {
            Vec::new()
        }

        async fn deploy(&self, _ctx: &StackContext<'_>) -> DeployResult<StackReport> {
            Err(DeployError::Conflict("www.example.com CNAME taken".to_string()))
        }
    }

    #[tokio::test]
    async fn test_stack_error_survives_failed_checkpoint() {
        let cloud = SimulatedCloud::new();
        let failing: Box<dyn Stack> = Box::new(Conflicting);
        let plan = DeploymentPlan::new(vec![failing]).unwrap();

        let orchestrator = Orchestrator::new(&cloud, plan).with_checkpoint(&BrokenCheckpoint);
        let err = orchestrator.deploy_stack("Conflicting").await.unwrap_err();

        assert!(matches!(err, DeployError::Conflict(_)));
        assert!(err.to_string().contains("www.example.com"));
    }

    #[tokio::test]
    async fn test_failed_checkpoint_fails_successful_stack() {
        let cloud = SimulatedCloud::new();
        let plan = DeploymentPlan::new(vec![stack("A", vec![], vec![])]).unwrap();

        let orchestrator = Orchestrator::new(&cloud, plan).with_checkpoint(&BrokenCheckpoint);
        let err = orchestrator.deploy_stack("A").await.unwrap_err();

        assert!(matches!(err, DeployError::State(_)));
    }

    #[tokio::test]
    async fn test_unknown_stack_selection() {
        let cloud = SimulatedCloud::new();
        let plan = DeploymentPlan::new(vec![stack("A", vec![], vec![])]).unwrap();
        let orchestrator = Orchestrator::new(&cloud, plan);

        let result = orchestrator.deploy(&["Nope".to_string()]).await;
        assert!(matches!(result, Err(DeployError::Configuration(_))));
    }
}
