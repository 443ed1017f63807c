//! Execution roles, functions and immutable versions

use async_trait::async_trait;
use std::collections::btree_map::Entry;
use tracing::{debug, info};

use super::{address, not_found, FunctionState, SimulatedCloud};
use crate::error::DeployResult;
use crate::provider::{
    EdgeFunctionService, Function, FunctionSpec, FunctionVersion, Provisioned, ResourceAction,
    Role, RoleSpec, Scope,
};

#[async_trait]
impl EdgeFunctionService for SimulatedCloud {
    async fn ensure_role(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &RoleSpec,
    ) -> DeployResult<Provisioned<Role>> {
        // Roles are global to the account
        let key = format!("{}/{}/{}", scope.account, owner, spec.logical_id);
        let name = format!("{}-{}", owner, spec.logical_id);

        let role = Role {
            arn: format!("arn:aws:iam::{}:role/{}", scope.account, name),
            name,
            trusted_services: spec.trusted_services.clone(),
            managed_policies: spec.managed_policies.clone(),
        };

        let mut state = self.state.write().await;
        let action = match state.roles.get(&key) {
            None => ResourceAction::Created,
            Some(existing) if existing == &role => ResourceAction::Unchanged,
            Some(_) => ResourceAction::Updated,
        };

        if action != ResourceAction::Unchanged {
            info!(role = %role.arn, action = %action, "Writing execution role");
            state.roles.insert(key, role.clone());
        }

        Ok(Provisioned::new(role, action))
    }

    async fn deploy_function(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &FunctionSpec,
    ) -> DeployResult<Provisioned<Function>> {
        let key = address(scope, owner, &spec.logical_id);
        let name = format!("{}-{}", owner, spec.logical_id);

        let function = Function {
            arn: format!(
                "arn:aws:lambda:{}:{}:function:{}",
                scope.region, scope.account, name
            ),
            name,
            region: scope.region.clone(),
            runtime: spec.runtime,
            handler: spec.handler.clone(),
            role_arn: spec.role_arn.clone(),
            code_sha256: spec.code.sha256.clone(),
            description: spec.description.clone(),
        };

        let mut state = self.state.write().await;
        if !state.roles.values().any(|r| r.arn == spec.role_arn) {
            return Err(not_found("execution role", &spec.role_arn));
        }

        let action = match state.functions.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(FunctionState {
                    function: function.clone(),
                    versions: Vec::new(),
                });
                ResourceAction::Created
            }
            Entry::Occupied(slot) if slot.get().function == function => ResourceAction::Unchanged,
            Entry::Occupied(mut slot) => {
                slot.get_mut().function = function.clone();
                ResourceAction::Updated
            }
        };

        info!(
            function = %function.arn,
            code_sha256 = %function.code_sha256,
            action = %action,
            "Deployed function"
        );

        Ok(Provisioned::new(function, action))
    }

    async fn publish_version(
        &self,
        _scope: &Scope,
        function_arn: &str,
    ) -> DeployResult<Provisioned<FunctionVersion>> {
        let mut state = self.state.write().await;
        let entry = state
            .functions
            .values_mut()
            .find(|f| f.function.arn == function_arn)
            .ok_or_else(|| not_found("function", function_arn))?;

        let head = &entry.function;
        if let Some(latest) = entry.versions.last() {
            if latest.code_sha256 == head.code_sha256
                && latest.runtime == head.runtime
                && latest.handler == head.handler
            {
                debug!(version = %latest.arn, "Function head unchanged, reusing version");
                return Ok(Provisioned::new(latest.clone(), ResourceAction::Unchanged));
            }
        }

        let number = entry.versions.len() as u64 + 1;
        let version = FunctionVersion {
            arn: format!("{}:{}", head.arn, number),
            function_arn: head.arn.clone(),
            version: number,
            code_sha256: head.code_sha256.clone(),
            runtime: head.runtime,
            handler: head.handler.clone(),
        };
        entry.versions.push(version.clone());

        info!(version = %version.arn, "Published function version");
        Ok(Provisioned::new(version, ResourceAction::Created))
    }
}
