//! Parameter store

use async_trait::async_trait;
use tracing::debug;

use super::SimulatedCloud;
use crate::exchange::{ExchangeError, Parameter, ParameterStore, ParameterWrite, PutParameter};
use crate::provider::Scope;

impl SimulatedCloud {
    async fn check_read_access(&self, caller: &Scope, scope: &Scope) -> Result<(), ExchangeError> {
        if caller.account == scope.account {
            return Ok(());
        }

        let state = self.state.read().await;
        if state.trusted_accounts.contains(&caller.account) {
            Ok(())
        } else {
            Err(ExchangeError::AccessDenied {
                caller: caller.account.clone(),
                scope: scope.to_string(),
            })
        }
    }
}

#[async_trait]
impl ParameterStore for SimulatedCloud {
    async fn put_parameter(
        &self,
        scope: &Scope,
        request: PutParameter,
    ) -> Result<ParameterWrite, ExchangeError> {
        self.ensure_available()?;

        let mut state = self.state.write().await;
        let parameters = state.parameters.entry(scope.to_string()).or_default();

        if let Some(existing) = parameters.get(&request.name) {
            if existing.value == request.value {
                debug!(name = %request.name, scope = %scope, "Parameter unchanged");
                return Ok(ParameterWrite {
                    version: existing.version,
                    changed: false,
                });
            }
        }

        let version = parameters
            .get(&request.name)
            .map(|p| p.version + 1)
            .unwrap_or(1);

        parameters.insert(
            request.name.clone(),
            Parameter {
                name: request.name,
                value: request.value,
                description: request.description,
                version,
                last_modified: chrono::Utc::now(),
                writer: request.writer,
            },
        );

        Ok(ParameterWrite {
            version,
            changed: true,
        })
    }

    async fn get_parameter(
        &self,
        caller: &Scope,
        scope: &Scope,
        name: &str,
    ) -> Result<Parameter, ExchangeError> {
        self.ensure_available()?;
        self.check_read_access(caller, scope).await?;

        let state = self.state.read().await;
        state
            .parameters
            .get(&scope.to_string())
            .and_then(|parameters| parameters.get(name))
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound {
                key: name.to_string(),
                region: scope.region.clone(),
            })
    }

    async fn list_parameters(
        &self,
        caller: &Scope,
        scope: &Scope,
    ) -> Result<Vec<Parameter>, ExchangeError> {
        self.ensure_available()?;
        self.check_read_access(caller, scope).await?;

        let state = self.state.read().await;
        Ok(state
            .parameters
            .get(&scope.to_string())
            .map(|parameters| parameters.values().cloned().collect())
            .unwrap_or_default())
    }
}
