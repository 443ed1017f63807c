//! User pools, clients and hosted sign-in domains

use async_trait::async_trait;
use tracing::info;

use super::{address, not_found, physical_id, CloudState, SimulatedCloud};
use crate::error::{DeployError, DeployResult};
use crate::provider::{
    CertificateStatus, DomainBinding, IdentityService, Provisioned, ResourceAction, Scope,
    UserPool, UserPoolClient, UserPoolClientSpec, UserPoolDomain, UserPoolDomainSpec,
    UserPoolSpec, EDGE_REGION,
};

fn action_for<T: PartialEq>(existing: Option<&T>, desired: &T) -> ResourceAction {
    match existing {
        None => ResourceAction::Created,
        Some(current) if current == desired => ResourceAction::Unchanged,
        Some(_) => ResourceAction::Updated,
    }
}

/// Resolve the hostname and alias target a binding will serve from
fn resolve_binding(
    state: &CloudState,
    scope: &Scope,
    key: &str,
    binding: &DomainBinding,
) -> DeployResult<(String, String)> {
    match binding {
        DomainBinding::Prefix(prefix) => {
            let domain = format!("{}.auth.{}.amazoncognito.com", prefix, scope.region);
            Ok((domain.clone(), domain))
        }
        DomainBinding::Custom {
            hostname,
            certificate_arn,
        } => {
            let certificate = state
                .certificate_by_arn(certificate_arn)
                .ok_or_else(|| not_found("certificate", certificate_arn))?;

            if certificate.region != EDGE_REGION {
                return Err(DeployError::Configuration(format!(
                    "custom domain certificate {} must be in {}",
                    certificate_arn, EDGE_REGION
                )));
            }
            if certificate.status != CertificateStatus::Issued {
                return Err(DeployError::Configuration(format!(
                    "custom domain certificate {} is not issued",
                    certificate_arn
                )));
            }
            if !certificate.covers(hostname) {
                return Err(DeployError::Configuration(format!(
                    "certificate {} does not cover {}",
                    certificate_arn, hostname
                )));
            }

            let alias_target = format!(
                "d{}.cloudfront.net",
                &physical_id(&["user-pool-domain", key, hostname])[..13]
            );
            Ok((hostname.clone(), alias_target))
        }
    }
}

#[async_trait]
impl IdentityService for SimulatedCloud {
    async fn ensure_user_pool(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &UserPoolSpec,
    ) -> DeployResult<Provisioned<UserPool>> {
        let key = address(scope, owner, &spec.logical_id);
        let id = format!(
            "{}_{}",
            scope.region,
            &physical_id(&["user-pool", &key])[..9]
        );

        let pool = UserPool {
            arn: format!(
                "arn:aws:cognito-idp:{}:{}:userpool/{}",
                scope.region, scope.account, id
            ),
            id,
            name: spec.name.clone(),
            self_sign_up: spec.self_sign_up,
        };

        let mut state = self.state.write().await;
        let action = action_for(state.user_pools.get(&key), &pool);
        if action != ResourceAction::Unchanged {
            info!(user_pool = %pool.id, action = %action, "Writing user pool");
            state.user_pools.insert(key, pool.clone());
        }

        Ok(Provisioned::new(pool, action))
    }

    async fn ensure_user_pool_client(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &UserPoolClientSpec,
    ) -> DeployResult<Provisioned<UserPoolClient>> {
        let key = address(scope, owner, &spec.logical_id);
        let mut state = self.state.write().await;

        if !state.user_pools.values().any(|p| p.id == spec.user_pool_id) {
            return Err(not_found("user pool", &spec.user_pool_id));
        }

        let client = UserPoolClient {
            id: physical_id(&["user-pool-client", &key])[..26].to_string(),
            user_pool_id: spec.user_pool_id.clone(),
            prevent_user_existence_errors: spec.prevent_user_existence_errors,
            generate_secret: spec.generate_secret,
        };

        let action = action_for(state.user_pool_clients.get(&key), &client);
        if action != ResourceAction::Unchanged {
            info!(client = %client.id, action = %action, "Writing user pool client");
            state.user_pool_clients.insert(key, client.clone());
        }

        Ok(Provisioned::new(client, action))
    }

    async fn ensure_user_pool_domain(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &UserPoolDomainSpec,
    ) -> DeployResult<Provisioned<UserPoolDomain>> {
        let key = address(scope, owner, &spec.logical_id);
        let mut state = self.state.write().await;

        if !state.user_pools.values().any(|p| p.id == spec.user_pool_id) {
            return Err(not_found("user pool", &spec.user_pool_id));
        }

        let (domain, alias_target) = resolve_binding(&state, scope, &key, &spec.binding)?;

        // Domains are globally unique
        if let Some((other_key, _)) = state
            .user_pool_domains
            .iter()
            .find(|(k, d)| k.as_str() != key && d.domain == domain)
        {
            return Err(DeployError::Conflict(format!(
                "user pool domain {} is already claimed by {}",
                domain, other_key
            )));
        }

        let user_pool_domain = UserPoolDomain {
            domain,
            user_pool_id: spec.user_pool_id.clone(),
            binding: spec.binding.clone(),
            alias_target,
        };

        let action = action_for(state.user_pool_domains.get(&key), &user_pool_domain);
        if action != ResourceAction::Unchanged {
            info!(
                domain = %user_pool_domain.domain,
                action = %action,
                "Writing user pool domain"
            );
            state.user_pool_domains.insert(key, user_pool_domain.clone());
        }

        Ok(Provisioned::new(user_pool_domain, action))
    }
}
