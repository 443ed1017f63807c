//! Identity Domain Provisioner
//!
//! User pool, public client, provider-default prefix domain and the
//! `auth.<apex>` custom domain bound to the identity certificate the caller
//! resolved from the exchange.

use tracing::info;

use super::{StackContext, StackReport};
use crate::domain::ApexDomain;
use crate::error::DeployResult;
use crate::provider::{
    DomainBinding, IdentityService, UserPoolClientSpec, UserPoolDomain, UserPoolDomainSpec,
    UserPoolSpec,
};

/// Resources the DNS binder and the outputs need
pub struct IdentityEndpoints {
    pub user_pool_id: String,
    pub client_id: String,
    pub prefix_domain: UserPoolDomain,
    pub custom_domain: UserPoolDomain,
}

pub struct IdentityDomainProvisioner<'a> {
    pub apex: &'a ApexDomain,
    pub self_sign_up: bool,
}

impl IdentityDomainProvisioner<'_> {
    /// Prefix for the provider-default domain (`example-com`)
    pub fn domain_prefix(&self) -> String {
        self.apex.as_str().replace('.', "-")
    }

    pub async fn provision(
        &self,
        ctx: &StackContext<'_>,
        report: &mut StackReport,
        certificate_arn: &str,
    ) -> DeployResult<IdentityEndpoints> {
        let scope = ctx.scope();
        let owner = ctx.stack();

        let pool_spec = UserPoolSpec {
            logical_id: "UserPool".to_string(),
            name: format!("{}-users", self.apex),
            self_sign_up: self.self_sign_up,
        };
        let provisioned = ctx.provider.ensure_user_pool(scope, owner, &pool_spec).await?;
        let pool_arn = provisioned.resource.arn.clone();
        let pool = report.record("UserPool", "UserPool", pool_arn, provisioned);

        let client_spec = UserPoolClientSpec {
            logical_id: "UserPoolClient".to_string(),
            user_pool_id: pool.id.clone(),
            prevent_user_existence_errors: true,
            generate_secret: false,
        };
        let provisioned = ctx
            .provider
            .ensure_user_pool_client(scope, owner, &client_spec)
            .await?;
        let client_id = provisioned.resource.id.clone();
        let client = report.record("UserPoolClient", "UserPoolClient", client_id, provisioned);

        let prefix_spec = UserPoolDomainSpec {
            logical_id: "UserPoolDomain".to_string(),
            user_pool_id: pool.id.clone(),
            binding: DomainBinding::Prefix(self.domain_prefix()),
        };
        let provisioned = ctx
            .provider
            .ensure_user_pool_domain(scope, owner, &prefix_spec)
            .await?;
        let domain = provisioned.resource.domain.clone();
        let prefix_domain = report.record("UserPoolDomain", "UserPoolDomain", domain, provisioned);

        let custom_spec = UserPoolDomainSpec {
            logical_id: "UserPoolCustomDomain".to_string(),
            user_pool_id: pool.id.clone(),
            binding: DomainBinding::Custom {
                hostname: self.apex.identity_hostname(),
                certificate_arn: certificate_arn.to_string(),
            },
        };
        let provisioned = ctx
            .provider
            .ensure_user_pool_domain(scope, owner, &custom_spec)
            .await?;
        let domain = provisioned.resource.domain.clone();
        let custom_domain =
            report.record("UserPoolDomain", "UserPoolCustomDomain", domain, provisioned);

        info!(
            user_pool = %pool.id,
            endpoint = %custom_domain.endpoint(),
            "Identity domain ready"
        );

        Ok(IdentityEndpoints {
            user_pool_id: pool.id,
            client_id: client.id,
            prefix_domain,
            custom_domain,
        })
    }
}
