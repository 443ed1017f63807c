//! Website stack
//!
//! Deploys in the consumer region. Reads the certificate and edge function
//! version ARNs from the edge region through the exchange before creating
//! anything, builds the distribution, then the identity domain, then binds DNS.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::dns::DnsBinder;
use super::identity::IdentityDomainProvisioner;
use super::{Stack, StackContext, StackReport};
use crate::distribution::{DistributionAssembler, EdgeAssociation, EdgeEventType};
use crate::domain::AlternateNames;
use crate::error::DeployResult;
use crate::exchange::{ContractKey, EdgeFunctionKey};
use crate::provider::{BucketSpec, DistributionService, HostedZoneLookup, Scope, StorageService};

pub const DISTRIBUTION_ID: &str = "StaticAssetDistro";

/// Attach a published edge function to an event point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeBinding {
    pub key: EdgeFunctionKey,
    pub event: EdgeEventType,
}

pub struct WebsiteStack {
    name: String,
    scope: Scope,
    names: AlternateNames,
    /// Attachment order within an event point follows this list
    bindings: Vec<EdgeBinding>,
    access_logging: bool,
    self_sign_up: bool,
}

impl WebsiteStack {
    pub fn new(scope: Scope, names: AlternateNames, bindings: Vec<EdgeBinding>) -> Self {
        Self {
            name: "WebsiteStack".to_string(),
            scope,
            names,
            bindings,
            access_logging: false,
            self_sign_up: false,
        }
    }

    pub fn with_access_logging(mut self, enabled: bool) -> Self {
        self.access_logging = enabled;
        self
    }

    pub fn with_self_sign_up(mut self, enabled: bool) -> Self {
        self.self_sign_up = enabled;
        self
    }

    fn site_key(&self) -> ContractKey {
        ContractKey::SiteCertificate(self.names.apex().clone())
    }
}

#[async_trait]
impl Stack for WebsiteStack {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> &Scope {
        &self.scope
    }

    fn produces(&self) -> Vec<ContractKey> {
        Vec::new()
    }

    fn consumes(&self) -> Vec<ContractKey> {
        let mut keys = vec![self.site_key(), ContractKey::IdentityCertificate];
        for binding in &self.bindings {
            let key = ContractKey::EdgeFunction(binding.key);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    async fn deploy(&self, ctx: &StackContext<'_>) -> DeployResult<StackReport> {
        let mut report = StackReport::new(ctx);
        let scope = ctx.scope();
        let owner = ctx.stack();
        let apex = self.names.apex();

        let zone = ctx.provider.lookup_zone(apex.as_str()).await?;

        // 1. Cross-region reads, before anything is provisioned
        let site_key = self.site_key();
        let certificate = ctx.resolve(&site_key).await?;
        report.record_resolved(&site_key, &certificate);

        let mut associations = Vec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            let key = ContractKey::EdgeFunction(binding.key);
            let version = ctx.resolve(&key).await?;
            report.record_resolved(&key, &version);
            associations.push(EdgeAssociation::new(binding.event, version.value));
        }

        let identity_certificate = ctx.resolve(&ContractKey::IdentityCertificate).await?;
        report.record_resolved(&ContractKey::IdentityCertificate, &identity_certificate);

        // 2. Origin bucket, log bucket, origin access identity
        let assets = BucketSpec {
            logical_id: "WebsiteStaticAssets".to_string(),
            encrypted: true,
            block_public_access: true,
            log_delivery: false,
        };
        let provisioned = ctx.provider.ensure_bucket(scope, owner, &assets).await?;
        let bucket_arn = provisioned.resource.arn.clone();
        let bucket = report.record("Bucket", "WebsiteStaticAssets", bucket_arn, provisioned);

        let log_bucket = if self.access_logging {
            let logs = BucketSpec {
                logical_id: "WebsiteAccessLogs".to_string(),
                encrypted: true,
                block_public_access: true,
                log_delivery: true,
            };
            let provisioned = ctx.provider.ensure_bucket(scope, owner, &logs).await?;
            let arn = provisioned.resource.arn.clone();
            Some(report.record("Bucket", "WebsiteAccessLogs", arn, provisioned))
        } else {
            None
        };

        let comment = format!("OAI for website - {}", apex);
        let provisioned = ctx
            .provider
            .ensure_origin_access_identity(scope, owner, "OAI", &comment)
            .await?;
        let oai_id = provisioned.resource.id.clone();
        let oai = report.record("OriginAccessIdentity", "OAI", oai_id, provisioned);

        // 3. Distribution
        let config = DistributionAssembler {
            names: &self.names,
            origin_domain_name: bucket.regional_domain_name(),
            origin_access_identity: oai.id,
            log_bucket: log_bucket.map(|b| b.name),
        }
        .assemble(&certificate.value, associations);

        let provisioned = ctx
            .provider
            .deploy_distribution(scope, owner, DISTRIBUTION_ID, &config)
            .await?;
        let distribution_id = provisioned.resource.id.clone();
        let distribution =
            report.record("Distribution", DISTRIBUTION_ID, distribution_id, provisioned);

        // 4. Identity
        let identity = IdentityDomainProvisioner {
            apex,
            self_sign_up: self.self_sign_up,
        }
        .provision(ctx, &mut report, &identity_certificate.value)
        .await?;

        // 5. DNS
        DnsBinder {
            zone: &zone,
            names: &self.names,
        }
        .bind(
            ctx,
            &mut report,
            &distribution.domain_name,
            &identity.custom_domain.alias_target,
        )
        .await?;

        info!(
            distribution = %distribution.id,
            domain = %distribution.domain_name,
            "Website deployed"
        );

        report.output("BucketName", bucket.name);
        report.output("DistributionId", distribution.id);
        report.output("DistributionDomainName", distribution.domain_name);
        report.output("SiteUrl", format!("https://{}", apex));
        report.output("UserPoolId", identity.user_pool_id);
        report.output("UserPoolClientId", identity.client_id);
        report.output("UserPoolDomain", identity.prefix_domain.endpoint());
        report.output("IdentityEndpoint", identity.custom_domain.endpoint());
        Ok(report)
    }
}
