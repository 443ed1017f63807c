//! Certificate Provisioner
//!
//! Issues the site certificate (apex + alternates) and the identity
//! certificate (`auth.<apex>`) in the edge region, validates both through
//! DNS in the apex hosted zone and publishes their ARNs.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

use super::dns::prune_records;
use super::{Stack, StackContext, StackReport};
use crate::domain::AlternateNames;
use crate::error::{DeployError, DeployResult};
use crate::exchange::ContractKey;
use crate::provider::{
    Certificate, CertificateRequest, CertificateService, CertificateStatus, DnsService,
    HostedZone, HostedZoneLookup, RecordSpec, RecordTarget, RecordType, Scope,
};

pub const SITE_CERTIFICATE_ID: &str = "WebsiteSSLCertificate";
pub const IDENTITY_CERTIFICATE_ID: &str = "CognitoUserPoolDomainCert";

/// How long to wait for DNS validation, and how often to check
#[derive(Debug, Clone, Copy)]
pub struct ValidationSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(900),
            poll_interval: Duration::from_secs(15),
        }
    }
}

pub struct CertificateStack {
    name: String,
    scope: Scope,
    names: AlternateNames,
    validation: ValidationSettings,
}

impl CertificateStack {
    pub fn new(scope: Scope, names: AlternateNames, validation: ValidationSettings) -> Self {
        Self {
            name: "CertificateStack".to_string(),
            scope,
            names,
            validation,
        }
    }

    fn site_key(&self) -> ContractKey {
        ContractKey::SiteCertificate(self.names.apex().clone())
    }

    async fn request(
        &self,
        ctx: &StackContext<'_>,
        report: &mut StackReport,
        zone: &HostedZone,
        logical_id: &str,
        domain_name: String,
        subject_alternative_names: Vec<String>,
    ) -> DeployResult<Certificate> {
        let request = CertificateRequest {
            logical_id: logical_id.to_string(),
            domain_name,
            subject_alternative_names,
            hosted_zone_id: zone.id.clone(),
        };

        let provisioned = ctx
            .provider
            .request_certificate(ctx.scope(), ctx.stack(), &request)
            .await?;
        let arn = provisioned.resource.arn.clone();
        Ok(report.record("Certificate", logical_id, arn, provisioned))
    }

    /// One CNAME per distinct validation name; stale ones are removed
    async fn write_validation_records(
        &self,
        ctx: &StackContext<'_>,
        report: &mut StackReport,
        zone: &HostedZone,
        certificates: &[&Certificate],
    ) -> DeployResult<()> {
        let mut written = BTreeSet::new();

        for record in certificates.iter().flat_map(|c| c.validation_records.iter()) {
            if !written.insert((record.name.clone(), RecordType::CNAME)) {
                continue;
            }

            let spec = RecordSpec {
                name: record.name.clone(),
                record_type: RecordType::CNAME,
                target: RecordTarget::Value(record.value.clone()),
                comment: Some(format!("Managed by {}", ctx.stack())),
            };
            let provisioned = ctx.provider.upsert_record(&zone.id, ctx.stack(), &spec).await?;
            report.record("ValidationRecord", &record.name, &record.name, provisioned);
        }

        // Validation names of hostnames no longer covered
        prune_records(ctx, report, zone, "ValidationRecord", &written).await
    }

    /// Poll until the certificate is issued or the validation timeout expires
    async fn wait_for_issue(&self, ctx: &StackContext<'_>, arn: &str) -> DeployResult<Certificate> {
        let started = Instant::now();

        let poll = async {
            loop {
                let certificate = ctx.provider.describe_certificate(arn).await?;
                if certificate.status == CertificateStatus::Issued {
                    return Ok::<_, DeployError>(certificate);
                }
                debug!(arn = %arn, "Certificate pending validation");
                sleep(self.validation.poll_interval).await;
            }
        };

        match timeout(self.validation.timeout, poll).await {
            Ok(result) => {
                let certificate = result?;
                info!(arn = %arn, elapsed = ?started.elapsed(), "Certificate issued");
                Ok(certificate)
            }
            Err(_) => Err(DeployError::ValidationTimeout {
                arn: arn.to_string(),
                waited: started.elapsed(),
            }),
        }
    }
}

#[async_trait]
impl Stack for CertificateStack {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> &Scope {
        &self.scope
    }

    fn produces(&self) -> Vec<ContractKey> {
        vec![self.site_key(), ContractKey::IdentityCertificate]
    }

    fn consumes(&self) -> Vec<ContractKey> {
        Vec::new()
    }

    async fn deploy(&self, ctx: &StackContext<'_>) -> DeployResult<StackReport> {
        let mut report = StackReport::new(ctx);
        let apex = self.names.apex();

        // 1. Hosted zone for DNS validation
        let zone = ctx.provider.lookup_zone(apex.as_str()).await?;
        info!(zone = %zone.id, apex = %apex, "Found hosted zone");

        // 2. Request both certificates
        let site = self
            .request(
                ctx,
                &mut report,
                &zone,
                SITE_CERTIFICATE_ID,
                apex.to_string(),
                self.names.fqdns(),
            )
            .await?;
        let identity = self
            .request(
                ctx,
                &mut report,
                &zone,
                IDENTITY_CERTIFICATE_ID,
                apex.identity_hostname(),
                Vec::new(),
            )
            .await?;

        // 3. Validate through DNS
        self.write_validation_records(ctx, &mut report, &zone, &[&site, &identity])
            .await?;
        let site = self.wait_for_issue(ctx, &site.arn).await?;
        let identity = self.wait_for_issue(ctx, &identity.arn).await?;

        // 4. Hand the ARNs over
        let site_key = self.site_key();
        let write = ctx.publish(&site_key, &site.arn).await?;
        report.record_published(&site_key, write);

        let write = ctx
            .publish(&ContractKey::IdentityCertificate, &identity.arn)
            .await?;
        report.record_published(&ContractKey::IdentityCertificate, write);

        report.output("SiteCertificateArn", site.arn);
        report.output("IdentityCertificateArn", identity.arn);
        Ok(report)
    }
}
