//! DNS Binder

use std::collections::BTreeSet;
use tracing::info;

use super::{StackContext, StackReport};
use crate::domain::AlternateNames;
use crate::error::DeployResult;
use crate::provider::{DnsService, HostedZone, RecordSpec, RecordTarget, RecordType};

/// Delete records the running stack owns in `zone` that are not in `keep`
pub(crate) async fn prune_records(
    ctx: &StackContext<'_>,
    report: &mut StackReport,
    zone: &HostedZone,
    kind: &str,
    keep: &BTreeSet<(String, RecordType)>,
) -> DeployResult<()> {
    let stale: Vec<_> = ctx
        .provider
        .list_records(&zone.id)
        .await?
        .into_iter()
        .filter(|r| r.owner.as_deref() == Some(ctx.stack()))
        .filter(|r| !keep.contains(&(r.name.clone(), r.record_type)))
        .collect();

    for record in stale {
        let provisioned = ctx
            .provider
            .delete_record(&zone.id, ctx.stack(), &record.name, record.record_type)
            .await?;
        let logical_id = format!("{} {}", record.name, record.record_type);
        report.record(kind, &logical_id, record.name.as_str(), provisioned);
    }

    Ok(())
}

/// Records pointing the site and the identity hostname at their endpoints
pub struct DnsBinder<'a> {
    pub zone: &'a HostedZone,
    pub names: &'a AlternateNames,
}

impl DnsBinder<'_> {
    /// Desired records: apex alias, one CNAME per alternate, identity alias
    ///
    /// Alternates always target the apex, never the distribution, so a new
    /// distribution endpoint only moves the apex record.
    pub fn records(&self, distribution_domain: &str, identity_target: &str) -> Vec<RecordSpec> {
        let apex = self.names.apex();
        let mut records = vec![RecordSpec {
            name: apex.to_string(),
            record_type: RecordType::A,
            target: RecordTarget::Alias(distribution_domain.to_string()),
            comment: Some(format!(
                "Apex Record targetting Cloudfront Distribution for {}",
                apex
            )),
        }];

        for fqdn in self.names.fqdns() {
            records.push(RecordSpec {
                comment: Some(format!("Alias {} to our Cloudfront Distribution", fqdn)),
                name: fqdn,
                record_type: RecordType::CNAME,
                target: RecordTarget::Value(apex.to_string()),
            });
        }

        records.push(RecordSpec {
            name: apex.identity_hostname(),
            record_type: RecordType::A,
            target: RecordTarget::Alias(identity_target.to_string()),
            comment: Some(format!("Identity domain for {}", apex)),
        });

        records
    }

    pub async fn bind(
        &self,
        ctx: &StackContext<'_>,
        report: &mut StackReport,
        distribution_domain: &str,
        identity_target: &str,
    ) -> DeployResult<()> {
        let mut desired = BTreeSet::new();
        for spec in self.records(distribution_domain, identity_target) {
            let provisioned = ctx
                .provider
                .upsert_record(&self.zone.id, ctx.stack(), &spec)
                .await?;
            let logical_id = format!("{} {}", spec.name, spec.record_type);
            report.record("RecordSet", &logical_id, spec.name.as_str(), provisioned);
            desired.insert((spec.name, spec.record_type));
        }

        // Alternates dropped from the configuration
        prune_records(ctx, report, self.zone, "RecordSet", &desired).await?;

        info!(zone = %self.zone.name, "DNS records bound");
        Ok(())
    }
}
