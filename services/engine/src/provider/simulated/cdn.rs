//! Buckets, origin access identities and distributions

use async_trait::async_trait;
use std::collections::btree_map::Entry;
use tracing::{debug, info, warn};

use super::{address, not_found, physical_id, CloudState, SimulatedCloud};
use crate::distribution::DistributionConfig;
use crate::error::{DeployError, DeployResult};
use crate::provider::{
    Bucket, BucketSpec, CertificateStatus, Distribution, DistributionService,
    OriginAccessIdentity, Provisioned, ResourceAction, Scope, StorageService, EDGE_REGION,
};

/// Checks the distribution service applies before accepting a config
fn validate_distribution(
    state: &CloudState,
    key: &str,
    config: &DistributionConfig,
) -> DeployResult<()> {
    let cert_arn = &config.viewer_certificate.certificate_arn;
    let certificate = state
        .certificate_by_arn(cert_arn)
        .ok_or_else(|| not_found("certificate", cert_arn))?;

    if certificate.region != EDGE_REGION {
        return Err(DeployError::Configuration(format!(
            "viewer certificate {} must be in {}, found in {}",
            cert_arn, EDGE_REGION, certificate.region
        )));
    }
    if certificate.status != CertificateStatus::Issued {
        return Err(DeployError::Configuration(format!(
            "viewer certificate {} is not issued",
            cert_arn
        )));
    }
    if let Some(uncovered) = config.aliases.iter().find(|a| !certificate.covers(a)) {
        return Err(DeployError::Configuration(format!(
            "viewer certificate {} does not cover alias {}",
            cert_arn, uncovered
        )));
    }

    for association in config.default_behavior.edge_associations.evaluation_order() {
        let arn = &association.function_version_arn;
        let version = state
            .function_version_by_arn(arn)
            .ok_or_else(|| {
                DeployError::Configuration(format!(
                    "{} association {} is not a published function version",
                    association.event_type, arn
                ))
            })?;

        let in_edge_region = state
            .functions
            .values()
            .any(|f| f.function.arn == version.function_arn && f.function.region == EDGE_REGION);
        if !in_edge_region {
            return Err(DeployError::Configuration(format!(
                "function version {} must be published in {}",
                arn, EDGE_REGION
            )));
        }
    }

    let oai = &config.origin.origin_access_identity;
    if !state.origin_access_identities.values().any(|o| &o.id == oai) {
        return Err(not_found("origin access identity", oai));
    }

    for (other_key, other) in &state.distributions {
        if other_key == key {
            continue;
        }
        if let Some(alias) = config
            .aliases
            .iter()
            .find(|a| other.config.aliases.contains(*a))
        {
            return Err(DeployError::Conflict(format!(
                "alias {} is already served by distribution {}",
                alias, other.id
            )));
        }
    }

    Ok(())
}

#[async_trait]
impl StorageService for SimulatedCloud {
    async fn ensure_bucket(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &BucketSpec,
    ) -> DeployResult<Provisioned<Bucket>> {
        let key = address(scope, owner, &spec.logical_id);
        let name = format!(
            "{}-{}-{}",
            owner,
            spec.logical_id,
            &physical_id(&["bucket", &key])[..12]
        )
        .to_ascii_lowercase();

        let bucket = Bucket {
            arn: format!("arn:aws:s3:::{}", name),
            name,
            region: scope.region.clone(),
            encrypted: spec.encrypted,
            block_public_access: spec.block_public_access,
            log_delivery: spec.log_delivery,
        };

        if !bucket.block_public_access && !bucket.log_delivery {
            warn!(bucket = %bucket.name, "Bucket allows public access");
        }

        let mut state = self.state.write().await;
        let action = match state.buckets.get(&key) {
            None => ResourceAction::Created,
            Some(existing) if existing == &bucket => ResourceAction::Unchanged,
            Some(_) => ResourceAction::Updated,
        };

        if action != ResourceAction::Unchanged {
            info!(bucket = %bucket.name, action = %action, "Writing bucket");
            state.buckets.insert(key, bucket.clone());
        }

        Ok(Provisioned::new(bucket, action))
    }
}

#[async_trait]
impl DistributionService for SimulatedCloud {
    async fn ensure_origin_access_identity(
        &self,
        scope: &Scope,
        owner: &str,
        logical_id: &str,
        comment: &str,
    ) -> DeployResult<Provisioned<OriginAccessIdentity>> {
        let key = address(scope, owner, logical_id);
        let mut state = self.state.write().await;

        let action = match state.origin_access_identities.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(OriginAccessIdentity {
                    id: format!("E{}", physical_id(&["oai", &key])[..13].to_uppercase()),
                    comment: comment.to_string(),
                });
                ResourceAction::Created
            }
            Entry::Occupied(slot) if slot.get().comment == comment => ResourceAction::Unchanged,
            Entry::Occupied(mut slot) => {
                slot.get_mut().comment = comment.to_string();
                ResourceAction::Updated
            }
        };

        let identity = state
            .origin_access_identities
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found("origin access identity", &key))?;

        debug!(oai = %identity.id, action = %action, "Origin access identity");
        Ok(Provisioned::new(identity, action))
    }

    async fn deploy_distribution(
        &self,
        scope: &Scope,
        owner: &str,
        logical_id: &str,
        config: &DistributionConfig,
    ) -> DeployResult<Provisioned<Distribution>> {
        let key = address(scope, owner, logical_id);
        let mut state = self.state.write().await;

        validate_distribution(&state, &key, config)?;

        let action = match state.distributions.entry(key.clone()) {
            Entry::Vacant(slot) => {
                let id = physical_id(&["distribution", &key]);
                let distribution_id = format!("E{}", id[..13].to_uppercase());
                slot.insert(Distribution {
                    arn: format!(
                        "arn:aws:cloudfront::{}:distribution/{}",
                        scope.account, distribution_id
                    ),
                    id: distribution_id,
                    domain_name: format!("d{}.cloudfront.net", &id[13..26]),
                    config: config.clone(),
                });
                ResourceAction::Created
            }
            Entry::Occupied(slot) if &slot.get().config == config => ResourceAction::Unchanged,
            Entry::Occupied(mut slot) => {
                slot.get_mut().config = config.clone();
                ResourceAction::Updated
            }
        };

        let distribution = state
            .distributions
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found("distribution", &key))?;

        info!(
            distribution = %distribution.id,
            domain = %distribution.domain_name,
            aliases = ?distribution.config.aliases,
            action = %action,
            "Deployed distribution"
        );

        Ok(Provisioned::new(distribution, action))
    }
}
