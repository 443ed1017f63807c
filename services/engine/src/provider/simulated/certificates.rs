//! DNS-validated certificates

use async_trait::async_trait;
use tracing::{debug, info};

use super::{address, physical_id, CloudState, SimulatedCloud};
use crate::error::{DeployError, DeployResult};
use crate::provider::{
    Certificate, CertificateRequest, CertificateService, CertificateStatus, Provisioned,
    RecordTarget, RecordType, ResourceAction, Scope, ValidationRecord,
};

/// `8-4-4-4-12` grouping of a hex id, like a certificate UUID
fn certificate_id(hex: &str) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn validation_record(account: &str, name: &str) -> ValidationRecord {
    ValidationRecord {
        name: format!("_{}.{}", &physical_id(&["validation", name])[..32], name),
        value: format!(
            "_{}.acm-validations.aws",
            &physical_id(&["token", account, name])[..32]
        ),
    }
}

/// Issued once the zone is delegated and every validation CNAME is in place
fn validation_complete(state: &CloudState, certificate: &Certificate) -> bool {
    let Some(zone) = state.hosted_zones.get(&certificate.hosted_zone_id) else {
        return false;
    };

    zone.zone.delegated
        && certificate.validation_records.iter().all(|expected| {
            zone.record(&expected.name, RecordType::CNAME)
                .map(|r| r.target == RecordTarget::Value(expected.value.clone()))
                .unwrap_or(false)
        })
}

#[async_trait]
impl CertificateService for SimulatedCloud {
    async fn request_certificate(
        &self,
        scope: &Scope,
        owner: &str,
        request: &CertificateRequest,
    ) -> DeployResult<Provisioned<Certificate>> {
        let key = address(scope, owner, &request.logical_id);
        let mut state = self.state.write().await;

        if !state.hosted_zones.contains_key(&request.hosted_zone_id) {
            return Err(super::not_found("hosted zone", &request.hosted_zone_id));
        }

        let previous = state.certificates.get(&key).cloned();
        if let Some(existing) = &previous {
            if existing.domain_name == request.domain_name
                && existing.subject_alternative_names == request.subject_alternative_names
                && existing.hosted_zone_id == request.hosted_zone_id
            {
                debug!(arn = %existing.arn, "Certificate unchanged");
                return Ok(Provisioned::new(existing.clone(), ResourceAction::Unchanged));
            }
        }

        let names = std::iter::once(request.domain_name.as_str())
            .chain(request.subject_alternative_names.iter().map(String::as_str));
        let mut validation_records: Vec<ValidationRecord> = Vec::new();
        for name in names.clone() {
            let record = validation_record(&scope.account, name);
            if !validation_records.contains(&record) {
                validation_records.push(record);
            }
        }

        let joined: Vec<&str> = names.collect();
        let id = physical_id(&[&key, &joined.join(",")]);
        let certificate = Certificate {
            arn: format!(
                "arn:aws:acm:{}:{}:certificate/{}",
                scope.region,
                scope.account,
                certificate_id(&id)
            ),
            region: scope.region.clone(),
            domain_name: request.domain_name.clone(),
            subject_alternative_names: request.subject_alternative_names.clone(),
            status: CertificateStatus::PendingValidation,
            validation_records,
            hosted_zone_id: request.hosted_zone_id.clone(),
        };

        let action = match previous {
            Some(_) => ResourceAction::Replaced,
            None => ResourceAction::Created,
        };

        info!(
            arn = %certificate.arn,
            domain = %certificate.domain_name,
            sans = certificate.subject_alternative_names.len(),
            action = %action,
            "Requested certificate"
        );

        state.certificates.insert(key, certificate.clone());
        Ok(Provisioned::new(certificate, action))
    }

    async fn describe_certificate(&self, arn: &str) -> DeployResult<Certificate> {
        let mut state = self.state.write().await;

        let key = state
            .certificates
            .iter()
            .find(|(_, c)| c.arn == arn)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| DeployError::Provider(format!("certificate {} not found", arn)))?;

        let issued = {
            let certificate = &state.certificates[&key];
            certificate.status == CertificateStatus::PendingValidation
                && validation_complete(&state, certificate)
        };

        let certificate = state
            .certificates
            .get_mut(&key)
            .ok_or_else(|| DeployError::Provider(format!("certificate {} not found", arn)))?;
        if issued {
            info!(arn = %arn, "Certificate validated and issued");
            certificate.status = CertificateStatus::Issued;
        }

        Ok(certificate.clone())
    }
}
