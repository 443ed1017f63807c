//! Hosted zones and record sets

use async_trait::async_trait;
use tracing::{debug, info};

use super::{normalize_name, SimulatedCloud, ZoneState};
use crate::error::{DeployError, DeployResult};
use crate::provider::{
    DnsService, HostedZone, HostedZoneLookup, Provisioned, RecordSet, RecordSpec, RecordType,
    ResourceAction,
};

#[async_trait]
impl HostedZoneLookup for SimulatedCloud {
    async fn lookup_zone(&self, domain_name: &str) -> DeployResult<HostedZone> {
        let name = normalize_name(domain_name);
        let state = self.state.read().await;

        state
            .zone_by_name(&name)
            .map(|z| z.zone.clone())
            .ok_or_else(|| {
                DeployError::Configuration(format!("hosted zone not found for {}", name))
            })
    }
}

#[async_trait]
impl DnsService for SimulatedCloud {
    async fn upsert_record(
        &self,
        zone_id: &str,
        owner: &str,
        spec: &RecordSpec,
    ) -> DeployResult<Provisioned<RecordSet>> {
        let name = normalize_name(&spec.name);
        let mut state = self.state.write().await;
        let zone = state
            .hosted_zones
            .get_mut(zone_id)
            .ok_or_else(|| super::not_found("hosted zone", zone_id))?;

        if name != zone.zone.name && !name.ends_with(&format!(".{}", zone.zone.name)) {
            return Err(DeployError::Configuration(format!(
                "record {} does not belong to zone {}",
                name, zone.zone.name
            )));
        }

        // A CNAME cannot share its name with any other record type
        let clashing = zone.records_named(&name).find(|r| {
            r.record_type != spec.record_type
                && (r.record_type == RecordType::CNAME || spec.record_type == RecordType::CNAME)
        });
        if let Some(existing) = clashing {
            return Err(DeployError::Conflict(format!(
                "{} {} cannot coexist with existing {} record -> {}",
                spec.record_type, name, existing.record_type, existing.target
            )));
        }

        let desired = RecordSet {
            name: name.clone(),
            record_type: spec.record_type,
            target: spec.target.clone(),
            comment: spec.comment.clone(),
            owner: Some(owner.to_string()),
        };
        let key = ZoneState::record_key(&name, spec.record_type);

        let action = match zone.records.get(&key) {
            None => ResourceAction::Created,
            Some(existing) if existing.owner.as_deref() == Some(owner) => {
                if existing == &desired {
                    ResourceAction::Unchanged
                } else {
                    ResourceAction::Updated
                }
            }
            Some(existing) if existing.target == desired.target => {
                debug!(record = %key, "Record matches but is managed elsewhere, leaving as is");
                return Ok(Provisioned::new(existing.clone(), ResourceAction::Unchanged));
            }
            Some(existing) => {
                return Err(DeployError::Conflict(format!(
                    "{} {} already exists with target {} (managed by {})",
                    spec.record_type,
                    name,
                    existing.target,
                    existing.owner.as_deref().unwrap_or("nobody")
                )));
            }
        };

        if action != ResourceAction::Unchanged {
            info!(record = %key, target = %desired.target, action = %action, "Writing DNS record");
            zone.records.insert(key, desired.clone());
        }

        Ok(Provisioned::new(desired, action))
    }

    async fn list_records(&self, zone_id: &str) -> DeployResult<Vec<RecordSet>> {
        let state = self.state.read().await;
        let zone = state
            .hosted_zones
            .get(zone_id)
            .ok_or_else(|| super::not_found("hosted zone", zone_id))?;

        Ok(zone.records.values().cloned().collect())
    }

    async fn delete_record(
        &self,
        zone_id: &str,
        owner: &str,
        name: &str,
        record_type: RecordType,
    ) -> DeployResult<Provisioned<RecordSet>> {
        let name = normalize_name(name);
        let mut state = self.state.write().await;
        let zone = state
            .hosted_zones
            .get_mut(zone_id)
            .ok_or_else(|| super::not_found("hosted zone", zone_id))?;

        let key = ZoneState::record_key(&name, record_type);
        let existing = zone
            .records
            .get(&key)
            .ok_or_else(|| super::not_found("record", &key))?;

        if existing.owner.as_deref() != Some(owner) {
            return Err(DeployError::Conflict(format!(
                "{} is managed by {}, not {}",
                key,
                existing.owner.as_deref().unwrap_or("nobody"),
                owner
            )));
        }

        let removed = zone
            .records
            .remove(&key)
            .ok_or_else(|| super::not_found("record", &key))?;
        info!(record = %key, target = %removed.target, "Deleted DNS record");

        Ok(Provisioned::new(removed, ResourceAction::Deleted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RecordTarget;

    fn cname(name: &str, target: &str) -> RecordSpec {
        RecordSpec {
            name: name.to_string(),
            record_type: RecordType::CNAME,
            target: RecordTarget::Value(target.to_string()),
            comment: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_created_then_unchanged_then_updated() {
        let cloud = SimulatedCloud::new();
        let zone = cloud.register_zone("example.com", true).await;

        let spec = cname("www.example.com", "example.com");
        let created = cloud.upsert_record(&zone.id, "WebsiteStack", &spec).await.unwrap();
        let again = cloud.upsert_record(&zone.id, "WebsiteStack", &spec).await.unwrap();
        let moved = cloud
            .upsert_record(&zone.id, "WebsiteStack", &cname("www.example.com", "other.com"))
            .await
            .unwrap();

        assert_eq!(created.action, ResourceAction::Created);
        assert_eq!(again.action, ResourceAction::Unchanged);
        assert_eq!(moved.action, ResourceAction::Updated);
    }

    #[tokio::test]
    async fn test_foreign_record_with_different_content_conflicts() {
        let cloud = SimulatedCloud::new();
        let zone = cloud.register_zone("example.com", true).await;

        cloud
            .upsert_record(&zone.id, "SomeoneElse", &cname("www.example.com", "legacy.example.net"))
            .await
            .unwrap();

        let err = cloud
            .upsert_record(&zone.id, "WebsiteStack", &cname("www.example.com", "example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Conflict(_)));
        assert!(err.to_string().contains("legacy.example.net"));

        let records = cloud.list_records(&zone.id).await.unwrap();
        assert_eq!(records[0].target.as_str(), "legacy.example.net");
    }

    #[tokio::test]
    async fn test_cname_cannot_coexist_with_alias() {
        let cloud = SimulatedCloud::new();
        let zone = cloud.register_zone("example.com", true).await;

        cloud
            .upsert_record(
                &zone.id,
                "WebsiteStack",
                &RecordSpec {
                    name: "blog.example.com".to_string(),
                    record_type: RecordType::A,
                    target: RecordTarget::Alias("d1.cloudfront.net".to_string()),
                    comment: None,
                },
            )
            .await
            .unwrap();

        let err = cloud
            .upsert_record(&zone.id, "WebsiteStack", &cname("blog.example.com", "example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_only_own_records() {
        let cloud = SimulatedCloud::new();
        let zone = cloud.register_zone("example.com", true).await;

        cloud
            .upsert_record(&zone.id, "WebsiteStack", &cname("blog.example.com", "example.com"))
            .await
            .unwrap();
        cloud
            .upsert_record(&zone.id, "LegacyStack", &cname("old.example.com", "example.com"))
            .await
            .unwrap();

        let err = cloud
            .delete_record(&zone.id, "WebsiteStack", "old.example.com", RecordType::CNAME)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Conflict(_)));

        let deleted = cloud
            .delete_record(&zone.id, "WebsiteStack", "blog.example.com", RecordType::CNAME)
            .await
            .unwrap();
        assert_eq!(deleted.action, ResourceAction::Deleted);

        let records = cloud.list_records(&zone.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "old.example.com");
    }

    #[tokio::test]
    async fn test_lookup_unknown_zone() {
        let cloud = SimulatedCloud::new();
        assert!(matches!(
            cloud.lookup_zone("example.com").await,
            Err(DeployError::Configuration(_))
        ));
    }
}
