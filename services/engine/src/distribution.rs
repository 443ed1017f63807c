//! Distribution Assembler
//!
//! Builds the desired configuration of the content distribution from
//! identifiers resolved out of the parameter exchange. The assembler is
//! pure; the website stack hands the result to the provider.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::AlternateNames;
use crate::error::{DeployError, DeployResult};

/// Path prefix the public site is served from inside the asset bucket
pub const SITE_ORIGIN_PATH: &str = "/www/static";

pub const DEFAULT_ROOT_OBJECT: &str = "index.html";

/// Request-lifecycle event point an edge function is attached to
///
/// Variants are declared in evaluation order: origin-request associations
/// (which may rewrite the outgoing origin path) run before viewer-request
/// associations (which may redirect the inbound request).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeEventType {
    OriginRequest,
    ViewerRequest,
    OriginResponse,
    ViewerResponse,
}

impl fmt::Display for EdgeEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeEventType::OriginRequest => write!(f, "origin-request"),
            EdgeEventType::ViewerRequest => write!(f, "viewer-request"),
            EdgeEventType::OriginResponse => write!(f, "origin-response"),
            EdgeEventType::ViewerResponse => write!(f, "viewer-response"),
        }
    }
}

/// Function version bound to an event point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeAssociation {
    pub event_type: EdgeEventType,
    /// Qualified function version ARN
    pub function_version_arn: String,
}

impl EdgeAssociation {
    pub fn new(event_type: EdgeEventType, function_version_arn: impl Into<String>) -> Self {
        Self {
            event_type,
            function_version_arn: function_version_arn.into(),
        }
    }
}

/// Edge associations in evaluation order
///
/// # Invariants
/// - Event types never decrease along the list
/// - Associations sharing an event type keep attachment order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<EdgeAssociation>", into = "Vec<EdgeAssociation>")]
pub struct AssociationList(Vec<EdgeAssociation>);

impl AssociationList {
    /// Accept a list only if it is already in evaluation order
    pub fn new(associations: Vec<EdgeAssociation>) -> DeployResult<Self> {
        for pair in associations.windows(2) {
            if pair[1].event_type < pair[0].event_type {
                return Err(DeployError::Configuration(format!(
                    "edge association {} ({}) must not follow {} ({})",
                    pair[1].function_version_arn,
                    pair[1].event_type,
                    pair[0].function_version_arn,
                    pair[0].event_type
                )));
            }
        }
        Ok(Self(associations))
    }

    /// Order associations by event type, keeping attachment order within one
    pub fn sorted(mut associations: Vec<EdgeAssociation>) -> Self {
        associations.sort_by_key(|a| a.event_type);
        Self(associations)
    }

    /// Append, rejecting an association that would run out of order
    pub fn push(&mut self, association: EdgeAssociation) -> DeployResult<()> {
        if let Some(last) = self.0.last() {
            if association.event_type < last.event_type {
                return Err(DeployError::Configuration(format!(
                    "cannot attach a {} association after a {} association",
                    association.event_type, last.event_type
                )));
            }
        }
        self.0.push(association);
        Ok(())
    }

    /// Associations in the order the edge evaluates them
    pub fn evaluation_order(&self) -> impl Iterator<Item = &EdgeAssociation> {
        self.0.iter()
    }

    /// Associations attached to one event point, in attachment order
    pub fn at(&self, event_type: EdgeEventType) -> impl Iterator<Item = &EdgeAssociation> {
        self.0.iter().filter(move |a| a.event_type == event_type)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<EdgeAssociation>> for AssociationList {
    type Error = DeployError;

    fn try_from(value: Vec<EdgeAssociation>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AssociationList> for Vec<EdgeAssociation> {
    fn from(value: AssociationList) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerProtocolPolicy {
    AllowAll,
    HttpsOnly,
    RedirectToHttps,
}

/// Minimum TLS policy presented to viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinimumProtocolVersion {
    #[serde(rename = "TLSv1.2_2019")]
    TlsV12_2019,
    #[serde(rename = "TLSv1.2_2021")]
    TlsV12_2021,
}

/// Pinned policy for every distribution this system builds
pub const PINNED_TLS_POLICY: MinimumProtocolVersion = MinimumProtocolVersion::TlsV12_2021;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerCertificate {
    pub certificate_arn: String,
    pub minimum_protocol_version: MinimumProtocolVersion,
    pub sni_only: bool,
}

/// Private bucket origin read through an origin-access identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOrigin {
    pub domain_name: String,
    pub origin_path: String,
    pub origin_access_identity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultBehavior {
    pub compress: bool,
    pub viewer_protocol_policy: ViewerProtocolPolicy,
    pub edge_associations: AssociationList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogging {
    pub bucket: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionConfig {
    pub comment: String,
    pub aliases: Vec<String>,
    pub default_root_object: String,
    pub origin: BucketOrigin,
    pub default_behavior: DefaultBehavior,
    pub viewer_certificate: ViewerCertificate,
    #[serde(default)]
    pub logging: Option<AccessLogging>,
}

/// Inputs resolved before assembly
pub struct DistributionAssembler<'a> {
    pub names: &'a AlternateNames,
    /// Regional endpoint of the asset bucket
    pub origin_domain_name: String,
    pub origin_access_identity: String,
    /// Log-only bucket, when access logging is enabled
    pub log_bucket: Option<String>,
}

impl DistributionAssembler<'_> {
    pub fn assemble(
        &self,
        certificate_arn: &str,
        associations: Vec<EdgeAssociation>,
    ) -> DistributionConfig {
        let apex = self.names.apex();

        DistributionConfig {
            comment: format!("Cloudfront Distribution for website - {}", apex),
            aliases: self.names.with_apex(),
            default_root_object: DEFAULT_ROOT_OBJECT.to_string(),
            origin: BucketOrigin {
                domain_name: self.origin_domain_name.clone(),
                origin_path: SITE_ORIGIN_PATH.to_string(),
                origin_access_identity: self.origin_access_identity.clone(),
            },
            default_behavior: DefaultBehavior {
                compress: true,
                viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
                edge_associations: AssociationList::sorted(associations),
            },
            viewer_certificate: ViewerCertificate {
                certificate_arn: certificate_arn.to_string(),
                minimum_protocol_version: PINNED_TLS_POLICY,
                sni_only: true,
            },
            logging: self.log_bucket.as_ref().map(|bucket| AccessLogging {
                bucket: bucket.clone(),
                prefix: format!("{}/", apex),
            }),
        }
    }
}
