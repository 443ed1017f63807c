//! Provisioning Provider Adapters
//!
//! Trait-based abstractions over the managed services the stacks provision
//! into. Every call is addressed by a [`Scope`] (account + region); stacks
//! in different scopes share nothing but the parameter exchange.
//!
//! [`simulated::SimulatedCloud`] implements every trait in-process and can
//! persist its state to a JSON file between runs.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::distribution::DistributionConfig;
use crate::error::DeployResult;
use crate::exchange::ParameterStore;

/// Region that edge certificates and edge function versions must live in
pub const EDGE_REGION: &str = "us-east-1";

/// Account + region pair a stack deploys into
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub account: String,
    pub region: String,
}

impl Scope {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }

    /// Same account, different region
    pub fn with_region(&self, region: &str) -> Self {
        Self::new(self.account.clone(), region)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.region)
    }
}

/// What a provisioning call did to the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAction {
    Created,
    Updated,
    /// Immutable resource recreated under a new identifier
    Replaced,
    Unchanged,
    /// No longer declared by its owner and removed
    Deleted,
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceAction::Created => write!(f, "created"),
            ResourceAction::Updated => write!(f, "updated"),
            ResourceAction::Replaced => write!(f, "replaced"),
            ResourceAction::Unchanged => write!(f, "unchanged"),
            ResourceAction::Deleted => write!(f, "deleted"),
        }
    }
}

/// A resource together with the action taken to reach it
#[derive(Debug, Clone)]
pub struct Provisioned<T> {
    pub resource: T,
    pub action: ResourceAction,
}

impl<T> Provisioned<T> {
    pub fn new(resource: T, action: ResourceAction) -> Self {
        Self { resource, action }
    }
}

// ============================================================
// Hosted zones
// ============================================================

/// Externally owned DNS zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    pub id: String,
    pub name: String,
    pub name_servers: Vec<String>,
    /// Whether the registrar actually delegates to `name_servers`
    pub delegated: bool,
}

#[async_trait]
pub trait HostedZoneLookup: Send + Sync {
    /// Look up the zone for an apex domain
    async fn lookup_zone(&self, domain_name: &str) -> DeployResult<HostedZone>;
}

// ============================================================
// Certificates
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    PendingValidation,
    Issued,
}

/// CNAME the certificate authority expects to find in the zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub name: String,
    pub value: String,
}

/// DNS-validated certificate request
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub logical_id: String,
    pub domain_name: String,
    pub subject_alternative_names: Vec<String>,
    pub hosted_zone_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub arn: String,
    pub region: String,
    pub domain_name: String,
    pub subject_alternative_names: Vec<String>,
    pub status: CertificateStatus,
    pub validation_records: Vec<ValidationRecord>,
    pub hosted_zone_id: String,
}

impl Certificate {
    /// Domain name followed by the alternates
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.domain_name.as_str())
            .chain(self.subject_alternative_names.iter().map(String::as_str))
    }

    /// Exact match, or a `*.` name matching exactly one label
    pub fn covers(&self, hostname: &str) -> bool {
        self.names().any(|name| match name.strip_prefix("*.") {
            Some(parent) => hostname
                .split_once('.')
                .map(|(_, rest)| rest == parent)
                .unwrap_or(false),
            None => name == hostname,
        })
    }
}

#[async_trait]
pub trait CertificateService: Send + Sync {
    /// Request (or find) a certificate. Covered names are immutable, so a
    /// change of names replaces the certificate.
    async fn request_certificate(
        &self,
        scope: &Scope,
        owner: &str,
        request: &CertificateRequest,
    ) -> DeployResult<Provisioned<Certificate>>;

    /// Current state, re-evaluating pending DNS validation
    async fn describe_certificate(&self, arn: &str) -> DeployResult<Certificate>;
}

// ============================================================
// Edge functions
// ============================================================

/// Function runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Runtime {
    #[serde(rename = "nodejs12.x")]
    Nodejs12,
    #[serde(rename = "nodejs18.x")]
    Nodejs18,
    #[serde(rename = "nodejs20.x")]
    Nodejs20,
    #[serde(rename = "python3.12")]
    Python312,
}

impl Runtime {
    /// File extensions a handler module may have
    pub fn module_extensions(&self) -> &'static [&'static str] {
        match self {
            Runtime::Nodejs12 | Runtime::Nodejs18 | Runtime::Nodejs20 => &["js", "mjs", "cjs"],
            Runtime::Python312 => &["py"],
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Runtime::Nodejs12 => write!(f, "nodejs12.x"),
            Runtime::Nodejs18 => write!(f, "nodejs18.x"),
            Runtime::Nodejs20 => write!(f, "nodejs20.x"),
            Runtime::Python312 => write!(f, "python3.12"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoleSpec {
    pub logical_id: String,
    pub trusted_services: Vec<String>,
    pub managed_policies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub arn: String,
    pub name: String,
    pub trusted_services: Vec<String>,
    pub managed_policies: Vec<String>,
}

/// Packaged function source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBundle {
    /// Base64 SHA-256 digest of the package
    pub sha256: String,
    pub size: u64,
    pub files: usize,
}

#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub logical_id: String,
    pub runtime: Runtime,
    pub handler: String,
    pub role_arn: String,
    pub code: CodeBundle,
    pub description: Option<String>,
}

/// Mutable function head
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub arn: String,
    pub name: String,
    pub region: String,
    pub runtime: Runtime,
    pub handler: String,
    pub role_arn: String,
    pub code_sha256: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Immutable, addressable snapshot of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionVersion {
    /// Qualified ARN (`...:function:<name>:<version>`)
    pub arn: String,
    pub function_arn: String,
    pub version: u64,
    pub code_sha256: String,
    pub runtime: Runtime,
    pub handler: String,
}

#[async_trait]
pub trait EdgeFunctionService: Send + Sync {
    async fn ensure_role(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &RoleSpec,
    ) -> DeployResult<Provisioned<Role>>;

    async fn deploy_function(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &FunctionSpec,
    ) -> DeployResult<Provisioned<Function>>;

    /// Snapshot the function head. Returns the latest version unchanged when
    /// the head has not moved since it was published.
    async fn publish_version(
        &self,
        scope: &Scope,
        function_arn: &str,
    ) -> DeployResult<Provisioned<FunctionVersion>>;
}

// ============================================================
// Storage
// ============================================================

#[derive(Debug, Clone)]
pub struct BucketSpec {
    pub logical_id: String,
    pub encrypted: bool,
    pub block_public_access: bool,
    /// Bucket only receives access logs
    pub log_delivery: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub arn: String,
    pub region: String,
    pub encrypted: bool,
    pub block_public_access: bool,
    pub log_delivery: bool,
}

impl Bucket {
    /// Regional endpoint the distribution reads from
    pub fn regional_domain_name(&self) -> String {
        format!("{}.s3.{}.amazonaws.com", self.name, self.region)
    }
}

#[async_trait]
pub trait StorageService: Send + Sync {
    async fn ensure_bucket(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &BucketSpec,
    ) -> DeployResult<Provisioned<Bucket>>;
}

// ============================================================
// Distributions
// ============================================================

/// Credential the distribution uses to read a private bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginAccessIdentity {
    pub id: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub id: String,
    pub arn: String,
    /// Stable endpoint (`dxxxx.cloudfront.net`)
    pub domain_name: String,
    pub config: DistributionConfig,
}

#[async_trait]
pub trait DistributionService: Send + Sync {
    async fn ensure_origin_access_identity(
        &self,
        scope: &Scope,
        owner: &str,
        logical_id: &str,
        comment: &str,
    ) -> DeployResult<Provisioned<OriginAccessIdentity>>;

    /// Create or update a distribution. The provider checks the viewer
    /// certificate, the alias set and the edge associations.
    async fn deploy_distribution(
        &self,
        scope: &Scope,
        owner: &str,
        logical_id: &str,
        config: &DistributionConfig,
    ) -> DeployResult<Provisioned<Distribution>>;
}

// ============================================================
// DNS records
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    #[allow(clippy::upper_case_acronyms)]
    AAAA,
    #[allow(clippy::upper_case_acronyms)]
    CNAME,
    #[allow(clippy::upper_case_acronyms)]
    TXT,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::TXT => write!(f, "TXT"),
        }
    }
}

/// What a record resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "lowercase")]
pub enum RecordTarget {
    /// Provider alias to another managed endpoint
    Alias(String),
    /// Plain record value
    Value(String),
}

impl RecordTarget {
    pub fn as_str(&self) -> &str {
        match self {
            RecordTarget::Alias(target) | RecordTarget::Value(target) => target,
        }
    }
}

impl fmt::Display for RecordTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordTarget::Alias(target) => write!(f, "ALIAS {}", target),
            RecordTarget::Value(target) => f.write_str(target),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub name: String,
    pub record_type: RecordType,
    pub target: RecordTarget,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    pub name: String,
    pub record_type: RecordType,
    pub target: RecordTarget,
    #[serde(default)]
    pub comment: Option<String>,
    /// Stack managing the record; `None` for records created outside this system
    #[serde(default)]
    pub owner: Option<String>,
}

#[async_trait]
pub trait DnsService: Send + Sync {
    /// Create or update a record. A record under the same name with different
    /// content that `owner` does not manage is a conflict.
    async fn upsert_record(
        &self,
        zone_id: &str,
        owner: &str,
        spec: &RecordSpec,
    ) -> DeployResult<Provisioned<RecordSet>>;

    async fn list_records(&self, zone_id: &str) -> DeployResult<Vec<RecordSet>>;

    /// Remove a record `owner` manages. Records owned by anyone else are left
    /// alone and reported as a conflict.
    async fn delete_record(
        &self,
        zone_id: &str,
        owner: &str,
        name: &str,
        record_type: RecordType,
    ) -> DeployResult<Provisioned<RecordSet>>;
}

// ============================================================
// Identity
// ============================================================

#[derive(Debug, Clone)]
pub struct UserPoolSpec {
    pub logical_id: String,
    pub name: String,
    pub self_sign_up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPool {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub self_sign_up: bool,
}

#[derive(Debug, Clone)]
pub struct UserPoolClientSpec {
    pub logical_id: String,
    pub user_pool_id: String,
    pub prevent_user_existence_errors: bool,
    pub generate_secret: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPoolClient {
    pub id: String,
    pub user_pool_id: String,
    pub prevent_user_existence_errors: bool,
    pub generate_secret: bool,
}

/// How the user pool is reachable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainBinding {
    /// Provider-default `<prefix>.auth.<region>.amazoncognito.com`
    Prefix(String),
    /// Own hostname served with a certificate from the edge region
    Custom {
        hostname: String,
        certificate_arn: String,
    },
}

#[derive(Debug, Clone)]
pub struct UserPoolDomainSpec {
    pub logical_id: String,
    pub user_pool_id: String,
    pub binding: DomainBinding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPoolDomain {
    pub domain: String,
    pub user_pool_id: String,
    pub binding: DomainBinding,
    /// Endpoint an alias record should point at
    pub alias_target: String,
}

impl UserPoolDomain {
    pub fn endpoint(&self) -> String {
        format!("https://{}", self.domain)
    }
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn ensure_user_pool(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &UserPoolSpec,
    ) -> DeployResult<Provisioned<UserPool>>;

    async fn ensure_user_pool_client(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &UserPoolClientSpec,
    ) -> DeployResult<Provisioned<UserPoolClient>>;

    /// Rejects a custom domain whose certificate does not cover the hostname
    async fn ensure_user_pool_domain(
        &self,
        scope: &Scope,
        owner: &str,
        spec: &UserPoolDomainSpec,
    ) -> DeployResult<Provisioned<UserPoolDomain>>;
}

/// Everything a stack may provision into
pub trait CloudProvider:
    ParameterStore
    + HostedZoneLookup
    + CertificateService
    + EdgeFunctionService
    + StorageService
    + DistributionService
    + DnsService
    + IdentityService
{
}

impl<T> CloudProvider for T where
    T: ParameterStore
        + HostedZoneLookup
        + CertificateService
        + EdgeFunctionService
        + StorageService
        + DistributionService
        + DnsService
        + IdentityService
{
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certificate(domain: &str, sans: &[&str]) -> Certificate {
        Certificate {
            arn: "arn:aws:acm:us-east-1:1:certificate/x".to_string(),
            region: EDGE_REGION.to_string(),
            domain_name: domain.to_string(),
            subject_alternative_names: sans.iter().map(|s| s.to_string()).collect(),
            status: CertificateStatus::Issued,
            validation_records: vec![],
            hosted_zone_id: "Z1".to_string(),
        }
    }

    #[test]
    fn test_certificate_covers() {
        let cert = certificate("example.com", &["www.example.com"]);
        assert!(cert.covers("example.com"));
        assert!(cert.covers("www.example.com"));
        assert!(!cert.covers("blog.example.com"));

        let wildcard = certificate("*.example.com", &[]);
        assert!(wildcard.covers("auth.example.com"));
        assert!(!wildcard.covers("example.com"));
        assert!(!wildcard.covers("a.b.example.com"));
    }

    #[test]
    fn test_record_target_serialization() {
        let json = serde_json::to_string(&RecordTarget::Alias("d1.cloudfront.net".to_string()))
            .unwrap();
        assert_eq!(json, r#"{"kind":"alias","target":"d1.cloudfront.net"}"#);
    }

    #[test]
    fn test_scope_display() {
        let scope = Scope::new("581911119805", "eu-west-1");
        assert_eq!(scope.to_string(), "581911119805/eu-west-1");
        assert_eq!(scope.with_region("us-east-1").region, "us-east-1");
    }
}
