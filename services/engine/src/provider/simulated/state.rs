//! Serializable state of the simulated cloud

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::exchange::Parameter;
use crate::provider::{
    Bucket, Certificate, Distribution, Function, FunctionVersion, HostedZone,
    OriginAccessIdentity, RecordSet, RecordType, Role, UserPool, UserPoolClient, UserPoolDomain,
};

/// Everything the simulated cloud knows
///
/// Resources declared by stacks are keyed by their address
/// (`account/region/stack/logical-id`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudState {
    /// Accounts allowed to read parameters owned by other accounts
    #[serde(default)]
    pub trusted_accounts: BTreeSet<String>,
    /// Scope (`account/region`) -> name -> parameter
    #[serde(default)]
    pub parameters: BTreeMap<String, BTreeMap<String, Parameter>>,
    /// Zone id -> zone and its records
    #[serde(default)]
    pub hosted_zones: BTreeMap<String, ZoneState>,
    #[serde(default)]
    pub certificates: BTreeMap<String, Certificate>,
    #[serde(default)]
    pub roles: BTreeMap<String, Role>,
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionState>,
    #[serde(default)]
    pub buckets: BTreeMap<String, Bucket>,
    #[serde(default)]
    pub origin_access_identities: BTreeMap<String, OriginAccessIdentity>,
    #[serde(default)]
    pub distributions: BTreeMap<String, Distribution>,
    #[serde(default)]
    pub user_pools: BTreeMap<String, UserPool>,
    #[serde(default)]
    pub user_pool_clients: BTreeMap<String, UserPoolClient>,
    #[serde(default)]
    pub user_pool_domains: BTreeMap<String, UserPoolDomain>,
}

impl CloudState {
    pub fn zone_by_name(&self, name: &str) -> Option<&ZoneState> {
        self.hosted_zones.values().find(|z| z.zone.name == name)
    }

    pub fn certificate_by_arn(&self, arn: &str) -> Option<&Certificate> {
        self.certificates.values().find(|c| c.arn == arn)
    }

    /// Published version with this qualified ARN
    pub fn function_version_by_arn(&self, arn: &str) -> Option<&FunctionVersion> {
        self.functions
            .values()
            .flat_map(|f| f.versions.iter())
            .find(|v| v.arn == arn)
    }
}

/// A hosted zone and its record sets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneState {
    pub zone: HostedZone,
    /// `"<name> <TYPE>"` -> record
    #[serde(default)]
    pub records: BTreeMap<String, RecordSet>,
}

impl ZoneState {
    pub fn new(zone: HostedZone) -> Self {
        Self {
            zone,
            records: BTreeMap::new(),
        }
    }

    pub fn record_key(name: &str, record_type: RecordType) -> String {
        format!("{} {}", name, record_type)
    }

    pub fn record(&self, name: &str, record_type: RecordType) -> Option<&RecordSet> {
        self.records.get(&Self::record_key(name, record_type))
    }

    /// Records at `name`, any type
    pub fn records_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a RecordSet> {
        self.records.values().filter(move |r| r.name == name)
    }
}

/// A function head and its published versions, oldest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionState {
    pub function: Function,
    #[serde(default)]
    pub versions: Vec<FunctionVersion>,
}
