//! Contract keys shared by producer and consumer stacks
//!
//! The parameter names are a stable wire contract. Stacks never spell them
//! out by hand; they go through [`ContractKey`] so a typo cannot split a
//! producer from its consumer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::ApexDomain;

/// Edge functions published by the edge function stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeFunctionKey {
    /// Rewrites requests for the private area of the site
    PrivateRedirect,
    /// Redirects alternate hostnames
    Subdomain,
}

impl EdgeFunctionKey {
    pub fn parameter_name(&self) -> &'static str {
        match self {
            EdgeFunctionKey::PrivateRedirect => "PrivateLambdaRedirectArn",
            EdgeFunctionKey::Subdomain => "SubdomainLambdaArn",
        }
    }
}

impl fmt::Display for EdgeFunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeFunctionKey::PrivateRedirect => write!(f, "private-redirect"),
            EdgeFunctionKey::Subdomain => write!(f, "subdomain"),
        }
    }
}

/// Well-known exchange key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContractKey {
    /// Certificate covering the apex and its alternates (`<apex>-SSLCertificate`)
    SiteCertificate(ApexDomain),
    /// Certificate for the identity hostname (`CognitoCertArn`)
    IdentityCertificate,
    /// Published version of an edge function
    EdgeFunction(EdgeFunctionKey),
}

impl ContractKey {
    /// Name the parameter is stored under
    pub fn parameter_name(&self) -> String {
        match self {
            ContractKey::SiteCertificate(apex) => format!("{}-SSLCertificate", apex),
            ContractKey::IdentityCertificate => "CognitoCertArn".to_string(),
            ContractKey::EdgeFunction(function) => function.parameter_name().to_string(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            ContractKey::SiteCertificate(apex) => {
                format!("ARN for our SSL Certificate for {}", apex)
            }
            ContractKey::IdentityCertificate => {
                "ARN for our SSL Certificate for Cognito".to_string()
            }
            ContractKey::EdgeFunction(function) => {
                format!("ARN for the {} edge function version", function)
            }
        }
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.parameter_name())
    }
}
