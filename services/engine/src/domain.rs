//! Apex domain and subject alternative names
//!
//! The apex is the registered domain the whole site hangs off. Alternate
//! names come from a comma-separated list of labels, each of which becomes
//! a direct subdomain of the apex.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Label reserved for the identity provider's custom domain
pub const IDENTITY_LABEL: &str = "auth";

/// Domain validation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Domain name is empty")]
    Empty,

    #[error("Domain name exceeds maximum length of 253 characters: {0}")]
    TooLong(usize),

    #[error("Apex domain needs at least two labels: {0}")]
    NotRegistrable(String),

    #[error("Invalid label {label:?}: {reason}")]
    InvalidLabel { label: String, reason: &'static str },

    #[error("Alternate name list contains an empty entry: {0:?}")]
    EmptyAlternate(String),

    #[error("Alternate label {0:?} is reserved for the identity domain")]
    ReservedLabel(String),
}

fn validate_label(label: &str) -> Result<(), DomainError> {
    let invalid = |reason| DomainError::InvalidLabel {
        label: label.to_string(),
        reason,
    };

    if label.is_empty() {
        return Err(invalid("empty label"));
    }
    if label.len() > 63 {
        return Err(invalid("longer than 63 characters"));
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(invalid("only letters, digits and hyphens are allowed"));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(invalid("cannot start or end with a hyphen"));
    }
    Ok(())
}

/// Registered root domain, lowercased and validated
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApexDomain(String);

impl ApexDomain {
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into().trim().trim_end_matches('.').to_ascii_lowercase();

        if name.is_empty() {
            return Err(DomainError::Empty);
        }
        if name.len() > 253 {
            return Err(DomainError::TooLong(name.len()));
        }

        let labels: Vec<&str> = name.split('.').collect();
        if labels.len() < 2 {
            return Err(DomainError::NotRegistrable(name));
        }
        for label in &labels {
            validate_label(label)?;
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `label.apex`
    pub fn subdomain(&self, label: &str) -> String {
        format!("{}.{}", label, self.0)
    }

    /// Hostname served by the identity provider (`auth.<apex>`)
    pub fn identity_hostname(&self) -> String {
        self.subdomain(IDENTITY_LABEL)
    }

    /// True when `hostname` is exactly one label below the apex
    pub fn is_direct_subdomain(&self, hostname: &str) -> bool {
        hostname
            .strip_suffix(self.0.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            .map(|label| !label.is_empty() && !label.contains('.'))
            .unwrap_or(false)
    }
}

impl fmt::Display for ApexDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ApexDomain {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ApexDomain> for String {
    fn from(value: ApexDomain) -> Self {
        value.0
    }
}

/// Subject alternative names derived from the configured label list
///
/// # Invariants
/// - Every name is `label + "." + apex` for a single valid DNS label
/// - Names are unique, in first-seen order
/// - The identity label is never an alternate (it gets its own record)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternateNames {
    apex: ApexDomain,
    labels: Vec<String>,
}

impl AlternateNames {
    /// Parse a comma-separated label list such as `"www,blog"`.
    ///
    /// A blank list yields no alternates. Empty entries between commas are
    /// a configuration error; repeated labels are collapsed.
    pub fn parse(apex: &ApexDomain, san_domain_names: &str) -> Result<Self, DomainError> {
        let mut labels: Vec<String> = Vec::new();

        if san_domain_names.trim().is_empty() {
            return Ok(Self {
                apex: apex.clone(),
                labels,
            });
        }

        for raw in san_domain_names.split(',') {
            let label = raw.trim().to_ascii_lowercase();
            if label.is_empty() {
                return Err(DomainError::EmptyAlternate(san_domain_names.to_string()));
            }
            validate_label(&label)?;
            if label == IDENTITY_LABEL {
                return Err(DomainError::ReservedLabel(label));
            }
            if labels.contains(&label) {
                warn!(label = %label, "Duplicate alternate name label ignored");
                continue;
            }
            labels.push(label);
        }

        Ok(Self {
            apex: apex.clone(),
            labels,
        })
    }

    pub fn apex(&self) -> &ApexDomain {
        &self.apex
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Fully-qualified alternate names
    pub fn fqdns(&self) -> Vec<String> {
        self.labels.iter().map(|l| self.apex.subdomain(l)).collect()
    }

    /// Alternates followed by the apex, as used for distribution aliases
    pub fn with_apex(&self) -> Vec<String> {
        let mut names = self.fqdns();
        names.push(self.apex.to_string());
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn apex() -> ApexDomain {
        ApexDomain::new("example.com").unwrap()
    }

    #[test]
    fn test_apex_normalization() {
        let apex = ApexDomain::new(" Example.COM. ").unwrap();
        assert_eq!(apex.as_str(), "example.com");
        assert_eq!(apex.identity_hostname(), "auth.example.com");
    }

    #[test]
    fn test_apex_rejects_invalid() {
        assert_eq!(ApexDomain::new(""), Err(DomainError::Empty));
        assert!(matches!(
            ApexDomain::new("localhost"),
            Err(DomainError::NotRegistrable(_))
        ));
        assert!(ApexDomain::new("-bad.com").is_err());
        assert!(ApexDomain::new("under_score.com").is_err());
    }

    #[test]
    fn test_parse_www_blog() {
        let names = AlternateNames::parse(&apex(), "www,blog").unwrap();
        assert_eq!(names.fqdns(), vec!["www.example.com", "blog.example.com"]);
        assert_eq!(
            names.with_apex(),
            vec!["www.example.com", "blog.example.com", "example.com"]
        );
    }

    #[test]
    fn test_parse_trims_and_dedupes() {
        let names = AlternateNames::parse(&apex(), " www , WWW,blog").unwrap();
        assert_eq!(names.labels(), &["www".to_string(), "blog".to_string()]);
    }

    #[test]
    fn test_parse_blank_list() {
        let names = AlternateNames::parse(&apex(), "").unwrap();
        assert!(names.is_empty());
        assert_eq!(names.with_apex(), vec!["example.com"]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            AlternateNames::parse(&apex(), "www,,blog"),
            Err(DomainError::EmptyAlternate(_))
        ));
        assert!(matches!(
            AlternateNames::parse(&apex(), "www.blog"),
            Err(DomainError::InvalidLabel { .. })
        ));
        assert!(matches!(
            AlternateNames::parse(&apex(), "auth"),
            Err(DomainError::ReservedLabel(_))
        ));
    }

    #[test]
    fn test_is_direct_subdomain() {
        let apex = apex();
        assert!(apex.is_direct_subdomain("www.example.com"));
        assert!(!apex.is_direct_subdomain("example.com"));
        assert!(!apex.is_direct_subdomain("a.b.example.com"));
        assert!(!apex.is_direct_subdomain("wwwexample.com"));
    }

    proptest! {
        #[test]
        fn prop_alternates_are_unique_direct_subdomains(
            labels in proptest::collection::vec("[a-z][a-z0-9]{0,10}", 1..8)
        ) {
            let apex = apex();
            let list = labels.join(",");
            prop_assume!(!labels.iter().any(|l| l == IDENTITY_LABEL));

            let names = AlternateNames::parse(&apex, &list).unwrap();
            let fqdns = names.fqdns();

            let mut expected: Vec<String> = Vec::new();
            for label in &labels {
                let fqdn = format!("{}.{}", label, apex);
                if !expected.contains(&fqdn) {
                    expected.push(fqdn);
                }
            }
            prop_assert_eq!(&fqdns, &expected);

            for fqdn in &fqdns {
                prop_assert!(apex.is_direct_subdomain(fqdn));
            }
        }
    }
}
