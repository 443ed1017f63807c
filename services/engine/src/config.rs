//! Deployment configuration
//!
//! Loaded from a TOML file (`edgesite.toml`). `EDGESITE_DOMAIN_NAME` and
//! `EDGESITE_SAN_DOMAIN_NAMES` override the file's domain settings.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::distribution::EdgeEventType;
use crate::domain::{AlternateNames, ApexDomain};
use crate::error::{DeployError, DeployResult};
use crate::exchange::EdgeFunctionKey;
use crate::provider::{Runtime, Scope, EDGE_REGION};
use crate::stacks::{
    CertificateStack, EdgeBinding, EdgeFunctionDefinition, EdgeFunctionStack, Stack,
    ValidationSettings, WebsiteStack,
};

pub const DOMAIN_NAME_ENV: &str = "EDGESITE_DOMAIN_NAME";
pub const SAN_DOMAIN_NAMES_ENV: &str = "EDGESITE_SAN_DOMAIN_NAMES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTarget {
    pub account: String,
    pub region: String,
}

impl StackTarget {
    pub fn scope(&self) -> Scope {
        Scope::new(self.account.clone(), self.region.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackTargets {
    pub certificate: StackTarget,
    pub edge_functions: StackTarget,
    pub website: StackTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeFunctionConfig {
    pub key: EdgeFunctionKey,
    pub event: EdgeEventType,
    pub runtime: Runtime,
    #[serde(default = "default_handler")]
    pub handler: String,
    /// Relative to the configuration file
    pub code_dir: PathBuf,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_handler() -> String {
    "index.handler".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebsiteSettings {
    #[serde(default)]
    pub access_logging: bool,
    #[serde(default)]
    pub self_sign_up: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_stack_secs")]
    pub stack_secs: u64,
    #[serde(default = "default_validation_secs")]
    pub validation_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_stack_secs() -> u64 {
    1800
}

fn default_validation_secs() -> u64 {
    900
}

fn default_poll_interval_secs() -> u64 {
    15
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            stack_secs: default_stack_secs(),
            validation_secs: default_validation_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Timeouts {
    pub fn stack(&self) -> Duration {
        Duration::from_secs(self.stack_secs)
    }

    pub fn validation(&self) -> ValidationSettings {
        ValidationSettings {
            timeout: Duration::from_secs(self.validation_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub domain_name: String,
    /// Comma-separated labels, e.g. `"www,blog"`
    #[serde(default)]
    pub san_domain_names: String,
    pub stacks: StackTargets,
    #[serde(default)]
    pub edge_functions: Vec<EdgeFunctionConfig>,
    #[serde(default)]
    pub website: WebsiteSettings,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl DeployConfig {
    /// Read the file, resolve function directories against it and apply
    /// environment overrides
    pub fn load(path: &Path) -> DeployResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DeployError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = Self::parse(&content, base)?;
        config.apply_overrides(|name| std::env::var(name).ok());

        debug!(path = %path.display(), domain = %config.domain_name, "Loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str, base: &Path) -> DeployResult<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| DeployError::Configuration(format!("invalid configuration: {}", e)))?;

        for function in &mut config.edge_functions {
            if function.code_dir.is_relative() {
                function.code_dir = base.join(&function.code_dir);
            }
        }

        Ok(config)
    }

    /// Override domain settings from a variable lookup (the environment in
    /// production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(domain) = lookup(DOMAIN_NAME_ENV) {
            debug!(domain = %domain, "Domain name overridden from environment");
            self.domain_name = domain;
        }
        if let Some(sans) = lookup(SAN_DOMAIN_NAMES_ENV) {
            debug!(sans = %sans, "Alternate names overridden from environment");
            self.san_domain_names = sans;
        }
    }

    pub fn names(&self) -> DeployResult<AlternateNames> {
        let apex = ApexDomain::new(self.domain_name.as_str())?;
        Ok(AlternateNames::parse(&apex, &self.san_domain_names)?)
    }

    /// Build the certificate, edge function and website stacks
    pub fn build_stacks(&self) -> DeployResult<Vec<Box<dyn Stack>>> {
        let names = self.names()?;

        for (label, target) in [
            ("certificate", &self.stacks.certificate),
            ("edge_functions", &self.stacks.edge_functions),
        ] {
            if target.region != EDGE_REGION {
                return Err(DeployError::Configuration(format!(
                    "stacks.{} must deploy to {}, not {}",
                    label, EDGE_REGION, target.region
                )));
            }
        }

        if self.edge_functions.is_empty() {
            warn!("No edge functions configured; distribution will have no associations");
        }

        let definitions = self
            .edge_functions
            .iter()
            .map(|f| EdgeFunctionDefinition {
                key: f.key,
                runtime: f.runtime,
                handler: f.handler.clone(),
                code_dir: f.code_dir.clone(),
                description: f.description.clone(),
            })
            .collect();
        let bindings = self
            .edge_functions
            .iter()
            .map(|f| EdgeBinding {
                key: f.key,
                event: f.event,
            })
            .collect();

        let certificate = CertificateStack::new(
            self.stacks.certificate.scope(),
            names.clone(),
            self.timeouts.validation(),
        );
        let edge_functions =
            EdgeFunctionStack::new(self.stacks.edge_functions.scope(), definitions)?;
        let website = WebsiteStack::new(self.stacks.website.scope(), names, bindings)
            .with_access_logging(self.website.access_logging)
            .with_self_sign_up(self.website.self_sign_up);

        let stacks: Vec<Box<dyn Stack>> = vec![
            Box::new(certificate) as Box<dyn Stack>,
            Box::new(edge_functions),
            Box::new(website),
        ];
        Ok(stacks)
    }
}
