//! Edge Function Provisioner
//!
//! Packages every function up front, then deploys them behind one execution
//! role and publishes an immutable version of each. The qualified version
//! ARN is what the website stack attaches to the distribution.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{Stack, StackContext, StackReport};
use crate::error::{DeployError, DeployResult};
use crate::exchange::{ContractKey, EdgeFunctionKey};
use crate::provider::{CodeBundle, EdgeFunctionService, FunctionSpec, RoleSpec, Runtime, Scope};

pub const EXECUTION_ROLE_ID: &str = "EdgeLambdaExecutionRole";

const TRUSTED_SERVICES: [&str; 2] = ["lambda.amazonaws.com", "edgelambda.amazonaws.com"];
const BASIC_EXECUTION_POLICY: &str = "service-role/AWSLambdaBasicExecutionRole";

/// One function to deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeFunctionDefinition {
    pub key: EdgeFunctionKey,
    pub runtime: Runtime,
    /// `<module>.<export>`, e.g. `index.handler`
    pub handler: String,
    pub code_dir: PathBuf,
    #[serde(default)]
    pub description: Option<String>,
}

impl EdgeFunctionDefinition {
    pub fn logical_id(&self) -> &'static str {
        match self.key {
            EdgeFunctionKey::PrivateRedirect => "OriginRedirectLambda",
            EdgeFunctionKey::Subdomain => "SubdomainLambda",
        }
    }

    fn packaging_error(&self, reason: impl Into<String>) -> DeployError {
        DeployError::Packaging {
            function: self.logical_id().to_string(),
            reason: reason.into(),
        }
    }

    /// Hash the source directory into a code bundle
    ///
    /// Files are visited in relative-path order so the digest only depends
    /// on content and layout.
    pub fn package(&self) -> DeployResult<CodeBundle> {
        let Some((module, export)) = self.handler.rsplit_once('.') else {
            return Err(self.packaging_error(format!(
                "handler {} is not <module>.<export>",
                self.handler
            )));
        };
        if module.is_empty() || export.is_empty() {
            return Err(self.packaging_error(format!("handler {} is incomplete", self.handler)));
        }

        if !self.code_dir.is_dir() {
            return Err(self.packaging_error(format!(
                "source directory {} does not exist",
                self.code_dir.display()
            )));
        }

        let mut files = Vec::new();
        collect_files(&self.code_dir, &self.code_dir, &mut files)
            .map_err(|e| self.packaging_error(e.to_string()))?;
        files.sort();

        let has_module = self
            .runtime
            .module_extensions()
            .iter()
            .any(|ext| files.contains(&format!("{}.{}", module, ext)));
        if !has_module {
            return Err(self.packaging_error(format!(
                "handler module {} not found for runtime {}",
                module, self.runtime
            )));
        }

        let mut hasher = Sha256::new();
        let mut size = 0u64;
        for relative in &files {
            let content = fs::read(self.code_dir.join(relative))
                .map_err(|e| self.packaging_error(format!("{}: {}", relative, e)))?;
            size += content.len() as u64;
            hasher.update(relative.as_bytes());
            hasher.update([0u8]);
            hasher.update(&content);
            hasher.update([0u8]);
        }

        let sha256 = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
        debug!(function = %self.logical_id(), files = files.len(), size, "Packaged function");

        Ok(CodeBundle {
            sha256,
            size,
            files: files.len(),
        })
    }
}

/// Relative paths (with `/` separators) of every file under `dir`
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(parts.join("/"));
        }
    }
    Ok(())
}

pub struct EdgeFunctionStack {
    name: String,
    scope: Scope,
    functions: Vec<EdgeFunctionDefinition>,
}

impl EdgeFunctionStack {
    pub fn new(scope: Scope, functions: Vec<EdgeFunctionDefinition>) -> DeployResult<Self> {
        for (i, function) in functions.iter().enumerate() {
            if functions[..i].iter().any(|f| f.key == function.key) {
                return Err(DeployError::Configuration(format!(
                    "edge function {} declared twice",
                    function.key
                )));
            }
        }

        Ok(Self {
            name: "EdgeFunctionStack".to_string(),
            scope,
            functions,
        })
    }
}

#[async_trait]
impl Stack for EdgeFunctionStack {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> &Scope {
        &self.scope
    }

    fn produces(&self) -> Vec<ContractKey> {
        self.functions
            .iter()
            .map(|f| ContractKey::EdgeFunction(f.key))
            .collect()
    }

    fn consumes(&self) -> Vec<ContractKey> {
        Vec::new()
    }

    async fn deploy(&self, ctx: &StackContext<'_>) -> DeployResult<StackReport> {
        let mut report = StackReport::new(ctx);

        // 1. Package everything before touching the provider
        let bundles = self
            .functions
            .iter()
            .map(|f| f.package())
            .collect::<DeployResult<Vec<_>>>()?;

        // 2. Shared execution role
        let role_spec = RoleSpec {
            logical_id: EXECUTION_ROLE_ID.to_string(),
            trusted_services: TRUSTED_SERVICES.iter().map(|s| s.to_string()).collect(),
            managed_policies: vec![BASIC_EXECUTION_POLICY.to_string()],
        };
        let provisioned = ctx
            .provider
            .ensure_role(ctx.scope(), ctx.stack(), &role_spec)
            .await?;
        let role_arn = provisioned.resource.arn.clone();
        let role = report.record("Role", EXECUTION_ROLE_ID, role_arn, provisioned);

        // 3. Function, version, publish
        for (definition, code) in self.functions.iter().zip(bundles) {
            let logical_id = definition.logical_id();
            let spec = FunctionSpec {
                logical_id: logical_id.to_string(),
                runtime: definition.runtime,
                handler: definition.handler.clone(),
                role_arn: role.arn.clone(),
                code,
                description: definition.description.clone(),
            };

            let provisioned = ctx
                .provider
                .deploy_function(ctx.scope(), ctx.stack(), &spec)
                .await?;
            let function_arn = provisioned.resource.arn.clone();
            let function = report.record("Function", logical_id, function_arn, provisioned);

            let version_id = format!("{}Version", logical_id);
            let provisioned = ctx
                .provider
                .publish_version(ctx.scope(), &function.arn)
                .await?;
            let version_arn = provisioned.resource.arn.clone();
            let version = report.record("FunctionVersion", &version_id, version_arn, provisioned);

            let key = ContractKey::EdgeFunction(definition.key);
            let write = ctx.publish(&key, &version.arn).await?;
            report.record_published(&key, write);

            info!(
                function = %logical_id,
                version = version.version,
                arn = %version.arn,
                "Edge function ready"
            );
            report.output(&version_id, version.arn);
        }

        Ok(report)
    }
}
