//! Parameter Exchange
//!
//! Region-scoped key/value store that is the only channel between stacks
//! deployed in different regions. A producer stack publishes resource
//! identifiers under well-known [`ContractKey`]s; a consumer stack reads
//! them back live at deploy time.
//!
//! ## Contract
//!
//! - `put(region, key, value)` overwrites idempotently. Writing the value
//!   that is already stored does not bump the version.
//! - `get(region, key)` fails with [`ExchangeError::NotFound`] if the key was
//!   never written, or [`ExchangeError::AccessDenied`] for a caller from an
//!   untrusted account.
//!
//! The store has no transactions and no notifications. The producer
//! finishing before the consumer reads is the orchestrator's job.

mod keys;

pub use keys::{ContractKey, EdgeFunctionKey};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::provider::Scope;

/// Errors returned by a parameter store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Parameter {key} not found in {region}")]
    NotFound { key: String, region: String },

    #[error("Access denied: account {caller} cannot read parameters in {scope}")]
    AccessDenied { caller: String, scope: String },

    #[error("Parameter store unavailable: {0}")]
    Unavailable(String),
}

/// A stored parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Bumped each time the value changes
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    /// Stack that last wrote the value
    #[serde(default)]
    pub writer: Option<String>,
}

/// Request to write a parameter
#[derive(Debug, Clone)]
pub struct PutParameter {
    pub name: String,
    pub value: String,
    pub description: Option<String>,
    pub writer: Option<String>,
}

/// Outcome of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterWrite {
    pub version: u64,
    pub changed: bool,
}

/// Storage backend behind the exchange
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Write into `scope`. Writers only ever write their own scope.
    async fn put_parameter(
        &self,
        scope: &Scope,
        request: PutParameter,
    ) -> Result<ParameterWrite, ExchangeError>;

    /// Read `name` from `scope` on behalf of `caller`
    async fn get_parameter(
        &self,
        caller: &Scope,
        scope: &Scope,
        name: &str,
    ) -> Result<Parameter, ExchangeError>;

    /// All parameters in `scope`, sorted by name
    async fn list_parameters(
        &self,
        caller: &Scope,
        scope: &Scope,
    ) -> Result<Vec<Parameter>, ExchangeError>;
}

/// Exchange client bound to the calling stack's scope
pub struct ParameterExchange<'a, S: ?Sized> {
    store: &'a S,
    caller: Scope,
}

impl<'a, S: ParameterStore + ?Sized> ParameterExchange<'a, S> {
    pub fn new(store: &'a S, caller: Scope) -> Self {
        Self { store, caller }
    }

    pub fn caller(&self) -> &Scope {
        &self.caller
    }

    /// Raw `put(region, key, value)` within the caller's account
    pub async fn put(
        &self,
        region: &str,
        key: &str,
        value: &str,
    ) -> Result<ParameterWrite, ExchangeError> {
        let scope = self.caller.with_region(region);
        let write = self
            .store
            .put_parameter(
                &scope,
                PutParameter {
                    name: key.to_string(),
                    value: value.to_string(),
                    description: None,
                    writer: None,
                },
            )
            .await?;

        debug!(key = %key, region = %region, version = write.version, "Put parameter");
        Ok(write)
    }

    /// Raw `get(region, key)` within the caller's account
    pub async fn get(&self, region: &str, key: &str) -> Result<String, ExchangeError> {
        let scope = self.caller.with_region(region);
        let parameter = self.store.get_parameter(&self.caller, &scope, key).await?;
        debug!(key = %key, region = %region, version = parameter.version, "Got parameter");
        Ok(parameter.value)
    }

    /// Every parameter in `region` of the caller's account, sorted by name
    pub async fn list(&self, region: &str) -> Result<Vec<Parameter>, ExchangeError> {
        let scope = self.caller.with_region(region);
        self.store.list_parameters(&self.caller, &scope).await
    }

    /// Publish a resource identifier under a contract key in the caller's scope
    pub async fn publish(
        &self,
        key: &ContractKey,
        value: &str,
        writer: &str,
    ) -> Result<ParameterWrite, ExchangeError> {
        let write = self
            .store
            .put_parameter(
                &self.caller,
                PutParameter {
                    name: key.parameter_name(),
                    value: value.to_string(),
                    description: Some(key.description()),
                    writer: Some(writer.to_string()),
                },
            )
            .await?;

        info!(
            key = %key,
            scope = %self.caller,
            version = write.version,
            changed = write.changed,
            "Published exchange parameter"
        );

        Ok(write)
    }

    /// Read a contract key from the producer's scope (usually another region)
    pub async fn resolve(
        &self,
        producer: &Scope,
        key: &ContractKey,
    ) -> Result<Parameter, ExchangeError> {
        debug!(key = %key, producer = %producer, caller = %self.caller, "Resolving exchange parameter");

        let parameter = self
            .store
            .get_parameter(&self.caller, producer, &key.parameter_name())
            .await?;

        info!(
            key = %key,
            producer = %producer,
            version = parameter.version,
            writer = ?parameter.writer,
            "Resolved exchange parameter"
        );

        Ok(parameter)
    }
}
