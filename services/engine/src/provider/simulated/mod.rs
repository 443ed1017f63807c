//! In-process provider
//!
//! Models the managed services the stacks provision into, including the
//! constraints the deploy depends on: edge certificates and function
//! versions must live in [`EDGE_REGION`](super::EDGE_REGION), DNS validation
//! only completes for delegated zones, aliases are unique across
//! distributions, and identity custom domains need a matching certificate.
//!
//! State is held behind a `tokio::sync::RwLock` and can be persisted to a
//! JSON state file so separate CLI invocations see the same cloud.

mod certificates;
mod cdn;
mod functions;
mod identity;
mod parameters;
mod state;
mod zones;

pub use state::{CloudState, FunctionState, ZoneState};

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{HostedZone, Scope};
use crate::error::{DeployError, DeployResult};
use crate::exchange::ExchangeError;

/// Simulated cloud account(s)
#[derive(Clone)]
pub struct SimulatedCloud {
    state: Arc<RwLock<CloudState>>,
    available: Arc<AtomicBool>,
    state_file: Option<PathBuf>,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCloud {
    /// Empty cloud that lives only in memory
    pub fn new() -> Self {
        Self::from_state(CloudState::default(), None)
    }

    /// In-memory cloud starting from an existing state
    pub fn with_state(state: CloudState) -> Self {
        Self::from_state(state, None)
    }

    fn from_state(state: CloudState, state_file: Option<PathBuf>) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            available: Arc::new(AtomicBool::new(true)),
            state_file,
        }
    }

    /// Load the cloud from a state file, starting empty if it does not exist
    pub async fn open(path: impl AsRef<Path>) -> DeployResult<Self> {
        let path = path.as_ref().to_path_buf();

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                debug!("Loading cloud state from {:?}", path);
                serde_json::from_str(&content)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {:?}, starting empty", path);
                CloudState::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::from_state(state, Some(path)))
    }

    /// Write the state file, if this cloud has one
    pub async fn persist(&self) -> DeployResult<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };

        let content = {
            let state = self.state.read().await;
            serde_json::to_string_pretty(&*state)?
        };

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!("Persisted cloud state to {:?}", path);
        Ok(())
    }

    /// Copy of the full state, for inspection
    pub async fn snapshot(&self) -> CloudState {
        self.state.read().await.clone()
    }

    /// Register an externally owned hosted zone
    pub async fn register_zone(&self, domain_name: &str, delegated: bool) -> HostedZone {
        let name = normalize_name(domain_name);
        let id = format!("Z{}", physical_id(&["zone", &name])[..20].to_uppercase());
        let name_servers = (1..=4)
            .map(|n| format!("ns-{}.awsdns-{:02}.net", 100 * n + name.len(), n))
            .collect();

        let zone = HostedZone {
            id: id.clone(),
            name,
            name_servers,
            delegated,
        };

        let mut state = self.state.write().await;
        let entry = state
            .hosted_zones
            .entry(id)
            .or_insert_with(|| ZoneState::new(zone.clone()));
        entry.zone.delegated = delegated;

        info!(zone = %entry.zone.name, id = %entry.zone.id, delegated, "Registered hosted zone");
        entry.zone.clone()
    }

    /// Allow `account` to read parameters across accounts
    pub async fn trust_account(&self, account: &str) {
        self.state
            .write()
            .await
            .trusted_accounts
            .insert(account.to_string());
    }

    /// Simulate a parameter store outage
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), ExchangeError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExchangeError::Unavailable(
                "parameter store did not respond".to_string(),
            ))
        }
    }
}

/// Lowercased name without a trailing dot
pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Stable address of a resource declared by a stack
pub(crate) fn address(scope: &Scope, owner: &str, logical_id: &str) -> String {
    format!("{}/{}/{}", scope, owner, logical_id)
}

/// Hex SHA-256 over the parts, used for deterministic identifiers
pub(crate) fn physical_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub(crate) fn not_found(kind: &str, id: &str) -> DeployError {
    DeployError::Configuration(format!("{} {} does not exist", kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_physical_id_is_deterministic() {
        assert_eq!(physical_id(&["a", "b"]), physical_id(&["a", "b"]));
        assert_ne!(physical_id(&["ab"]), physical_id(&["a", "b"]));
        assert_eq!(physical_id(&["x"]).len(), 64);
    }

    #[tokio::test]
    async fn test_register_zone_is_idempotent() {
        let cloud = SimulatedCloud::new();
        let first = cloud.register_zone("Example.com.", false).await;
        let second = cloud.register_zone("example.com", true).await;

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "example.com");
        assert!(second.delegated);
        assert_eq!(second.name_servers.len(), 4);
        assert_eq!(cloud.snapshot().await.hosted_zones.len(), 1);
    }

    #[tokio::test]
    async fn test_state_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let cloud = SimulatedCloud::open(&path).await.unwrap();
        cloud.register_zone("example.com", true).await;
        cloud.trust_account("222222222222").await;
        cloud.persist().await.unwrap();

        let reopened = SimulatedCloud::open(&path).await.unwrap();
        let state = reopened.snapshot().await;
        assert_eq!(state.hosted_zones.len(), 1);
        assert!(state.trusted_accounts.contains("222222222222"));
    }
}
