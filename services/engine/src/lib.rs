//! Edgesite Engine Library
//!
//! Provisions a static site behind an edge distribution from three stacks
//! deployed in dependency order. Stacks in different regions hand resource
//! identifiers to each other only through the parameter exchange.

pub mod config;
pub mod distribution;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod orchestrator;
pub mod provider;
pub mod stacks;

pub use config::DeployConfig;
pub use domain::{AlternateNames, ApexDomain};
pub use error::{DeployError, DeployResult};
pub use exchange::{ContractKey, EdgeFunctionKey, ParameterExchange};
pub use orchestrator::{DeploymentPlan, DeploymentSummary, Orchestrator};
pub use provider::simulated::SimulatedCloud;
pub use provider::Scope;
