//! A cert-manager DNS-01 challenge solver for Linode DNS.
//!
//! The solver presents a challenge by creating (or updating) a TXT record in the
//! Linode zone that owns the challenge FQDN, and cleans it up by deleting that
//! record again. The Linode API token is read from a Kubernetes Secret.
//!
//! # Usage
//!
//! ```rust,no_run
//! use acme_linode::{ChallengeRequest, LinodeSolver, Solver, SolverConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let kube_config = kube::Config::infer().await?;
//!     let solver = LinodeSolver::initialize(kube_config, SolverConfig::default())?;
//!
//!     let challenge: ChallengeRequest = serde_json::from_str(
//!         r#"{
//!             "key": "txt-value",
//!             "resourceNamespace": "default",
//!             "resolvedFQDN": "_acme-challenge.example.com.",
//!             "resolvedZone": "example.com."
//!         }"#,
//!     )?;
//!     solver.present(&challenge).await?;
//!     solver.clean_up(&challenge).await?;
//!     Ok(())
//! }
//! ```

pub use challenge::{
    domain_entry, ChallengeAction, ChallengePayload, ChallengeRequest, ChallengeResponse,
    ChallengeStatus, ProviderConfig, SecretKeyRef,
};
pub use credentials::{CredentialResolver, SecretStore};
pub use dns01_client::{
    Dns01Api, Dns01Client, LinodeClient, Record, Zone, DEFAULT_TIMEOUT, LINODE_API_URL,
};
pub use error::Error;
pub use solver::{LinodeSolver, Solver, SolverConfig, SOLVER_NAME};

pub mod challenge;
pub mod credentials;
mod dns01_client;
mod error;
mod solver;
