use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOKEN_SECRET_NAME: &str = "linode-credentials";
pub const DEFAULT_TOKEN_SECRET_KEY: &str = "token";

/// Which half of the challenge lifecycle a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ChallengeAction {
    Present,
    CleanUp,
}

/// A DNS-01 challenge as handed over by cert-manager (`acme.cert-manager.io/v1alpha1`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub action: Option<ChallengeAction>,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub dns_name: String,
    /// The TXT value the CA expects to find.
    pub key: String,
    /// Namespace of the Certificate / Issuer that triggered the challenge.
    #[serde(default)]
    pub resource_namespace: String,
    #[serde(rename = "resolvedFQDN")]
    pub resolved_fqdn: String,
    pub resolved_zone: String,
    #[serde(default)]
    pub allow_ambient_credentials: bool,
    /// Solver specific configuration copied from the issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChallengeResponse {
    pub uid: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ChallengeStatus>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChallengeStatus {
    pub message: String,
}

/// The envelope cert-manager posts to a webhook solver.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengePayload {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub request: Option<ChallengeRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ChallengeResponse>,
}

/// Reference to one key of a Kubernetes Secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecretKeyRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: String,
}

impl SecretKeyRef {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.key.is_empty()
    }
}

/// Per issuer configuration decoded from [`ChallengeRequest::config`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key_secret_ref: SecretKeyRef,
}

impl ProviderConfig {
    /// Decode the solver config; a missing config yields an empty secret reference.
    pub fn load(config: Option<&serde_json::Value>) -> Result<Self> {
        match config {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(value) => Self::deserialize(value).context("error decoding solver config"),
        }
    }
}

impl ChallengeRequest {
    pub fn provider_config(&self) -> Result<ProviderConfig> {
        ProviderConfig::load(self.config.as_ref())
    }

    /// The record name relative to the zone and the zone name, as Linode expects them.
    pub fn domain_entry(&self) -> (String, String) {
        domain_entry(&self.resolved_fqdn, &self.resolved_zone)
    }
}

/// Split a resolved FQDN into the record name within `zone` and the zone's domain.
///
/// Neither part keeps a trailing dot; the apex of the zone yields an empty entry.
pub fn domain_entry(fqdn: &str, zone: &str) -> (String, String) {
    let entry = fqdn.strip_suffix(zone).unwrap_or(fqdn);
    let entry = entry.strip_suffix('.').unwrap_or(entry);
    let domain = zone.strip_suffix('.').unwrap_or(zone);
    (entry.to_string(), domain.to_string())
}
