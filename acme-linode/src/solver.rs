use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use kube::Client;
use tracing::{error, info, warn};

use crate::{
    challenge::ChallengeRequest,
    credentials::{CredentialResolver, SecretStore, SERVICE_ACCOUNT_NAMESPACE_FILE},
    dns01_client::{Dns01Api, Dns01Client, LinodeClient, DEFAULT_TIMEOUT, LINODE_API_URL},
};

/// The name issuers use to select this solver.
pub const SOLVER_NAME: &str = "linode";

/// The contract a cert-manager DNS-01 webhook solver fulfils.
#[allow(async_fn_in_trait)]
pub trait Solver {
    /// Identifier of the solver within its webhook group.
    fn name(&self) -> &'static str;

    /// Make the challenge's TXT record visible.
    ///
    /// May be called repeatedly for the same challenge.
    async fn present(&self, ch: &ChallengeRequest) -> Result<()>;

    /// Remove the challenge's TXT record. Succeeds if there is nothing to remove.
    async fn clean_up(&self, ch: &ChallengeRequest) -> Result<()>;
}

#[derive(Clone, Debug, bon::Builder)]
#[builder(on(String, into))]
pub struct SolverConfig {
    #[builder(default = LINODE_API_URL.to_string())]
    linode_api_url: String,
    #[builder(default = DEFAULT_TIMEOUT)]
    request_timeout: Duration,
    /// Overrides `POD_NAMESPACE`.
    pod_namespace: Option<String>,
    /// Overrides `LINODE_TOKEN_SECRET_NAME`.
    token_secret_name: Option<String>,
    /// Overrides `LINODE_TOKEN_SECRET_KEY`.
    token_secret_key: Option<String>,
    #[builder(default = PathBuf::from(SERVICE_ACCOUNT_NAMESPACE_FILE))]
    namespace_file: PathBuf,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// DNS-01 solver that manages challenge records through the Linode API.
///
/// Every call resolves credentials and looks the zone and record up again; no
/// provider state is cached between calls.
pub struct LinodeSolver<S = Client> {
    credentials: CredentialResolver<S>,
    linode_api_url: String,
    request_timeout: Duration,
}

impl LinodeSolver<Client> {
    /// Build the solver with a Kubernetes client for `kube_config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn initialize(kube_config: kube::Config, config: SolverConfig) -> Result<Self> {
        info!("initializing linode dns provider solver webhook");
        let client = Client::try_from(kube_config).context("failed to create kube client")?;
        Ok(Self::new(client, config))
    }
}

impl<S: SecretStore> LinodeSolver<S> {
    pub fn new(store: S, config: SolverConfig) -> Self {
        let credentials = CredentialResolver::new(
            store,
            config.pod_namespace,
            config.namespace_file,
            config.token_secret_name,
            config.token_secret_key,
        );
        Self {
            credentials,
            linode_api_url: config.linode_api_url,
            request_timeout: config.request_timeout,
        }
    }

    pub fn credentials(&self) -> &CredentialResolver<S> {
        &self.credentials
    }

    /// Create a Linode client authenticated for this challenge.
    pub async fn dns01_client(&self, ch: &ChallengeRequest) -> Result<Dns01Client> {
        let config = ch.provider_config()?;
        let api_key = self
            .credentials
            .api_key(&config.api_key_secret_ref, &ch.resource_namespace)
            .await?;
        let client = LinodeClient::new(
            self.linode_api_url.as_str(),
            api_key,
            self.request_timeout,
        )?;
        Ok(Dns01Client::Linode(client))
    }
}

impl<S: SecretStore> Solver for LinodeSolver<S> {
    fn name(&self) -> &'static str {
        SOLVER_NAME
    }

    async fn present(&self, ch: &ChallengeRequest) -> Result<()> {
        info!(
            "presented with challenge for fqdn={} zone={}",
            ch.resolved_fqdn, ch.resolved_zone
        );
        let client = self
            .dns01_client(ch)
            .await
            .inspect_err(|err| error!("failed to create linode client: {err:?}"))?;

        let (entry, domain) = ch.domain_entry();
        let zone = client
            .find_zone(&domain)
            .await
            .inspect_err(|err| error!("failed to find zone {domain:?} in linode account: {err:?}"))?;

        match client.find_record(zone.id, &entry).await {
            Ok(None) => client.create_record(zone.id, &entry, &ch.key).await,
            Ok(Some(record)) => {
                client
                    .update_record(zone.id, record.id, &record.name, &ch.key)
                    .await
            }
            Err(err) => {
                error!("failed to find record {entry:?} in linode zone {domain:?}: {err:?}");
                Err(err)
            }
        }
    }

    async fn clean_up(&self, ch: &ChallengeRequest) -> Result<()> {
        info!(
            "cleaning up challenge for fqdn={} zone={}",
            ch.resolved_fqdn, ch.resolved_zone
        );
        let client = self
            .dns01_client(ch)
            .await
            .inspect_err(|err| error!("failed to create linode client: {err:?}"))?;

        let (entry, domain) = ch.domain_entry();
        let zone = client
            .find_zone(&domain)
            .await
            .inspect_err(|err| warn!("failed to find zone {domain:?} in linode account: {err:?}"))?;

        // Matches on name and type only; a concurrent challenge for the same name
        // with a different key shares this record.
        match client.find_record(zone.id, &entry).await {
            Ok(None) => {
                info!("no TXT record {entry:?} in zone {domain:?}, nothing to clean up");
                Ok(())
            }
            Ok(Some(record)) => client.delete_record(zone.id, record.id).await,
            Err(err) => {
                warn!("failed to find record {entry:?} in linode zone {domain:?}: {err:?}");
                Err(err)
            }
        }
    }
}
