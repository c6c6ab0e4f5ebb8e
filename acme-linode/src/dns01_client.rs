use anyhow::Result;
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

pub use linode::{LinodeClient, DEFAULT_TIMEOUT, LINODE_API_URL};

mod linode;

/// A DNS zone managed by the provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Zone {
    pub id: u64,
    /// The zone's domain name, without a trailing dot (e.g. "example.com")
    pub domain: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
/// Represents a DNS record
pub struct Record {
    /// Unique identifier for the record
    pub id: u64,
    /// The name of the record relative to its zone (e.g., "_acme-challenge.www")
    pub name: String,
    /// The type of DNS record (e.g., "TXT" for ACME challenges)
    pub r#type: String,
    /// The record content (the TXT value for ACME challenges)
    pub target: String,
    #[serde(default)]
    pub ttl_sec: u32,
}

#[allow(async_fn_in_trait)]
#[enum_dispatch]
pub trait Dns01Api {
    /// Find the zone whose domain is exactly `domain`.
    ///
    /// Fails with [`crate::Error::ZoneNotFound`] if the account has no such zone.
    async fn find_zone(&self, domain: &str) -> Result<Zone>;

    /// Find the TXT record named `entry` in the zone.
    ///
    /// Returns `Ok(None)` when there is no such record.
    async fn find_record(&self, zone_id: u64, entry: &str) -> Result<Option<Record>>;

    /// Create a TXT record named `entry` with the given value.
    async fn create_record(&self, zone_id: u64, entry: &str, value: &str) -> Result<()>;

    /// Overwrite an existing TXT record.
    async fn update_record(
        &self,
        zone_id: u64,
        record_id: u64,
        entry: &str,
        value: &str,
    ) -> Result<()>;

    /// Remove a DNS record.
    ///
    /// Deletes a DNS record using its unique identifier.
    async fn delete_record(&self, zone_id: u64, record_id: u64) -> Result<()>;
}

/// A DNS-01 client.
#[derive(Debug, Clone)]
#[enum_dispatch(Dns01Api)]
pub enum Dns01Client {
    Linode(LinodeClient),
}
