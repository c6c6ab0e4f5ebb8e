use std::{fmt, future::Future, time::Duration};

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::Error;

use super::{Dns01Api, Record, Zone};

pub const LINODE_API_URL: &str = "https://api.linode.com/v4";

/// Upper bound for a single client operation, including every page it fetches.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

const PAGE_SIZE: u32 = 500;
const RECORD_TTL_SEC: u32 = 180;
const RECORD_WEIGHT: u32 = 1;
const RECORD_PRIORITY: u32 = 0;
const RECORD_PORT: u32 = 0;

#[derive(Clone)]
pub struct LinodeClient {
    client: Client,
    api_url: String,
    api_token: String,
    timeout: Duration,
}

impl fmt::Debug for LinodeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinodeClient")
            .field("api_url", &self.api_url)
            .field("api_token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct Page<T> {
    data: Vec<T>,
    page: u32,
    pages: u32,
}

#[derive(Deserialize)]
struct ErrorResponse {
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    reason: String,
    #[serde(default)]
    field: Option<String>,
}

#[derive(Serialize)]
struct RecordRequest<'a> {
    r#type: &'static str,
    name: &'a str,
    target: &'a str,
    priority: u32,
    weight: u32,
    port: u32,
    ttl_sec: u32,
}

impl<'a> RecordRequest<'a> {
    fn txt(name: &'a str, target: &'a str) -> Self {
        Self {
            r#type: "TXT",
            name,
            target,
            priority: RECORD_PRIORITY,
            weight: RECORD_WEIGHT,
            port: RECORD_PORT,
            ttl_sec: RECORD_TTL_SEC,
        }
    }
}

impl LinodeClient {
    pub fn new(
        api_url: impl Into<String>,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("acme-linode/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create http client")?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.api_token)
    }

    /// Fetch every page of a list endpoint.
    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut items = vec![];
        let mut page = 1u32;
        loop {
            let response = self
                .request(Method::GET, path)
                .query(&[("page", page), ("page_size", PAGE_SIZE)])
                .send()
                .await?;
            let response: Page<T> = check_status(response)
                .await?
                .json()
                .await
                .context("failed to parse response")?;
            items.extend(response.data);
            if response.page >= response.pages {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    async fn send(&self, request: RequestBuilder) -> Result<()> {
        check_status(request.send().await?).await?;
        Ok(())
    }

    async fn with_timeout<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation,
                timeout: self.timeout,
            }
            .into()),
        }
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let reasons = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(response) => response
            .errors
            .into_iter()
            .map(|err| match err.field {
                Some(field) => format!("{field}: {}", err.reason),
                None => err.reason,
            })
            .collect(),
        Err(_) if body.is_empty() => vec![],
        Err(_) => vec![body],
    };
    Err(Error::Api {
        status: status.as_u16(),
        reasons,
    }
    .into())
}

impl Dns01Api for LinodeClient {
    async fn find_zone(&self, domain: &str) -> Result<Zone> {
        let zones: Vec<Zone> = self
            .with_timeout("list domains", self.list("/domains"))
            .await?;
        debug!(count = zones.len(), "listed linode domains");
        zones
            .into_iter()
            .find(|zone| zone.domain == domain)
            .ok_or_else(|| {
                Error::ZoneNotFound {
                    domain: domain.to_string(),
                }
                .into()
            })
    }

    async fn find_record(&self, zone_id: u64, entry: &str) -> Result<Option<Record>> {
        let records: Vec<Record> = self
            .with_timeout(
                "list domain records",
                self.list(&format!("/domains/{zone_id}/records")),
            )
            .await?;
        debug!(zone_id, count = records.len(), "listed linode domain records");
        Ok(records
            .into_iter()
            .find(|record| record.name == entry && record.r#type == "TXT"))
    }

    async fn create_record(&self, zone_id: u64, entry: &str, value: &str) -> Result<()> {
        info!("creating TXT record {entry} in zone ID {zone_id}");
        let request = self
            .request(Method::POST, &format!("/domains/{zone_id}/records"))
            .json(&RecordRequest::txt(entry, value));
        let result = self
            .with_timeout("create domain record", self.send(request))
            .await;
        if let Err(err) = &result {
            error!("failed to create TXT record {entry:?} in linode zone ID {zone_id}: {err:?}");
        }
        result
    }

    async fn update_record(
        &self,
        zone_id: u64,
        record_id: u64,
        entry: &str,
        value: &str,
    ) -> Result<()> {
        info!("updating TXT record {entry} (ID {record_id}) in zone ID {zone_id}");
        let request = self
            .request(
                Method::PUT,
                &format!("/domains/{zone_id}/records/{record_id}"),
            )
            .json(&RecordRequest::txt(entry, value));
        let result = self
            .with_timeout("update domain record", self.send(request))
            .await;
        if let Err(err) = &result {
            error!(
                "failed to update TXT record {entry:?} (ID {record_id}) in linode zone ID {zone_id}: {err:?}"
            );
        }
        result
    }

    async fn delete_record(&self, zone_id: u64, record_id: u64) -> Result<()> {
        info!("deleting TXT record ID {record_id} in zone ID {zone_id}");
        let request = self.request(
            Method::DELETE,
            &format!("/domains/{zone_id}/records/{record_id}"),
        );
        let result = self
            .with_timeout("delete domain record", self.send(request))
            .await;
        if let Err(err) = &result {
            error!("failed to delete TXT record ID {record_id} in linode zone ID {zone_id}: {err:?}");
        }
        result
    }
}
