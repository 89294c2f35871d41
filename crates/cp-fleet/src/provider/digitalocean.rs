//! DigitalOcean v2 API client
//!
//! Only the four calls the fleet needs: list regions, create droplets in
//! bulk, read a droplet's public IPv4 address and delete a droplet.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use cp_core::config::ProxyConfig;
use cp_core::error::ProviderError;
use cp_core::traits::InstanceProvider;
use cp_core::types::{CreateRequest, Instance, InstanceId};

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct RegionsResponse {
    regions: Vec<Region>,
}

#[derive(Deserialize)]
struct Region {
    slug: String,
    #[serde(default = "default_available")]
    available: bool,
}

fn default_available() -> bool {
    true
}

#[derive(Serialize)]
struct CreateDroplets<'a> {
    names: &'a [String],
    region: &'a str,
    size: &'a str,
    image: &'a str,
    ssh_keys: [&'a str; 1],
    backups: bool,
    ipv6: bool,
}

#[derive(Deserialize)]
struct DropletsResponse {
    droplets: Vec<Droplet>,
}

#[derive(Deserialize)]
struct DropletResponse {
    droplet: Droplet,
}

#[derive(Deserialize)]
struct Droplet {
    id: u64,
    name: String,
    #[serde(default)]
    networks: Networks,
}

#[derive(Default, Deserialize)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

impl Droplet {
    fn public_ipv4(&self) -> Option<String> {
        self.networks
            .v4
            .iter()
            .find(|n| n.kind == "public")
            .map(|n| n.ip_address.clone())
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: String,
}

/// DigitalOcean control-plane client
pub struct DigitalOceanProvider {
    http: Client,
    base_url: String,
    token: String,
}

impl DigitalOceanProvider {
    /// Client for `base_url` authenticated with `token`
    pub fn new(
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("cloud-proxy/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Client configured from the run configuration
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProviderError> {
        Self::new(config.token(), config.api_base_url.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.base_url, path)
    }

    /// Turn non-success responses into [`ProviderError::Api`]
    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(err) if !err.message.is_empty() => format!("{} ({})", err.message, err.id),
            _ if body.is_empty() => status.canonical_reason().unwrap_or("error").to_string(),
            _ => body,
        };

        Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl InstanceProvider for DigitalOceanProvider {
    async fn list_regions(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .http
            .get(self.url("regions"))
            .query(&[("per_page", "200")])
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body: RegionsResponse = Self::check(response).await?.json().await?;

        Ok(body
            .regions
            .into_iter()
            .filter(|r| r.available)
            .map(|r| r.slug)
            .collect())
    }

    async fn create_instances(
        &self,
        request: &CreateRequest,
    ) -> Result<Vec<Instance>, ProviderError> {
        let payload = CreateDroplets {
            names: &request.names,
            region: &request.region,
            size: &request.size,
            image: &request.image,
            ssh_keys: [request.key_id.as_str()],
            backups: false,
            ipv6: false,
        };

        let response = self
            .http
            .post(self.url("droplets"))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let body: DropletsResponse = Self::check(response).await?.json().await?;

        if body.droplets.len() != request.count() {
            // Whatever was created still needs deleting by hand
            let created: Vec<String> = body
                .droplets
                .iter()
                .map(|d| format!("{} ({})", d.name, d.id))
                .collect();
            return Err(ProviderError::InvalidResponse(format!(
                "asked for {} droplets, got {}: [{}]",
                request.count(),
                body.droplets.len(),
                created.join(", ")
            )));
        }

        Ok(body
            .droplets
            .into_iter()
            .map(|d| Instance {
                id: InstanceId(d.id),
                name: d.name,
                region: request.region.clone(),
            })
            .collect())
    }

    async fn get_address(&self, id: InstanceId) -> Result<Option<String>, ProviderError> {
        let response = self
            .http
            .get(self.url(&format!("droplets/{}", id)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(id));
        }
        let body: DropletResponse = Self::check(response).await?.json().await?;
        Ok(body.droplet.public_ipv4())
    }

    async fn delete_instance(&self, id: InstanceId) -> Result<(), ProviderError> {
        let response = self
            .http
            .delete(self.url(&format!("droplets/{}", id)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(id));
        }
        Self::check(response).await?;
        Ok(())
    }
}
