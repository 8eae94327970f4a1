//! HTTP client for the registry tags endpoint.
//!
//! Only one endpoint is ever consumed:
//! `GET https://{registry}/v2/{image}/tags/list`. Authentication is HTTP
//! Basic with the per-registry credentials from the operator configuration,
//! and certificate verification can be relaxed for self-signed registries.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

use crate::config::RegistryCredentials;

/// Upper bound on the number of tags requested per poll.
const TAG_PAGE_LIMIT: u32 = 10_000;

/// Errors talking to a registry.
///
/// All of these are transient from the poller's point of view: they are
/// logged and the next tick re-polls.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Client construction or request transport failure.
    #[error("Registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The registry answered with a non-success status.
    #[error("Registry {registry} returned HTTP {status} for {image}")]
    Status {
        registry: String,
        image: String,
        status: u16,
    },
}

/// Lists the tags of an image repository.
#[async_trait]
pub trait TagClient: Send + Sync {
    async fn list_tags(&self, registry: &str, image: &str) -> Result<Vec<String>, RegistryError>;
}

/// The response mapping of the tags endpoint.
#[derive(Debug, Deserialize)]
struct TagsResponse {
    tags: Option<Vec<String>>,
}

/// Production [`TagClient`] backed by reqwest.
pub struct HttpTagClient {
    client: reqwest::Client,
    credentials: RegistryCredentials,
}

impl HttpTagClient {
    /// Creates a client.
    ///
    /// With `insecure` set, self-signed certificates are accepted; this is
    /// the `--insecure` flag and applies to every polled registry.
    pub fn new(credentials: RegistryCredentials, insecure: bool) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

#[async_trait]
impl TagClient for HttpTagClient {
    async fn list_tags(&self, registry: &str, image: &str) -> Result<Vec<String>, RegistryError> {
        let url = format!("https://{registry}/v2/{image}/tags/list?n={TAG_PAGE_LIMIT}");
        trace!(url = %url, "Listing registry tags");

        let mut request = self.client.get(&url);
        if let Some(credential) = self.credentials.get(registry) {
            request = request.basic_auth(&credential.username, Some(&credential.password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::Status {
                registry: registry.to_string(),
                image: image.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body: TagsResponse = response.json().await?;
        Ok(body.tags.unwrap_or_default())
    }
}
