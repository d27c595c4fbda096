//! HTTP client for the aqueduct HAProxy control plane.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Serialize;

use super::model::{Backend, Frontend};
use super::ControlPlane;
use crate::error::ProxyError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AqueductClient {
    client: Client,
    base_url: Url,
}

impl AqueductClient {
    pub fn new(base_url: &str) -> Result<Self, ProxyError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ProxyError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, base_url })
    }

    /// `<base>/<collection>/<key>` with the key encoded as a single segment.
    pub fn url_for(&self, collection: &str, key: &str) -> Result<Url, ProxyError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProxyError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(collection)
            .push(key);
        Ok(url)
    }

    async fn put<T: Serialize + Sync>(&self, collection: &str, key: &str, body: &T) -> Result<(), ProxyError> {
        let url = self.url_for(collection, key)?;
        debug!("PUT {}", url);
        let response = self.client.put(url).json(body).send().await?;
        check(response).await.map(|_| ())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), ProxyError> {
        let url = self.url_for(collection, key)?;
        debug!("DELETE {}", url);
        let response = self.client.delete(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("{} {} already absent", collection, key);
            return Ok(());
        }
        check(response).await.map(|_| ())
    }
}

async fn check(response: Response) -> Result<Response, ProxyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(ProxyError::Api {
        status: status.as_u16(),
        path,
        body,
    })
}

#[async_trait]
impl ControlPlane for AqueductClient {
    async fn get_backend(&self, key: &str) -> Result<Option<Backend>, ProxyError> {
        let url = self.url_for("backends", key)?;
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let backend = check(response).await?.json::<Backend>().await?;
        Ok(Some(backend))
    }

    async fn put_backend(&self, key: &str, backend: &Backend) -> Result<(), ProxyError> {
        self.put("backends", key, backend).await
    }

    async fn delete_backend(&self, key: &str) -> Result<(), ProxyError> {
        self.delete("backends", key).await
    }

    async fn put_frontend(&self, key: &str, frontend: &Frontend) -> Result<(), ProxyError> {
        self.put("frontends", key, frontend).await
    }

    async fn delete_frontend(&self, key: &str) -> Result<(), ProxyError> {
        self.delete("frontends", key).await
    }
}
