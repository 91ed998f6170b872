// HTTP transport to the metadata catalog
use async_trait::async_trait;
use qcmms_core::catalog::{Acknowledgement, CatalogTransport, DispatchTarget};
use qcmms_core::config::CatalogSettings;
use qcmms_core::error::TransportError;
use qcmms_core::response::Payload;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

const GEO_JSON: &str = "application/geo+json";

/// Inserts new datasets and updates existing ones in a catalog series
pub struct HttpCatalogTransport {
    client: Client,
    url: String,
    user: String,
    password: String,
}

impl HttpCatalogTransport {
    pub fn new(settings: &CatalogSettings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(TransportError::new)?;
        Ok(Self {
            client,
            url: settings.url.trim_end_matches('/').to_string(),
            user: settings.user.clone(),
            password: settings.password.clone(),
        })
    }

    pub fn collection_url(&self, target: &DispatchTarget) -> String {
        format!("{}/series/{}/datasets", self.url, target.parent_identifier)
    }

    pub fn dataset_url(&self, target: &DispatchTarget) -> String {
        format!("{}/{}", self.collection_url(target), target.dataset_id)
    }

    async fn exists(&self, target: &DispatchTarget) -> Result<bool, TransportError> {
        let response = self
            .client
            .get(self.dataset_url(target))
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(TransportError::new)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(TransportError::new(format!(
                "catalog lookup of '{}' answered {}",
                target.dataset_id, status
            ))),
        }
    }
}

#[async_trait]
impl CatalogTransport for HttpCatalogTransport {
    async fn submit(
        &self,
        payload: &Payload,
        target: &DispatchTarget,
    ) -> Result<Acknowledgement, TransportError> {
        let request = if self.exists(target).await? {
            debug!(dataset = %target.dataset_id, "updating catalog dataset");
            self.client.put(self.dataset_url(target))
        } else {
            debug!(dataset = %target.dataset_id, "inserting catalog dataset");
            self.client.post(self.collection_url(target))
        };

        let response = request
            .basic_auth(&self.user, Some(&self.password))
            .header(CONTENT_TYPE, GEO_JSON)
            .body(payload.as_str().to_string())
            .send()
            .await
            .map_err(TransportError::new)?;

        let status = response.status();
        let body = response.text().await.map_err(TransportError::new)?;
        if !status.is_success() {
            return Err(TransportError::new(format!(
                "catalog answered {}: {}",
                status,
                body.trim()
            )));
        }

        let id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| target.dataset_id.clone());
        Ok(Acknowledgement { id })
    }
}
