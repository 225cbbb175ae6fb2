//! REST control plane over HTTP
//!
//! `GET    {base}/{collection}/{name}`  read by name
//! `POST   {base}/{collection}`         create
//! `PUT    {base}/{collection}/{id}`    update
//! `DELETE {base}/{collection}/{id}`    destroy

use crate::control_plane::{ApiObject, ApiRequest, ControlPlane};
use crate::error::{ProviderError, ProviderResult};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::{debug, error};

pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpControlPlane {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(ProviderError::from)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, collection: &str, key: Option<&str>) -> String {
        match key {
            Some(k) => format!("{}/{}/{}", self.base_url, collection, k),
            None => format!("{}/{}", self.base_url, collection),
        }
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn check(response: Response) -> ProviderResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("control plane error {}: {}", status, body);
        Err(ProviderError::from_status(status.as_u16(), body))
    }

    async fn decode(response: Response) -> ProviderResult<ApiObject> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
            message: e.to_string(),
            payload: Some(body),
        })
    }
}

#[async_trait::async_trait]
impl ControlPlane for HttpControlPlane {
    fn name(&self) -> &str {
        "http"
    }

    async fn get(&self, collection: &str, name: &str) -> ProviderResult<Option<ApiObject>> {
        debug!(collection, name, "GET");
        let response = self
            .authorize(self.client.get(self.url(collection, Some(name))))
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        Ok(Some(Self::decode(response).await?))
    }

    async fn create(&self, collection: &str, request: &ApiRequest) -> ProviderResult<ApiObject> {
        debug!(collection, name = %request.name, "POST");
        let response = self
            .authorize(self.client.post(self.url(collection, None)))
            .json(request)
            .send()
            .await?;
        Self::decode(Self::check(response).await?).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        request: &ApiRequest,
    ) -> ProviderResult<ApiObject> {
        debug!(collection, id, "PUT");
        let response = self
            .authorize(self.client.put(self.url(collection, Some(id))))
            .json(request)
            .send()
            .await?;
        Self::decode(Self::check(response).await?).await
    }

    async fn delete(&self, collection: &str, id: &str) -> ProviderResult<()> {
        debug!(collection, id, "DELETE");
        let response = self
            .authorize(self.client.delete(self.url(collection, Some(id))))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
