//! # Cloudscale Account API
//!
//! REST client for the `objects-users` endpoints of the account API.
//!
//! Every request carries the API token as bearer token. Error responses are
//! mapped to [`AccountApiError`] so callers can tell a missing user apart from
//! other failures.

use crate::observability::metrics;
use crate::provider::{
    AccountApi, AccountApiError, AccountConnector, CloudObjectsUser, ObjectsUserRequest,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, Instrument};

const PROVIDER: &str = "cloudscale";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Account API client bound to one token
#[derive(Clone)]
pub struct CloudscaleClient {
    http_client: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for CloudscaleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudscaleClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl CloudscaleClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/objects-users/{id}", self.base_url),
            None => format!("{}/objects-users", self.base_url),
        }
    }

    async fn make_request(
        &self,
        method: Method,
        url: &str,
        body: Option<&ObjectsUserRequest>,
    ) -> Result<reqwest::Response, AccountApiError> {
        let mut request = self
            .http_client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token));
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .map_err(|e| AccountApiError::Transport(e.to_string()))
    }

    /// Turn a non-success response into an [`AccountApiError`]
    async fn handle_error_response(id: &str, response: reqwest::Response) -> AccountApiError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return AccountApiError::NotFound { id: id.to_string() };
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        AccountApiError::Status {
            status: status.as_u16(),
            message,
        }
    }

    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        id: Option<&str>,
        body: Option<&ObjectsUserRequest>,
    ) -> Result<reqwest::Response> {
        metrics::increment_external_operations(PROVIDER, operation);
        let url = self.url(id);
        let response = self.make_request(method, &url, body).await.inspect_err(|_| {
            metrics::increment_external_operation_errors(PROVIDER, operation);
        })?;
        if response.status().is_success() {
            return Ok(response);
        }
        metrics::increment_external_operation_errors(PROVIDER, operation);
        Err(Self::handle_error_response(id.unwrap_or_default(), response)
            .await
            .into())
    }
}

#[async_trait]
impl AccountApi for CloudscaleClient {
    async fn create_objects_user(&self, request: &ObjectsUserRequest) -> Result<CloudObjectsUser> {
        let span = info_span!("cloudscale.objects_user.create", display_name = %request.display_name);
        async move {
            let response = self
                .call("create_objects_user", Method::POST, None, Some(request))
                .await?;
            let user: CloudObjectsUser = response
                .json()
                .await
                .context("Failed to parse objects user response")?;
            debug!(user.id = %user.id, "objects user created");
            Ok(user)
        }
        .instrument(span)
        .await
    }

    async fn get_objects_user(&self, id: &str) -> Result<CloudObjectsUser> {
        let response = self
            .call("get_objects_user", Method::GET, Some(id), None)
            .await?;
        response
            .json()
            .await
            .context("Failed to parse objects user response")
    }

    async fn update_objects_user(&self, id: &str, request: &ObjectsUserRequest) -> Result<()> {
        let span = info_span!("cloudscale.objects_user.update", user.id = id);
        async move {
            self.call("update_objects_user", Method::PATCH, Some(id), Some(request))
                .await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn delete_objects_user(&self, id: &str) -> Result<()> {
        let span = info_span!("cloudscale.objects_user.delete", user.id = id);
        async move {
            self.call("delete_objects_user", Method::DELETE, Some(id), None)
                .await?;
            Ok(())
        }
        .instrument(span)
        .await
    }
}

/// Builds [`CloudscaleClient`]s against a fixed base URL
#[derive(Debug, Clone)]
pub struct CloudscaleConnector {
    base_url: String,
}

impl CloudscaleConnector {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl AccountConnector for CloudscaleConnector {
    fn connect(&self, token: &str) -> Result<Arc<dyn AccountApi>> {
        Ok(Arc::new(CloudscaleClient::new(&self.base_url, token)?))
    }
}
