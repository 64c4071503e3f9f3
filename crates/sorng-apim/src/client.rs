//! Remote tag client.
//!
//! [`TagClient`] is the capability the reconciler is handed; [`ArmTagClient`]
//! implements it over the Azure Resource Manager REST API with bearer-token
//! injection and retries with exponential backoff on throttling and
//! transient server errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::IF_MATCH;
use reqwest::{Client, Method, Response};
use url::Url;

use crate::tag_id::PROVIDER_NAMESPACE;
use crate::types::{
    ApimConfig, ArmError, ArmErrorKind, ArmResult, ArmToken, TagContract,
    TagCreateUpdateParameters,
};

/// Operations against the tags of API Management services in one subscription.
///
/// A not-found outcome is reported as an [`ArmError`] whose
/// [`is_not_found`](ArmError::is_not_found) is true.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TagClient: Send + Sync {
    async fn get(
        &self,
        resource_group: &str,
        service_name: &str,
        name: &str,
    ) -> ArmResult<TagContract>;

    async fn create_or_update(
        &self,
        resource_group: &str,
        service_name: &str,
        name: &str,
        parameters: &TagCreateUpdateParameters,
    ) -> ArmResult<TagContract>;

    async fn delete(&self, resource_group: &str, service_name: &str, name: &str) -> ArmResult<()>;
}

#[async_trait]
impl<T: TagClient + ?Sized> TagClient for Arc<T> {
    async fn get(
        &self,
        resource_group: &str,
        service_name: &str,
        name: &str,
    ) -> ArmResult<TagContract> {
        (**self).get(resource_group, service_name, name).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        service_name: &str,
        name: &str,
        parameters: &TagCreateUpdateParameters,
    ) -> ArmResult<TagContract> {
        (**self)
            .create_or_update(resource_group, service_name, name, parameters)
            .await
    }

    async fn delete(&self, resource_group: &str, service_name: &str, name: &str) -> ArmResult<()> {
        (**self).delete(resource_group, service_name, name).await
    }
}

/// HTTP-backed [`TagClient`] for one subscription.
#[derive(Clone)]
pub struct ArmTagClient {
    http: Client,
    token: Option<ArmToken>,
    subscription_id: String,
    config: ApimConfig,
}

impl ArmTagClient {
    pub fn new(subscription_id: impl Into<String>, config: ApimConfig) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .unwrap_or_default(),
            token: None,
            subscription_id: subscription_id.into(),
            config,
        }
    }

    pub fn with_token(mut self, token: ArmToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Swap in a refreshed token; clones made earlier keep the old one.
    pub fn set_token(&mut self, token: ArmToken) {
        self.token = Some(token);
    }

    pub fn config(&self) -> &ApimConfig {
        &self.config
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.bearer().is_ok()
    }

    fn bearer(&self) -> ArmResult<&str> {
        self.token
            .as_ref()
            .filter(|t| !t.access_token.is_empty() && !t.is_expired())
            .map(|t| t.access_token.as_str())
            .ok_or_else(ArmError::not_authenticated)
    }

    /// `{arm_base}/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.ApiManagement/service/{svc}/tags/{name}?api-version=...`
    pub fn tag_url(&self, resource_group: &str, service_name: &str, name: &str) -> ArmResult<Url> {
        let endpoint_error =
            |why: String| ArmError::new(ArmErrorKind::Endpoint, format!("{:?}: {why}", self.config.arm_base));
        let mut url = Url::parse(&self.config.arm_base).map_err(|e| endpoint_error(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| endpoint_error("cannot carry a path".into()))?
            .pop_if_empty()
            .extend([
                "subscriptions",
                self.subscription_id.as_str(),
                "resourceGroups",
                resource_group,
                "providers",
                PROVIDER_NAMESPACE,
                "service",
                service_name,
                "tags",
                name,
            ]);
        url.query_pairs_mut()
            .append_pair("api-version", &self.config.api_version);
        Ok(url)
    }

    /// Send one call, retrying throttled and transient failures with
    /// exponential backoff. Any other non-success status is returned at once.
    async fn send(
        &self,
        method: Method,
        url: &Url,
        if_match: bool,
        body: Option<&TagCreateUpdateParameters>,
    ) -> ArmResult<Response> {
        let token = self.bearer()?;
        let mut attempt = 0;
        loop {
            let mut req = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(token);
            if if_match {
                req = req.header(IF_MATCH, "*");
            }
            if let Some(body) = body {
                req = req.json(body);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| ArmError::new(ArmErrorKind::Transport, e.to_string()))?;

            let status = resp.status();
            if status.is_success() {
                return Ok(resp);
            }
            if should_retry(status.as_u16()) && attempt < self.config.max_retries {
                let delay = self.config.retry_base_delay_ms * 2u64.pow(attempt);
                warn!("APIM {} {} → {} – retrying in {}ms", method, url.path(), status, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
                continue;
            }

            let body_text = resp.text().await.unwrap_or_default();
            return Err(ArmError::from_status(status.as_u16(), &body_text));
        }
    }

    async fn contract(resp: Response) -> ArmResult<TagContract> {
        resp.json::<TagContract>()
            .await
            .map_err(|e| ArmError::new(ArmErrorKind::Decode, e.to_string()))
    }
}

#[async_trait]
impl TagClient for ArmTagClient {
    async fn get(
        &self,
        resource_group: &str,
        service_name: &str,
        name: &str,
    ) -> ArmResult<TagContract> {
        let url = self.tag_url(resource_group, service_name, name)?;
        debug!("GET tag {:?} ({:?} / {:?})", name, service_name, resource_group);
        let resp = self.send(Method::GET, &url, false, None).await?;
        Self::contract(resp).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        service_name: &str,
        name: &str,
        parameters: &TagCreateUpdateParameters,
    ) -> ArmResult<TagContract> {
        let url = self.tag_url(resource_group, service_name, name)?;
        debug!("PUT tag {:?} ({:?} / {:?})", name, service_name, resource_group);
        let resp = self.send(Method::PUT, &url, false, Some(parameters)).await?;
        Self::contract(resp).await
    }

    async fn delete(&self, resource_group: &str, service_name: &str, name: &str) -> ArmResult<()> {
        let url = self.tag_url(resource_group, service_name, name)?;
        debug!("DELETE tag {:?} ({:?} / {:?})", name, service_name, resource_group);
        self.send(Method::DELETE, &url, true, None).await?;
        Ok(())
    }
}

fn should_retry(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

// ─── Tests ──────────────────────────────────────────────────────────
