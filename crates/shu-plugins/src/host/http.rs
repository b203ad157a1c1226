use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::sync::Arc;

use super::egress::validate_egress;
use super::{HostPolicy, HostScope};
use crate::error::PluginError;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, PluginError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| PluginError::Fatal(format!("response is not valid JSON: {}", e)))
    }
}

/// Outbound HTTP under the host's egress policy.
#[derive(Clone)]
pub struct HttpCapability {
    scope: Arc<HostScope>,
    client: reqwest::Client,
    policy: Arc<HostPolicy>,
}

impl HttpCapability {
    pub(crate) fn new(scope: Arc<HostScope>, client: reqwest::Client, policy: Arc<HostPolicy>) -> Self {
        Self {
            scope,
            client,
            policy,
        }
    }

    #[tracing::instrument(skip(self, headers, body), fields(plugin = %self.scope.plugin, execution.id = %self.scope.execution_id))]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<Bytes>,
    ) -> Result<HttpResponse, PluginError> {
        let url = validate_egress(url, &self.policy)
            .await
            .map_err(PluginError::EgressDenied)?;

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| PluginError::Fatal(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| {
                    PluginError::Fatal(format!("invalid header value for '{}': {}", name.as_str(), e))
                })?;
            header_map.insert(name, value);
        }

        let mut request = self
            .client
            .request(method, url)
            .headers(header_map)
            .timeout(self.policy.http_timeout);
        if let Some(body) = body {
            request = request.body(body);
        }

        let mut response = request.send().await.map_err(PluginError::execution)?;

        let limit = self.policy.max_response_bytes;
        if let Some(length) = response.content_length() {
            if length > limit as u64 {
                return Err(PluginError::EgressDenied(format!(
                    "response body of {} bytes exceeds the {} byte limit",
                    length, limit
                )));
            }
        }

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(PluginError::execution)? {
            if body.len() + chunk.len() > limit {
                return Err(PluginError::EgressDenied(format!(
                    "response body exceeds the {} byte limit",
                    limit
                )));
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(status, bytes = body.len(), "Plugin HTTP request completed");
        Ok(HttpResponse {
            status,
            headers,
            body: body.freeze(),
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, PluginError> {
        self.request(Method::GET, url, &[], None).await
    }

    pub async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<HttpResponse, PluginError> {
        let body = serde_json::to_vec(payload).map_err(|e| PluginError::Fatal(e.to_string()))?;
        let headers = [("content-type".to_string(), "application/json".to_string())];
        self.request(Method::POST, url, &headers, Some(Bytes::from(body)))
            .await
    }
}
