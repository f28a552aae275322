use std::time::Duration;

use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::error::ClientError;

/// Default timeout for consumed endpoints without a tighter budget.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
/// Engine readiness check.
const READINESS_TIMEOUT: Duration = Duration::from_millis(4500);
/// Per-endpoint probe budget for manager routes.
const MANAGER_PROBE_TIMEOUT: Duration = Duration::from_millis(2500);
/// Node catalog, fast and deep budgets.
const OBJECT_INFO_FAST_TIMEOUT: Duration = Duration::from_secs(4);
const OBJECT_INFO_DEEP_TIMEOUT: Duration = Duration::from_secs(12);
/// The reboot route must return quickly or not at all.
const REBOOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Manager routes probed for reachability, in preference order.
pub const MANAGER_PROBE_PATHS: &[&str] = &[
    "/v2/manager/version",
    "/v2/manager/queue/status",
    "/v2/manager/queue/history_list",
    "/v2/customnode/getmappings?mode=local",
];

/// Shape of `/v2/manager/queue/status`. Only `is_processing` and
/// `pending_count` are normative; the rest is carried for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub done_count: u64,
    #[serde(default)]
    pub in_progress_count: u64,
    #[serde(default)]
    pub pending_count: u64,
    #[serde(default)]
    pub is_processing: bool,
}

impl QueueStatus {
    /// The drain predicate: nothing running, nothing pending.
    pub fn is_drained(&self) -> bool {
        !self.is_processing && self.pending_count == 0
    }
}

/// A builder for an [`EngineClient`].
#[derive(Debug, Clone)]
pub struct EngineClientBuilder {
    base_url: String,
    retries: u32,
}

impl EngineClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            retries: 2,
        }
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn build(self) -> Result<EngineClient, ClientError> {
        let base = Url::parse(self.base_url.trim_end_matches('/'))
            .map_err(|_| ClientError::InvalidUrl(self.base_url.clone()))?;

        let client_raw = reqwest::Client::builder()
            .user_agent("modusnap")
            .pool_max_idle_per_host(8)
            .build()?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(self.retries);
        let client = reqwest_middleware::ClientBuilder::new(client_raw)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(EngineClient { base, client })
    }
}

/// The one client for everything the control plane asks of the engine.
#[derive(Debug, Clone)]
pub struct EngineClient {
    base: Url,
    client: ClientWithMiddleware,
}

impl EngineClient {
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path_and_query: &str) -> Result<Url, ClientError> {
        self.base
            .join(path_and_query)
            .map_err(|_| ClientError::InvalidUrl(path_and_query.to_string()))
    }

    /// GET an endpoint, parse JSON, fall back to the raw body as a JSON
    /// string when the payload isn't valid JSON.
    async fn get_value(&self, path: &str, timeout: Duration) -> Result<Value, ClientError> {
        let url = self.endpoint(path)?;
        trace!("GET {url}");
        let response = self.client.get(url.clone()).timeout(timeout).send().await?;
        Self::into_value(url, response).await
    }

    async fn post_value(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let url = self.endpoint(path)?;
        trace!("POST {url}");
        let response = self
            .client
            .post(url.clone())
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        Self::into_value(url, response).await
    }

    async fn into_value(url: Url, response: reqwest::Response) -> Result<Value, ClientError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                url: url.to_string(),
                snippet: body.chars().take(200).collect(),
            });
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    /// Whether the engine answers `/system_stats` with a 2xx.
    pub async fn is_reachable(&self) -> bool {
        self.get_value("/system_stats", READINESS_TIMEOUT)
            .await
            .is_ok()
    }

    pub async fn system_stats(&self) -> Result<Value, ClientError> {
        self.get_value("/system_stats", READINESS_TIMEOUT).await
    }

    pub async fn object_info(&self, deep: bool) -> Result<Value, ClientError> {
        let timeout = if deep {
            OBJECT_INFO_DEEP_TIMEOUT
        } else {
            OBJECT_INFO_FAST_TIMEOUT
        };
        self.get_value("/object_info", timeout).await
    }

    /// The first reachable manager route, in list order.
    pub async fn manager_endpoint(&self) -> Option<&'static str> {
        for &path in MANAGER_PROBE_PATHS {
            if self.get_value(path, MANAGER_PROBE_TIMEOUT).await.is_ok() {
                return Some(path);
            }
            debug!("Manager route {path} not reachable");
        }
        None
    }

    pub async fn manager_version(&self) -> Result<String, ClientError> {
        let value = self
            .get_value("/v2/manager/version", MANAGER_PROBE_TIMEOUT)
            .await?;
        Ok(match value {
            Value::String(text) => text,
            other => other.to_string(),
        })
    }

    pub async fn queue_status(&self) -> Result<QueueStatus, ClientError> {
        let value = self
            .get_value("/v2/manager/queue/status", MANAGER_PROBE_TIMEOUT)
            .await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    pub async fn queue_history_list(&self) -> Result<Vec<String>, ClientError> {
        let value = self
            .get_value("/v2/manager/queue/history_list", MANAGER_PROBE_TIMEOUT)
            .await?;
        Ok(value
            .get("ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn queue_history(&self, id: &str) -> Result<Value, ClientError> {
        self.get_value(
            &format!("/v2/manager/queue/history?id={id}"),
            MANAGER_PROBE_TIMEOUT,
        )
        .await
    }

    pub async fn queue_batch(&self, payload: &Value) -> Result<Value, ClientError> {
        self.post_value("/v2/manager/queue/batch", payload, DEFAULT_TIMEOUT)
            .await
    }

    /// Wake the queue processor.
    pub async fn queue_start(&self) -> Result<Value, ClientError> {
        self.get_value("/v2/manager/queue/start", MANAGER_PROBE_TIMEOUT)
            .await
    }

    pub async fn reboot(&self) -> Result<(), ClientError> {
        self.get_value("/v2/manager/reboot", REBOOT_TIMEOUT)
            .await
            .map(|_| ())
    }

    pub async fn catalog_list(&self, mode: &str, skip_update: bool) -> Result<Value, ClientError> {
        self.get_value(
            &format!("/v2/customnode/getlist?mode={mode}&skip_update={skip_update}"),
            DEFAULT_TIMEOUT,
        )
        .await
    }

    /// Repo → node-class mapping.
    pub async fn catalog_mappings(&self) -> Result<Value, ClientError> {
        self.get_value("/v2/customnode/getmappings?mode=local", DEFAULT_TIMEOUT)
            .await
    }

    pub async fn snapshot_list(&self) -> Result<Value, ClientError> {
        self.get_value("/v2/snapshot/getlist", DEFAULT_TIMEOUT).await
    }

    pub async fn snapshot_current(&self) -> Result<Value, ClientError> {
        self.get_value("/v2/snapshot/get_current", DEFAULT_TIMEOUT)
            .await
    }

    pub async fn snapshot_save(&self) -> Result<Value, ClientError> {
        self.get_value("/v2/snapshot/save", DEFAULT_TIMEOUT).await
    }

    pub async fn snapshot_restore(&self, target: &str) -> Result<Value, ClientError> {
        self.get_value(&format!("/v2/snapshot/restore?target={target}"), DEFAULT_TIMEOUT)
            .await
    }

    pub async fn snapshot_remove(&self, target: &str) -> Result<Value, ClientError> {
        self.get_value(&format!("/v2/snapshot/remove?target={target}"), DEFAULT_TIMEOUT)
            .await
    }

    pub async fn workflow_templates(&self) -> Result<Value, ClientError> {
        self.get_value("/workflow_templates", DEFAULT_TIMEOUT).await
    }

    /// `/settings`, falling back to `/api/settings` when the engine routes
    /// it there.
    pub async fn settings_get(&self) -> Result<Value, ClientError> {
        match self.get_value("/settings", DEFAULT_TIMEOUT).await {
            Err(ClientError::Upstream { status: 404, .. }) => {
                self.get_value("/api/settings", DEFAULT_TIMEOUT).await
            }
            other => other,
        }
    }

    pub async fn settings_post(&self, body: &Value) -> Result<Value, ClientError> {
        match self.post_value("/settings", body, DEFAULT_TIMEOUT).await {
            Err(ClientError::Upstream { status: 404, .. }) => {
                self.post_value("/api/settings", body, DEFAULT_TIMEOUT).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{EngineClientBuilder, QueueStatus};
    use crate::error::ClientError;

    async fn client(server: &MockServer) -> super::EngineClient {
        EngineClientBuilder::new(server.uri())
            .retries(0)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn upstream_error_carries_status_and_snippet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/system_stats"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client(&server).await.system_stats().await.unwrap_err();
        match err {
            ClientError::Upstream { status, snippet, .. } => {
                assert_eq!(status, 503);
                assert_eq!(snippet, "maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_bodies_fall_back_to_raw_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/manager/version"))
            .respond_with(ResponseTemplate::new(200).set_body_string("3.31.9"))
            .mount(&server)
            .await;

        let version = client(&server).await.manager_version().await.unwrap();
        assert_eq!(version, "3.31.9");
    }

    #[tokio::test]
    async fn queue_status_parses_and_drains() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/manager/queue/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 10,
                "done_count": 10,
                "in_progress_count": 0,
                "pending_count": 0,
                "is_processing": false,
            })))
            .mount(&server)
            .await;

        let status = client(&server).await.queue_status().await.unwrap();
        assert_eq!(status.total_count, 10);
        assert!(status.is_drained());
        assert!(!QueueStatus { is_processing: true, ..status }.is_drained());
    }

    #[tokio::test]
    async fn manager_endpoint_prefers_list_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/manager/queue/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        // `/v2/manager/version` is down; the probe falls through to the
        // queue status route.
        let endpoint = client(&server).await.manager_endpoint().await;
        assert_eq!(endpoint, Some("/v2/manager/queue/status"));
    }

    #[tokio::test]
    async fn settings_falls_back_to_api_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/settings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"theme": "dark"})))
            .mount(&server)
            .await;

        let settings = client(&server).await.settings_get().await.unwrap();
        assert_eq!(settings["theme"], "dark");
    }
}
