//! HTTP fetcher for `http://` / `https://` subscription sources.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use boxflow_api::error::PluginError;
use boxflow_api::fetcher::Fetcher;
use boxflow_api::model::SubscriptionSource;
use boxflow_api::trace;

pub const NAME: &str = "http";

/// Sent when the source leaves `user_agent` unset. Clash-compatible so
/// providers return the full proxy list.
pub const DEFAULT_USER_AGENT: &str = "ClashMeta/1.0";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(serde::Deserialize)]
#[serde(default)]
struct HttpFetcherConfig {
    /// Request timeout in seconds.
    timeout_secs: u64,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self { timeout_secs: DEFAULT_TIMEOUT_SECS }
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    fn build(cfg: HttpFetcherConfig) -> Result<Self, PluginError> {
        let timeout = Duration::from_secs(cfg.timeout_secs.clamp(1, DEFAULT_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PluginError::fetch(format!("http client build failed: {e}")))?;
        Ok(Self { client, timeout })
    }
}

impl Fetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports(&self, source: &SubscriptionSource) -> bool {
        source.url.starts_with("http://") || source.url.starts_with("https://")
    }

    fn fetch<'a>(
        &'a self,
        source: &'a SubscriptionSource,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let mut request = self.client.get(&source.url);

            // User-agent tri-state: unset → default, explicit → as-is,
            // empty string → no header at all.
            match source.user_agent.as_deref() {
                None => request = request.header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT),
                Some("") => {}
                Some(ua) => request = request.header(reqwest::header::USER_AGENT, ua),
            }
            for (name, value) in &source.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    PluginError::timeout(format!(
                        "fetch of {} timed out after {:?}",
                        source.url, self.timeout
                    ))
                } else {
                    PluginError::fetch(format!("fetch of {} failed: {e}", source.url))
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(PluginError::fetch(format!(
                    "fetch of {} returned HTTP {status}",
                    source.url
                )));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| PluginError::fetch(format!("fetch of {} body read failed: {e}", source.url)))?;

            tracing::debug!(
                trace_id = %trace::get_trace_id(),
                url = %source.url,
                bytes = body.len(),
                "fetched subscription"
            );
            Ok(body.to_vec())
        })
    }
}

pub fn create(config: &serde_json::Value) -> Result<Box<dyn Fetcher>, PluginError> {
    let cfg: HttpFetcherConfig = if config.is_null() {
        HttpFetcherConfig::default()
    } else {
        serde_json::from_value(config.clone())
            .map_err(|e| PluginError::internal(format!("http fetcher config: {e}")))?
    };
    Ok(Box::new(HttpFetcher::build(cfg)?))
}
