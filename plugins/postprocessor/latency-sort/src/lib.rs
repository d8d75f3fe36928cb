//! Latency measurement and sorting postprocessor.
//!
//! Measurement methods: `cached` (reuse `meta["latency_ms"]`), `tcp` /
//! `ping` (TCP connect timing; raw ICMP would need privileges the
//! pipeline must not assume), `http` (HEAD request timing). Results are
//! cached per `address:port` for a configurable TTL. Servers above
//! `max_latency_ms` are dropped when `remove_unreachable` is set,
//! otherwise kept with a `high_latency` flag. This stage owns
//! `meta["latency_ms"]` and overwrites earlier estimates.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use boxflow_api::error::PluginError;
use boxflow_api::middleware::effective_config;
use boxflow_api::model::{ParsedServer, PipelineContext};
use boxflow_api::postprocessor::PostProcessor;
use boxflow_api::profile::FullProfile;

pub const NAME: &str = "latency_sort";

const FALLBACK_LATENCY_MS: f64 = 999_999.0;

#[derive(Clone, Copy, Default, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Copy, Default, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
enum MeasurementMethod {
    #[default]
    Cached,
    Ping,
    Tcp,
    Http,
}

#[derive(Clone, serde::Deserialize)]
#[serde(default)]
struct LatencySortConfig {
    sort_order: SortOrder,
    max_latency_ms: Option<f64>,
    timeout_ms: u64,
    measurement_method: MeasurementMethod,
    cache_duration_secs: u64,
    fallback_latency: f64,
    remove_unreachable: bool,
}

impl Default for LatencySortConfig {
    fn default() -> Self {
        Self {
            sort_order: SortOrder::Asc,
            max_latency_ms: Some(1000.0),
            timeout_ms: 3000,
            measurement_method: MeasurementMethod::Cached,
            cache_duration_secs: 300,
            fallback_latency: FALLBACK_LATENCY_MS,
            remove_unreachable: false,
        }
    }
}

pub struct LatencySortPostProcessor {
    config: Value,
    cache: Mutex<HashMap<String, (f64, Instant)>>,
}

impl LatencySortPostProcessor {
    fn cached(&self, key: &str, ttl: Duration) -> Option<f64> {
        self.cache
            .lock()
            .ok()?
            .get(key)
            .filter(|(_, at)| at.elapsed() < ttl)
            .map(|(latency, _)| *latency)
    }

    fn store(&self, key: String, latency: f64) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, (latency, Instant::now()));
        }
    }

    async fn measure(&self, server: &ParsedServer, cfg: &LatencySortConfig) -> f64 {
        let key = format!("{}:{}", server.address, server.port);
        let ttl = Duration::from_secs(cfg.cache_duration_secs);
        if let Some(latency) = self.cached(&key, ttl) {
            return latency;
        }

        // A prior measurement carried in metadata satisfies `cached`.
        if let Some(known) = server.meta.get("latency_ms").and_then(Value::as_f64) {
            if cfg.measurement_method == MeasurementMethod::Cached {
                self.store(key, known);
                return known;
            }
        }

        let timeout = Duration::from_millis(cfg.timeout_ms.max(1));
        let latency = match cfg.measurement_method {
            MeasurementMethod::Cached => cfg.fallback_latency,
            MeasurementMethod::Tcp | MeasurementMethod::Ping => {
                tcp_latency(&server.address, server.port, timeout)
                    .await
                    .unwrap_or(cfg.fallback_latency)
            }
            MeasurementMethod::Http => http_latency(&server.address, server.port, timeout)
                .await
                .unwrap_or(cfg.fallback_latency),
        };
        self.store(key, latency);
        latency
    }
}

async fn tcp_latency(address: &str, port: u16, timeout: Duration) -> Option<f64> {
    let started = Instant::now();
    let connect = tokio::net::TcpStream::connect((address, port));
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_)) => Some(started.elapsed().as_secs_f64() * 1000.0),
        _ => None,
    }
}

async fn http_latency(address: &str, port: u16, timeout: Duration) -> Option<f64> {
    let client = reqwest::Client::builder().timeout(timeout).build().ok()?;
    let scheme = if port == 443 || port == 8443 { "https" } else { "http" };
    let url = format!("{scheme}://{address}:{port}/");
    let started = Instant::now();
    client.head(url).send().await.ok()?;
    Some(started.elapsed().as_secs_f64() * 1000.0)
}

impl PostProcessor for LatencySortPostProcessor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn process<'a>(
        &'a self,
        servers: Vec<ParsedServer>,
        ctx: &'a mut PipelineContext,
        profile: Option<&'a FullProfile>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ParsedServer>, PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let merged = effective_config(&self.config, profile, NAME);
            let cfg: LatencySortConfig = serde_json::from_value(merged).unwrap_or_default();

            let total = servers.len();
            let mut measured: Vec<(ParsedServer, f64)> = Vec::with_capacity(total);
            for mut server in servers {
                let latency = self.measure(&server, &cfg).await;

                if let Some(max) = cfg.max_latency_ms
                    && latency > max
                {
                    if cfg.remove_unreachable {
                        continue;
                    }
                    server.set_meta("high_latency", true);
                }
                server.set_meta("latency_ms", latency);
                server.set_meta(
                    "latency_measured_at",
                    chrono_free_timestamp(),
                );
                measured.push((server, latency));
            }

            match cfg.sort_order {
                SortOrder::Asc => measured
                    .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)),
                SortOrder::Desc => measured
                    .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)),
            }

            tracing::debug!(
                trace_id = %ctx.trace_id,
                total,
                kept = measured.len(),
                "latency sort applied"
            );
            ctx.set_stage_meta(NAME, json!({"measured": measured.len(), "dropped": total - measured.len()}));
            Ok(measured.into_iter().map(|(s, _)| s).collect())
        })
    }
}

/// Seconds since the Unix epoch; enough precision for cache bookkeeping.
fn chrono_free_timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn create(config: &Value) -> Result<Box<dyn PostProcessor>, PluginError> {
    if !config.is_null() {
        serde_json::from_value::<LatencySortConfig>(config.clone())
            .map_err(|e| PluginError::internal(format!("latency sort config: {e}")))?;
    }
    Ok(Box::new(LatencySortPostProcessor {
        config: if config.is_null() { json!({}) } else { config.clone() },
        cache: Mutex::new(HashMap::new()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_latency(addr: &str, latency: f64) -> ParsedServer {
        let mut s = ParsedServer::new("ss", addr, 443);
        s.set_meta("latency_ms", latency);
        s
    }

    #[tokio::test]
    async fn sorts_ascending_from_cached_metadata() {
        let pp = create(&json!({"max_latency_ms": null})).unwrap();
        let mut ctx = PipelineContext::new();
        let out = pp
            .process(
                vec![with_latency("slow", 400.0), with_latency("fast", 20.0), with_latency("mid", 120.0)],
                &mut ctx,
                None,
            )
            .await
            .unwrap();
        let order: Vec<_> = out.iter().map(|s| s.address.as_str()).collect();
        assert_eq!(order, vec!["fast", "mid", "slow"]);
    }

    #[tokio::test]
    async fn descending_order() {
        let pp = create(&json!({"sort_order": "desc", "max_latency_ms": null})).unwrap();
        let mut ctx = PipelineContext::new();
        let out = pp
            .process(
                vec![with_latency("fast", 20.0), with_latency("slow", 400.0)],
                &mut ctx,
                None,
            )
            .await
            .unwrap();
        assert_eq!(out[0].address, "slow");
    }

    #[tokio::test]
    async fn over_limit_flagged_or_dropped() {
        let keep = create(&json!({"max_latency_ms": 100.0})).unwrap();
        let mut ctx = PipelineContext::new();
        let out = keep
            .process(vec![with_latency("slow", 500.0)], &mut ctx, None)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].meta["high_latency"], json!(true));

        let drop = create(&json!({"max_latency_ms": 100.0, "remove_unreachable": true})).unwrap();
        let out = drop
            .process(vec![with_latency("slow", 500.0)], &mut ctx, None)
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(ctx.stage_meta(NAME).unwrap()["dropped"], json!(1));
    }

    #[tokio::test]
    async fn unmeasured_servers_get_fallback() {
        let pp = create(&json!({"max_latency_ms": null})).unwrap();
        let mut ctx = PipelineContext::new();
        let out = pp
            .process(
                vec![ParsedServer::new("ss", "unmeasured", 443), with_latency("fast", 5.0)],
                &mut ctx,
                None,
            )
            .await
            .unwrap();
        assert_eq!(out[0].address, "fast");
        assert_eq!(out[1].meta["latency_ms"], json!(FALLBACK_LATENCY_MS));
    }

    #[tokio::test]
    async fn tcp_measurement_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Keep accepting so connects succeed.
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let latency = tcp_latency("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(latency.is_some());
        assert!(latency.unwrap() < 1000.0);
    }

    #[tokio::test]
    async fn measurement_cache_is_reused() {
        let pp = LatencySortPostProcessor {
            config: json!({"max_latency_ms": null}),
            cache: Mutex::new(HashMap::new()),
        };
        let mut ctx = PipelineContext::new();
        let first = pp
            .process(vec![with_latency("a", 42.0)], &mut ctx, None)
            .await
            .unwrap();
        assert_eq!(first[0].meta["latency_ms"], json!(42.0));

        // Second pass has no metadata hint; the TTL cache answers.
        let second = pp
            .process(vec![ParsedServer::new("ss", "a", 443)], &mut ctx, None)
            .await
            .unwrap();
        assert_eq!(second[0].meta["latency_ms"], json!(42.0));
    }
}
