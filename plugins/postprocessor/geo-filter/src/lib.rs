//! Country-based filtering postprocessor.
//!
//! Country codes come from the enrichment metadata when present, then
//! from a two-letter tag prefix (`US-East-1`), then from the domain TLD.
//! `fallback_mode` decides what happens to servers without a resolvable
//! country and what to return when nothing matches.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use boxflow_api::error::PluginError;
use boxflow_api::middleware::effective_config;
use boxflow_api::model::{ParsedServer, PipelineContext};
use boxflow_api::postprocessor::PostProcessor;
use boxflow_api::profile::FullProfile;

pub const NAME: &str = "geo_filter";

#[derive(Clone, Default, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
enum FallbackMode {
    #[default]
    AllowAll,
    BlockAll,
}

#[derive(Clone, Default, serde::Deserialize)]
#[serde(default)]
struct GeoFilterConfig {
    allowed_countries: Vec<String>,
    blocked_countries: Vec<String>,
    fallback_mode: FallbackMode,
}

pub struct GeoFilterPostProcessor {
    config: Value,
}

/// Country code for a server, best-effort.
pub fn extract_country(server: &ParsedServer) -> Option<String> {
    if let Some(country) = server
        .meta
        .get("country")
        .and_then(Value::as_str)
        .or_else(|| {
            server
                .meta
                .get("geo")
                .and_then(|g| g.get("country"))
                .and_then(Value::as_str)
        })
        && country.len() == 2
    {
        return Some(country.to_uppercase());
    }

    if let Some(tag) = server.tag.as_deref() {
        let prefix = tag.split('-').next().unwrap_or("");
        if prefix.len() == 2 && prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            return Some(prefix.to_uppercase());
        }
    }

    let tld = server.address.rsplit('.').next()?;
    if server.address.contains('.')
        && server.address.parse::<std::net::IpAddr>().is_err()
        && tld.len() == 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
    {
        return Some(tld.to_uppercase());
    }
    None
}

impl GeoFilterPostProcessor {
    fn should_include(&self, server: &ParsedServer, cfg: &GeoFilterConfig) -> bool {
        let Some(country) = extract_country(server) else {
            return cfg.fallback_mode == FallbackMode::AllowAll;
        };
        if cfg.blocked_countries.iter().any(|c| c.eq_ignore_ascii_case(&country)) {
            return false;
        }
        if !cfg.allowed_countries.is_empty() {
            return cfg.allowed_countries.iter().any(|c| c.eq_ignore_ascii_case(&country));
        }
        true
    }
}

impl PostProcessor for GeoFilterPostProcessor {
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
            let cfg: GeoFilterConfig = serde_json::from_value(merged).unwrap_or_default();
            if cfg.allowed_countries.is_empty() && cfg.blocked_countries.is_empty() {
                return Ok(servers);
            }

            let total = servers.len();
            let kept: Vec<ParsedServer> = servers
                .iter()
                .filter(|s| self.should_include(s, &cfg))
                .cloned()
                .collect();

            // No survivors: fallback policy decides between the original
            // set and an empty result.
            if kept.is_empty() && cfg.fallback_mode == FallbackMode::AllowAll {
                tracing::debug!(
                    trace_id = %ctx.trace_id,
                    total,
                    "geo filter matched nothing, falling back to allow_all"
                );
                return Ok(servers);
            }

            tracing::debug!(
                trace_id = %ctx.trace_id,
                total,
                kept = kept.len(),
                "geo filter applied"
            );
            Ok(kept)
        })
    }
}

pub fn create(config: &Value) -> Result<Box<dyn PostProcessor>, PluginError> {
    if !config.is_null() {
        serde_json::from_value::<GeoFilterConfig>(config.clone())
            .map_err(|e| PluginError::internal(format!("geo filter config: {e}")))?;
    }
    Ok(Box::new(GeoFilterPostProcessor {
        config: if config.is_null() { serde_json::json!({}) } else { config.clone() },
    }))
}
