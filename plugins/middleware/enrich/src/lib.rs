//! Enrichment middleware.
//!
//! Runs a fixed set of individually toggleable enrichers over each server:
//! basic (stable id, timestamp, trace mirror), geo, performance, security,
//! and profile-declared custom rules. A per-server time budget bounds the
//! stage; once exceeded, the remaining servers pass through unenriched.

mod basic;
mod custom;
mod geo;
mod performance;
mod security;

pub use custom::CustomRule;
pub use geo::is_private_address;

use std::time::{Duration, Instant};

use serde_json::Value;

use basic::BasicEnricher;
use custom::CustomEnricher;
use geo::GeoEnricher;
use performance::PerformanceEnricher;
use security::SecurityEnricher;

use boxflow_api::error::PluginError;
use boxflow_api::middleware::{Middleware, effective_config};
use boxflow_api::model::{ParsedServer, PipelineContext};
use boxflow_api::profile::FullProfile;

pub const NAME: &str = "enrich";

#[derive(Clone, serde::Deserialize)]
#[serde(default)]
struct EnrichConfig {
    enable_geo: bool,
    enable_performance: bool,
    enable_security: bool,
    enable_custom: bool,
    geo_database_path: Option<String>,
    performance_cache_secs: u64,
    /// Budget per server, in milliseconds.
    max_enrichment_time_ms: u64,
    custom_rules: Vec<CustomRule>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            enable_geo: true,
            enable_performance: true,
            enable_security: true,
            enable_custom: true,
            geo_database_path: None,
            performance_cache_secs: 300,
            max_enrichment_time_ms: 1000,
            custom_rules: Vec::new(),
        }
    }
}

pub struct EnrichMiddleware {
    config: Value,
    basic: BasicEnricher,
    geo: GeoEnricher,
    performance: PerformanceEnricher,
    security: SecurityEnricher,
    custom: CustomEnricher,
}

impl EnrichMiddleware {
    fn from_config(cfg: EnrichConfig, raw: Value) -> Self {
        Self {
            geo: GeoEnricher::new(cfg.geo_database_path.as_deref()),
            performance: PerformanceEnricher::new(Duration::from_secs(cfg.performance_cache_secs)),
            basic: BasicEnricher,
            security: SecurityEnricher,
            custom: CustomEnricher,
            config: raw,
        }
    }
}

impl Middleware for EnrichMiddleware {
    fn name(&self) -> &'static str {
        NAME
    }

    fn process(
        &self,
        mut servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
        profile: Option<&FullProfile>,
    ) -> Result<Vec<ParsedServer>, PluginError> {
        let merged = effective_config(&self.config, profile, NAME);
        let cfg: EnrichConfig = serde_json::from_value(merged).unwrap_or_default();
        let budget = Duration::from_millis(cfg.max_enrichment_time_ms.max(1));

        let total = servers.len();
        let mut enriched = 0usize;
        for server in &mut servers {
            let started = Instant::now();
            self.basic.enrich(server, ctx);
            if cfg.enable_geo && started.elapsed() < budget {
                self.geo.enrich(server);
            }
            if cfg.enable_performance && started.elapsed() < budget {
                self.performance.enrich(server);
            }
            if cfg.enable_security && started.elapsed() < budget {
                self.security.enrich(server);
            }
            if cfg.enable_custom && !cfg.custom_rules.is_empty() && started.elapsed() < budget {
                self.custom.enrich(server, &cfg.custom_rules);
            }
            enriched += 1;
            if started.elapsed() >= budget {
                tracing::warn!(
                    trace_id = %ctx.trace_id,
                    enriched,
                    total,
                    "enrichment budget exhausted, remaining servers pass through"
                );
                break;
            }
        }

        ctx.set_stage_meta(NAME, serde_json::json!({"enriched": enriched, "total": total}));
        Ok(servers)
    }
}

pub fn create(config: &Value) -> Result<Box<dyn Middleware>, PluginError> {
    let cfg: EnrichConfig = if config.is_null() {
        EnrichConfig::default()
    } else {
        serde_json::from_value(config.clone())
            .map_err(|e| PluginError::internal(format!("enrich config: {e}")))?
    };
    let raw = if config.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        config.clone()
    };
    Ok(Box::new(EnrichMiddleware::from_config(cfg, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enriches_all_dimensions() {
        let mw = create(&Value::Null).unwrap();
        let mut ctx = PipelineContext::new();
        let servers = vec![ParsedServer::new("vless", "v.example.de", 443)];
        let out = mw.process(servers, &mut ctx, None).unwrap();

        let meta = &out[0].meta;
        assert_eq!(meta["server_id"].as_str().unwrap().len(), 8);
        assert_eq!(meta["trace_id"], json!(ctx.trace_id));
        assert!(meta["enriched_at"].as_str().unwrap().ends_with('Z'));
        assert_eq!(meta["geo"]["country"], json!("DE"));
        assert!(meta.contains_key("performance"));
        assert!(meta.contains_key("security"));
        assert_eq!(ctx.stage_meta(NAME).unwrap()["enriched"], json!(1));
    }

    #[test]
    fn toggles_disable_enrichers() {
        let mw = create(&json!({
            "enable_geo": false,
            "enable_performance": false,
            "enable_security": false
        }))
        .unwrap();
        let mut ctx = PipelineContext::new();
        let out = mw
            .process(vec![ParsedServer::new("ss", "s.example.com", 443)], &mut ctx, None)
            .unwrap();
        let meta = &out[0].meta;
        assert!(meta.contains_key("server_id"));
        assert!(!meta.contains_key("geo"));
        assert!(!meta.contains_key("performance"));
        assert!(!meta.contains_key("security"));
    }

    #[test]
    fn profile_metadata_overrides_toggles() {
        let mut profile = FullProfile::new("p");
        profile
            .metadata
            .insert(NAME.into(), json!({"enable_security": false}));
        let mw = create(&Value::Null).unwrap();
        let mut ctx = PipelineContext::new();
        let out = mw
            .process(
                vec![ParsedServer::new("ss", "s.example.com", 443)],
                &mut ctx,
                Some(&profile),
            )
            .unwrap();
        assert!(!out[0].meta.contains_key("security"));
        assert!(out[0].meta.contains_key("performance"));
    }

    #[test]
    fn custom_rules_from_profile_metadata() {
        let mut profile = FullProfile::new("p");
        profile.metadata.insert(
            NAME.into(),
            json!({"custom_rules": [
                {"op": "set", "key": "tier", "value": "premium"}
            ]}),
        );
        let mw = create(&Value::Null).unwrap();
        let mut ctx = PipelineContext::new();
        let out = mw
            .process(
                vec![ParsedServer::new("vless", "v.example.com", 443)],
                &mut ctx,
                Some(&profile),
            )
            .unwrap();
        assert_eq!(out[0].meta["tier"], json!("premium"));
    }

    #[test]
    fn server_id_is_stable_across_runs() {
        let mw = create(&Value::Null).unwrap();
        let mut ctx = PipelineContext::new();
        let a = mw
            .process(vec![ParsedServer::new("ss", "x.example.com", 443)], &mut ctx, None)
            .unwrap();
        let b = mw
            .process(vec![ParsedServer::new("ss", "x.example.com", 443)], &mut ctx, None)
            .unwrap();
        assert_eq!(a[0].meta["server_id"], b[0].meta["server_id"]);
    }
}
