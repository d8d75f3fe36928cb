//! Pipeline coordinator.
//!
//! Runs the fixed stage order — fetch → raw validate → detect → parse →
//! parsed validate → policy → middleware → postprocess → select — with a
//! results cache in front, cooperative cancellation at every stage
//! boundary, and every failure funneled into structured error records.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use boxflow_api::error::{ErrorKind, PluginError};
use boxflow_api::model::{
    ParsedServer, PipelineContext, PipelineError, PipelineResult, ServersResult,
    SubscriptionSource,
};
use boxflow_api::profile::FullProfile;
use boxflow_api::registry::Registry;
use boxflow_api::trace;

use crate::cache::{CacheKey, ResultCache};
use crate::chain::{MiddlewareChain, PostProcessorChain};
use crate::detect;
use crate::selector;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PipelineCoordinator {
    registry: Arc<Registry>,
    cache: ResultCache,
    middleware: MiddlewareChain,
    postprocessors: PostProcessorChain,
    raw_validator: String,
    parsed_validator: String,
    fetch_timeout: Duration,
}

impl PipelineCoordinator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            cache: ResultCache::new(),
            middleware: MiddlewareChain::default(),
            postprocessors: PostProcessorChain::default(),
            raw_validator: "noop".to_string(),
            parsed_validator: "required_fields".to_string(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_postprocessors(mut self, chain: PostProcessorChain) -> Self {
        self.postprocessors = chain;
        self
    }

    pub fn with_raw_validator(mut self, name: impl Into<String>) -> Self {
        self.raw_validator = name.into();
        self
    }

    pub fn with_parsed_validator(mut self, name: impl Into<String>) -> Self {
        self.parsed_validator = name.into();
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Run the subscription pipeline for one source.
    pub async fn get_servers(
        &self,
        source: &SubscriptionSource,
        ctx: &mut PipelineContext,
        profile: Option<&FullProfile>,
        cancel: &CancellationToken,
    ) -> ServersResult {
        trace::set_trace_id(&ctx.trace_id);
        if ctx.source.is_none() {
            ctx.source = Some(source.label.clone().unwrap_or_else(|| source.url.clone()));
        }

        let cache_key = CacheKey::for_run(source, ctx);
        if let Some(hit) = self.cache.get(&cache_key) {
            tracing::debug!(trace_id = %ctx.trace_id, url = %source.url, "subscription cache hit");
            return hit;
        }

        // --- Fetch (always fatal on failure) ---
        if let Some(failed) = cancelled(ctx, cancel, "fetch") {
            return failed;
        }
        let raw = match self.fetch(source, ctx).await {
            Ok(raw) => raw,
            Err(e) => {
                ctx.push_error(
                    PipelineError::from_plugin("fetch", e)
                        .with("source_type", source.source_type.as_str()),
                );
                return PipelineResult::failed(Vec::new(), ctx.clone());
            }
        };
        tracing::info!(trace_id = %ctx.trace_id, url = %source.url, bytes = raw.len(), "fetched subscription");

        // --- Raw validation ---
        if let Some(failed) = cancelled(ctx, cancel, "raw_validate") {
            return failed;
        }
        if let Err(e) = self.validate_raw(&raw, ctx) {
            ctx.push_error(PipelineError::from_plugin("raw_validate", e));
            if ctx.mode.is_strict() {
                return PipelineResult::failed(Vec::new(), ctx.clone());
            }
        }

        // --- Detection + parse ---
        if let Some(failed) = cancelled(ctx, cancel, "parse") {
            return failed;
        }
        let parser_name = detect::parser_name(&raw, source.source_type);
        let servers = match self.parse(parser_name, &raw, ctx) {
            Ok(servers) => servers,
            Err(e) => {
                ctx.push_error(
                    PipelineError::from_plugin("parse", e).with("parser", parser_name),
                );
                if ctx.mode.is_strict() {
                    return PipelineResult::failed(Vec::new(), ctx.clone());
                }
                Vec::new()
            }
        };
        tracing::info!(
            trace_id = %ctx.trace_id,
            parser = parser_name,
            servers = servers.len(),
            "parsed subscription"
        );

        // --- Parsed validation ---
        if let Some(failed) = cancelled(ctx, cancel, "parsed_validate") {
            return failed;
        }
        let servers = match self.validate_parsed(servers, ctx) {
            Ok(servers) => servers,
            Err(result) => return result,
        };

        // --- Policy (profile filter rules) ---
        if let Some(failed) = cancelled(ctx, cancel, "policy") {
            return failed;
        }
        let servers = apply_policies(servers, ctx, profile);

        // --- Middleware ---
        if let Some(failed) = cancelled(ctx, cancel, "middleware") {
            return failed;
        }
        let servers = self.middleware.process(servers, ctx, profile);

        // --- Postprocessors ---
        if let Some(failed) = cancelled(ctx, cancel, "postprocess") {
            return failed;
        }
        let servers = self.postprocessors.process(servers, ctx, profile).await;

        // --- Selection ---
        if let Some(failed) = cancelled(ctx, cancel, "select") {
            return failed;
        }
        let exclusions = ctx.exclusions.clone();
        let servers = match selector::select(servers, &exclusions, ctx.mode) {
            Ok(servers) => servers,
            Err(e) => {
                ctx.push_error(PipelineError::from_plugin("select", e));
                return PipelineResult::failed(Vec::new(), ctx.clone());
            }
        };

        let result = PipelineResult::ok(servers, ctx.clone());
        self.cache.insert(cache_key, result.clone());
        result
    }

    async fn fetch(
        &self,
        source: &SubscriptionSource,
        ctx: &PipelineContext,
    ) -> Result<Vec<u8>, PluginError> {
        let name = if source.url.starts_with("http://") || source.url.starts_with("https://") {
            "http"
        } else {
            "file"
        };
        let ctor = self
            .registry
            .fetcher(name)
            .ok_or_else(|| PluginError::internal(format!("fetcher '{name}' is not registered")))?;
        let fetcher = ctor(&Value::Null)?;

        if ctx.debug_level >= 1 {
            let ua = match source.user_agent.as_deref() {
                None => "(default)",
                Some("") => "(suppressed)",
                Some(ua) => ua,
            };
            tracing::debug!(trace_id = %ctx.trace_id, fetcher = name, user_agent = ua, "fetching");
        }

        tokio::time::timeout(self.fetch_timeout, fetcher.fetch(source))
            .await
            .map_err(|_| {
                PluginError::timeout(format!(
                    "fetch of {} exceeded {:?}",
                    source.url, self.fetch_timeout
                ))
            })?
    }

    fn parse(
        &self,
        parser_name: &str,
        raw: &[u8],
        ctx: &mut PipelineContext,
    ) -> Result<Vec<ParsedServer>, PluginError> {
        let ctor = self.registry.parser(parser_name).ok_or_else(|| {
            PluginError::internal(format!("parser '{parser_name}' is not registered"))
        })?;
        ctor(&Value::Null)?.parse(raw, ctx)
    }

    fn validate_raw(&self, raw: &[u8], ctx: &PipelineContext) -> Result<(), PluginError> {
        let ctor = self.registry.raw_validator(&self.raw_validator).ok_or_else(|| {
            PluginError::internal(format!(
                "raw validator '{}' is not registered",
                self.raw_validator
            ))
        })?;
        ctor(&Value::Null)?.validate(raw, ctx)
    }

    /// Mode policy: tolerant keeps the validator's surviving set; strict
    /// preserves the full parsed list for downstream inspection and is
    /// fatal only when nothing at all validated.
    fn validate_parsed(
        &self,
        servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
    ) -> Result<Vec<ParsedServer>, ServersResult> {
        let ctor = match self.registry.parsed_validator(&self.parsed_validator) {
            Some(ctor) => ctor,
            None => {
                ctx.push_error(PipelineError::new(
                    ErrorKind::Internal,
                    "parsed_validate",
                    format!("parsed validator '{}' is not registered", self.parsed_validator),
                ));
                return Err(PipelineResult::failed(Vec::new(), ctx.clone()));
            }
        };
        let validator = match ctor(&Value::Null) {
            Ok(v) => v,
            Err(e) => {
                ctx.push_error(PipelineError::from_plugin("parsed_validate", e));
                return Err(PipelineResult::failed(Vec::new(), ctx.clone()));
            }
        };

        let had_servers = !servers.is_empty();
        let report = validator.validate(servers.clone(), ctx);
        for message in &report.errors {
            ctx.push_error(PipelineError::new(
                ErrorKind::ParsedValidate,
                "parsed_validate",
                message.clone(),
            ));
        }

        if ctx.mode.is_strict() {
            if had_servers && report.valid_servers.is_empty() {
                return Err(PipelineResult::failed(Vec::new(), ctx.clone()));
            }
            Ok(servers)
        } else {
            Ok(report.valid_servers)
        }
    }
}

/// Policy stage: apply the profile's filter rules (tag include/exclude
/// lists and address exclusions) before transformation begins.
fn apply_policies(
    servers: Vec<ParsedServer>,
    ctx: &mut PipelineContext,
    profile: Option<&FullProfile>,
) -> Vec<ParsedServer> {
    let Some(filters) = profile.map(|p| &p.filters) else {
        return servers;
    };
    if filters.exclude_tags.is_empty()
        && filters.only_tags.is_empty()
        && filters.exclusions.is_empty()
    {
        return servers;
    }

    let original = servers.len();
    let mut kept = selector::apply_exclusions(servers, &filters.exclusions);
    kept.retain(|server| {
        let tag = server
            .tag
            .as_deref()
            .or_else(|| server.meta_str("name"))
            .unwrap_or("");
        if filters.exclude_tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            return false;
        }
        if !filters.only_tags.is_empty() {
            return filters.only_tags.iter().any(|t| t.eq_ignore_ascii_case(tag));
        }
        true
    });

    ctx.set_stage_meta(
        "policy",
        json!({"original_count": original, "filtered_count": kept.len()}),
    );
    kept
}

fn cancelled(
    ctx: &mut PipelineContext,
    cancel: &CancellationToken,
    stage: &str,
) -> Option<ServersResult> {
    if !cancel.is_cancelled() {
        return None;
    }
    tracing::info!(trace_id = %ctx.trace_id, stage, "pipeline run cancelled");
    ctx.push_error(PipelineError::new(
        ErrorKind::Internal,
        stage,
        "run cancelled before stage",
    ));
    Some(PipelineResult::failed(Vec::new(), ctx.clone()))
}
