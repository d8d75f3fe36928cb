//! Export manager: glue between the processed server list, the routing
//! plugin and the configured exporter.
//!
//! Auto-configures middleware from a `ClientProfile` — an outbound filter
//! when `exclude_outbounds` is non-empty, a route-config stage when
//! routing hints are present — unless the caller already supplied a stage
//! with that role. Middleware metadata stays on the context for
//! downstream inspection.

use std::sync::Arc;

use serde_json::{Value, json};

use boxflow_api::error::PluginError;
use boxflow_api::exporter::ExportOptions;
use boxflow_api::middleware::Middleware;
use boxflow_api::model::{ParsedServer, PipelineContext};
use boxflow_api::profile::{ClientProfile, FullProfile};
use boxflow_api::registry::Registry;

use crate::chain::run_middleware;
use crate::error::EngineError;
use crate::selector;

pub const DEFAULT_FORMAT: &str = "singbox";
pub const DEFAULT_ROUTING: &str = "default";

pub struct ExportManager {
    registry: Arc<Registry>,
    export_format: String,
    routing_plugin: String,
    client_profile: Option<ClientProfile>,
    options: ExportOptions,
    manual_middleware: Vec<Box<dyn Middleware>>,
}

impl ExportManager {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            export_format: DEFAULT_FORMAT.to_string(),
            routing_plugin: DEFAULT_ROUTING.to_string(),
            client_profile: None,
            options: ExportOptions::default(),
            manual_middleware: Vec::new(),
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.export_format = format.into();
        self
    }

    pub fn with_routing_plugin(mut self, name: impl Into<String>) -> Self {
        self.routing_plugin = name.into();
        self
    }

    pub fn with_client_profile(mut self, profile: ClientProfile) -> Self {
        self.client_profile = Some(profile);
        self
    }

    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }

    /// Caller-supplied middleware; wins over auto-configured stages with
    /// the same name.
    pub fn with_middleware(mut self, middleware: Box<dyn Middleware>) -> Self {
        self.manual_middleware.push(middleware);
        self
    }

    fn effective_client_profile(&self, profile: Option<&FullProfile>) -> Option<ClientProfile> {
        self.client_profile
            .clone()
            .or_else(|| profile.and_then(FullProfile::client_profile))
    }

    /// Build the auto-configured stages the client profile calls for,
    /// skipping roles the caller already covers.
    fn auto_middleware(
        &self,
        client_profile: Option<&ClientProfile>,
        profile: Option<&FullProfile>,
    ) -> Result<Vec<Box<dyn Middleware>>, EngineError> {
        let manual: Vec<&'static str> =
            self.manual_middleware.iter().map(|m| m.name()).collect();
        let mut auto: Vec<Box<dyn Middleware>> = Vec::new();

        let exclude = client_profile
            .map(|p| p.exclude_outbounds.clone())
            .unwrap_or_default();
        if !exclude.is_empty() && !manual.contains(&"outbound_filter") {
            let ctor = self
                .registry
                .middleware("outbound_filter")
                .ok_or_else(|| EngineError::unknown_plugin("middleware", "outbound_filter"))?;
            auto.push(ctor(&json!({"exclude_outbounds": exclude}))?);
        }

        let has_routing_hints = client_profile.map(|p| !p.routing.is_empty()).unwrap_or(false)
            || profile.is_some();
        if has_routing_hints && !manual.contains(&"route_config") {
            let ctor = self
                .registry
                .middleware("route_config")
                .ok_or_else(|| EngineError::unknown_plugin("middleware", "route_config"))?;
            auto.push(ctor(&Value::Null)?);
        }
        Ok(auto)
    }

    /// Export the server list into a client configuration document.
    pub fn export(
        &self,
        servers: &[ParsedServer],
        exclusions: &[String],
        user_routes: &[Value],
        ctx: &mut PipelineContext,
        profile: Option<&FullProfile>,
    ) -> Result<Value, EngineError> {
        let client_profile = self.effective_client_profile(profile);

        let filtered = selector::apply_exclusions(servers.to_vec(), exclusions);

        // Auto-configured stages run first; manual middleware runs after
        // and can observe or override what they wrote.
        let auto = self.auto_middleware(client_profile.as_ref(), profile)?;
        let stages = auto
            .iter()
            .map(|m| &**m)
            .chain(self.manual_middleware.iter().map(|m| &**m));
        let processed = run_middleware(stages, filtered, ctx, profile);

        let routing_ctor = self.registry.routing(&self.routing_plugin).ok_or_else(|| {
            EngineError::unknown_plugin("routing", self.routing_plugin.clone())
        })?;
        let routes = routing_ctor(&Value::Null)?
            .generate_routes(&processed, exclusions, user_routes, ctx, &self.options)
            .map_err(|e| EngineError::Plugin(e.with_context("routing")))?;

        let exporter_ctor = self.registry.exporter(&self.export_format).ok_or_else(|| {
            EngineError::unknown_plugin("exporter", self.export_format.clone())
        })?;
        let config = exporter_ctor(&Value::Null)?
            .export(&processed, &routes, client_profile.as_ref(), &self.options, ctx)
            .map_err(|e| EngineError::Plugin(e.with_context("export")))?;

        tracing::info!(
            trace_id = %ctx.trace_id,
            format = %self.export_format,
            servers = processed.len(),
            "exported configuration"
        );
        Ok(config)
    }
}

/// Convenience used by the coordinator's export path: run the export and
/// wrap the outcome as a `ConfigResult` (export failures are fatal — no
/// partial document is emitted).
pub fn export_result(
    manager: &ExportManager,
    servers: &[ParsedServer],
    ctx: &mut PipelineContext,
    profile: Option<&FullProfile>,
) -> boxflow_api::model::ConfigResult {
    use boxflow_api::model::{PipelineError, PipelineResult};

    let exclusions = ctx.exclusions.clone();
    let user_routes = ctx.user_routes.clone();
    match manager.export(servers, &exclusions, &user_routes, ctx, profile) {
        Ok(config) => PipelineResult::ok(config, ctx.clone()),
        Err(e) => {
            let plugin_err = match e {
                EngineError::Plugin(inner) => inner,
                other => PluginError::export(other.to_string()),
            };
            ctx.push_error(PipelineError::from_plugin("export", plugin_err));
            PipelineResult::failed(Value::Null, ctx.clone())
        }
    }
}
