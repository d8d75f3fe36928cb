use serde_json::Value;

use crate::error::PluginError;
use crate::exporter::ExportOptions;
use crate::model::{ParsedServer, PipelineContext};

/// Route block produced by a routing plugin and consumed by exporters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RouteRules {
    pub rules: Vec<Value>,
    /// Tag the route's `final` should point at; exporters fall back to the
    /// auto selector when absent.
    #[serde(rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_tag: Option<String>,
}

/// Produce the `route` rules for the emitted config.
pub trait RoutingPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate_routes(
        &self,
        servers: &[ParsedServer],
        exclusions: &[String],
        user_routes: &[Value],
        ctx: &PipelineContext,
        opts: &ExportOptions,
    ) -> Result<RouteRules, PluginError>;
}
