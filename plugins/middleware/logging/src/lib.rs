//! Logging middleware — pure observer, never alters the server list.

use std::collections::BTreeMap;

use boxflow_api::error::PluginError;
use boxflow_api::middleware::Middleware;
use boxflow_api::model::{ParsedServer, PipelineContext};
use boxflow_api::profile::FullProfile;

pub const NAME: &str = "logging";

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        NAME
    }

    fn process(
        &self,
        servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
        _profile: Option<&FullProfile>,
    ) -> Result<Vec<ParsedServer>, PluginError> {
        let mut by_protocol: BTreeMap<&str, usize> = BTreeMap::new();
        for server in &servers {
            *by_protocol.entry(server.protocol.as_str()).or_default() += 1;
        }

        tracing::info!(
            trace_id = %ctx.trace_id,
            source = ctx.source.as_deref().unwrap_or("-"),
            servers = servers.len(),
            "middleware chain snapshot"
        );
        if ctx.debug_level >= 1 {
            for (protocol, count) in &by_protocol {
                tracing::debug!(trace_id = %ctx.trace_id, protocol, count, "protocol distribution");
            }
        }
        if ctx.debug_level >= 2 {
            for server in &servers {
                tracing::trace!(
                    trace_id = %ctx.trace_id,
                    protocol = %server.protocol,
                    address = %server.address,
                    port = server.port,
                    tag = server.tag.as_deref().unwrap_or("-"),
                    "server"
                );
            }
        }
        Ok(servers)
    }
}

pub fn create(_config: &serde_json::Value) -> Result<Box<dyn Middleware>, PluginError> {
    Ok(Box::new(LoggingMiddleware))
}
