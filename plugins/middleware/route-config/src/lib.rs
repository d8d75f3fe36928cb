//! Routing-hint middleware.
//!
//! Collects routing overrides (notably `final`) from the profile and the
//! constructor config into `context.metadata["routing"]`, where the
//! routing plugin and exporter read them.
//!
//! Override modes:
//! - `profile_overrides`: profile routing wins key-by-key over config;
//! - `config_overrides`: constructor config wins;
//! - `merge`: union, profile winning ties (same as profile_overrides but
//!   documented intent is symmetric merge of disjoint keys).

use serde_json::{Map, Value, json};

use boxflow_api::error::PluginError;
use boxflow_api::middleware::Middleware;
use boxflow_api::model::{ParsedServer, PipelineContext};
use boxflow_api::profile::FullProfile;

pub const NAME: &str = "route_config";

#[derive(serde::Deserialize)]
#[serde(default)]
struct RouteConfigSettings {
    mode: OverrideMode,
    routes: Map<String, Value>,
}

impl Default for RouteConfigSettings {
    fn default() -> Self {
        Self { mode: OverrideMode::ProfileOverrides, routes: Map::new() }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
enum OverrideMode {
    ProfileOverrides,
    ConfigOverrides,
    Merge,
}

pub struct RouteConfigMiddleware {
    settings: RouteConfigSettings,
}

fn profile_routing(profile: Option<&FullProfile>) -> Map<String, Value> {
    let mut routing = Map::new();
    if let Some(profile) = profile {
        routing.insert("default_route".into(), json!(profile.routing.default_route));
        if !profile.routing.by_source.is_empty() {
            routing.insert("by_source".into(), json!(profile.routing.by_source));
        }
        if !profile.routing.custom_routes.is_empty() {
            routing.insert("custom_routes".into(), json!(profile.routing.custom_routes));
        }
        if let Some(client) = profile.client_profile() {
            for (k, v) in &client.routing {
                routing.insert(k.clone(), v.clone());
            }
        }
    }
    routing
}

impl Middleware for RouteConfigMiddleware {
    fn name(&self) -> &'static str {
        NAME
    }

    fn process(
        &self,
        servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
        profile: Option<&FullProfile>,
    ) -> Result<Vec<ParsedServer>, PluginError> {
        let from_profile = profile_routing(profile);
        let from_config = self.settings.routes.clone();

        let mut routing = match self.settings.mode {
            OverrideMode::ProfileOverrides | OverrideMode::Merge => {
                let mut base = from_config;
                base.extend(from_profile);
                base
            }
            OverrideMode::ConfigOverrides => {
                let mut base = from_profile;
                base.extend(from_config);
                base
            }
        };

        // Preserve hints earlier stages may already have written.
        if let Some(Value::Object(existing)) = ctx.metadata.get("routing") {
            for (k, v) in existing {
                routing.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        if !routing.is_empty() {
            tracing::debug!(
                trace_id = %ctx.trace_id,
                keys = routing.len(),
                "collected routing hints"
            );
            ctx.set_stage_meta("routing", Value::Object(routing));
        }
        Ok(servers)
    }
}

pub fn create(config: &Value) -> Result<Box<dyn Middleware>, PluginError> {
    let settings: RouteConfigSettings = if config.is_null() {
        RouteConfigSettings::default()
    } else {
        serde_json::from_value(config.clone())
            .map_err(|e| PluginError::internal(format!("route config: {e}")))?
    };
    Ok(Box::new(RouteConfigMiddleware { settings }))
}
