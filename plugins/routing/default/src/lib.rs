//! Default route-rule emitter.
//!
//! Modern dialect (sing-box >= 1.11.0): `action`-based rule objects and a
//! `final` pointing at the auto selector; no special outbounds are
//! referenced. Legacy dialect: rules reference the `direct`/`block`/
//! `dns-out` outbounds the exporter emits alongside.

use serde_json::{Value, json};

use boxflow_api::error::PluginError;
use boxflow_api::exporter::ExportOptions;
use boxflow_api::model::{ParsedServer, PipelineContext};
use boxflow_api::routing::{RouteRules, RoutingPlugin};

pub const NAME: &str = "default";

/// Tag of the synthetic selector the route's `final` points at.
pub const AUTO_TAG: &str = "auto";

pub struct DefaultRouter;

impl RoutingPlugin for DefaultRouter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn generate_routes(
        &self,
        _servers: &[ParsedServer],
        exclusions: &[String],
        user_routes: &[Value],
        ctx: &PipelineContext,
        opts: &ExportOptions,
    ) -> Result<RouteRules, PluginError> {
        if ctx.debug_level >= 2 {
            tracing::debug!(
                trace_id = %ctx.trace_id,
                exclusions = exclusions.len(),
                user_routes = user_routes.len(),
                legacy = opts.use_legacy(),
                "generating route rules"
            );
        }

        let mut rules = if opts.use_legacy() {
            vec![
                json!({"protocol": "dns", "outbound": "dns-out"}),
                json!({"ip_is_private": true, "outbound": "direct"}),
            ]
        } else {
            vec![
                json!({"protocol": "dns", "action": "hijack-dns"}),
                json!({"ip_is_private": true, "action": "direct"}),
            ]
        };
        rules.extend(user_routes.iter().cloned());

        // A route_config middleware may have left a `final` hint.
        let final_tag = ctx
            .stage_meta("routing")
            .and_then(|r| r.get("final"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(AUTO_TAG.to_string()));

        Ok(RouteRules { rules, final_tag })
    }
}

pub fn create(_config: &Value) -> Result<Box<dyn RoutingPlugin>, PluginError> {
    Ok(Box::new(DefaultRouter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modern_rules_use_actions() {
        let ctx = PipelineContext::new();
        let routes = DefaultRouter
            .generate_routes(&[], &[], &[], &ctx, &ExportOptions::default())
            .unwrap();
        assert_eq!(routes.final_tag.as_deref(), Some(AUTO_TAG));
        for rule in &routes.rules {
            assert!(rule.get("action").is_some());
            assert!(rule.get("outbound").is_none());
        }
    }

    #[test]
    fn legacy_rules_reference_outbounds() {
        let ctx = PipelineContext::new();
        let routes = DefaultRouter
            .generate_routes(&[], &[], &[], &ctx, &ExportOptions::for_version("1.10.0"))
            .unwrap();
        for rule in &routes.rules {
            assert!(rule.get("outbound").is_some());
            assert!(rule.get("action").is_none());
        }
        assert!(
            routes
                .rules
                .iter()
                .any(|r| r.get("outbound") == Some(&json!("dns-out")))
        );
    }

    #[test]
    fn routing_metadata_overrides_final() {
        let mut ctx = PipelineContext::new();
        ctx.set_stage_meta("routing", json!({"final": "block"}));
        let routes = DefaultRouter
            .generate_routes(&[], &[], &[], &ctx, &ExportOptions::default())
            .unwrap();
        assert_eq!(routes.final_tag.as_deref(), Some("block"));
    }

    #[test]
    fn user_routes_appended() {
        let ctx = PipelineContext::new();
        let user = vec![json!({"domain_suffix": [".internal"], "action": "direct"})];
        let routes = DefaultRouter
            .generate_routes(&[], &[], &user, &ctx, &ExportOptions::default())
            .unwrap();
        assert_eq!(routes.rules.len(), 3);
        assert_eq!(routes.rules[2], user[0]);
    }
}
