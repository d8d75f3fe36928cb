//! Outbound-type filtering middleware.
//!
//! Drops servers whose protocol tag is excluded, merging the constructor
//! config with the profile-embedded `ClientProfile.exclude_outbounds`.
//! Records what was dropped under `context.metadata["outbound_filter"]`.

use std::collections::HashSet;

use serde_json::{Value, json};

use boxflow_api::error::PluginError;
use boxflow_api::middleware::{Middleware, effective_config};
use boxflow_api::model::{ParsedServer, PipelineContext};
use boxflow_api::profile::FullProfile;

pub const NAME: &str = "outbound_filter";

#[derive(Default, serde::Deserialize)]
#[serde(default)]
struct OutboundFilterConfig {
    exclude_outbounds: Vec<String>,
    strict_mode: bool,
}

pub struct OutboundFilter {
    config: Value,
}

/// `ss` and `shadowsocks` name the same protocol on the wire.
fn canonical(protocol: &str) -> &str {
    match protocol {
        "ss" => "shadowsocks",
        other => other,
    }
}

impl OutboundFilter {
    fn exclusions(&self, profile: Option<&FullProfile>) -> (HashSet<String>, bool) {
        let merged = effective_config(&self.config, profile, NAME);
        let cfg: OutboundFilterConfig = serde_json::from_value(merged).unwrap_or_default();

        let mut excluded: HashSet<String> = cfg
            .exclude_outbounds
            .iter()
            .map(|t| canonical(t).to_string())
            .collect();
        if let Some(client) = profile.and_then(|p| p.client_profile()) {
            excluded.extend(client.exclude_outbounds.iter().map(|t| canonical(t).to_string()));
        }
        (excluded, cfg.strict_mode)
    }
}

impl Middleware for OutboundFilter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn process(
        &self,
        servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
        profile: Option<&FullProfile>,
    ) -> Result<Vec<ParsedServer>, PluginError> {
        let (excluded_types, strict_mode) = self.exclusions(profile);
        if excluded_types.is_empty() || servers.is_empty() {
            return Ok(servers);
        }

        let original_count = servers.len();
        let mut kept = Vec::with_capacity(servers.len());
        let mut excluded = Vec::new();
        for server in servers {
            if excluded_types.contains(canonical(&server.protocol)) {
                excluded.push(json!({
                    "type": server.protocol,
                    "tag": server.tag,
                    "address": server.address,
                }));
            } else {
                kept.push(server);
            }
        }

        if strict_mode && kept.is_empty() {
            return Err(PluginError::middleware(format!(
                "all {original_count} servers were excluded by outbound filter ({:?})",
                excluded_types
            )));
        }

        ctx.set_stage_meta(
            NAME,
            json!({
                "excluded_types": excluded_types.iter().cloned().collect::<Vec<_>>(),
                "excluded_count": excluded.len(),
                "original_count": original_count,
                "filtered_count": kept.len(),
                "excluded_servers": excluded,
            }),
        );
        Ok(kept)
    }
}

pub fn create(config: &Value) -> Result<Box<dyn Middleware>, PluginError> {
    if !config.is_null() {
        // Validate the shape up front; lookups later reuse the raw value.
        serde_json::from_value::<OutboundFilterConfig>(config.clone())
            .map_err(|e| PluginError::internal(format!("outbound filter config: {e}")))?;
    }
    Ok(Box::new(OutboundFilter {
        config: if config.is_null() { json!({}) } else { config.clone() },
    }))
}
