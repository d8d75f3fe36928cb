use serde_json::{Map, Value};

use crate::error::PluginError;
use crate::model::{ParsedServer, PipelineContext};
use crate::profile::FullProfile;

/// Ordered transformation over the server list, applied between parsing
/// and postprocessing.
///
/// Execution contract: middleware must be safe to retry; a failing stage
/// is recorded as a `middleware` error and the chain continues with the
/// stage's input unchanged.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    fn pre_process(
        &self,
        _servers: &[ParsedServer],
        _ctx: &mut PipelineContext,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    fn process(
        &self,
        servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
        profile: Option<&FullProfile>,
    ) -> Result<Vec<ParsedServer>, PluginError>;

    fn post_process(
        &self,
        _servers: &[ParsedServer],
        _ctx: &mut PipelineContext,
    ) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Merge a middleware's constructor config with its profile-carried config.
///
/// Profile values (`profile.metadata[<name>]`) win key-by-key over the
/// constructor config; this is how a profile reshapes behavior without
/// code changes.
pub fn effective_config(base: &Value, profile: Option<&FullProfile>, name: &str) -> Value {
    let mut merged = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Some(Value::Object(overrides)) = profile.and_then(|p| p.plugin_config(name)) {
        for (k, v) in overrides {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn profile_config_wins_over_constructor_config() {
        let mut profile = FullProfile::new("p");
        profile
            .metadata
            .insert("tag_filter".into(), json!({"case_sensitive": true}));

        let base = json!({"case_sensitive": false, "require_tags": true});
        let merged = effective_config(&base, Some(&profile), "tag_filter");
        assert_eq!(merged["case_sensitive"], json!(true));
        assert_eq!(merged["require_tags"], json!(true));
    }

    #[test]
    fn missing_profile_keeps_base() {
        let base = json!({"enabled": true});
        let merged = effective_config(&base, None, "enrich");
        assert_eq!(merged, base);
    }
}
