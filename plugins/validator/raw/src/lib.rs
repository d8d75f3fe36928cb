//! Raw (pre-parse) validators.
//!
//! `noop` is the default; `basic` bounds the payload size and requires
//! UTF-8 — every supported subscription encoding is text.

use boxflow_api::error::PluginError;
use boxflow_api::model::PipelineContext;
use boxflow_api::validator::RawValidator;

pub const NOOP_NAME: &str = "noop";
pub const BASIC_NAME: &str = "basic";

const DEFAULT_MAX_SIZE: usize = 16 * 1024 * 1024;

pub struct NoopRawValidator;

impl RawValidator for NoopRawValidator {
    fn name(&self) -> &'static str {
        NOOP_NAME
    }

    fn validate(&self, _raw: &[u8], _ctx: &PipelineContext) -> Result<(), PluginError> {
        Ok(())
    }
}

#[derive(serde::Deserialize)]
#[serde(default)]
struct BasicConfig {
    max_size: usize,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self { max_size: DEFAULT_MAX_SIZE }
    }
}

pub struct BasicRawValidator {
    max_size: usize,
}

impl RawValidator for BasicRawValidator {
    fn name(&self) -> &'static str {
        BASIC_NAME
    }

    fn validate(&self, raw: &[u8], _ctx: &PipelineContext) -> Result<(), PluginError> {
        if raw.len() > self.max_size {
            return Err(PluginError::raw_validate(format!(
                "subscription payload too large: {} bytes (max {})",
                raw.len(),
                self.max_size
            )));
        }
        if std::str::from_utf8(raw).is_err() {
            return Err(PluginError::raw_validate("subscription payload is not UTF-8"));
        }
        Ok(())
    }
}

pub fn create_noop(_config: &serde_json::Value) -> Result<Box<dyn RawValidator>, PluginError> {
    Ok(Box::new(NoopRawValidator))
}

pub fn create_basic(config: &serde_json::Value) -> Result<Box<dyn RawValidator>, PluginError> {
    let cfg: BasicConfig = if config.is_null() {
        BasicConfig::default()
    } else {
        serde_json::from_value(config.clone())
            .map_err(|e| PluginError::internal(format!("basic raw validator config: {e}")))?
    };
    Ok(Box::new(BasicRawValidator { max_size: cfg.max_size }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn noop_accepts_anything() {
        let ctx = PipelineContext::new();
        assert!(NoopRawValidator.validate(&[0xff, 0xfe], &ctx).is_ok());
        assert!(NoopRawValidator.validate(b"", &ctx).is_ok());
    }

    #[test]
    fn basic_enforces_size_and_encoding() {
        let ctx = PipelineContext::new();
        let validator = BasicRawValidator { max_size: 8 };
        assert!(validator.validate(b"short", &ctx).is_ok());
        assert!(validator.validate(b"way too long payload", &ctx).is_err());
        assert!(validator.validate(&[0xff, 0xfe], &ctx).is_err());
    }

    #[test]
    fn empty_payload_passes_through() {
        // Empty bodies are the parser's call, not a raw-validation failure.
        let ctx = PipelineContext::new();
        let validator = create_basic(&json!({})).unwrap();
        assert!(validator.validate(b"", &ctx).is_ok());
    }
}
