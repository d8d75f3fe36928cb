//! Tag-based filtering postprocessor.
//!
//! Exact include/exclude tag sets plus regex pattern lists, with a
//! case-sensitivity flag. Servers without tags fall through according to
//! `fallback_mode`; `require_tags` forces them out regardless.

use std::future::Future;
use std::pin::Pin;

use regex::RegexBuilder;
use serde_json::Value;

use boxflow_api::error::PluginError;
use boxflow_api::middleware::effective_config;
use boxflow_api::model::{ParsedServer, PipelineContext, PipelineError};
use boxflow_api::postprocessor::PostProcessor;
use boxflow_api::profile::FullProfile;

pub const NAME: &str = "tag_filter";

#[derive(Clone, Default, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
enum FallbackMode {
    #[default]
    Allow,
    Block,
}

#[derive(Clone, Default, serde::Deserialize)]
#[serde(default)]
struct TagFilterConfig {
    include_tags: Vec<String>,
    exclude_tags: Vec<String>,
    include_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
    case_sensitive: bool,
    require_tags: bool,
    fallback_mode: FallbackMode,
}

impl TagFilterConfig {
    fn is_empty(&self) -> bool {
        self.include_tags.is_empty()
            && self.exclude_tags.is_empty()
            && self.include_patterns.is_empty()
            && self.exclude_patterns.is_empty()
            && !self.require_tags
    }
}

struct CompiledFilter {
    cfg: TagFilterConfig,
    include: Vec<regex::Regex>,
    exclude: Vec<regex::Regex>,
}

impl CompiledFilter {
    fn compile(cfg: TagFilterConfig, ctx: &mut PipelineContext) -> Self {
        let compile_list = |patterns: &[String], ctx: &mut PipelineContext| {
            let mut out = Vec::new();
            for pattern in patterns {
                match RegexBuilder::new(pattern)
                    .case_insensitive(!cfg.case_sensitive)
                    .build()
                {
                    Ok(re) => out.push(re),
                    Err(e) => {
                        // Invalid patterns are skipped, recorded once.
                        ctx.push_error(
                            PipelineError::new(
                                boxflow_api::error::ErrorKind::Postprocessor,
                                NAME,
                                format!("invalid tag pattern {pattern:?}: {e}"),
                            ),
                        );
                    }
                }
            }
            out
        };
        let include = compile_list(&cfg.include_patterns, ctx);
        let exclude = compile_list(&cfg.exclude_patterns, ctx);
        Self { cfg, include, exclude }
    }

    fn tag_matches(&self, list: &[String], tag: &str) -> bool {
        if self.cfg.case_sensitive {
            list.iter().any(|t| t == tag)
        } else {
            list.iter().any(|t| t.eq_ignore_ascii_case(tag))
        }
    }

    fn should_include(&self, server: &ParsedServer) -> bool {
        let Some(tag) = server.tag.as_deref().filter(|t| !t.is_empty()) else {
            if self.cfg.require_tags {
                return false;
            }
            return self.cfg.fallback_mode == FallbackMode::Allow;
        };

        if self.tag_matches(&self.cfg.exclude_tags, tag)
            || self.exclude.iter().any(|re| re.is_match(tag))
        {
            return false;
        }

        let has_includes = !self.cfg.include_tags.is_empty() || !self.include.is_empty();
        if has_includes {
            return self.tag_matches(&self.cfg.include_tags, tag)
                || self.include.iter().any(|re| re.is_match(tag));
        }
        true
    }
}

pub struct TagFilterPostProcessor {
    config: Value,
}

impl PostProcessor for TagFilterPostProcessor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn process<'a>(
        &'a self,
        servers: Vec<ParsedServer>,
        ctx: &'a mut PipelineContext,
        profile: Option<&'a FullProfile>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ParsedServer>, PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let merged = effective_config(&self.config, profile, NAME);
            let cfg: TagFilterConfig = serde_json::from_value(merged).unwrap_or_default();
            if cfg.is_empty() {
                return Ok(servers);
            }

            let filter = CompiledFilter::compile(cfg, ctx);
            let total = servers.len();
            let kept: Vec<ParsedServer> = servers
                .into_iter()
                .filter(|s| filter.should_include(s))
                .collect();
            tracing::debug!(
                trace_id = %ctx.trace_id,
                total,
                kept = kept.len(),
                "tag filter applied"
            );
            Ok(kept)
        })
    }
}

pub fn create(config: &Value) -> Result<Box<dyn PostProcessor>, PluginError> {
    if !config.is_null() {
        serde_json::from_value::<TagFilterConfig>(config.clone())
            .map_err(|e| PluginError::internal(format!("tag filter config: {e}")))?;
    }
    Ok(Box::new(TagFilterPostProcessor {
        config: if config.is_null() { serde_json::json!({}) } else { config.clone() },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_tag(tag: &str) -> ParsedServer {
        let mut s = ParsedServer::new("ss", "x", 443);
        s.tag = Some(tag.into());
        s
    }

    #[tokio::test]
    async fn exact_exclude_case_insensitive_by_default() {
        let pp = create(&json!({"exclude_tags": ["blocked"]})).unwrap();
        let mut ctx = PipelineContext::new();
        let out = pp
            .process(vec![with_tag("Blocked"), with_tag("fast")], &mut ctx, None)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag.as_deref(), Some("fast"));
    }

    #[tokio::test]
    async fn include_patterns_whitelist() {
        let pp = create(&json!({"include_patterns": ["^US-", "-Premium$"]})).unwrap();
        let mut ctx = PipelineContext::new();
        let out = pp
            .process(
                vec![with_tag("US-East"), with_tag("DE-1"), with_tag("Tokyo-Premium")],
                &mut ctx,
                None,
            )
            .await
            .unwrap();
        let tags: Vec<_> = out.iter().map(|s| s.tag.as_deref().unwrap()).collect();
        assert_eq!(tags, vec!["US-East", "Tokyo-Premium"]);
    }

    #[tokio::test]
    async fn case_sensitive_flag() {
        let pp = create(&json!({
            "include_tags": ["Premium"],
            "case_sensitive": true
        }))
        .unwrap();
        let mut ctx = PipelineContext::new();
        let out = pp
            .process(vec![with_tag("premium"), with_tag("Premium")], &mut ctx, None)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag.as_deref(), Some("Premium"));
    }

    #[tokio::test]
    async fn untagged_servers_follow_fallback() {
        let untagged = ParsedServer::new("ss", "x", 443);

        let allow = create(&json!({"exclude_tags": ["z"]})).unwrap();
        let mut ctx = PipelineContext::new();
        assert_eq!(
            allow.process(vec![untagged.clone()], &mut ctx, None).await.unwrap().len(),
            1
        );

        let block = create(&json!({"exclude_tags": ["z"], "fallback_mode": "block"})).unwrap();
        assert!(
            block
                .process(vec![untagged.clone()], &mut ctx, None)
                .await
                .unwrap()
                .is_empty()
        );

        let require = create(&json!({"require_tags": true})).unwrap();
        assert!(
            require
                .process(vec![untagged], &mut ctx, None)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn invalid_pattern_recorded_not_fatal() {
        let pp = create(&json!({"exclude_patterns": ["[unclosed"]})).unwrap();
        let mut ctx = PipelineContext::new();
        let out = pp.process(vec![with_tag("a")], &mut ctx, None).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(ctx.errors().len(), 1);
    }
}
