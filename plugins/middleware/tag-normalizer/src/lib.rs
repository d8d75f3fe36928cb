//! Tag normalization middleware.
//!
//! Derives a human-readable tag per server by priority:
//! `meta.name` → `meta.label` → `meta.tag` → existing tag →
//! `<type>-<address>` → `<type>-<stable-id>`, then sanitizes and enforces
//! uniqueness across the list with ` (2)`, ` (3)`, ... suffixes.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use boxflow_api::error::PluginError;
use boxflow_api::middleware::Middleware;
use boxflow_api::model::{ParsedServer, PipelineContext, short_hash};
use boxflow_api::profile::FullProfile;

pub const NAME: &str = "tag_normalizer";

pub const FALLBACK_TAG: &str = "unnamed-server";

fn control_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\x00-\x1f\x7f]").expect("static regex"))
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

pub struct TagNormalizer;

impl TagNormalizer {
    /// Strip control characters, collapse whitespace, never return empty.
    pub fn sanitize(tag: &str) -> String {
        let cleaned = control_chars().replace_all(tag, "");
        let collapsed = whitespace_runs().replace_all(&cleaned, " ");
        let trimmed = collapsed.trim();
        if trimmed.is_empty() {
            FALLBACK_TAG.to_string()
        } else {
            trimmed.to_string()
        }
    }

    fn derive_tag(server: &ParsedServer) -> String {
        for key in ["name", "label", "tag"] {
            if let Some(value) = server.meta_str(key)
                && !value.trim().is_empty()
            {
                return Self::sanitize(value);
            }
        }
        if let Some(tag) = server.tag.as_deref()
            && !tag.trim().is_empty()
        {
            return Self::sanitize(tag);
        }
        if !server.address.is_empty() {
            return format!("{}-{}", server.protocol, server.address);
        }
        format!("{}-{}", server.protocol, short_hash(&server.endpoint()))
    }

    fn unique(tag: String, used: &mut HashSet<String>) -> String {
        if used.insert(tag.clone()) {
            return tag;
        }
        let mut counter = 2;
        loop {
            let candidate = format!("{tag} ({counter})");
            if used.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

impl Middleware for TagNormalizer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn process(
        &self,
        mut servers: Vec<ParsedServer>,
        ctx: &mut PipelineContext,
        _profile: Option<&FullProfile>,
    ) -> Result<Vec<ParsedServer>, PluginError> {
        let mut used = HashSet::new();
        let mut renamed = 0usize;

        for server in &mut servers {
            let original = server.tag.clone();
            let tag = Self::unique(Self::derive_tag(server), &mut used);
            if original.as_deref() != Some(tag.as_str()) {
                renamed += 1;
            }
            server.tag = Some(tag);
        }

        if ctx.debug_level >= 1 {
            tracing::debug!(
                trace_id = %ctx.trace_id,
                servers = servers.len(),
                renamed,
                "normalized server tags"
            );
        }
        Ok(servers)
    }
}

pub fn create(_config: &serde_json::Value) -> Result<Box<dyn Middleware>, PluginError> {
    Ok(Box::new(TagNormalizer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(servers: Vec<ParsedServer>) -> Vec<ParsedServer> {
        let mut ctx = PipelineContext::new();
        TagNormalizer.process(servers, &mut ctx, None).unwrap()
    }

    #[test]
    fn priority_meta_name_wins() {
        let mut server = ParsedServer::new("vless", "a.example.com", 443);
        server.tag = Some("existing".into());
        server.set_meta("name", "Fancy Name");
        server.set_meta("tag", "explicit");
        let out = run(vec![server]);
        assert_eq!(out[0].tag.as_deref(), Some("Fancy Name"));
    }

    #[test]
    fn address_fallback_when_unnamed() {
        let server = ParsedServer::new("trojan", "t.example.com", 443);
        let out = run(vec![server]);
        assert_eq!(out[0].tag.as_deref(), Some("trojan-t.example.com"));
    }

    #[test]
    fn sanitize_strips_control_and_collapses_whitespace() {
        assert_eq!(TagNormalizer::sanitize("a\x00b\x1f  c\td"), "ab c d");
        assert_eq!(TagNormalizer::sanitize("  \x07 "), FALLBACK_TAG);
        // Printable unicode passes through.
        assert_eq!(TagNormalizer::sanitize("🇩🇪 Berlin 1"), "🇩🇪 Berlin 1");
    }

    #[test]
    fn collisions_get_numeric_suffixes() {
        let mk = |addr: &str| {
            let mut s = ParsedServer::new("ss", addr, 443);
            s.set_meta("name", "node");
            s
        };
        let out = run(vec![mk("a"), mk("b"), mk("c")]);
        let tags: Vec<_> = out.iter().map(|s| s.tag.as_deref().unwrap()).collect();
        assert_eq!(tags, vec!["node", "node (2)", "node (3)"]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let mk = |addr: &str| {
            let mut s = ParsedServer::new("ss", addr, 443);
            s.set_meta("name", "dup");
            s
        };
        let once = run(vec![mk("a"), mk("b")]);
        // Second pass sees meta.name "dup" again for both, so it must
        // reproduce the exact same assignment order and suffixes.
        let twice = run(once.clone());
        assert_eq!(
            once.iter().map(|s| &s.tag).collect::<Vec<_>>(),
            twice.iter().map(|s| &s.tag).collect::<Vec<_>>()
        );
    }

    #[test]
    fn emitted_tags_are_unique() {
        let mut a = ParsedServer::new("ss", "x", 1);
        a.set_meta("name", json!("n"));
        let mut b = ParsedServer::new("vmess", "y", 2);
        b.set_meta("name", json!("n"));
        let out = run(vec![a, b]);
        let mut tags: Vec<_> = out.iter().map(|s| s.tag.clone().unwrap()).collect();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), 2);
    }
}
