//! Final selection stage: user exclusions over the processed set.
//!
//! Order established by the postprocessors is preserved. An empty final
//! set is an error in strict mode and an empty success in tolerant mode.

use boxflow_api::error::PluginError;
use boxflow_api::model::{ParsedServer, PipelineMode};

/// Remove servers whose address (or `address:port`) matches an exclusion
/// entry. Matching is exact, never substring.
pub fn apply_exclusions(servers: Vec<ParsedServer>, exclusions: &[String]) -> Vec<ParsedServer> {
    if exclusions.is_empty() {
        return servers;
    }
    servers
        .into_iter()
        .filter(|s| {
            let endpoint = format!("{}:{}", s.address, s.port);
            !exclusions.iter().any(|e| e == &s.address || e == &endpoint)
        })
        .collect()
}

pub fn select(
    servers: Vec<ParsedServer>,
    exclusions: &[String],
    mode: PipelineMode,
) -> Result<Vec<ParsedServer>, PluginError> {
    let had_input = !servers.is_empty();
    let selected = apply_exclusions(servers, exclusions);
    if mode.is_strict() && selected.is_empty() && had_input {
        return Err(PluginError::internal(
            "no servers remain after applying exclusions",
        ));
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers() -> Vec<ParsedServer> {
        vec![
            ParsedServer::new("ss", "a.example.com", 443),
            ParsedServer::new("ss", "b.example.com", 443),
            ParsedServer::new("ss", "b.example.com", 8388),
        ]
    }

    #[test]
    fn address_exclusion_removes_all_ports() {
        let out = apply_exclusions(servers(), &["b.example.com".to_string()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].address, "a.example.com");
    }

    #[test]
    fn endpoint_exclusion_is_port_specific() {
        let out = apply_exclusions(servers(), &["b.example.com:8388".to_string()]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn order_is_preserved() {
        let out = apply_exclusions(servers(), &["a.example.com".to_string()]);
        assert_eq!(out[0].port, 443);
        assert_eq!(out[1].port, 8388);
    }

    #[test]
    fn strict_empty_after_exclusion_errors() {
        let all: Vec<String> = vec!["a.example.com".into(), "b.example.com".into()];
        assert!(select(servers(), &all, PipelineMode::Strict).is_err());
        assert!(select(servers(), &all, PipelineMode::Tolerant).unwrap().is_empty());
    }

    #[test]
    fn strict_empty_input_is_fine() {
        // Emptiness caused upstream is not the selector's error.
        assert!(select(Vec::new(), &[], PipelineMode::Strict).unwrap().is_empty());
    }
}
