//! Parsed-tier validator: basic field checks plus per-protocol
//! required-fields rules.
//!
//! Servers failing the basic type/address/port checks are always dropped
//! from `valid_servers`. Servers failing only protocol-specific rules are
//! dropped in strict mode's accounting but kept in tolerant mode with
//! `meta["validation_errors"]` recording what was wrong.

use serde_json::json;

use boxflow_api::error::PluginError;
use boxflow_api::model::{ParsedServer, PipelineContext};
use boxflow_api::validator::{ParsedValidator, ValidationReport};

pub const NAME: &str = "required_fields";

pub struct RequiredFieldsValidator;

impl ParsedValidator for RequiredFieldsValidator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn validate(&self, servers: Vec<ParsedServer>, ctx: &PipelineContext) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (idx, mut server) in servers.into_iter().enumerate() {
            if let Some(err) = basic_error(&server) {
                report
                    .errors
                    .push(format!("server[{idx}] ({}): {err}", display_type(&server)));
                continue;
            }

            let protocol_errors = protocol_errors(&server);
            if protocol_errors.is_empty() {
                report.valid_servers.push(server);
                continue;
            }

            report.errors.push(format!(
                "server[{idx}] ({}): {}",
                display_type(&server),
                protocol_errors.join("; ")
            ));
            if !ctx.mode.is_strict() {
                // Keep the server but mark it; downstream stages and the
                // exporter decide what to do with it.
                server.set_meta("validation_errors", json!(protocol_errors));
                report.valid_servers.push(server);
            }
        }

        report.valid = !report.valid_servers.is_empty();
        report
    }
}

fn display_type(server: &ParsedServer) -> &str {
    if server.protocol.is_empty() { "unknown" } else { &server.protocol }
}

fn basic_error(server: &ParsedServer) -> Option<String> {
    if server.protocol.is_empty() {
        return Some("missing type".to_string());
    }
    if server.address.is_empty() {
        return Some("missing address".to_string());
    }
    if server.port == 0 {
        return Some("invalid port: 0".to_string());
    }
    None
}

fn protocol_errors(server: &ParsedServer) -> Vec<String> {
    let mut errors = Vec::new();
    match server.protocol.as_str() {
        "ss" | "shadowsocks" => {
            if server.security.is_none() {
                errors.push("missing encryption method".to_string());
            }
            if server.password.is_none() {
                errors.push("missing password".to_string());
            }
        }
        "vmess" | "vless" => {
            if server.uuid.is_none() {
                errors.push("missing UUID".to_string());
            }
        }
        "trojan" | "hysteria2" => {
            if server.password.is_none() {
                errors.push("missing password".to_string());
            }
        }
        "tuic" => {
            if server.uuid.is_none() {
                errors.push("missing UUID".to_string());
            }
            if server.password.is_none() {
                errors.push("missing password".to_string());
            }
        }
        "wireguard" => {
            if server.private_key.is_none() {
                errors.push("missing private key".to_string());
            }
            if server.peer_public_key.is_none() {
                errors.push("missing peer public key".to_string());
            }
            if server.local_address.as_ref().is_none_or(Vec::is_empty) {
                errors.push("missing local addresses".to_string());
            }
        }
        "shadowtls" => {
            if server.password.is_none() {
                errors.push("missing password".to_string());
            }
            if server.version.is_none() {
                errors.push("missing version".to_string());
            }
        }
        "ssh" => {
            if server.username.is_none() {
                errors.push("missing username".to_string());
            }
        }
        // anytls needs a uuid; tor has no extra requirements.
        "anytls" => {
            if server.uuid.is_none() {
                errors.push("missing UUID".to_string());
            }
        }
        _ => {}
    }
    errors
}

pub fn create(_config: &serde_json::Value) -> Result<Box<dyn ParsedValidator>, PluginError> {
    Ok(Box::new(RequiredFieldsValidator))
}
