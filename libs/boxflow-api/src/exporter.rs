use serde_json::Value;

use crate::error::PluginError;
use crate::model::{ParsedServer, PipelineContext};
use crate::profile::ClientProfile;
use crate::routing::RouteRules;

/// Threshold below which the legacy sing-box dialect (special
/// `direct`/`block`/`dns-out` outbounds, `outbound:`-referencing rules)
/// must be emitted.
pub const LEGACY_DIALECT_BELOW: (u64, u64, u64) = (1, 11, 0);

/// Target-version knobs for an export run. The emitter never probes a
/// binary: callers pass the version string, or skip the check and get the
/// modern dialect.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub version: Option<String>,
    pub skip_version_check: bool,
}

impl ExportOptions {
    pub fn for_version(version: impl Into<String>) -> Self {
        Self { version: Some(version.into()), skip_version_check: false }
    }

    /// Whether this export targets the legacy dialect.
    pub fn use_legacy(&self) -> bool {
        if self.skip_version_check {
            return false;
        }
        match self.version.as_deref().and_then(parse_version) {
            Some(v) => v < LEGACY_DIALECT_BELOW,
            // Unknown version: stay on the modern syntax.
            None => false,
        }
    }
}

/// Parse a `major.minor.patch` version triple, ignoring any pre-release
/// suffix after `-`.
pub fn parse_version(version: &str) -> Option<(u64, u64, u64)> {
    let core = version.trim().trim_start_matches('v');
    let core = core.split('-').next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor, patch))
}

/// Emit a complete client configuration document from the processed server
/// list, the generated route block, and an optional client profile.
pub trait Exporter: Send + Sync {
    fn name(&self) -> &'static str;

    fn export(
        &self,
        servers: &[ParsedServer],
        routes: &RouteRules,
        client_profile: Option<&ClientProfile>,
        opts: &ExportOptions,
        ctx: &mut PipelineContext,
    ) -> Result<Value, PluginError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("1.10.5"), Some((1, 10, 5)));
        assert_eq!(parse_version("v1.11.0"), Some((1, 11, 0)));
        assert_eq!(parse_version("1.12"), Some((1, 12, 0)));
        assert_eq!(parse_version("1.11.0-beta.1"), Some((1, 11, 0)));
        assert_eq!(parse_version("garbage"), None);
    }

    #[test]
    fn legacy_threshold() {
        assert!(ExportOptions::for_version("1.10.0").use_legacy());
        assert!(!ExportOptions::for_version("1.11.0").use_legacy());
        assert!(!ExportOptions::for_version("1.12.3").use_legacy());
        // Unknown or skipped version stays modern.
        assert!(!ExportOptions::default().use_legacy());
        assert!(
            !ExportOptions { version: Some("1.10.0".into()), skip_version_check: true }.use_legacy()
        );
    }
}
