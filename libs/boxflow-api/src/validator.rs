use crate::error::PluginError;
use crate::model::{ParsedServer, PipelineContext};

/// Pre-parse sanity check over the raw bytes.
pub trait RawValidator: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, raw: &[u8], ctx: &PipelineContext) -> Result<(), PluginError>;
}

/// Outcome of a parsed-tier validation pass.
///
/// `valid_servers` is the surviving set: servers failing only
/// protocol-specific checks are kept in tolerant mode (marked with
/// `meta["validation_errors"]`), servers failing the basic
/// type/address/port checks are always excluded from it.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub valid_servers: Vec<ParsedServer>,
}

/// Post-parse invariant check over the decoded server list.
pub trait ParsedValidator: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, servers: Vec<ParsedServer>, ctx: &PipelineContext) -> ValidationReport;
}
