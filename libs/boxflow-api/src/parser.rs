use crate::error::PluginError;
use crate::model::{ParsedServer, PipelineContext};

/// Decode raw subscription bytes into a server list.
///
/// Mode contract: in tolerant mode a parser never fails on a malformed
/// individual entry — it records a `parse` error on the context and keeps
/// going. In strict mode the first malformed entry aborts the whole parse.
pub trait Parser: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse(
        &self,
        raw: &[u8],
        ctx: &mut PipelineContext,
    ) -> Result<Vec<ParsedServer>, PluginError>;
}
