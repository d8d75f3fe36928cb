use std::future::Future;
use std::pin::Pin;

use crate::error::PluginError;
use crate::model::{ParsedServer, PipelineContext};
use crate::profile::FullProfile;

/// Filtering / sorting / measurement stage applied after middleware.
///
/// Same shape as middleware but async — latency measurement and similar
/// backends suspend at their I/O boundaries.
pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap applicability check the chain consults before running a step.
    fn can_process(&self, servers: &[ParsedServer], _ctx: &PipelineContext) -> bool {
        !servers.is_empty()
    }

    fn process<'a>(
        &'a self,
        servers: Vec<ParsedServer>,
        ctx: &'a mut PipelineContext,
        profile: Option<&'a FullProfile>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ParsedServer>, PluginError>> + Send + 'a>>;
}
