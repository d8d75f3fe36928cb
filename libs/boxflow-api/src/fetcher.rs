use std::future::Future;
use std::pin::Pin;

use crate::error::PluginError;
use crate::model::SubscriptionSource;

/// Acquire raw subscription bytes from a source.
///
/// Implementations bound their own I/O: network fetchers must apply a
/// request timeout, file fetchers read local paths. An empty body is a
/// valid fetch result — rejecting it is the parser's call.
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this fetcher understands the source's URL scheme.
    fn supports(&self, source: &SubscriptionSource) -> bool;

    fn fetch<'a>(
        &'a self,
        source: &'a SubscriptionSource,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, PluginError>> + Send + 'a>>;
}
