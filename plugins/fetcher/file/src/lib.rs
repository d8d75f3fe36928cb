//! File fetcher for local subscription sources (`file://` URLs or plain
//! paths).

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use boxflow_api::error::PluginError;
use boxflow_api::fetcher::Fetcher;
use boxflow_api::model::SubscriptionSource;
use boxflow_api::trace;

pub const NAME: &str = "file";

pub struct FileFetcher;

fn source_path(url: &str) -> &Path {
    Path::new(url.strip_prefix("file://").unwrap_or(url))
}

impl Fetcher for FileFetcher {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports(&self, source: &SubscriptionSource) -> bool {
        source.url.starts_with("file://")
            || !(source.url.starts_with("http://") || source.url.starts_with("https://"))
    }

    fn fetch<'a>(
        &'a self,
        source: &'a SubscriptionSource,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let path = source_path(&source.url);
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| PluginError::fetch(format!("read of {} failed: {e}", path.display())))?;
            tracing::debug!(
                trace_id = %trace::get_trace_id(),
                path = %path.display(),
                bytes = data.len(),
                "read subscription file"
            );
            Ok(data)
        })
    }
}

pub fn create(_config: &serde_json::Value) -> Result<Box<dyn Fetcher>, PluginError> {
    Ok(Box::new(FileFetcher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxflow_api::model::SourceType;
    use std::io::Write;

    #[tokio::test]
    async fn reads_plain_path_and_file_url() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"ss://dummy\n").unwrap();
        let path = tmp.path().to_str().unwrap().to_string();

        let fetcher = create(&serde_json::Value::Null).unwrap();
        let plain = SubscriptionSource::new(&path, SourceType::UriList);
        assert_eq!(fetcher.fetch(&plain).await.unwrap(), b"ss://dummy\n");

        let url = SubscriptionSource::new(format!("file://{path}"), SourceType::UriList);
        assert_eq!(fetcher.fetch(&url).await.unwrap(), b"ss://dummy\n");
    }

    #[tokio::test]
    async fn missing_file_is_fetch_error() {
        let fetcher = create(&serde_json::Value::Null).unwrap();
        let source = SubscriptionSource::new("/no/such/subscription.txt", SourceType::UriList);
        let err = fetcher.fetch(&source).await.unwrap_err();
        assert_eq!(err.kind(), boxflow_api::error::ErrorKind::Fetch);
    }

    #[test]
    fn supports_everything_but_http() {
        let fetcher = create(&serde_json::Value::Null).unwrap();
        assert!(fetcher.supports(&SubscriptionSource::new("file:///tmp/x", SourceType::Auto)));
        assert!(fetcher.supports(&SubscriptionSource::new("/tmp/x", SourceType::Auto)));
        assert!(!fetcher.supports(&SubscriptionSource::new("https://x", SourceType::Auto)));
    }
}
