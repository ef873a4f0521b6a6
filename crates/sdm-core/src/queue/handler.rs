//! Download-type polymorphism.
//!
//! Handlers are a narrow capability: claim a URL, execute a task. The HTTP
//! coordinator is the default variant; other protocol executors plug in
//! behind the same trait without the queue knowing their details.

use std::sync::Arc;

use crate::control::CancelToken;
use crate::downloader::{Coordinator, DownloadInfo, DownloadRequest, ProgressObserver};

use super::task::QueueTask;

pub trait DownloadHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this handler claims the URL.
    fn detect(&self, url: &str) -> bool;

    /// Run the download to a terminal outcome, reporting progress through the
    /// observer and honoring the cancel token.
    fn execute(
        &self,
        task: &QueueTask,
        observer: &dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> DownloadInfo;
}

/// Default handler: plain HTTP(S) via the multi-connection coordinator.
pub struct HttpDownloadHandler {
    coordinator: Coordinator,
}

impl HttpDownloadHandler {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }
}

impl DownloadHandler for HttpDownloadHandler {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&self, url: &str) -> bool {
        let lower = url.trim_start().to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    fn execute(
        &self,
        task: &QueueTask,
        observer: &dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> DownloadInfo {
        let request = DownloadRequest {
            url: task.url.clone(),
            destination: task.destination.clone().into(),
            expected_sha256: task
                .type_options
                .get("expected_sha256")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        };
        self.coordinator
            .download(&request, cancel, None, Some(observer))
    }
}

/// First-match handler lookup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn DownloadHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn DownloadHandler>) {
        self.handlers.push(handler);
    }

    pub fn find(&self, url: &str) -> Option<Arc<dyn DownloadHandler>> {
        self.handlers.iter().find(|h| h.detect(url)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::CoordinatorConfig;
    use crate::limiter::LimiterChain;

    #[test]
    fn http_handler_claims_http_and_https_only() {
        let h = HttpDownloadHandler::new(Coordinator::new(
            CoordinatorConfig::default(),
            LimiterChain::unlimited(),
        ));
        assert!(h.detect("http://example.com/f"));
        assert!(h.detect("HTTPS://example.com/f"));
        assert!(!h.detect("ftp://example.com/f"));
        assert!(!h.detect("magnet:?xt=urn"));
    }

    #[test]
    fn registry_returns_first_match() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(HttpDownloadHandler::new(Coordinator::new(
            CoordinatorConfig::default(),
            LimiterChain::unlimited(),
        ))));
        assert!(registry.find("https://example.com/x").is_some());
        assert!(registry.find("sftp://example.com/x").is_none());
    }
}
