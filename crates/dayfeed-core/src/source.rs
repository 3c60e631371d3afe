//! Remote content source.
//!
//! The engine only sees the [`ContentSource`] trait; `HttpContentSource`
//! is the production implementation talking to the content API.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SourceError;

/// HTTP request timeout in seconds.
/// The sync layer applies its own, usually shorter, timeout on top.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Content item as returned by the remote source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteContent {
    #[serde(rename = "contentId")]
    pub content_id: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub revision: Option<String>,
}

/// Read endpoint returning today's content for a date key (`YYYY-MM-DD`).
///
/// Returns a boxed future so implementations can be used as trait objects.
pub trait ContentSource: Send + Sync {
    fn fetch<'a>(&'a self, date_key: &'a str) -> BoxFuture<'a, Result<RemoteContent, SourceError>>;

    fn name(&self) -> &'static str;
}

/// HTTP content source.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpContentSource {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpContentSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(SourceError::from)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn today_url(&self) -> String {
        format!("{}/content/today", self.base_url)
    }

    async fn get_today(&self, date_key: &str) -> Result<RemoteContent, SourceError> {
        let mut request = self
            .client
            .get(self.today_url())
            .query(&[("date", date_key)])
            .header(header::ACCEPT, "application/json");
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(status.as_u16(), &body));
        }

        let content: RemoteContent = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
        debug!(content_id = %content.content_id, date = date_key, "Content fetched");
        Ok(content)
    }
}

impl ContentSource for HttpContentSource {
    fn fetch<'a>(&'a self, date_key: &'a str) -> BoxFuture<'a, Result<RemoteContent, SourceError>> {
        Box::pin(self.get_today(date_key))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::BoxFuture;
    use parking_lot::Mutex;

    use super::{ContentSource, RemoteContent};
    use crate::error::SourceError;

    /// Source that replays queued responses, then repeats `fallback`.
    pub struct ScriptedSource {
        responses: Mutex<VecDeque<Result<RemoteContent, SourceError>>>,
        fallback: Mutex<Result<RemoteContent, SourceError>>,
        delay: Mutex<Duration>,
        calls: AtomicUsize,
    }

    pub fn content(id: &str) -> RemoteContent {
        RemoteContent {
            content_id: id.to_string(),
            payload: serde_json::json!({"title": format!("Content {}", id)}),
            revision: Some("1".to_string()),
        }
    }

    impl ScriptedSource {
        pub fn ok(id: &str) -> Self {
            Self::with_fallback(Ok(content(id)))
        }

        pub fn failing(error: SourceError) -> Self {
            Self::with_fallback(Err(error))
        }

        pub fn with_fallback(fallback: Result<RemoteContent, SourceError>) -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(fallback),
                delay: Mutex::new(Duration::ZERO),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn push(&self, response: Result<RemoteContent, SourceError>) {
            self.responses.lock().push_back(response);
        }

        pub fn set_fallback(&self, fallback: Result<RemoteContent, SourceError>) {
            *self.fallback.lock() = fallback;
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = delay;
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ContentSource for ScriptedSource {
        fn fetch<'a>(&'a self, _date_key: &'a str) -> BoxFuture<'a, Result<RemoteContent, SourceError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.fallback.lock().clone());
            let delay = *self.delay.lock();
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                response
            })
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }
}
