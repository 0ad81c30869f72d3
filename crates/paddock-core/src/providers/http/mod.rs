use crate::errors::FetchError;
use crate::retry::{with_retry, RetryError, RetryPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod client;
pub mod fake;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// One GET round trip. Errors are network-level (connect, timeout, reset);
/// any HTTP status, including 5xx, comes back as `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, req: &HttpRequest) -> anyhow::Result<HttpResponse>;
    fn name(&self) -> &'static str;
}

#[derive(Debug)]
enum AttemptError {
    Network(String),
    Status { status: u16, body: String },
}

impl AttemptError {
    fn retryable(&self) -> bool {
        match self {
            AttemptError::Network(_) => true,
            AttemptError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }

    fn describe(&self) -> String {
        match self {
            AttemptError::Network(msg) => msg.clone(),
            AttemptError::Status { status, .. } => format!("HTTP {}", status),
        }
    }
}

/// Resilient GET client bound to one API base URL.
#[derive(Clone)]
pub struct HttpFetcher {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: Option<String>,
    backoff: RetryPolicy,
}

impl HttpFetcher {
    /// `backoff` supplies the delay shape; attempt counts are per call.
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        backoff: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            api_key,
            backoff,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, endpoint: &str) -> Result<String, FetchError> {
        let joined = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        reqwest::Url::parse(&joined)
            .map(|u| u.to_string())
            .map_err(|e| FetchError::Request {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })
    }

    /// GETs `endpoint` with `params`, making at most `max_retries` attempts.
    ///
    /// Network errors, 5xx and 429 are retried with exponential backoff and
    /// jitter. Any other non-2xx status fails at once with
    /// [`FetchError::Client`]; running out of attempts yields
    /// [`FetchError::Exhausted`].
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        timeout: Duration,
        max_retries: u32,
    ) -> Result<String, FetchError> {
        let req = HttpRequest {
            url: self.url_for(endpoint)?,
            query: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            headers: self
                .api_key
                .iter()
                .map(|k| ("X-Api-Key".to_string(), k.clone()))
                .collect(),
            timeout,
        };
        let policy = self.backoff.clone().with_max_attempts(max_retries);

        let out = with_retry(
            &policy,
            |attempt| {
                let transport = self.transport.clone();
                let req = &req;
                async move {
                    match transport.get(req).await {
                        Ok(resp) if (200..300).contains(&resp.status) => {
                            tracing::info!(
                                event = "fetch_attempt",
                                endpoint = %endpoint,
                                attempt,
                                outcome = "ok",
                                status = resp.status,
                            );
                            Ok(resp.body)
                        }
                        Ok(resp) => Err(AttemptError::Status {
                            status: resp.status,
                            body: resp.body,
                        }),
                        Err(e) => Err(AttemptError::Network(format!("{:#}", e))),
                    }
                }
            },
            AttemptError::retryable,
            |attempt, err, next| match next {
                Some(delay) => tracing::warn!(
                    event = "fetch_attempt",
                    endpoint = %endpoint,
                    attempt,
                    outcome = %err.describe(),
                    retry_in_ms = delay.as_millis() as u64,
                ),
                None => tracing::warn!(
                    event = "fetch_attempt",
                    endpoint = %endpoint,
                    attempt,
                    outcome = %err.describe(),
                    final_attempt = true,
                ),
            },
        )
        .await;

        out.map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => FetchError::Exhausted {
                endpoint: endpoint.to_string(),
                attempts,
                last: last.describe(),
            },
            RetryError::Aborted { error, .. } => match error {
                AttemptError::Status { status, body } => FetchError::Client {
                    endpoint: endpoint.to_string(),
                    status,
                    body: truncate(body, 512),
                },
                AttemptError::Network(message) => FetchError::Request {
                    endpoint: endpoint.to_string(),
                    message,
                },
            },
        })
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}
