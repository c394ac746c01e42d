use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use flowhost_core::config::{ModelConfig, RetryConfig};
use flowhost_core::error::{FlowhostError, Result};
use flowhost_core::traits::LlmClient;
use flowhost_core::types::*;

/// Retries the primary client on transient failures, then walks the
/// fallback models in order. Only opening the stream is retried; a stream
/// that fails midway surfaces its error to the caller.
pub struct RetryingClient {
    primary: Arc<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Arc<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(primary: Arc<dyn LlmClient>, retry_config: RetryConfig) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            retry_config,
        }
    }

    pub fn with_fallback(mut self, config: ModelConfig, client: Arc<dyn LlmClient>) -> Self {
        self.fallbacks.push((config, client));
        self
    }
}

/// HTTP status carried in an `LlmRequest` message of the form `HTTP 503 ...`.
fn http_status(msg: &str) -> Option<u16> {
    msg.strip_prefix("HTTP ")?
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()
}

fn is_retryable(e: &FlowhostError) -> bool {
    match e {
        FlowhostError::LlmRequest(msg) => match http_status(msg) {
            Some(status) => status == 408 || status == 429 || status >= 500,
            None => {
                let lower = msg.to_ascii_lowercase();
                lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection")
            }
        },
        FlowhostError::LlmStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut last_err = None;

            for attempt in 0..=max_retries {
                match self.primary.chat_stream(&config, messages.clone(), &tools).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                        last_err = Some(e);
                    }
                    Err(e) => {
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!(model = %config.model_id, "Primary model exhausted, trying fallbacks");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client.chat_stream(fb_config, messages.clone(), &tools).await {
                    Ok(stream) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(stream);
                    }
                    Err(e) => {
                        warn!(model = %fb_config.model_id, error = %e, "Fallback model failed");
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| FlowhostError::LlmRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;

    use super::*;

    /// Fails with `error` for the first `failures` calls, then streams "ok".
    struct FlakyClient {
        failures: usize,
        error: String,
        calls: AtomicUsize,
    }

    impl LlmClient for FlakyClient {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
            _tools: &[ToolDefinition],
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < self.failures {
                    return Err(FlowhostError::LlmRequest(self.error.clone()));
                }
                let deltas: Vec<Result<StreamDelta>> = vec![
                    Ok(StreamDelta::TextDelta("ok".into())),
                    Ok(StreamDelta::Stop(StopReason::EndTurn)),
                ];
                Ok(futures::stream::iter(deltas).boxed())
            })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&FlowhostError::LlmRequest("HTTP 503 Service Unavailable: busy".into())));
        assert!(is_retryable(&FlowhostError::LlmRequest("HTTP 429 Too Many Requests: slow down".into())));
        assert!(!is_retryable(&FlowhostError::LlmRequest("HTTP 401 Unauthorized: bad key".into())));
        assert!(is_retryable(&FlowhostError::LlmRequest("error sending request: connection refused".into())));
        assert!(!is_retryable(&FlowhostError::Config("no key".into())));
    }

    #[tokio::test]
    async fn test_retries_transient_failure() {
        let flaky = Arc::new(FlakyClient {
            failures: 2,
            error: "HTTP 502 Bad Gateway: upstream".into(),
            calls: AtomicUsize::new(0),
        });
        let client = RetryingClient::new(flaky.clone(), fast_retry());
        let stream = client
            .chat_stream(&ModelConfig::default(), vec![ChatMessage::user("hi")], &[])
            .await
            .unwrap();
        assert_eq!(stream.count().await, 2);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_goes_to_fallback() {
        let primary = Arc::new(FlakyClient {
            failures: usize::MAX,
            error: "HTTP 401 Unauthorized: bad key".into(),
            calls: AtomicUsize::new(0),
        });
        let fallback = Arc::new(FlakyClient {
            failures: 0,
            error: String::new(),
            calls: AtomicUsize::new(0),
        });
        let client = RetryingClient::new(primary.clone(), fast_retry())
            .with_fallback(ModelConfig::default(), fallback.clone());

        client
            .chat_stream(&ModelConfig::default(), vec![ChatMessage::user("hi")], &[])
            .await
            .unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }
}
