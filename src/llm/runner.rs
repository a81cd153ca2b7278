//! Retrying LLM call with per-attempt timeout and exponential backoff.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RunnerConfig;
use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, LlmProvider, LlmResponse};

/// Executes generation requests under the configured retry policy.
#[derive(Debug, Clone)]
pub struct LlmRunner {
    config: RunnerConfig,
}

impl LlmRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Sleep before the retry that follows failed attempt `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.config.backoff_base.powi(exponent);
        if !secs.is_finite() || secs < 0.0 {
            return self.config.max_backoff;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.config.max_backoff)
            .min(self.config.max_backoff)
    }

    /// Run without an outer deadline.
    pub async fn run(
        &self,
        provider: &dyn LlmProvider,
        request: CompletionRequest,
    ) -> Result<LlmResponse, LlmError> {
        self.run_until(provider, request, None).await
    }

    /// Run with an optional outer deadline.
    ///
    /// Each attempt gets `attempt_timeout`, clamped to what is left of the
    /// deadline. Once the deadline cannot be met no new attempt or backoff
    /// starts and `DeadlineExceeded` is returned.
    pub async fn run_until(
        &self,
        provider: &dyn LlmProvider,
        request: CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<LlmResponse, LlmError> {
        let provider_name = provider.provider_name().to_string();
        let attempts = self.config.max_retries.saturating_add(1);
        let deadline_exceeded = || LlmError::DeadlineExceeded {
            provider: provider_name.clone(),
        };
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let mut timeout = self.config.attempt_timeout;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(deadline_exceeded());
                }
                timeout = timeout.min(remaining);
            }

            let started = Instant::now();
            match tokio::time::timeout(timeout, provider.generate(request.clone())).await {
                Ok(Ok(raw)) => {
                    debug!(
                        provider = %provider_name,
                        attempt = attempt + 1,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "LLM call succeeded"
                    );
                    return Ok(LlmResponse::normalize(raw, &request, provider.model_name()));
                }
                Ok(Err(e)) => {
                    warn!(provider = %provider_name, attempt = attempt + 1, error = %e, "LLM call failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(provider = %provider_name, attempt = attempt + 1, timeout = ?timeout, "LLM call timed out");
                    last_error = LlmError::Timeout {
                        provider: provider_name.clone(),
                        timeout,
                    }
                    .to_string();
                }
            }

            if attempt + 1 < attempts {
                let delay = self.backoff_delay(attempt);
                if let Some(deadline) = deadline
                    && Instant::now() + delay >= deadline
                {
                    return Err(deadline_exceeded());
                }
                tokio::time::sleep(delay).await;
            }
        }

        Err(LlmError::Exhausted {
            provider: provider_name,
            attempts,
            last_error,
        })
    }
}

impl Default for LlmRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{CompletionResponse, Usage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then answers.
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn provider_name(&self) -> &str {
            "flaky"
        }
        fn model_name(&self) -> &str {
            "flaky-1"
        }
        async fn generate(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(LlmError::RequestFailed {
                    provider: "flaky".into(),
                    reason: "503".into(),
                });
            }
            Ok(CompletionResponse {
                text: "ok".into(),
                finish_reason: Some("stop".into()),
                usage: Some(Usage::new(3, 4)),
                provider: "flaky".into(),
            })
        }
    }

    /// Never answers.
    struct HangingProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for HangingProvider {
        fn provider_name(&self) -> &str {
            "hanging"
        }
        fn model_name(&self) -> &str {
            "hanging-1"
        }
        async fn generate(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn runner(max_retries: u32) -> LlmRunner {
        LlmRunner::new(RunnerConfig {
            max_retries,
            backoff_base: 2.0,
            max_backoff: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(10),
        })
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let runner = runner(3);
        assert_eq!(runner.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(runner.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(runner.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(runner.backoff_delay(30), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let provider = FlakyProvider {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let response = runner(3)
            .run(&provider, CompletionRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(response.text, "ok");
        assert_eq!(response.model, "flaky-1");
        assert_eq!(response.usage.total_tokens, Some(7));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn always_timing_out_exhausts_after_all_attempts() {
        let provider = HangingProvider {
            calls: AtomicU32::new(0),
        };
        let runner = runner(3);
        let started = Instant::now();
        let err = runner
            .run(&provider, CompletionRequest::new("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Exhausted { attempts: 4, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);

        let backoff: Duration = (0..3).map(|k| runner.backoff_delay(k)).sum();
        assert!(started.elapsed() >= backoff);
    }

    #[tokio::test(start_paused = true)]
    async fn outer_deadline_stops_retries() {
        let provider = HangingProvider {
            calls: AtomicU32::new(0),
        };
        let deadline = Instant::now() + Duration::from_secs(15);
        let err = runner(5)
            .run_until(&provider, CompletionRequest::new("hi"), Some(deadline))
            .await
            .unwrap_err();

        // 10s attempt, 1s backoff, then the second attempt is clamped to the
        // remaining 4s; the next backoff would cross the deadline.
        assert!(matches!(err, LlmError::DeadlineExceeded { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(Instant::now() <= deadline + Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_one_attempt() {
        let provider = FlakyProvider {
            failures: 1,
            calls: AtomicU32::new(0),
        };
        let err = runner(0)
            .run(&provider, CompletionRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Exhausted { attempts: 1, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
