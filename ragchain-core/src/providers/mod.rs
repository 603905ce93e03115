//! Generator implementations backed by remote language-model APIs.
//!
//! Use `create_generator()` to instantiate the appropriate generator from config.
//! Retrying transient failures is the generator's job; the pipelines never retry.

pub mod openai;

use crate::config::{GeneratorConfig, RetryConfig};
use crate::error::GenerationError;
use crate::generator::Generator;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use openai::OpenAiGenerator;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `RateLimited` (respects `retry_after_secs`), `Connection`, and `Timeout`.
/// Permanent errors (auth, parse, bad request) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, GenerationError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt >= config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Check if an error is retryable (transient).
fn is_retryable(err: &GenerationError) -> bool {
    matches!(
        err,
        GenerationError::RateLimited { .. }
            | GenerationError::Connection { .. }
            | GenerationError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &GenerationError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    if let GenerationError::RateLimited { retry_after_secs } = err {
        return retry_after_secs.saturating_mul(1000).max(computed);
    }
    computed
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Add up to 25% jitter
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Cheap pseudo-random fraction in [0, 1) from the clock's subsecond nanos.
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Create a generator based on the configuration.
pub fn create_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>, GenerationError> {
    match config.provider.as_str() {
        "openai" | "ollama" | "vllm" | "lmstudio" | "azure" => {
            Ok(Arc::new(OpenAiGenerator::new(config)?))
        }
        other => Err(GenerationError::Other {
            message: format!(
                "Unsupported provider '{}'; supply a Generator implementation directly",
                other
            ),
        }),
    }
}
