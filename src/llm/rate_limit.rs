//! Client-side rate limiting
//!
//! Tracks requests and estimated tokens per model against the published
//! minute/day envelopes, so the pipeline can refuse a call before the
//! upstream API would 429 it. Windows are in-process only; upstream limits
//! are enforced server-side regardless.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use super::model_spec;

#[derive(Debug)]
struct UsageWindow {
    minute_start: Instant,
    minute_requests: u32,
    minute_tokens: u64,
    day_start: Instant,
    day_requests: u32,
    day_tokens: u64,
}

impl UsageWindow {
    fn new(now: Instant) -> Self {
        Self {
            minute_start: now,
            minute_requests: 0,
            minute_tokens: 0,
            day_start: now,
            day_requests: 0,
            day_tokens: 0,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.minute_start) >= Duration::from_secs(60) {
            self.minute_start = now;
            self.minute_requests = 0;
            self.minute_tokens = 0;
        }
        if now.duration_since(self.day_start) >= Duration::from_secs(86_400) {
            self.day_start = now;
            self.day_requests = 0;
            self.day_tokens = 0;
        }
    }
}

/// Per-model sliding-window usage tracker.
pub struct ModelRateLimiter {
    windows: Mutex<HashMap<String, UsageWindow>>,
}

impl Default for ModelRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRateLimiter {
    pub fn new() -> Self {
        Self { windows: Mutex::new(HashMap::new()) }
    }

    /// Whether a call with `estimated_tokens` fits the model's envelope.
    /// Returns `(true, "OK")` or `(false, reason)`. Unknown models pass.
    pub fn check(&self, model: &str, estimated_tokens: u64) -> (bool, String) {
        let Some(spec) = model_spec(model) else {
            return (true, "OK".to_string());
        };

        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = windows
            .entry(model.to_string())
            .or_insert_with(|| UsageWindow::new(now));
        window.roll(now);

        if window.minute_requests + 1 > spec.rpm {
            return (false, format!("RPM limit reached for {model} ({}/min)", spec.rpm));
        }
        if window.day_requests + 1 > spec.rpd {
            return (false, format!("RPD limit reached for {model} ({}/day)", spec.rpd));
        }
        if window.minute_tokens + estimated_tokens > spec.tpm {
            return (false, format!("TPM limit reached for {model} ({} tokens/min)", spec.tpm));
        }
        if window.day_tokens + estimated_tokens > spec.tpd {
            return (false, format!("TPD limit reached for {model} ({} tokens/day)", spec.tpd));
        }

        (true, "OK".to_string())
    }

    /// Record a completed call against the model's windows.
    pub fn record(&self, model: &str, tokens: u64) {
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = windows
            .entry(model.to_string())
            .or_insert_with(|| UsageWindow::new(now));
        window.roll(now);
        window.minute_requests += 1;
        window.minute_tokens += tokens;
        window.day_requests += 1;
        window.day_tokens += tokens;
        debug!(
            model,
            minute_requests = window.minute_requests,
            minute_tokens = window.minute_tokens,
            "rate limiter recorded call"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_passes() {
        let limiter = ModelRateLimiter::new();
        let (ok, reason) = limiter.check("no-such-model", 1_000_000);
        assert!(ok);
        assert_eq!(reason, "OK");
    }

    #[test]
    fn test_rpm_exhaustion() {
        let limiter = ModelRateLimiter::new();
        let spec = model_spec("kimi-k2").unwrap();
        for _ in 0..spec.rpm {
            assert!(limiter.check("kimi-k2", 1).0);
            limiter.record("kimi-k2", 1);
        }
        let (ok, reason) = limiter.check("kimi-k2", 1);
        assert!(!ok);
        assert!(reason.contains("RPM"));
    }

    #[test]
    fn test_tpm_exhaustion() {
        let limiter = ModelRateLimiter::new();
        let spec = model_spec("qwen3-32b").unwrap();
        limiter.record("qwen3-32b", spec.tpm - 10);
        assert!(limiter.check("qwen3-32b", 10).0);
        let (ok, reason) = limiter.check("qwen3-32b", 11);
        assert!(!ok);
        assert!(reason.contains("TPM"));
    }

    #[test]
    fn test_models_tracked_separately() {
        let limiter = ModelRateLimiter::new();
        let spec = model_spec("gpt-oss-120b").unwrap();
        limiter.record("gpt-oss-120b", spec.tpm);
        assert!(!limiter.check("gpt-oss-120b", 1).0);
        assert!(limiter.check("kimi-k2", 1).0);
    }
}
