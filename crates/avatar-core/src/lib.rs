use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("download failed: {message}")]
    Download {
        message: String,
        status: Option<u16>,
        timed_out: bool,
    },
    #[error("image processing failed: {0}")]
    Processing(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("circuit breaker is open")]
    CircuitOpen,
}

impl AvatarError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn download(msg: impl Into<String>, status: Option<u16>, timed_out: bool) -> Self {
        Self::Download {
            message: msg.into(),
            status,
            timed_out,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    ValidationFailed,
    DownloadFailed,
    ProcessingFailed,
    ConfigurationInvalid,
    CircuitOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl AvatarError {
    pub fn as_error_info(&self) -> ErrorInfo {
        let mut context = BTreeMap::new();
        let code = match self {
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::Download { status, timed_out, .. } => {
                if let Some(status) = status {
                    context.insert("upstreamStatus".to_string(), status.to_string());
                }
                if *timed_out {
                    context.insert("timedOut".to_string(), "true".to_string());
                }
                ErrorCode::DownloadFailed
            }
            Self::Processing(_) => ErrorCode::ProcessingFailed,
            Self::Configuration(_) => ErrorCode::ConfigurationInvalid,
            Self::CircuitOpen => ErrorCode::CircuitOpen,
        };
        ErrorInfo {
            code,
            message: self.to_string(),
            context,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

pub trait LogoFetcher: Send + Sync {
    fn fetch_logo(&self, url: &str) -> Result<FetchedPayload, AvatarError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEventType {
    CombineStart,
    CombineSuccess,
    CombineError,
    FetchStart,
    FetchSuccess,
    FetchError,
    FallbackUsed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: TelemetryEventType,
    pub team: Option<String>,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    failure_count: u32,
    last_failure: Option<Instant>,
    state: BreakerState,
}

/// Consecutive-failure circuit breaker shared across requests. Advisory, not
/// safety-critical: one coarse lock around three fields.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                failure_count: 0,
                last_failure: None,
                state: BreakerState::Closed,
            }),
        }
    }

    /// Gate a new attempt. An open breaker rejects until the recovery timeout
    /// has elapsed, then lets a single trial through half-open.
    pub fn check(&self) -> Result<(), AvatarError> {
        let mut inner = self.lock();
        if inner.state == BreakerState::Open {
            let cooled_down = inner
                .last_failure
                .map(|at| at.elapsed() >= self.recovery_timeout)
                .unwrap_or(true);
            if cooled_down {
                inner.state = BreakerState::HalfOpen;
            } else {
                return Err(AvatarError::CircuitOpen);
            }
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.state = BreakerState::Closed;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if inner.failure_count >= self.failure_threshold {
            inner.state = BreakerState::Open;
        }
    }

    /// Drop all recorded state. Intended for tests and operator resets.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.state = BreakerState::Closed;
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..2 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.check().is_ok());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(breaker.check(), Err(AvatarError::CircuitOpen)));
    }

    #[test]
    fn breaker_half_opens_after_cooldown_and_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // Zero recovery timeout: the next check transitions to half-open.
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn breaker_reset_clears_open_state() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn download_error_info_carries_status_context() {
        let err = AvatarError::download("upstream returned 404", Some(404), false);
        let info = err.as_error_info();
        assert_eq!(info.code, ErrorCode::DownloadFailed);
        assert_eq!(info.context.get("upstreamStatus").map(String::as_str), Some("404"));
        assert!(!info.context.contains_key("timedOut"));
    }

    #[test]
    fn timeout_error_info_flags_timeout() {
        let err = AvatarError::download("timed out", None, true);
        let info = err.as_error_info();
        assert_eq!(info.context.get("timedOut").map(String::as_str), Some("true"));
    }

    #[test]
    fn error_codes_serialize_kebab_case() {
        let json = serde_json::to_string(&ErrorCode::DownloadFailed).expect("serializable");
        assert_eq!(json, "\"download-failed\"");
    }
}
