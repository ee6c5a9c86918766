use std::time::Duration;

use avatar_core::{AvatarError, FetchedPayload, LogoFetcher};
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport failure: {0}")]
    Other(String),
}

pub trait Transport: Send + Sync {
    fn get(&self, url: &str, timeout: Duration) -> Result<FetchedPayload, TransportError>;
}

pub trait Sleep: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AvatarError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("matchup-avatar/0.1"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| AvatarError::configuration(format!("failed to build http client: {}", err)))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str, timeout: Duration) -> Result<FetchedPayload, TransportError> {
        let response = self.client.get(url).timeout(timeout).send().map_err(classify)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let body = response.bytes().map_err(classify)?.to_vec();
        Ok(FetchedPayload {
            status,
            content_type,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// HTTP GET with bounded retries. Client errors (4xx) fail immediately;
/// server errors, timeouts and connection failures back off and retry until
/// no attempts remain.
pub struct ResilientFetcher {
    policy: RetryPolicy,
    transport: Box<dyn Transport>,
    sleeper: Box<dyn Sleep>,
}

impl ResilientFetcher {
    pub fn new(policy: RetryPolicy) -> Result<Self, AvatarError> {
        Ok(Self::with_parts(policy, Box::new(ReqwestTransport::new()?), Box::new(ThreadSleep)))
    }

    pub fn with_parts(policy: RetryPolicy, transport: Box<dyn Transport>, sleeper: Box<dyn Sleep>) -> Self {
        Self {
            policy,
            transport,
            sleeper,
        }
    }

    // base_delay * 2^attempt, plus 10-30% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.base_delay.saturating_mul(1u32 << attempt.min(16));
        let jitter = base.mul_f64(rand::thread_rng().gen_range(0.10..=0.30));
        base.saturating_add(jitter)
    }
}

impl LogoFetcher for ResilientFetcher {
    fn fetch_logo(&self, url: &str) -> Result<FetchedPayload, AvatarError> {
        let attempts = self.policy.max_retries.saturating_add(1);
        let mut last_failure: Option<(String, Option<u16>, bool)> = None;

        for attempt in 0..attempts {
            match self.transport.get(url, self.policy.request_timeout) {
                Ok(payload) if (400..500).contains(&payload.status) => {
                    return Err(AvatarError::download(
                        format!("{} returned client error {}", url, payload.status),
                        Some(payload.status),
                        false,
                    ));
                }
                Ok(payload) if (500..600).contains(&payload.status) => {
                    log::warn!("attempt {}/{} for {} hit server error {}", attempt + 1, attempts, url, payload.status);
                    last_failure = Some((format!("server error {}", payload.status), Some(payload.status), false));
                }
                Ok(payload) => return Ok(payload),
                Err(TransportError::Timeout(message)) => {
                    log::warn!("attempt {}/{} for {} timed out", attempt + 1, attempts, url);
                    last_failure = Some((message, None, true));
                }
                Err(TransportError::Connect(message)) | Err(TransportError::Other(message)) => {
                    log::warn!("attempt {}/{} for {} failed: {}", attempt + 1, attempts, url, message);
                    last_failure = Some((message, None, false));
                }
            }
            if attempt + 1 < attempts {
                self.sleeper.sleep(self.backoff_delay(attempt));
            }
        }

        let (message, status, timed_out) =
            last_failure.unwrap_or_else(|| ("no fetch attempts were made".to_string(), None, false));
        Err(AvatarError::download(
            format!("download of {} failed after {} attempts: {}", url, attempts, message),
            status,
            timed_out,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<FetchedPayload, TransportError>>>,
        calls: Arc<Mutex<u32>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<FetchedPayload, TransportError>>, calls: Arc<Mutex<u32>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls,
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn get(&self, _url: &str, _timeout: Duration) -> Result<FetchedPayload, TransportError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted transport ran out of responses")
        }
    }

    struct RecordingSleep {
        naps: Arc<Mutex<Vec<Duration>>>,
    }

    impl Sleep for RecordingSleep {
        fn sleep(&self, duration: Duration) {
            self.naps.lock().unwrap().push(duration);
        }
    }

    fn payload(status: u16) -> FetchedPayload {
        FetchedPayload {
            status,
            content_type: Some("image/png".to_string()),
            body: vec![1, 2, 3],
        }
    }

    fn timeout() -> TransportError {
        TransportError::Timeout("deadline exceeded".to_string())
    }

    fn fetcher_with_script(
        policy: RetryPolicy,
        script: Vec<Result<FetchedPayload, TransportError>>,
    ) -> (ResilientFetcher, Arc<Mutex<u32>>, Arc<Mutex<Vec<Duration>>>) {
        let calls = Arc::new(Mutex::new(0));
        let naps = Arc::new(Mutex::new(Vec::new()));
        let fetcher = ResilientFetcher::with_parts(
            policy,
            Box::new(ScriptedTransport::new(script, calls.clone())),
            Box::new(RecordingSleep { naps: naps.clone() }),
        );
        (fetcher, calls, naps)
    }

    #[test]
    fn recovers_after_two_timeouts_with_exactly_two_sleeps() {
        let (fetcher, calls, naps) =
            fetcher_with_script(RetryPolicy::default(), vec![Err(timeout()), Err(timeout()), Ok(payload(200))]);

        let result = fetcher.fetch_logo("https://cdn.example.com/1.png").expect("third attempt succeeds");
        assert_eq!(result.status, 200);
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(naps.lock().unwrap().len(), 2);
    }

    #[test]
    fn client_error_is_terminal_after_one_attempt() {
        let (fetcher, calls, naps) = fetcher_with_script(RetryPolicy::default(), vec![Ok(payload(404))]);

        let err = fetcher.fetch_logo("https://cdn.example.com/1.png").expect_err("404 is terminal");
        match err {
            AvatarError::Download { status, timed_out, .. } => {
                assert_eq!(status, Some(404));
                assert!(!timed_out);
            }
            other => panic!("expected download error, got {:?}", other),
        }
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(naps.lock().unwrap().is_empty());
    }

    #[test]
    fn exhausted_timeouts_sleep_max_retries_times() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..RetryPolicy::default()
        };
        let (fetcher, calls, naps) = fetcher_with_script(
            policy,
            vec![Err(timeout()), Err(timeout()), Err(timeout()), Err(timeout())],
        );

        let err = fetcher.fetch_logo("https://cdn.example.com/1.png").expect_err("every attempt times out");
        match err {
            AvatarError::Download { timed_out, .. } => assert!(timed_out),
            other => panic!("expected download error, got {:?}", other),
        }
        assert_eq!(*calls.lock().unwrap(), 4);
        assert_eq!(naps.lock().unwrap().len(), 3);
    }

    #[test]
    fn server_errors_retry_until_success() {
        let (fetcher, calls, naps) =
            fetcher_with_script(RetryPolicy::default(), vec![Ok(payload(503)), Ok(payload(200))]);

        let result = fetcher.fetch_logo("https://cdn.example.com/1.png").expect("second attempt succeeds");
        assert_eq!(result.status, 200);
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(naps.lock().unwrap().len(), 1);
    }

    #[test]
    fn zero_retries_means_single_attempt_without_sleeping() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        let (fetcher, calls, naps) = fetcher_with_script(policy, vec![Err(timeout())]);

        fetcher.fetch_logo("https://cdn.example.com/1.png").expect_err("single attempt fails");
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(naps.lock().unwrap().is_empty());
    }

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        let fetcher = ResilientFetcher::with_parts(
            policy,
            Box::new(ScriptedTransport::new(vec![], Arc::new(Mutex::new(0)))),
            Box::new(ThreadSleep),
        );

        for (attempt, base_ms) in [(0u32, 100u64), (1, 200), (2, 400)] {
            let delay = fetcher.backoff_delay(attempt).as_millis() as u64;
            assert!(delay >= base_ms + base_ms / 10, "attempt {}: {}ms too small", attempt, delay);
            assert!(delay <= base_ms + (base_ms * 3) / 10 + 1, "attempt {}: {}ms too large", attempt, delay);
        }
    }
}
