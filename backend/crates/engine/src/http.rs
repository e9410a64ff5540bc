use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::clock::Clock;
use crate::retry::RetryPolicy;

/// Longest `Retry-After` we are willing to honor.
const MAX_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Build an HTTP client with the configured request timeout.
pub fn build_client(timeout: Duration) -> Result<Client, ApiError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Send the request produced by `build`, retrying transient failures.
///
/// Connect errors, timeouts, 5xx and 429 are retried with exponential backoff
/// (429 waits for `Retry-After` when present, capped at 60s). Any other
/// non-success status fails immediately with [`ApiError::HttpError`].
pub async fn send_with_retry<C, F>(
    client: &Client,
    build: F,
    max_retries: u32,
    clock: &C,
) -> Result<Response, ApiError>
where
    C: Clock + ?Sized,
    F: Fn(&Client) -> RequestBuilder,
{
    let backoff = RetryPolicy::http_backoff(max_retries);
    let mut last_error = String::new();
    let mut waited = false;

    for attempt in 0..=max_retries {
        // A honored Retry-After replaces the backoff for this attempt.
        if attempt > 0 && !std::mem::take(&mut waited) {
            let wait = backoff.delay_for(attempt);
            tracing::warn!(attempt, backoff_secs = wait.as_secs(), "retrying after backoff");
            clock.sleep(wait).await;
        }

        let response = match build(client).send().await {
            Ok(resp) => resp,
            Err(e) => {
                last_error = e.to_string();
                if e.is_timeout() || e.is_connect() {
                    continue;
                }
                return Err(ApiError::RequestError(e));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(retry_after) = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
            {
                let wait = retry_after.min(MAX_RETRY_AFTER_SECS);
                tracing::warn!(wait, "rate-limited, waiting Retry-After");
                clock.sleep(Duration::from_secs(wait)).await;
                waited = true;
            }
            last_error = "429 Too Many Requests".to_string();
            continue;
        }

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            last_error = format!("{status}: {body}");
            continue;
        }

        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::HttpError { status, body });
    }

    Err(ApiError::MaxRetriesExceeded {
        attempts: max_retries + 1,
        last_error,
    })
}

/// [`send_with_retry`] followed by JSON decoding of the body.
pub async fn send_json<T, C, F>(
    client: &Client,
    build: F,
    max_retries: u32,
    clock: &C,
) -> Result<T, ApiError>
where
    T: DeserializeOwned,
    C: Clock + ?Sized,
    F: Fn(&Client) -> RequestBuilder,
{
    let response = send_with_retry(client, build, max_retries, clock).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Client {
        build_client(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn retries_on_500_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let clock = ManualClock::default();
        let url = format!("{}/ping", server.uri());
        let body: serde_json::Value = send_json(&client(), |c| c.get(&url), 2, &clock)
            .await
            .unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn fails_fast_on_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let clock = ManualClock::default();
        let url = server.uri();
        let err = send_with_retry(&client(), |c| c.get(&url), 3, &clock)
            .await
            .unwrap_err();
        match err {
            ApiError::HttpError { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "unauthorized");
            }
            other => panic!("expected HttpError, got: {other:?}"),
        }
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn honors_retry_after_with_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "600"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let clock = ManualClock::default();
        let url = server.uri();
        send_with_retry(&client(), |c| c.get(&url), 2, &clock)
            .await
            .unwrap();
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60)]);
    }

    #[tokio::test]
    async fn rate_limit_without_retry_after_uses_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let clock = ManualClock::default();
        let url = server.uri();
        send_with_retry(&client(), |c| c.get(&url), 2, &clock)
            .await
            .unwrap();
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn max_retries_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let clock = ManualClock::default();
        let url = server.uri();
        let err = send_with_retry(&client(), |c| c.get(&url), 1, &clock)
            .await
            .unwrap_err();
        match err {
            ApiError::MaxRetriesExceeded { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("unavailable"));
            }
            other => panic!("expected MaxRetriesExceeded, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let clock = ManualClock::default();
        let url = server.uri();
        let err = send_json::<serde_json::Value, _, _>(&client(), |c| c.get(&url), 0, &clock)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }
}
