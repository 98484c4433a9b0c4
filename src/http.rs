//! Blocking HTTP plumbing shared by the archive clients.

use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::IngestError;

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

pub(crate) fn build_client(
    mut headers: HeaderMap,
    timeout: Duration,
) -> Result<Client, IngestError> {
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("s2s-ingest/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| IngestError::ArchiveHttp(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| IngestError::ArchiveHttp(err.to_string()))
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue, IngestError> {
    HeaderValue::from_str(value.trim())
        .map_err(|err| IngestError::MissingCredentials(err.to_string()))
}

/// Retries transient failures (connect errors, 429 and 5xx) a few times
/// with linear backoff, then hands back whatever came last.
pub(crate) fn send_with_retries<F>(mut make_req: F) -> Result<Response, IngestError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Err(IngestError::ArchiveHttp(err.to_string()));
            }
        }
    }
}

pub(crate) fn handle_status(response: Response) -> Result<Response, IngestError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "archive request failed".to_string());
    Err(IngestError::ArchiveStatus { status, message })
}

pub(crate) fn write_response_to_file(
    response: Response,
    destination: &Path,
) -> Result<u64, IngestError> {
    let mut response = handle_status(response)?;
    let mut file = File::create(destination).map_err(|err| {
        IngestError::Filesystem(format!("create {}: {err}", destination.display()))
    })?;
    std::io::copy(&mut response, &mut file).map_err(|err| IngestError::Filesystem(err.to_string()))
}

fn backoff(attempt: usize) {
    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
    thread::sleep(Duration::from_millis(delay));
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }
}
