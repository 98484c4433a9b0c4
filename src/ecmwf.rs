use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use directories::BaseDirs;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, LOCATION};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveClient, RetrievalRequest};
use crate::error::IngestError;
use crate::http::{build_client, handle_status, header_value, send_with_retries, write_response_to_file};

pub const DEFAULT_URL: &str = "https://api.ecmwf.int/v1";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EcmwfCredentials {
    #[serde(default = "default_url")]
    pub url: String,
    pub key: String,
    pub email: String,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

impl EcmwfCredentials {
    /// `ECMWF_API_URL`/`ECMWF_API_KEY`/`ECMWF_API_EMAIL`, else `~/.ecmwfapirc`.
    pub fn discover() -> Result<Self, IngestError> {
        if let (Ok(key), Ok(email)) = (std::env::var("ECMWF_API_KEY"), std::env::var("ECMWF_API_EMAIL")) {
            let url = std::env::var("ECMWF_API_URL").unwrap_or_else(|_| default_url());
            return Ok(Self { url, key, email });
        }
        let path = BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".ecmwfapirc"))
            .ok_or_else(|| IngestError::MissingCredentials("no home directory".to_string()))?;
        let content = fs::read_to_string(&path).map_err(|_| {
            IngestError::MissingCredentials(format!(
                "set ECMWF_API_KEY and ECMWF_API_EMAIL or create {}",
                path.display()
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, IngestError> {
        serde_json::from_str(content)
            .map_err(|err| IngestError::MissingCredentials(format!(".ecmwfapirc: {err}")))
    }
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    status: String,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    retry: Option<u64>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

/// Client for the ECMWF Web API, which serves the S2S archive. Requests
/// are queued server side; `retrieve` polls until the result is ready.
#[derive(Clone)]
pub struct EcmwfWebApiClient {
    client: Client,
    url: String,
    poll_interval: Duration,
}

impl EcmwfWebApiClient {
    pub fn new(credentials: EcmwfCredentials) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("From", header_value(&credentials.email)?);
        headers.insert("X-ECMWF-KEY", header_value(&credentials.key)?);
        let client = build_client(headers, Duration::from_secs(600))?;
        Ok(Self {
            client,
            url: credentials.url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(5),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn submit(&self, request: &RetrievalRequest) -> Result<String, IngestError> {
        let url = format!("{}/datasets/{}/requests", self.url, request.dataset);
        let response = send_with_retries(|| self.client.post(&url).json(&request.body))?;
        let response = handle_status(response)?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let status: Value = response
            .json()
            .map_err(|err| IngestError::ArchiveHttp(err.to_string()))?;
        location
            .or_else(|| status.get("href").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| IngestError::ArchiveRequest {
                request: request.dataset.clone(),
                message: "archive did not return a task location".to_string(),
            })
    }

    fn poll(&self, task_url: &str, dataset: &str) -> Result<String, IngestError> {
        loop {
            let response = send_with_retries(|| self.client.get(task_url))?;
            let task: TaskStatus = handle_status(response)?
                .json()
                .map_err(|err| IngestError::ArchiveHttp(err.to_string()))?;
            match task.status.as_str() {
                "complete" => {
                    return task.href.ok_or_else(|| IngestError::ArchiveRequest {
                        request: dataset.to_string(),
                        message: "completed task has no result link".to_string(),
                    });
                }
                "queued" | "active" | "submitted" => {
                    let wait = task
                        .retry
                        .map(Duration::from_secs)
                        .unwrap_or(self.poll_interval);
                    debug!(status = %task.status, wait_secs = wait.as_secs(), "request pending");
                    thread::sleep(wait);
                }
                other => {
                    let message = task
                        .reason
                        .or_else(|| task.error.map(|err| err.to_string()))
                        .unwrap_or_else(|| format!("task ended with status `{other}`"));
                    return Err(IngestError::ArchiveRequest {
                        request: dataset.to_string(),
                        message,
                    });
                }
            }
        }
    }

    fn release(&self, task_url: &str) {
        if let Err(err) = self.client.delete(task_url).send() {
            warn!(error = %err, "failed to release archive task");
        }
    }
}

impl ArchiveClient for EcmwfWebApiClient {
    fn retrieve(&self, request: &RetrievalRequest, destination: &Path) -> Result<(), IngestError> {
        let task_url = self.submit(request)?;
        let result = self.poll(&task_url, &request.dataset).and_then(|href| {
            let response = send_with_retries(|| self.client.get(&href))?;
            write_response_to_file(response, destination)
        });
        self.release(&task_url);
        let bytes = result?;
        info!(dataset = %request.dataset, bytes, path = %destination.display(), "retrieved fragment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rc_file_defaults_url() {
        let creds = EcmwfCredentials::parse(r#"{"key": "abc", "email": "a@b.org"}"#).unwrap();
        assert_eq!(creds.url, DEFAULT_URL);
        assert_eq!(creds.email, "a@b.org");
    }
}
