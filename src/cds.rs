use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use directories::BaseDirs;
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::archive::{ArchiveClient, RetrievalRequest};
use crate::error::IngestError;
use crate::http::{build_client, handle_status, header_value, send_with_retries, write_response_to_file};

pub const DEFAULT_URL: &str = "https://cds.climate.copernicus.eu/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdsCredentials {
    pub url: String,
    pub key: String,
}

impl CdsCredentials {
    /// `CDSAPI_URL`/`CDSAPI_KEY`, else `~/.cdsapirc`.
    pub fn discover() -> Result<Self, IngestError> {
        if let Ok(key) = std::env::var("CDSAPI_KEY") {
            let url = std::env::var("CDSAPI_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
            return Ok(Self { url, key });
        }
        let path = BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".cdsapirc"))
            .ok_or_else(|| IngestError::MissingCredentials("no home directory".to_string()))?;
        let content = fs::read_to_string(&path).map_err(|_| {
            IngestError::MissingCredentials(format!(
                "set CDSAPI_KEY or create {}",
                path.display()
            ))
        })?;
        Self::parse(&content)
    }

    /// `url: ...` and `key: ...` lines.
    pub fn parse(content: &str) -> Result<Self, IngestError> {
        let mut url = None;
        let mut key = None;
        for line in content.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            match name.trim() {
                "url" => url = Some(value.trim().to_string()),
                "key" => key = Some(value.trim().to_string()),
                _ => {}
            }
        }
        let key = key.ok_or_else(|| IngestError::MissingCredentials(".cdsapirc has no key".to_string()))?;
        Ok(Self {
            url: url.unwrap_or_else(|| DEFAULT_URL.to_string()),
            key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(rename = "jobID")]
    job_id: String,
    status: String,
}

/// Client for the Copernicus Climate Data Store processing API (ERA5).
#[derive(Clone)]
pub struct CdsApiClient {
    client: Client,
    url: String,
    poll_interval: Duration,
}

impl CdsApiClient {
    pub fn new(credentials: CdsCredentials) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        headers.insert("PRIVATE-TOKEN", header_value(&credentials.key)?);
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

    fn submit(&self, request: &RetrievalRequest) -> Result<JobStatus, IngestError> {
        let url = format!(
            "{}/retrieve/v1/processes/{}/execution",
            self.url, request.dataset
        );
        let payload = json!({ "inputs": request.body });
        let response = send_with_retries(|| self.client.post(&url).json(&payload))?;
        handle_status(response)?
            .json()
            .map_err(|err| IngestError::ArchiveHttp(err.to_string()))
    }

    fn wait(&self, mut job: JobStatus, dataset: &str) -> Result<String, IngestError> {
        let job_url = format!("{}/retrieve/v1/jobs/{}", self.url, job.job_id);
        loop {
            match job.status.as_str() {
                "successful" => break,
                "accepted" | "running" => {
                    debug!(job = %job.job_id, status = %job.status, "job pending");
                    thread::sleep(self.poll_interval);
                    let response = send_with_retries(|| self.client.get(&job_url))?;
                    job = handle_status(response)?
                        .json()
                        .map_err(|err| IngestError::ArchiveHttp(err.to_string()))?;
                }
                other => {
                    let detail = self.results(&job_url).ok().and_then(|value| {
                        value
                            .get("detail")
                            .or_else(|| value.get("title"))
                            .map(Value::to_string)
                    });
                    return Err(IngestError::ArchiveRequest {
                        request: dataset.to_string(),
                        message: detail.unwrap_or_else(|| format!("job ended with status `{other}`")),
                    });
                }
            }
        }
        let results = self.results(&job_url)?;
        results
            .pointer("/asset/value/href")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| IngestError::ArchiveRequest {
                request: dataset.to_string(),
                message: "job results carry no download link".to_string(),
            })
    }

    fn results(&self, job_url: &str) -> Result<Value, IngestError> {
        let url = format!("{job_url}/results");
        let response = send_with_retries(|| self.client.get(&url))?;
        handle_status(response)?
            .json()
            .map_err(|err| IngestError::ArchiveHttp(err.to_string()))
    }
}

impl ArchiveClient for CdsApiClient {
    fn retrieve(&self, request: &RetrievalRequest, destination: &Path) -> Result<(), IngestError> {
        let job = self.submit(request)?;
        let href = self.wait(job, &request.dataset)?;
        let response = send_with_retries(|| self.client.get(&href))?;
        let bytes = write_response_to_file(response, destination)?;
        info!(dataset = %request.dataset, bytes, path = %destination.display(), "retrieved fragment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rc_lines() {
        let creds = CdsCredentials::parse("url: https://example.org/api\nkey: 1234-abcd\n").unwrap();
        assert_eq!(creds.url, "https://example.org/api");
        assert_eq!(creds.key, "1234-abcd");
        assert!(CdsCredentials::parse("url: x\n").is_err());
    }
}
