//! HTTP client for the RF station hub
//!
//! The hub exposes a small unauthenticated HTTP API on the local network:
//! `/jc` for the station status poll, `/cc` for per-station commands,
//! `/hrs` for the raw-sample pipeline and `/update` for firmware images.
//! Every request carries its own timeout; a response arriving after the
//! timeout has fired is simply dropped. Retrying is left to the caller.

use crate::config::HubConfig;
use anyhow::{Context, Result};
use log::debug;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::{Client, multipart};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use thiserror::Error;
use trait_variant::make;

/// Outcome taxonomy of a single hub request. The connection monitor and the
/// command handlers react differently to a timeout than to any other
/// failure, so the distinction is typed rather than buried in a message.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request timed out")]
    TimedOut,
    #[error("hub returned status {0}")]
    Status(u16),
    #[error("failed to reach hub: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("malformed hub response: {0}")]
    Malformed(String),
}

impl ClientError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::TimedOut
        } else {
            ClientError::Transport(e)
        }
    }
}

/// `GET /jc` response body.
#[derive(Debug, Deserialize)]
pub struct StationStatusReport {
    pub stations: Vec<StationStatus>,
}

#[derive(Debug, Deserialize)]
pub struct StationStatus {
    pub name: String,
    pub status: u8,
    pub code: String,
}

/// `GET /hrs?action=scan` response body: how long the capture will run and
/// at which sampling resolution. Not known to the client in advance.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ScanInfo {
    pub time: f64,
    pub interval: u32,
}

/// `GET /hrs?action=fetch` response body.
#[derive(Debug, Deserialize)]
pub struct SampleData {
    pub data: String,
}

/// `POST /update` response body; `result` 0 means the image was accepted.
#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateResult {
    pub result: i64,
}

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait HubClient {
    async fn station_status(&self) -> Result<StationStatusReport, ClientError>;
    async fn set_power(&self, sid: usize, on: bool) -> Result<(), ClientError>;
    async fn set_record(&self, sid: usize, on: bool) -> Result<(), ClientError>;
    async fn rename(&self, sid: usize, name: &str) -> Result<(), ClientError>;
    async fn start_scan(&self) -> Result<ScanInfo, ClientError>;
    async fn fetch_samples(&self) -> Result<SampleData, ClientError>;
    async fn transmit(&self) -> Result<(), ClientError>;
    async fn upload_firmware(
        &self,
        file_name: String,
        bytes: Vec<u8>,
    ) -> Result<UpdateResult, ClientError>;
}

#[derive(Clone)]
pub struct RfHubClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl RfHubClient {
    // API endpoint constants
    const STATUS_ENDPOINT: &str = "/jc";
    const COMMAND_ENDPOINT: &str = "/cc";
    const SAMPLER_ENDPOINT: &str = "/hrs";
    const UPDATE_ENDPOINT: &str = "/update";

    pub fn new(config: &HubConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to create hub HTTP client")?;

        Ok(RfHubClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
        })
    }

    fn build_url(&self, path: &str) -> String {
        let normalized_path = path.trim_start_matches('/');
        format!("{}/{normalized_path}", self.base_url)
    }

    /// GET request with query parameters and the per-request timeout.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, ClientError> {
        let url = self.build_url(path);
        debug!("GET {url} {query:?}");

        let res = self
            .client
            .get(&url)
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let status = res.status();
        let body = res.text().await.map_err(ClientError::from_reqwest)?;

        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        Ok(body)
    }
}

fn parse<T: DeserializeOwned>(body: &str, what: &str) -> Result<T, ClientError> {
    serde_json::from_str(body).map_err(|e| ClientError::Malformed(format!("{what}: {e}")))
}

fn switch_value(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

impl HubClient for RfHubClient {
    async fn station_status(&self) -> Result<StationStatusReport, ClientError> {
        let body = self.get(Self::STATUS_ENDPOINT, &[]).await?;
        parse(&body, "station status")
    }

    async fn set_power(&self, sid: usize, on: bool) -> Result<(), ClientError> {
        self.get(
            Self::COMMAND_ENDPOINT,
            &[
                ("sid", sid.to_string()),
                ("turn", switch_value(on).to_string()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn set_record(&self, sid: usize, on: bool) -> Result<(), ClientError> {
        self.get(
            Self::COMMAND_ENDPOINT,
            &[
                ("sid", sid.to_string()),
                ("record", switch_value(on).to_string()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn rename(&self, sid: usize, name: &str) -> Result<(), ClientError> {
        self.get(
            Self::COMMAND_ENDPOINT,
            &[("sid", sid.to_string()), ("name", name.to_string())],
        )
        .await
        .map(|_| ())
    }

    async fn start_scan(&self) -> Result<ScanInfo, ClientError> {
        let body = self
            .get(Self::SAMPLER_ENDPOINT, &[("action", "scan".to_string())])
            .await?;
        parse(&body, "scan info")
    }

    async fn fetch_samples(&self) -> Result<SampleData, ClientError> {
        let body = self
            .get(Self::SAMPLER_ENDPOINT, &[("action", "fetch".to_string())])
            .await?;
        parse(&body, "sample data")
    }

    async fn transmit(&self) -> Result<(), ClientError> {
        self.get(Self::SAMPLER_ENDPOINT, &[("action", "transmit".to_string())])
            .await
            .map(|_| ())
    }

    /// Forward a firmware image to the hub as a multipart upload. Flashing
    /// takes longer than any control request, so the poll timeout does not
    /// apply here.
    async fn upload_firmware(
        &self,
        file_name: String,
        bytes: Vec<u8>,
    ) -> Result<UpdateResult, ClientError> {
        let url = self.build_url(Self::UPDATE_ENDPOINT);
        debug!("POST {url} ({} bytes)", bytes.len());

        let part = multipart::Part::bytes(bytes).file_name(file_name);
        let form = multipart::Form::new().part("file", part);

        let res = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let status = res.status();
        let body = res.text().await.map_err(ClientError::from_reqwest)?;

        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        parse(&body, "update result")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_client() -> RfHubClient {
        RfHubClient {
            client: Client::new(),
            base_url: "http://192.168.4.1".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }

    mod build_url {
        use super::*;

        #[test]
        fn joins_path_with_leading_slash() {
            let client = create_test_client();
            assert_eq!(client.build_url("/jc"), "http://192.168.4.1/jc");
        }

        #[test]
        fn joins_path_without_leading_slash() {
            let client = create_test_client();
            assert_eq!(client.build_url("jc"), "http://192.168.4.1/jc");
        }
    }

    mod parsing {
        use super::*;

        #[test]
        fn status_report_parses_wire_format() {
            let report: StationStatusReport = parse(
                r#"{"stations":[{"name":"Livingroom Light","status":1,"code":"a9f3"}]}"#,
                "station status",
            )
            .unwrap();

            assert_eq!(report.stations.len(), 1);
            assert_eq!(report.stations[0].name, "Livingroom Light");
            assert_eq!(report.stations[0].status, 1);
            assert_eq!(report.stations[0].code, "a9f3");
        }

        #[test]
        fn scan_info_parses_wire_format() {
            let scan: ScanInfo = parse(r#"{"time":2,"interval":100}"#, "scan info").unwrap();
            assert_eq!(scan.time, 2.0);
            assert_eq!(scan.interval, 100);
        }

        #[test]
        fn malformed_body_is_typed() {
            let result: Result<ScanInfo, ClientError> = parse("not json", "scan info");
            assert!(matches!(result, Err(ClientError::Malformed(_))));
        }
    }

    mod constants {
        use super::*;

        #[test]
        fn api_endpoints_are_correctly_defined() {
            assert_eq!(RfHubClient::STATUS_ENDPOINT, "/jc");
            assert_eq!(RfHubClient::COMMAND_ENDPOINT, "/cc");
            assert_eq!(RfHubClient::SAMPLER_ENDPOINT, "/hrs");
            assert_eq!(RfHubClient::UPDATE_ENDPOINT, "/update");
        }

        #[test]
        fn switch_values_match_wire_protocol() {
            assert_eq!(switch_value(true), "on");
            assert_eq!(switch_value(false), "off");
        }
    }
}
