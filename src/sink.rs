use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::error::SinkError;
use crate::models::SensorReading;
use crate::server::DATA_PATH;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Message {
    message: String,
}

/// Client for the telemetry sink's `/api/data` endpoint.
#[derive(Debug, Clone)]
pub struct SinkClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SinkClient {
    pub fn new(base_url: &str) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), DATA_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Push one reading. A 400 comes back as [`SinkError::Rejected`]; posting
    /// the same payload again would be rejected again, so callers should not retry.
    pub async fn post(&self, reading: &SensorReading) -> Result<(), SinkError> {
        let body = SensorReading {
            timestamp: None,
            ..reading.clone()
        };
        let response = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        match status {
            StatusCode::CREATED => Ok(()),
            StatusCode::BAD_REQUEST => Err(SinkError::Rejected(message_of(response).await)),
            _ => Err(SinkError::UnexpectedStatus {
                status: status.as_u16(),
                message: message_of(response).await,
            }),
        }
    }

    pub async fn readings(&self) -> Result<Vec<SensorReading>, SinkError> {
        let response = self.http.get(&self.endpoint).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(SinkError::UnexpectedStatus {
                status: status.as_u16(),
                message: message_of(response).await,
            });
        }
        Ok(response.json().await?)
    }
}

async fn message_of(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<Message>(&text)
        .map(|m| m.message)
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_url() {
        let client = SinkClient::new("http://localhost:3000/").unwrap();
        assert_eq!(client.endpoint(), "http://localhost:3000/api/data");
        let client = SinkClient::new("http://10.0.0.2:8080").unwrap();
        assert_eq!(client.endpoint(), "http://10.0.0.2:8080/api/data");
    }
}
