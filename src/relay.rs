//! Consumers of the published reading snapshots.
//!
//! The link loop publishes into a `watch` channel; each consumer here runs on
//! its own task and only ever sees owned copies. While a consumer is busy,
//! intermediate snapshots collapse into the latest one.

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SinkError;
use crate::models::SensorReading;
use crate::sink::SinkClient;

/// Push every new snapshot to the sink. Rejections and transport errors are
/// logged and the snapshot is dropped.
pub async fn forward(mut readings: watch::Receiver<SensorReading>, sink: SinkClient) {
    while readings.changed().await.is_ok() {
        let reading = readings.borrow_and_update().clone();
        if reading.is_empty() {
            continue;
        }
        match sink.post(&reading).await {
            Ok(()) => debug!("pushed reading to {}", sink.endpoint()),
            Err(SinkError::Rejected(message)) => info!("sink ignored reading: {message}"),
            Err(e) => warn!("{e}"),
        }
    }
}

pub fn render(reading: &SensorReading, json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string(reading)?)
    } else {
        Ok(reading.to_string())
    }
}

/// Print each new snapshot to stdout, one line per update.
pub async fn print(mut readings: watch::Receiver<SensorReading>, json: bool) -> Result<()> {
    while readings.changed().await.is_ok() {
        let reading = readings.borrow_and_update().clone();
        println!("{}", render(&reading, json)?);
    }
    Ok(())
}
