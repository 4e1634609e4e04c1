//! Sink client against a live in-process sink.

use airsense_relay::error::SinkError;
use airsense_relay::models::SensorReading;
use airsense_relay::server;
use airsense_relay::sink::SinkClient;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

async fn start_sink() -> (SinkClient, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(server::serve(listener, async move {
        let _ = stop_rx.await;
    }));
    let client = SinkClient::new(&format!("http://{addr}")).unwrap();
    (client, stop_tx)
}

#[tokio::test]
async fn posted_reading_is_listed_with_timestamp() {
    let (client, _stop) = start_sink().await;

    let reading = SensorReading {
        temperature: Some(21.5),
        ..Default::default()
    };
    client.post(&reading).await.unwrap();

    let stored = client.readings().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].temperature, Some(21.5));
    assert_eq!(stored[0].humidity, None);
    assert_eq!(stored[0].pressure, None);
    assert_eq!(stored[0].pm2_5, None);
    assert!(stored[0].timestamp.is_some());
}

#[tokio::test]
async fn empty_and_zero_readings_are_rejected() {
    let (client, _stop) = start_sink().await;

    let err = client.post(&SensorReading::default()).await.unwrap_err();
    assert!(matches!(err, SinkError::Rejected(ref m) if m == "Sensor data is required"));

    let zero = SensorReading {
        pm2_5: Some(0.0),
        ..Default::default()
    };
    let err = client.post(&zero).await.unwrap_err();
    assert!(matches!(err, SinkError::Rejected(_)));

    assert!(client.readings().await.unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_sink_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = SinkClient::new(&format!("http://{addr}")).unwrap();
    let reading = SensorReading {
        humidity: Some(40.0),
        ..Default::default()
    };
    assert!(matches!(
        client.post(&reading).await,
        Err(SinkError::Http(_))
    ));
}
