//! Synthetic radio events driven through the link machine, published over a
//! watch channel and forwarded to a live sink.

use std::time::Duration;

use airsense_relay::gatt::{
    HUMIDITY_CHARACTERISTIC, PM2_5_CHARACTERISTIC, SENSOR_SERVICE, TEMPERATURE_CHARACTERISTIC,
};
use airsense_relay::link::{LinkCommand, LinkConfig, LinkEvent, LinkMachine, ServiceHandle};
use airsense_relay::models::SensorReading;
use airsense_relay::relay;
use airsense_relay::server;
use airsense_relay::sink::SinkClient;
use tokio::net::TcpListener;
use tokio::sync::watch;

fn publish(commands: Vec<LinkCommand<u32>>, readings: &watch::Sender<SensorReading>) {
    for command in commands {
        if let LinkCommand::Publish(reading) = command {
            readings.send_replace(reading);
        }
    }
}

async fn wait_for_count(client: &SinkClient, count: usize) -> Vec<SensorReading> {
    for _ in 0..100 {
        let stored = client.readings().await.unwrap();
        if stored.len() >= count {
            return stored;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("sink never reached {count} readings");
}

#[tokio::test]
async fn notifications_reach_the_sink() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, std::future::pending()));
    let client = SinkClient::new(&format!("http://{addr}")).unwrap();

    let (readings_tx, readings_rx) = watch::channel(SensorReading::default());
    tokio::spawn(relay::forward(readings_rx, client.clone()));

    let mut machine: LinkMachine<u32> = LinkMachine::new(LinkConfig::default());
    let service = ServiceHandle {
        uuid: SENSOR_SERVICE,
        index: 0,
    };
    machine.handle(LinkEvent::AdapterState { powered: true });
    machine.handle(LinkEvent::Advertisement {
        peripheral: 7,
        services: vec![SENSOR_SERVICE],
    });
    let session = machine.session().unwrap().id;
    machine.handle(LinkEvent::Connected { session });
    machine.handle(LinkEvent::ServicesDiscovered {
        session,
        services: vec![service],
    });
    machine.handle(LinkEvent::CharacteristicsDiscovered {
        session,
        service,
        characteristics: vec![
            HUMIDITY_CHARACTERISTIC,
            TEMPERATURE_CHARACTERISTIC,
            PM2_5_CHARACTERISTIC,
        ],
    });

    let commands = machine.handle(LinkEvent::Notification {
        session,
        characteristic: TEMPERATURE_CHARACTERISTIC,
        value: 21.5f32.to_ne_bytes().to_vec(),
    });
    publish(commands, &readings_tx);
    let stored = wait_for_count(&client, 1).await;
    assert_eq!(stored[0].temperature, Some(21.5));
    assert_eq!(stored[0].humidity, None);

    let commands = machine.handle(LinkEvent::Notification {
        session,
        characteristic: HUMIDITY_CHARACTERISTIC,
        value: 40.0f32.to_ne_bytes().to_vec(),
    });
    publish(commands, &readings_tx);
    let stored = wait_for_count(&client, 2).await;
    // the second push carries the earlier temperature too
    assert_eq!(stored[1].temperature, Some(21.5));
    assert_eq!(stored[1].humidity, Some(40.0));
}
